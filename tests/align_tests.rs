//! End-to-end tests for performance alignment: the engine-rendered
//! minimal profile, external complete performances, fermatas, tie
//! handling, and the derived metronome track.

mod common;

use scoresync::{
    annotate, Direction, EngineError, EngineOptions, Fermata, Performance, PerformedNote, Profile,
};

use common::{pickup_score, simple_hymn, six_eight_score, tied_melody};

const EPS: f64 = 1e-6;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < EPS
}

// ═══════════════════════════════════════════════════════════════════════
// Minimal profile (engine-rendered)
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn engine_render_aligns_every_position() {
    let score = annotate(simple_hymn(), None, EngineOptions::default());
    let alignment = score.align(None).unwrap();

    assert_eq!(alignment.profile, Profile::Minimal);
    assert_eq!(alignment.positions.len(), 16);
    for (i, p) in alignment.positions.iter().enumerate() {
        assert!(
            close(p.start, i as f64 * 0.5),
            "position {} should start at {}s under 120 QPM, got {}",
            i,
            i as f64 * 0.5,
            p.start
        );
        assert!(p.measured, "every hymn position sounds in the render");
        assert!(close(p.qpm, 120.0));
    }
    assert!(
        close(alignment.positions[15].end, 8.0),
        "the last chord rings to the end of its measure"
    );

    assert_eq!(
        alignment.expanded.len(),
        32,
        "playback covers all four section passes"
    );
    // Four sung voices per chord in the synthesized playback.
    assert_eq!(alignment.expanded[0].notes.len(), 4);

    println!(
        "✓ simple hymn aligns as {:?}: {} positions, {} playback events",
        alignment.profile,
        alignment.positions.len(),
        alignment.expanded.len()
    );
}

#[test]
fn sections_pause_between_passes() {
    let score = annotate(simple_hymn(), None, EngineOptions::default());
    let alignment = score.align(None).unwrap();
    let pause = 0.25;

    // Verse 1 ends after expanded position 7; the chorus starts late by
    // one section pause, and so does each later pass.
    let e7 = &alignment.expanded[7];
    let e8 = &alignment.expanded[8];
    assert!(
        close(e8.start, e7.end + pause),
        "chorus should start {}s after the verse ends, got {} vs {}",
        pause,
        e8.start,
        e7.end + pause
    );
    let e15 = &alignment.expanded[15];
    let e16 = &alignment.expanded[16];
    assert!(
        close(e16.start, e15.end + pause),
        "verse 2 should start one pause after the chorus"
    );
}

#[test]
fn melody_only_renders_one_note_per_chord() {
    let options = EngineOptions {
        melody_only: true,
        ..Default::default()
    };
    let score = annotate(simple_hymn(), None, options);
    let alignment = score.align(None).unwrap();

    assert_eq!(alignment.profile, Profile::Minimal);
    for (e, timing) in alignment.expanded.iter().enumerate() {
        assert_eq!(
            timing.notes.len(),
            1,
            "expanded position {} should keep only the melody note",
            e
        );
        assert_eq!(timing.notes[0].pitch, 72, "the soprano C5 is the melody");
    }
}

#[test]
fn empty_score_is_rejected() {
    let score = annotate(common::document(Vec::new()), None, EngineOptions::default());
    let err = score.align(None).unwrap_err();
    assert!(
        matches!(err, EngineError::EmptyScore),
        "alignment on an empty score must fail with EmptyScore, got {}",
        err
    );
}

#[test]
fn collapsed_render_onsets_report_a_count_mismatch() {
    // An absurd tempo squeezes every rendered onset inside the grouping
    // tolerance, so the render matches neither profile.
    let mut doc = simple_hymn();
    doc.measures[0].directions.push(Direction {
        tempo: Some(1e12),
        ..Default::default()
    });
    let score = annotate(doc, None, EngineOptions::default());
    let err = score.align(None).unwrap_err();
    match err {
        EngineError::CountMismatch { found, minimal, complete } => {
            assert_eq!(found, 1, "all onsets collapse onto one instant");
            assert_eq!(minimal, 16);
            assert_eq!(complete, 32);
        }
        other => panic!("expected a count mismatch, got {}", other),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Fermatas
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn fermata_doubles_its_position() {
    let options = EngineOptions {
        fermatas: vec![Fermata {
            position: 3,
            duration_factor: 2.0,
        }],
        ..Default::default()
    };
    let score = annotate(simple_hymn(), None, options);
    let alignment = score.align(None).unwrap();

    let held = &alignment.positions[3];
    assert!(held.fermata_applied);
    assert!(
        close(held.duration(), 1.0),
        "a doubled quarter at 120 QPM lasts 1s, got {}",
        held.duration()
    );
    assert!(
        !alignment.positions[2].fermata_applied,
        "neighboring positions keep their length"
    );

    // The running playback clock absorbs the stretch.
    let e3 = &alignment.expanded[3];
    let e4 = &alignment.expanded[4];
    assert!(close(e3.end - e3.start, 1.0));
    assert!(close(e4.start, e3.end), "the next chord waits for the hold");
    // The held chord's own notes ring through the stretch.
    assert!(close(e3.notes[0].end - e3.notes[0].start, 1.0));

    // The hold is a property of the written position: verse 2 holds too.
    let e19 = &alignment.expanded[19];
    assert!(
        close(e19.end - e19.start, 1.0),
        "the second verse holds the same chord"
    );

    println!("✓ fermata at position 3: {}s hold", e3.end - e3.start);
}

#[test]
fn fermata_shift_keeps_positions_contiguous() {
    let options = EngineOptions {
        fermatas: vec![Fermata {
            position: 3,
            duration_factor: 2.0,
        }],
        ..Default::default()
    };
    let score = annotate(simple_hymn(), None, options);
    let alignment = score.align(None).unwrap();

    assert!(
        close(alignment.positions[4].start, 2.5),
        "the row after the hold starts late by the stretch, got {}",
        alignment.positions[4].start
    );
    assert!(close(alignment.positions[15].end, 8.5));
    for w in alignment.positions.windows(2) {
        assert!(
            w[0].end <= w[1].start + EPS,
            "rows must stay contiguous through a hold"
        );
    }
    // The row table, the playback clock, and the metronome agree on
    // where the music resumes.
    assert!(close(alignment.expanded[4].start, alignment.positions[4].start));
    assert!(
        close(alignment.metronome[4].time, 2.5),
        "the next downbeat waits out the hold"
    );
}

// ═══════════════════════════════════════════════════════════════════════
// External performances
// ═══════════════════════════════════════════════════════════════════════

/// A played-through hymn: every expanded pass performed as block chords,
/// one onset every 0.4 seconds.
fn played_hymn() -> Performance {
    let mut notes = Vec::new();
    for k in 0..32usize {
        let start = k as f64 * 0.4;
        for pitch in [72u8, 64, 55, 48] {
            notes.push(PerformedNote {
                pitch,
                start,
                end: start + 0.35,
                velocity: 90,
            });
        }
    }
    Performance {
        notes,
        tempos: Vec::new(),
    }
}

#[test]
fn external_complete_performance_reanchors_playback() {
    let score = annotate(simple_hymn(), None, EngineOptions::default());
    let alignment = score.align(Some(&played_hymn())).unwrap();

    assert_eq!(
        alignment.profile,
        Profile::Complete,
        "32 distinct onsets match the expanded count"
    );
    for (e, timing) in alignment.expanded.iter().enumerate() {
        assert!(
            close(timing.start, e as f64 * 0.4),
            "expanded position {} should start where it was played, got {}",
            e,
            timing.start
        );
    }
    // No extra silence between sections: the performance already fixes
    // every onset.
    assert!(close(alignment.expanded[8].start, 3.2));

    // The positions table keeps the first pass of each written position.
    for (p, timing) in alignment.positions.iter().enumerate() {
        assert!(timing.measured);
        assert!(
            close(timing.start, p as f64 * 0.4),
            "written position {} was first played at {}s",
            p,
            p as f64 * 0.4
        );
    }

    // Second-pass synthesis pulls the later played events.
    let verse2_first = &alignment.expanded[16];
    assert!(close(verse2_first.notes[0].start, 6.4));
    assert_eq!(verse2_first.notes.len(), 4);

    println!(
        "✓ played hymn aligns as {:?} with re-anchored playback",
        alignment.profile
    );
}

#[test]
fn mismatched_external_performance_falls_back_to_render() {
    let mut garbled = played_hymn();
    garbled.notes.truncate(5);
    let score = annotate(simple_hymn(), None, EngineOptions::default());
    let alignment = score.align(Some(&garbled)).unwrap();

    assert_eq!(
        alignment.profile,
        Profile::Minimal,
        "an unusable performance falls back to the engine render"
    );
    assert!(close(alignment.positions[1].start, 0.5));
}

// ═══════════════════════════════════════════════════════════════════════
// Ties
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn tie_sustains_across_the_barline() {
    let score = annotate(tied_melody(false), None, EngineOptions::default());
    let alignment = score.align(None).unwrap();

    assert_eq!(alignment.positions.len(), 4);
    assert!(
        !alignment.positions[2].measured,
        "a continuation-only position is silent in the render"
    );
    assert!(close(alignment.positions[2].start, 2.0));
    assert!(close(alignment.positions[2].end, 3.0));

    let head = &alignment.expanded[0].notes[0];
    assert_eq!(head.pitch, 72);
    assert!(
        close(head.end, 3.0),
        "the tied half notes ring as one 2-bar event, got end {}",
        head.end
    );
    assert!(
        alignment.expanded[2].notes.is_empty(),
        "the continuation must not strike again"
    );

    println!("✓ tie chain: one event from 0s to {}s", head.end);
}

#[test]
fn tie_rearticulates_under_a_new_syllable() {
    let score = annotate(tied_melody(true), None, EngineOptions::default());
    let alignment = score.align(None).unwrap();

    let head = &alignment.expanded[0].notes[0];
    assert!(
        close(head.end, 2.0),
        "the head is clipped where the re-struck syllable takes over, got {}",
        head.end
    );

    let restruck = &alignment.expanded[2].notes[0];
    assert_eq!(restruck.pitch, 72);
    assert!(close(restruck.start, 2.0));
    assert!(
        close(restruck.end, 3.0),
        "the re-struck note lasts its notated remainder"
    );
    assert_eq!(restruck.velocity, 80);
}

// ═══════════════════════════════════════════════════════════════════════
// Metronome
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn six_eight_metronome_clicks_in_twos() {
    let score = annotate(six_eight_score(), None, EngineOptions::default());
    let alignment = score.align(None).unwrap();
    let beats = &alignment.metronome;

    assert_eq!(beats.len(), 2, "6/8 clicks on the dotted quarters");
    assert!(close(beats[0].time, 0.0));
    assert!(
        close(beats[1].time, 0.75),
        "the second click lands on the fourth eighth (1.5 quarters), got {}s",
        beats[1].time
    );
    assert!(beats[0].downbeat);
    assert!(!beats[1].downbeat);
    assert_eq!((beats[0].number, beats[1].number), (1, 2));
    for beat in beats {
        assert!(
            close(beat.bpm, 80.0),
            "120 QPM over dotted-quarter beats is 80 BPM, got {}",
            beat.bpm
        );
    }

    println!("✓ 6/8 at 120 QPM: {} clicks at 80 BPM", beats.len());
}

#[test]
fn pickup_beats_count_back_from_the_barline() {
    let score = annotate(pickup_score(), None, EngineOptions::default());
    let alignment = score.align(None).unwrap();
    let beats = &alignment.metronome;

    let numbers: Vec<u32> = beats.iter().map(|b| b.number).collect();
    assert_eq!(
        numbers,
        vec![4, 1, 2, 3, 4, 1, 2, 3],
        "the pickup takes beat 4; the closing bar opens on beat 1"
    );
    let downbeats: Vec<bool> = beats.iter().map(|b| b.downbeat).collect();
    assert_eq!(
        downbeats,
        vec![false, true, false, false, false, true, false, false]
    );
    for (i, beat) in beats.iter().enumerate() {
        assert!(
            close(beat.time, i as f64 * 0.5),
            "beat {} should click at {}s",
            i,
            i as f64 * 0.5
        );
    }

    println!("✓ pickup score: beat numbers {:?}", numbers);
}
