//! Performance aligner: reconcile an external (or engine-rendered)
//! note-event list with the written chord positions, then re-synthesize
//! it in expanded-position order.
//!
//! The pipeline follows a fixed step order: clean, classify against the
//! minimal/complete profiles, bucket events by position and pitch,
//! stretch fermatas, walk the expansion with a running real-time clock,
//! and finally derive the metronome beat timeline.  A single unmatched
//! note is logged and skipped; only a systemic onset-count mismatch
//! after the rendered fallback is reported as an error.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use crate::config::EngineOptions;
use crate::error::{EngineError, Result};
use crate::expansion::{ExpandedPosition, Expansion};
use crate::indexer::{NoteRecord, ScoreIndex, DEFAULT_QPM};
use crate::metronome::{self, MetronomeBeat};
use crate::model::{LyricLineId, Performance, PerformedNote, TempoChange, EPS};
use crate::parts::PartsTable;
use crate::perform::{self, RENDER_VELOCITY};
use crate::sections::SectionsTable;

/// Tempo-drop ratio past which a fermata is assumed to be baked into
/// the supplied tempo data.
const FERMATA_TEMPO_DROP: f64 = 0.7;

/// Which play-through the cleaned event list matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// One onset per audible written position (no repeats)
    Minimal,
    /// One onset per audible expanded position (every repeat played)
    Complete,
}

/// One performed event bucketed under a position, with the onset of the
/// rank group it arrived in.
#[derive(Debug, Clone)]
pub struct Bucketed {
    pub event: PerformedNote,
    /// Start time of the onset group this event belonged to
    pub onset: f64,
}

/// Real-time data reconciled onto one written chord position.
#[derive(Debug, Clone, Serialize)]
pub struct PositionTiming {
    /// Onset in seconds
    pub start: f64,
    /// End in seconds (start of the next position)
    pub end: f64,
    /// Tempo in effect at the onset
    pub qpm: f64,
    /// Start came from a real event (false: synthesized from tempo)
    pub measured: bool,
    /// A fermata stretch has been applied here
    pub fermata_applied: bool,
    /// Performed events by pitch, in time order
    #[serde(skip)]
    pub events: HashMap<u8, Vec<Bucketed>>,
}

impl PositionTiming {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// One synthesized note in the playback timeline.
#[derive(Debug, Clone, Serialize)]
pub struct SynthNote {
    /// Arena index of the notated note
    pub note: usize,
    pub pitch: u8,
    pub start: f64,
    pub end: f64,
    pub velocity: u8,
}

/// Real-time span of one expanded position in playback order.
#[derive(Debug, Clone, Serialize)]
pub struct ExpandedTiming {
    pub start: f64,
    pub end: f64,
    pub notes: Vec<SynthNote>,
}

/// Full aligner output: per-written-position timings, the playback
/// timeline over expanded positions, and the metronome beat list.
#[derive(Debug, Clone, Serialize)]
pub struct Alignment {
    pub profile: Profile,
    pub positions: Vec<PositionTiming>,
    pub expanded: Vec<ExpandedTiming>,
    pub metronome: Vec<MetronomeBeat>,
}

/// Align a performance against the annotated score.  With no external
/// performance (or an empty one) the engine renders its own minimal
/// profile first.
pub fn align(
    index: &ScoreIndex,
    parts: &PartsTable,
    sections: &SectionsTable,
    expansion: &Expansion,
    performance: Option<&Performance>,
    options: &EngineOptions,
) -> Result<Alignment> {
    if index.positions.is_empty() || expansion.is_empty() {
        return Err(EngineError::EmptyScore);
    }

    let minimal = index.audible_position_count();
    let complete = expansion.audible.len();

    let (mut events, mut tempos, engine_generated) = match performance {
        Some(p) if !p.notes.is_empty() => (clean(&p.notes), sorted_tempos(&p.tempos), false),
        _ => {
            let rendered = perform::render_minimal(index);
            (clean(&rendered.notes), rendered.tempos, true)
        }
    };
    if events.is_empty() {
        return Err(EngineError::EmptyPerformance);
    }

    let profile = match classify(&events, minimal, complete, engine_generated) {
        Some(p) => p,
        None if engine_generated => {
            log::error!(
                "rendered performance has {} distinct onsets, expected {} (minimal) or {} (complete); aborting alignment",
                distinct_starts(&events),
                minimal,
                complete
            );
            return Err(EngineError::CountMismatch {
                found: distinct_starts(&events),
                minimal,
                complete,
            });
        }
        None => {
            log::warn!(
                "performance has {} distinct onsets, expected {} (minimal) or {} (complete); falling back to a rendered performance",
                distinct_starts(&events),
                minimal,
                complete
            );
            let rendered = perform::render_minimal(index);
            events = clean(&rendered.notes);
            tempos = rendered.tempos;
            match classify(&events, minimal, complete, true) {
                Some(p) => p,
                None => {
                    log::error!(
                        "fallback render has {} distinct onsets, expected {} (minimal) or {} (complete); aborting alignment",
                        distinct_starts(&events),
                        minimal,
                        complete
                    );
                    return Err(EngineError::CountMismatch {
                        found: distinct_starts(&events),
                        minimal,
                        complete,
                    });
                }
            }
        }
    };

    // ── Bucket by position ──────────────────────────────────────────
    let (onsets, groups) = group_by_onset(&events);
    let n = index.positions.len();
    let mut buckets: Vec<HashMap<u8, Vec<Bucketed>>> = vec![HashMap::new(); n];
    let mut measured_start: Vec<Option<f64>> = vec![None; n];
    let mut expanded_onset: Vec<Option<f64>> = vec![None; expansion.len()];
    let mut expanded_max_end: Vec<Option<f64>> = vec![None; expansion.len()];

    match profile {
        Profile::Minimal => {
            let audible_written: Vec<usize> = index
                .positions
                .iter()
                .filter(|p| p.audible)
                .map(|p| p.index)
                .collect();
            for (&p, (&onset, group)) in audible_written.iter().zip(onsets.iter().zip(&groups)) {
                measured_start[p] = Some(onset);
                for ev in group {
                    buckets[p]
                        .entry(ev.pitch)
                        .or_default()
                        .push(Bucketed { event: ev.clone(), onset });
                }
            }
        }
        Profile::Complete => {
            for (&e, (&onset, group)) in expansion.audible.iter().zip(onsets.iter().zip(&groups)) {
                let p = expansion.expanded[e].position;
                expanded_onset[e] = Some(onset);
                let mut max_end = onset;
                for ev in group {
                    max_end = max_end.max(ev.end);
                    buckets[p]
                        .entry(ev.pitch)
                        .or_default()
                        .push(Bucketed { event: ev.clone(), onset });
                }
                expanded_max_end[e] = Some(max_end);
                if measured_start[p].is_none() {
                    measured_start[p] = Some(onset);
                }
            }
        }
    }

    let mut positions = reconcile_positions(index, &measured_start, buckets, &tempos);
    apply_fermatas(&mut positions, &options.fermatas, profile);

    let expanded = build_expanded_timeline(
        index,
        parts,
        sections,
        expansion,
        &positions,
        &expanded_onset,
        &expanded_max_end,
        profile,
        options,
    );

    let metronome = metronome::derive_metronome(index, expansion, &positions, &expanded);

    Ok(Alignment {
        profile,
        positions,
        expanded,
        metronome,
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Clean and classify
// ═══════════════════════════════════════════════════════════════════════

/// Sort by (start, pitch, duration) and drop exact duplicates (same
/// start, end, pitch), which arise from doubled parts.
fn clean(notes: &[PerformedNote]) -> Vec<PerformedNote> {
    let mut events = notes.to_vec();
    events.sort_by(|a, b| {
        a.start
            .partial_cmp(&b.start)
            .unwrap_or(Ordering::Equal)
            .then(a.pitch.cmp(&b.pitch))
            .then(
                a.duration()
                    .partial_cmp(&b.duration())
                    .unwrap_or(Ordering::Equal),
            )
    });
    events.dedup_by(|a, b| {
        (a.start - b.start).abs() < EPS && (a.end - b.end).abs() < EPS && a.pitch == b.pitch
    });
    events
}

fn sorted_tempos(tempos: &[TempoChange]) -> Vec<TempoChange> {
    let mut out = tempos.to_vec();
    out.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(Ordering::Equal));
    out
}

/// Number of distinct onset instants in a sorted event list.
fn distinct_starts(events: &[PerformedNote]) -> usize {
    let mut count = 0;
    let mut last = f64::NEG_INFINITY;
    for ev in events {
        if ev.start - last > EPS {
            count += 1;
            last = ev.start;
        }
    }
    count
}

/// Match the distinct onset count against the two profiles.  When the
/// counts coincide (a score with no repeats) a rendered input is known
/// to be minimal by construction; an external one counts as complete.
fn classify(
    events: &[PerformedNote],
    minimal: usize,
    complete: usize,
    engine_generated: bool,
) -> Option<Profile> {
    let d = distinct_starts(events);
    if engine_generated && minimal > 0 && d == minimal {
        Some(Profile::Minimal)
    } else if complete > 0 && d == complete {
        Some(Profile::Complete)
    } else if minimal > 0 && d == minimal {
        Some(Profile::Minimal)
    } else {
        None
    }
}

/// Group sorted events into onset ranks: events whose starts coincide
/// within tolerance share one rank.
fn group_by_onset(events: &[PerformedNote]) -> (Vec<f64>, Vec<Vec<PerformedNote>>) {
    let mut onsets: Vec<f64> = Vec::new();
    let mut groups: Vec<Vec<PerformedNote>> = Vec::new();
    for ev in events {
        if onsets.last().map_or(true, |&o| ev.start - o > EPS) {
            onsets.push(ev.start);
            groups.push(Vec::new());
        }
        if let Some(group) = groups.last_mut() {
            group.push(ev.clone());
        }
    }
    (onsets, groups)
}

/// Tempo in effect at a point in seconds (last change at-or-before).
fn qpm_at_time(tempos: &[TempoChange], time: f64) -> f64 {
    let mut qpm = DEFAULT_QPM;
    for t in tempos {
        if t.time <= time + EPS {
            qpm = t.qpm;
        } else {
            break;
        }
    }
    qpm
}

// ═══════════════════════════════════════════════════════════════════════
// Position reconciliation
// ═══════════════════════════════════════════════════════════════════════

/// Assign real start/end times to every written position.  Measured
/// positions take their onset from the bucketed events; silent positions
/// (rests, tied continuations) get a span synthesized from the previous
/// measured position's tempo and their own notated duration, subtracted
/// from that position's measured duration so total elapsed time stays
/// consistent.
fn reconcile_positions(
    index: &ScoreIndex,
    measured_start: &[Option<f64>],
    buckets: Vec<HashMap<u8, Vec<Bucketed>>>,
    tempos: &[TempoChange],
) -> Vec<PositionTiming> {
    let n = index.positions.len();
    let mut out: Vec<PositionTiming> = buckets
        .into_iter()
        .enumerate()
        .map(|(i, events)| PositionTiming {
            start: 0.0,
            end: 0.0,
            qpm: DEFAULT_QPM,
            measured: measured_start[i].is_some(),
            fermata_applied: false,
            events,
        })
        .collect();

    for i in 0..n {
        if let Some(s) = measured_start[i] {
            out[i].start = s;
            out[i].qpm = qpm_at_time(tempos, s);
        }
    }
    let measured: Vec<usize> = (0..n).filter(|&i| measured_start[i].is_some()).collect();

    // Interior: each gap between consecutive measured positions absorbs
    // the inferred spans of the silent positions inside it.
    for w in measured.windows(2) {
        let (p, q) = (w[0], w[1]);
        let t_p = out[p].start;
        let t_q = out[q].start;
        let avail = (t_q - t_p).max(0.0);
        let spq = 60.0 / out[p].qpm.max(1.0);
        if q == p + 1 {
            out[p].end = t_q;
            continue;
        }
        let spans: Vec<f64> = (p + 1..q)
            .map(|i| index.positions[i].qlen() * spq)
            .collect();
        let total: f64 = spans.iter().sum();
        if total + EPS < avail {
            out[p].end = t_q - total;
        } else {
            log::warn!(
                "inferred rest spans at positions {}..{} ({:.3}s) exceed the measured gap {:.3}s, distributing proportionally",
                p + 1,
                q,
                total,
                avail
            );
            let own = index.positions[p].qlen() * spq;
            let weights = (own + total).max(EPS);
            out[p].end = t_p + avail * own / weights;
        }
        let scale = if total + EPS < avail {
            1.0
        } else {
            (t_q - out[p].end) / total.max(EPS)
        };
        let mut t = out[p].end;
        for (k, i) in (p + 1..q).enumerate() {
            out[i].start = t;
            out[i].end = t + spans[k] * scale;
            out[i].qpm = out[p].qpm;
            t = out[i].end;
        }
        out[q - 1].end = t_q;
    }

    // Tail: the last measured position ends with its longest event;
    // trailing silents run forward from there.
    if let Some(&last) = measured.last() {
        let spq = 60.0 / out[last].qpm.max(1.0);
        let max_end = out[last]
            .events
            .values()
            .flat_map(|v| v.iter())
            .map(|b| b.event.end)
            .fold(f64::NEG_INFINITY, f64::max);
        out[last].end = if max_end.is_finite() && max_end > out[last].start {
            max_end
        } else {
            out[last].start + index.positions[last].qlen() * spq
        };
        let mut t = out[last].end;
        for i in last + 1..n {
            out[i].start = t;
            out[i].end = t + index.positions[i].qlen() * spq;
            out[i].qpm = out[last].qpm;
            t = out[i].end;
        }
    }

    // Head: leading silents run backward from the first onset, clamped
    // at zero.
    if let Some(&first) = measured.first() {
        let spq = 60.0 / out[first].qpm.max(1.0);
        let mut t = out[first].start;
        for i in (0..first).rev() {
            out[i].end = t;
            out[i].start = (t - index.positions[i].qlen() * spq).max(0.0);
            out[i].qpm = out[first].qpm;
            t = out[i].start;
        }
    }

    out
}

/// Stretch fermata positions.  A fermata is skipped when its multiplier
/// is not a stretch, the position is out of range or already stretched,
/// or the local tempo already dropped enough to contain the hold.  On a
/// rendered profile every later row shifts by the stretch so the table
/// stays contiguous; a measured performance keeps its own later onsets.
fn apply_fermatas(
    positions: &mut [PositionTiming],
    fermatas: &[crate::model::Fermata],
    profile: Profile,
) {
    for fermata in fermatas {
        let p = fermata.position;
        if fermata.duration_factor <= 1.0 || p >= positions.len() {
            continue;
        }
        if positions[p].fermata_applied {
            continue;
        }
        let prev_qpm = if p > 0 { positions[p - 1].qpm } else { positions[p].qpm };
        if positions[p].qpm < FERMATA_TEMPO_DROP * prev_qpm {
            log::debug!(
                "fermata at position {} skipped, tempo already dropped {:.0} -> {:.0}",
                p,
                prev_qpm,
                positions[p].qpm
            );
            positions[p].fermata_applied = true;
            continue;
        }
        let delta = positions[p].duration() * (fermata.duration_factor - 1.0);
        positions[p].end += delta;
        for bucket in positions[p].events.values_mut() {
            for b in bucket.iter_mut() {
                b.event.end += delta;
            }
        }
        if profile == Profile::Minimal {
            for later in positions[p + 1..].iter_mut() {
                later.start += delta;
                later.end += delta;
                for bucket in later.events.values_mut() {
                    for b in bucket.iter_mut() {
                        b.onset += delta;
                        b.event.start += delta;
                        b.event.end += delta;
                    }
                }
            }
        }
        positions[p].fermata_applied = true;
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Expansion walk
// ═══════════════════════════════════════════════════════════════════════

#[allow(clippy::too_many_arguments)]
fn build_expanded_timeline(
    index: &ScoreIndex,
    parts: &PartsTable,
    sections: &SectionsTable,
    expansion: &Expansion,
    positions: &[PositionTiming],
    expanded_onset: &[Option<f64>],
    expanded_max_end: &[Option<f64>],
    profile: Profile,
    options: &EngineOptions,
) -> Vec<ExpandedTiming> {
    let durations = match profile {
        Profile::Minimal => expansion
            .expanded
            .iter()
            .map(|e| positions[e.position].duration())
            .collect(),
        Profile::Complete => {
            expanded_durations(index, expansion, positions, expanded_onset, expanded_max_end)
        }
    };

    // Ties: continuation arena index -> head arena index.
    let mut head_of: HashMap<usize, usize> = HashMap::new();
    for (i, note) in index.notes.iter().enumerate() {
        if let Some(target) = note.tie_to {
            head_of.insert(target, i);
        }
    }

    let mut t = match profile {
        Profile::Minimal => expansion
            .expanded
            .first()
            .map(|e| positions[e.position].start)
            .unwrap_or(0.0),
        Profile::Complete => {
            let lead: f64 = expansion
                .audible
                .first()
                .map(|&first| durations[..first].iter().sum())
                .unwrap_or(0.0);
            expansion
                .audible
                .first()
                .and_then(|&first| expanded_onset[first])
                .map(|onset| (onset - lead).max(0.0))
                .unwrap_or(0.0)
        }
    };

    let mut out = Vec::with_capacity(expansion.len());
    for e in &expansion.expanded {
        // A complete profile re-anchors at every measured onset so the
        // playback timeline cannot drift from the recording.
        let start = match (profile, expanded_onset[e.index]) {
            (Profile::Complete, Some(onset)) => onset,
            _ => t,
        };
        let end = start + durations[e.index];
        let notes = if e.skip {
            Vec::new()
        } else {
            synth_notes(index, parts, expansion, positions, e, start, &head_of, options)
        };
        out.push(ExpandedTiming { start, end, notes });
        t = end;

        let boundary = expansion
            .expanded
            .get(e.index + 1)
            .map_or(true, |next| next.section != e.section);
        if boundary
            && sections
                .sections
                .get(e.section)
                .map_or(false, |s| s.pause_after)
        {
            t += options.tuning.section_pause;
        }
    }
    out
}

/// Per-expanded real durations for a complete profile: gaps between
/// consecutive measured onsets, minus the inferred spans of the silent
/// expanded positions between them.
fn expanded_durations(
    index: &ScoreIndex,
    expansion: &Expansion,
    positions: &[PositionTiming],
    expanded_onset: &[Option<f64>],
    expanded_max_end: &[Option<f64>],
) -> Vec<f64> {
    let m = expansion.len();
    let mut dur = vec![0.0; m];
    let span = |e: usize, qpm: f64| {
        index.positions[expansion.expanded[e].position].qlen() * 60.0 / qpm.max(1.0)
    };

    for (k, &e) in expansion.audible.iter().enumerate() {
        let p = expansion.expanded[e].position;
        let qpm = positions[p].qpm;
        let onset = match expanded_onset[e] {
            Some(o) => o,
            None => continue,
        };
        match expansion.audible.get(k + 1) {
            Some(&e2) => {
                let onset2 = expanded_onset[e2].unwrap_or(onset);
                let gross = (onset2 - onset).max(0.0);
                let spans: Vec<f64> = (e + 1..e2).map(|s| span(s, qpm)).collect();
                let total: f64 = spans.iter().sum();
                if total + EPS < gross {
                    dur[e] = gross - total;
                    for (i, s) in (e + 1..e2).enumerate() {
                        dur[s] = spans[i];
                    }
                } else {
                    let own = span(e, qpm);
                    let weights = (own + total).max(EPS);
                    dur[e] = gross * own / weights;
                    for (i, s) in (e + 1..e2).enumerate() {
                        dur[s] = gross * spans[i] / weights;
                    }
                }
            }
            None => {
                let max_end = expanded_max_end[e].unwrap_or(onset);
                dur[e] = (max_end - onset).max(0.0);
                if dur[e] <= EPS {
                    dur[e] = span(e, qpm);
                }
                for s in e + 1..m {
                    dur[s] = span(s, qpm);
                }
            }
        }
    }

    if let Some(&first) = expansion.audible.first() {
        let p = expansion.expanded[first].position;
        for s in 0..first {
            dur[s] = span(s, positions[p].qpm);
        }
    }
    dur
}

/// Synthesize the notes sounding at one expanded position.
#[allow(clippy::too_many_arguments)]
fn synth_notes(
    index: &ScoreIndex,
    parts: &PartsTable,
    expansion: &Expansion,
    positions: &[PositionTiming],
    e: &ExpandedPosition,
    start: f64,
    head_of: &HashMap<usize, usize>,
    options: &EngineOptions,
) -> Vec<SynthNote> {
    let timing = &positions[e.position];
    let mut notes = Vec::new();

    for &ni in &index.positions[e.position].notes {
        let note = &index.notes[ni];
        if note.rest || note.cue || !e.staff_active(note.staff) {
            continue;
        }
        if options.melody_only && !parts.is_melody_note(ni) {
            continue;
        }
        let pitch = match note.midi {
            Some(m) => m.clamp(0, 127) as u8,
            None => continue,
        };

        if note.tied_from {
            // A tied continuation stays silent while its head sounded
            // earlier in this section and it carries no syllable of its
            // own; otherwise it re-strikes from notation.
            let head_played = head_of
                .get(&ni)
                .and_then(|&h| index.notes[h].position)
                .map(|hp| {
                    expansion
                        .occurrences_in_section(hp, e.section)
                        .iter()
                        .any(|&x| x < e.index)
                })
                .unwrap_or(false);
            if head_played && !note_re_articulates(e, note) {
                continue;
            }
            let chain_q = perform::chain_end(index, ni) - note.start;
            let end = start + chain_q * 60.0 / timing.qpm.max(1.0);
            notes.push(SynthNote {
                note: ni,
                pitch,
                start,
                end,
                velocity: RENDER_VELOCITY,
            });
            continue;
        }

        let ordinal = expansion.occurrence_ordinal(e.index);
        let bucketed = timing.events.get(&pitch).and_then(|v| {
            if v.is_empty() {
                None
            } else {
                v.get(ordinal.min(v.len() - 1))
            }
        });
        let b = match bucketed {
            Some(b) => b,
            None => {
                log::warn!(
                    "no performed event for note {} (pitch {}) at position {}",
                    note.id,
                    pitch,
                    e.position
                );
                continue;
            }
        };
        let offset = (b.event.start - b.onset).max(0.0);
        let synth_start = start + offset;
        let mut synth_end = synth_start + b.event.duration();

        if let Some(target_idx) = note.tie_to {
            let target = &index.notes[target_idx];
            let continuation = target
                .position
                .and_then(|tp| occurrence_after(expansion, tp, e.section, e.index));
            let merge = match continuation {
                Some(te) => !note_re_articulates(&expansion.expanded[te], target),
                // Tie leaves the played material: dropped, not guessed.
                None => false,
            };
            if !merge {
                if let Some(tp) = target.position {
                    let share = (positions[tp].start - timing.start).max(0.0);
                    if share > EPS {
                        synth_end = synth_end.min(start + share);
                    }
                }
            }
        }

        notes.push(SynthNote {
            note: ni,
            pitch,
            start: synth_start,
            end: synth_end,
            velocity: b.event.velocity,
        });
    }
    notes
}

/// First expanded occurrence of `position` in `section` after index `e`.
fn occurrence_after(
    expansion: &Expansion,
    position: usize,
    section: usize,
    e: usize,
) -> Option<usize> {
    expansion
        .occurrences_in_section(position, section)
        .iter()
        .copied()
        .find(|&x| x > e)
}

/// Whether the note carries a non-elided syllable that is active at the
/// given expanded position (implying an audible re-articulation).
fn note_re_articulates(e: &ExpandedPosition, note: &NoteRecord) -> bool {
    note.lyrics.iter().any(|l| {
        !l.is_elision()
            && e.syllables
                .iter()
                .any(|s| s.line == LyricLineId::new(note.staff, l.line) && s.text == l.text)
    })
}
