//! End-to-end tests for the annotation pipeline: position indexing,
//! parts resolution, section inference, and expansion on documents
//! built in code.

mod common;

use pretty_assertions::assert_eq;
use scoresync::{annotate, EngineOptions, LyricLineId, PartDef, PartsSpec, Placement};
use scoresync::sections::{SectionKind, SectionPlacement};

use common::{pickup_score, simple_hymn};

fn options_with_parts(parts: PartsSpec) -> EngineOptions {
    EngineOptions {
        parts,
        ..Default::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Positions
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn hymn_positions_are_contiguous_and_ordered() {
    let score = annotate(simple_hymn(), None, EngineOptions::default());

    assert_eq!(
        score.index.positions.len(),
        16,
        "16 quarter chords should make 16 positions"
    );
    for (i, pos) in score.index.positions.iter().enumerate() {
        assert_eq!(pos.index, i, "positions must be numbered contiguously");
        assert!(
            (pos.start - i as f64).abs() < 1e-9,
            "position {} should start at quarter {}",
            i,
            i
        );
        assert_eq!(
            pos.notes.len(),
            4,
            "every chord of the hymn has four voices"
        );
        assert!(pos.audible, "no rests anywhere in the hymn");
    }
    for w in score.index.positions.windows(2) {
        assert!(w[0].start < w[1].start, "onsets must increase strictly");
    }

    println!(
        "✓ simple hymn: {} positions over {} measures",
        score.index.positions.len(),
        score.index.measures.len()
    );
}

// ═══════════════════════════════════════════════════════════════════════
// Parts
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn default_layout_is_melody_plus_accompaniment() {
    let score = annotate(simple_hymn(), None, EngineOptions::default());

    let ids: Vec<&str> = score.parts.parts.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["melody", "accompaniment"]);

    let soprano = score.annotation("s0").unwrap();
    assert!(soprano.melody, "top staff-1 note carries the melody");
    assert_eq!(soprano.parts, vec!["melody"]);
    assert_eq!(
        soprano.lyric_lines,
        vec![LyricLineId::new(1, 1), LyricLineId::new(1, 2)],
        "the first soprano note sings both verse lines"
    );

    let bass = score.annotation("b0").unwrap();
    assert!(!bass.melody);
    assert_eq!(bass.parts, vec!["accompaniment"]);
}

#[test]
fn satb_template_gives_each_voice_its_part() {
    let score = annotate(
        simple_hymn(),
        None,
        options_with_parts(PartsSpec::Template("SATB".into())),
    );

    let ids: Vec<&str> = score.parts.parts.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["soprano", "alto", "tenor", "bass"]);

    assert_eq!(score.annotation("s0").unwrap().parts, vec!["soprano"]);
    assert_eq!(score.annotation("a0").unwrap().parts, vec!["alto"]);
    assert_eq!(score.annotation("t0").unwrap().parts, vec!["tenor"]);
    assert_eq!(score.annotation("b0").unwrap().parts, vec!["bass"]);
    assert!(score.annotation("s0").unwrap().melody);
    assert!(!score.annotation("a0").unwrap().melody);

    println!("✓ SATB template: parts {:?}", ids);
}

#[test]
fn explicit_parts_are_used_verbatim() {
    let defs = vec![
        PartDef {
            id: "lead".into(),
            name: "Lead".into(),
            vocal: true,
            melody: true,
            placement: Placement::Staff(1),
        },
        PartDef {
            id: "keys".into(),
            name: "Keys".into(),
            vocal: false,
            melody: false,
            placement: Placement::Full,
        },
    ];
    let score = annotate(
        simple_hymn(),
        None,
        options_with_parts(PartsSpec::Explicit(defs)),
    );
    let ids: Vec<&str> = score.parts.parts.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["lead", "keys"], "explicit lists resolve as given");
    assert!(score.annotation("s0").unwrap().melody);
}

// ═══════════════════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn hymn_sections_alternate_verse_and_chorus() {
    let score = annotate(simple_hymn(), None, EngineOptions::default());
    let sections = &score.sections.sections;

    let ids: Vec<&str> = sections.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["verse-1", "chorus-1", "verse-2", "chorus-2"],
        "two verse lines around one chorus span"
    );

    let verse1 = score.sections.section("verse-1").unwrap();
    assert_eq!(verse1.kind, SectionKind::Verse);
    assert_eq!(verse1.placement, SectionPlacement::Inline);
    assert_eq!((verse1.ranges[0].start, verse1.ranges[0].end), (0, 8));
    assert_eq!(
        verse1.ranges[0].lyric_lines,
        vec![LyricLineId::new(1, 1)],
        "verse 1 sings the first line"
    );

    let verse2 = score.sections.section("verse-2").unwrap();
    assert_eq!(verse2.placement, SectionPlacement::Below);
    assert_eq!(
        verse2.ranges[0].lyric_lines,
        vec![LyricLineId::new(1, 2)],
        "verse 2 sings the second line"
    );

    let chorus1 = score.sections.section("chorus-1").unwrap();
    assert_eq!(chorus1.kind, SectionKind::Chorus);
    assert_eq!((chorus1.ranges[0].start, chorus1.ranges[0].end), (8, 16));
    let chorus2 = score.sections.section("chorus-2").unwrap();
    assert_eq!(
        chorus2.placement,
        SectionPlacement::None,
        "repeated choruses are not displayed again"
    );

    // The chorus span is flagged single-line, the verses are not.
    assert!(score.sections.single_line[8..16].iter().all(|&f| f));
    assert!(score.sections.single_line[0..8].iter().all(|&f| !f));

    println!("✓ simple hymn sections: {:?}", ids);
}

// ═══════════════════════════════════════════════════════════════════════
// Expansion
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn hymn_expands_to_four_passes() {
    let score = annotate(simple_hymn(), None, EngineOptions::default());

    assert_eq!(
        score.expansion.len(),
        32,
        "verse + chorus twice over makes 32 expanded positions"
    );
    for (e, x) in score.expansion.expanded.iter().enumerate() {
        assert_eq!(x.index, e);
        assert!(!x.skip, "nothing in the hymn is elided");
    }

    // Written position 0 plays in both verses.
    let s0 = score.annotation("s0").unwrap();
    assert_eq!(s0.expanded, vec![0, 16]);
    assert_eq!(s0.sections, vec!["verse-1", "verse-2"]);

    // A chorus position plays in both chorus passes.
    let s8 = score.annotation("s8").unwrap();
    assert_eq!(s8.expanded, vec![8, 24]);

    // The verse-2 pass activates the second lyric line.
    let first_of_verse2 = &score.expansion.expanded[16];
    assert_eq!(first_of_verse2.position, 0);
    assert_eq!(first_of_verse2.syllables.len(), 1);
    assert_eq!(first_of_verse2.syllables[0].text, "Raise");
    assert_eq!(
        first_of_verse2.syllables[0].label.as_deref(),
        Some("2."),
        "the verse label rides along with the first syllable"
    );

    println!(
        "✓ simple hymn expansion: {} expanded positions in 4 sections",
        score.expansion.len()
    );
}

#[test]
fn single_section_expansion_is_identity() {
    let score = annotate(pickup_score(), None, EngineOptions::default());

    assert_eq!(
        score.sections.sections.len(),
        1,
        "no lyrics and no labels leaves one catch-all section"
    );
    assert_eq!(score.sections.sections[0].kind, SectionKind::Unknown);
    assert_eq!(score.expansion.len(), score.index.positions.len());
    for (e, x) in score.expansion.expanded.iter().enumerate() {
        assert_eq!(x.position, e, "identity order when nothing repeats");
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Lookup and serialization
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn key_signature_resolves_by_position() {
    let score = annotate(simple_hymn(), None, EngineOptions::default());
    let key = score.key_at(0).unwrap();
    assert_eq!(key.fifths, 1);
    assert_eq!(key.mode.as_deref(), Some("major"));
    assert_eq!(
        score.key_at(15).map(|k| k.fifths),
        Some(1),
        "the signature holds to the end of the score"
    );
}

#[test]
fn annotated_score_serializes_every_table() {
    let score = annotate(simple_hymn(), None, EngineOptions::default());
    let json = score.to_json().unwrap();
    for table in ["\"document\"", "\"positions\"", "\"parts\"", "\"sections\"", "\"expanded\""] {
        assert!(json.contains(table), "JSON output must include {}", table);
    }
    println!("✓ annotated score serializes to {} bytes of JSON", json.len());
}
