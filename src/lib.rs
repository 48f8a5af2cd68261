//! scoresync — symbolic-score annotation and MIDI-alignment engine.
//!
//! Takes a score document handed over by an external rendering engine
//! (which owns the MusicXML/MEI/ABC conversion) and derives everything a
//! synchronized player needs: chord positions, part ownership, section
//! structure, the expanded playback order, and real-time alignment of an
//! external or engine-rendered performance, including a metronome beat
//! timeline.
//!
//! # Example
//! ```no_run
//! use scoresync::{annotate, EngineOptions};
//!
//! let json = std::fs::read_to_string("score.json").unwrap();
//! let document: scoresync::Document = serde_json::from_str(&json).unwrap();
//! let score = annotate(document, None, EngineOptions::default());
//! println!("Positions: {}", score.index.positions.len());
//! let alignment = score.align(None).unwrap();
//! println!("Playback spans {} expanded positions", alignment.expanded.len());
//! ```

pub mod align;
pub mod config;
pub mod error;
pub mod expansion;
pub mod indexer;
pub mod intro;
pub mod metronome;
pub mod model;
pub mod parts;
pub mod perform;
pub mod sections;
pub mod stanza;
pub mod timeline;

use serde::Serialize;

pub use align::{Alignment, Profile};
pub use config::{EngineOptions, PartDef, PartsSpec, Placement, Tuning};
pub use error::{EngineError, Result};
pub use metronome::MetronomeBeat;
pub use model::*;

/// A document with every derived annotation computed: the positional
/// index, part ownership, section structure, and the expanded playback
/// order.  All tables are rebuilt wholesale by [`annotate`]; none of
/// them mutate afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedScore {
    /// The document, after introduction extraction when requested
    pub document: Document,
    pub index: indexer::ScoreIndex,
    pub parts: parts::PartsTable,
    pub sections: sections::SectionsTable,
    pub expansion: expansion::Expansion,
    /// Chord sets with out-of-range entries dropped
    pub chord_sets: Vec<ChordSet>,
    #[serde(skip)]
    options: EngineOptions,
}

/// Annotations attached to one notated element, looked up by engine id.
#[derive(Debug, Clone, Serialize)]
pub struct ElementAnnotation {
    /// Chord position of the element
    pub position: usize,
    /// Expanded occurrences of that position, in playback order
    pub expanded: Vec<usize>,
    /// Ids of the parts that own this element
    pub parts: Vec<String>,
    /// The element is a melody note at its position
    pub melody: bool,
    /// Ids of the sections whose ranges cover the position
    pub sections: Vec<String>,
    /// Lyric lines the element carries syllables on
    pub lyric_lines: Vec<LyricLineId>,
}

/// Run the full annotation pipeline: introduction extraction, position
/// indexing, parts resolution, section detection, and expansion.  The
/// timeline may be supplied by the engine; it is regenerated whenever
/// extraction restructures the document.  Never fails: malformed inputs
/// degrade to documented defaults stage by stage.
pub fn annotate(
    document: Document,
    timeline: Option<Vec<TimelineEvent>>,
    options: EngineOptions,
) -> AnnotatedScore {
    let extracted = intro::extract_introduction(&document, &options.intro_brackets);
    let events = if extracted.measures.len() != document.measures.len() {
        timeline::from_document(&extracted)
    } else {
        timeline.unwrap_or_else(|| timeline::from_document(&extracted))
    };
    let document = extracted;

    let index = indexer::index_document(&document, &events);
    let parts = parts::resolve_parts(&index, &options);
    let sections = sections::detect_sections(&document, &index, &parts, &options);
    let expansion = expansion::build_expansion(&index, &sections, &options);
    let chord_sets = validate_chord_sets(&options.chord_sets, index.positions.len());

    AnnotatedScore {
        document,
        index,
        parts,
        sections,
        expansion,
        chord_sets,
        options,
    }
}

/// Drop chord-set entries pointing past the last chord position.
fn validate_chord_sets(sets: &[ChordSet], position_count: usize) -> Vec<ChordSet> {
    sets.iter()
        .map(|set| {
            let mut set = set.clone();
            let before = set.entries.len();
            set.entries.retain(|e| e.position < position_count);
            if set.entries.len() < before {
                log::warn!(
                    "chord set {:?} has {} entries past the last position, dropping them",
                    set.id,
                    before - set.entries.len()
                );
            }
            set
        })
        .collect()
}

impl AnnotatedScore {
    /// Align a performance against this score.  With `None` the engine
    /// renders and aligns its own minimal performance.
    pub fn align(&self, performance: Option<&Performance>) -> Result<Alignment> {
        align::align(
            &self.index,
            &self.parts,
            &self.sections,
            &self.expansion,
            performance,
            &self.options,
        )
    }

    /// Recompute every derived table under new options.  Safe to call
    /// on an already-annotated score: introduction extraction is
    /// idempotent, and all other stages rebuild from scratch.
    pub fn with_options(&self, options: EngineOptions) -> AnnotatedScore {
        annotate(self.document.clone(), None, options)
    }

    /// Everything attached to one notated element, by engine id.
    pub fn annotation(&self, id: &str) -> Option<ElementAnnotation> {
        let ni = self.index.note_index(id)?;
        let note = &self.index.notes[ni];
        let position = note.position?;
        let parts = self
            .parts
            .parts_of_note(ni)
            .iter()
            .map(|&pi| self.parts.parts[pi].id.clone())
            .collect();
        let sections = self
            .sections
            .sections
            .iter()
            .filter(|s| {
                s.ranges
                    .iter()
                    .any(|r| r.start <= position && position < r.end)
            })
            .map(|s| s.id.clone())
            .collect();
        let lyric_lines = note
            .lyrics
            .iter()
            .map(|l| LyricLineId::new(note.staff, l.line))
            .collect();
        Some(ElementAnnotation {
            position,
            expanded: self.expansion.occurrences_of(position).to_vec(),
            parts,
            melody: self.parts.is_melody_note(ni),
            sections,
            lyric_lines,
        })
    }

    /// Key signature in effect at a chord position.
    pub fn key_at(&self, position: usize) -> Option<&Key> {
        self.index.key_at(position)
    }

    /// Serialize the document and every derived table to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
