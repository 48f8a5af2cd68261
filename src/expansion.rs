//! Expansion engine: produce the expanded chord position sequence, the
//! positions in actual playback order.  Iterating all sections in order,
//! each section's ranges in order, and each range's positions ascending
//! yields exactly the audible playback sequence.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::EngineOptions;
use crate::indexer::ScoreIndex;
use crate::model::{LyricLineId, ELISION_MARKER};
use crate::sections::SectionsTable;

/// One syllable active for one expanded occurrence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveSyllable {
    pub line: LyricLineId,
    pub text: String,
    pub label: Option<String>,
}

impl ActiveSyllable {
    pub fn is_elision(&self) -> bool {
        self.text == ELISION_MARKER
    }
}

/// One occurrence of a chord position in playback order.
#[derive(Debug, Clone, Serialize)]
pub struct ExpandedPosition {
    pub index: usize,
    /// The written chord position this occurrence plays
    pub position: usize,
    /// Index of the owning section
    pub section: usize,
    /// Staves active for this occurrence; empty means all
    pub staves: Vec<u8>,
    /// Syllables scoped to the owning range's lyric lines
    pub syllables: Vec<ActiveSyllable>,
    /// The active syllable is an elision placeholder: the occurrence
    /// must not produce an audible event
    pub skip: bool,
}

impl ExpandedPosition {
    /// Whether a staff participates in this occurrence.
    pub fn staff_active(&self, staff: u8) -> bool {
        self.staves.is_empty() || self.staves.contains(&staff)
    }
}

/// The full playback-order sequence plus the position → occurrences maps.
#[derive(Debug, Clone, Serialize)]
pub struct Expansion {
    pub expanded: Vec<ExpandedPosition>,
    /// Expanded indices that actually sound (audible position, no skip)
    pub audible: Vec<usize>,
    #[serde(skip)]
    occurrences: HashMap<(usize, usize), Vec<usize>>,
    #[serde(skip)]
    by_position: Vec<Vec<usize>>,
}

pub fn build_expansion(
    index: &ScoreIndex,
    sections: &SectionsTable,
    options: &EngineOptions,
) -> Expansion {
    let mut expanded: Vec<ExpandedPosition> = Vec::new();
    let mut audible: Vec<usize> = Vec::new();
    let mut occurrences: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    let mut by_position: Vec<Vec<usize>> = vec![Vec::new(); index.positions.len()];

    for (si, section) in sections.sections.iter().enumerate() {
        if options.hidden_sections.iter().any(|h| h == &section.id) {
            continue;
        }
        for range in &section.ranges {
            let end = range.end.min(index.positions.len());
            for p in range.start..end {
                let e = expanded.len();
                let syllables = active_syllables(index, p, &range.lyric_lines);
                let skip = !syllables.is_empty() && syllables.iter().all(|s| s.is_elision());
                if index.positions[p].audible && !skip {
                    audible.push(e);
                }
                occurrences.entry((p, si)).or_default().push(e);
                by_position[p].push(e);
                expanded.push(ExpandedPosition {
                    index: e,
                    position: p,
                    section: si,
                    staves: range.staves.clone(),
                    syllables,
                    skip,
                });
            }
        }
    }

    Expansion {
        expanded,
        audible,
        occurrences,
        by_position,
    }
}

/// Syllables at a position, intersected with the requested lyric lines
/// (empty request = every line).
fn active_syllables(
    index: &ScoreIndex,
    position: usize,
    lines: &[LyricLineId],
) -> Vec<ActiveSyllable> {
    let mut out = Vec::new();
    for &n in &index.positions[position].notes {
        let note = &index.notes[n];
        for lyric in &note.lyrics {
            let id = LyricLineId::new(note.staff, lyric.line);
            if !lines.is_empty() && !lines.contains(&id) {
                continue;
            }
            out.push(ActiveSyllable {
                line: id,
                text: lyric.text.clone(),
                label: lyric.label.clone(),
            });
        }
    }
    out
}

impl Expansion {
    pub fn len(&self) -> usize {
        self.expanded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expanded.is_empty()
    }

    /// Expanded occurrences of a written position, in playback order.
    pub fn occurrences_of(&self, position: usize) -> &[usize] {
        self.by_position
            .get(position)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Occurrences of a written position within one section.
    pub fn occurrences_in_section(&self, position: usize, section: usize) -> &[usize] {
        self.occurrences
            .get(&(position, section))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Ordinal of an occurrence among all occurrences of its position.
    pub fn occurrence_ordinal(&self, e: usize) -> usize {
        let p = self.expanded[e].position;
        self.occurrences_of(p)
            .iter()
            .position(|&x| x == e)
            .unwrap_or(0)
    }
}
