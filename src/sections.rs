//! Section/verse detector: partition the chord-position range into named
//! sections (introduction / verse / chorus / …) and decide, per verse
//! pass, which lyric lines and staves each playback span uses.
//!
//! Priority: explicit sections win; otherwise the score is classified
//! simple and unrolled structurally (verse labels + single-line chorus
//! runs), or complex and driven by external lyric stanzas only, falling
//! back to a single unknown section spanning the whole score.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::EngineOptions;
use crate::indexer::ScoreIndex;
use crate::model::{Document, LyricLineId};
use crate::parts::PartsTable;
use crate::stanza::{self, LyricStanza};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Introduction,
    Verse,
    Chorus,
    Bridge,
    Interlude,
    Unknown,
}

/// How a section's lyric text is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionPlacement {
    /// Syllables are printed in the score itself
    Inline,
    /// Stanza text rendered below the score
    Below,
    /// Not displayed (repeats, introductions)
    None,
}

/// One chord-position range `[start, end)` a section contributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRange {
    pub start: usize,
    pub end: usize,
    /// Staves active for this range; empty means all
    #[serde(default)]
    pub staves: Vec<u8>,
    /// Lyric lines active for this range; empty means all
    #[serde(default)]
    pub lyric_lines: Vec<LyricLineId>,
}

/// A named structural unit in playback order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub kind: SectionKind,
    pub name: String,
    /// Sequence marker for display (the "1" of "Verse 1")
    #[serde(default)]
    pub marker: Option<String>,
    #[serde(default = "inline")]
    pub placement: SectionPlacement,
    /// Append a short silence after this section during playback
    #[serde(default)]
    pub pause_after: bool,
    pub ranges: Vec<SectionRange>,
}

fn inline() -> SectionPlacement {
    SectionPlacement::Inline
}

/// Detector output: the section list plus per-position lyric-layout
/// flags and the raw stanza alignment.
#[derive(Debug, Clone, Serialize)]
pub struct SectionsTable {
    pub sections: Vec<Section>,
    /// Per chord position: lies in a single-active-lyric-line run
    pub single_line: Vec<bool>,
    pub stanzas: Vec<LyricStanza>,
}

impl SectionsTable {
    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Detection
// ═══════════════════════════════════════════════════════════════════════

pub fn detect_sections(
    doc: &Document,
    index: &ScoreIndex,
    parts: &PartsTable,
    options: &EngineOptions,
) -> SectionsTable {
    let counts = line_counts(index, parts);
    let runs = single_runs(&counts, options.tuning.max_allowed_gap);
    let mut single_line = vec![false; index.positions.len()];
    for &(s, e) in &runs {
        for flag in &mut single_line[s..e] {
            *flag = true;
        }
    }

    let stanzas = match options.lyrics.as_deref() {
        Some(text) => stanza::align_stanzas(index, parts, text, &options.tuning),
        None => Vec::new(),
    };

    let mut sections = if let Some(explicit) = &options.sections {
        explicit.clone()
    } else if index.positions.is_empty() {
        Vec::new()
    } else if is_simple(doc, index) {
        infer_simple(index, parts, &runs)
    } else if stanzas.iter().any(|s| !s.ranges.is_empty()) {
        sections_from_stanzas(&stanzas, index)
    } else {
        vec![unknown_section(index)]
    };

    prepend_introduction(&mut sections, index);

    SectionsTable {
        sections,
        single_line,
        stanzas,
    }
}

/// Distinct active lyric lines per position, counted on the melody staff.
fn line_counts(index: &ScoreIndex, parts: &PartsTable) -> Vec<usize> {
    index
        .positions
        .iter()
        .map(|pos| {
            let staff = parts.melody_staff_at(pos.index);
            let mut lines: Vec<u8> = Vec::new();
            for &n in &pos.notes {
                let note = &index.notes[n];
                if note.staff != staff {
                    continue;
                }
                for lyric in &note.lyrics {
                    if !lines.contains(&lyric.line) {
                        lines.push(lyric.line);
                    }
                }
            }
            lines.len()
        })
        .collect()
}

/// Maximal runs of positions with exactly one active lyric line, where
/// lyric-free positions neither break nor count toward the run.  Runs
/// with more than `max_gap` single-line positions qualify and are
/// widened across the lyric-free neighbors on either side.
fn single_runs(counts: &[usize], max_gap: usize) -> Vec<(usize, usize)> {
    let n = counts.len();
    let mut runs = Vec::new();
    let mut i = 0;
    while i < n {
        if counts[i] != 1 {
            i += 1;
            continue;
        }
        let start = i;
        let mut last_one = i;
        let mut j = i + 1;
        while j < n && counts[j] <= 1 {
            if counts[j] == 1 {
                last_one = j;
            }
            j += 1;
        }
        let singles = (start..=last_one).filter(|&k| counts[k] == 1).count();
        if singles > max_gap {
            let mut s = start;
            while s > 0 && counts[s - 1] == 0 {
                s -= 1;
            }
            let mut e = last_one + 1;
            while e < n && counts[e] == 0 {
                e += 1;
            }
            runs.push((s, e));
        }
        i = j;
    }
    runs
}

/// A score is "simple" (structurally unrollable) only when every
/// heuristic agrees: no repeat/jump markup, exactly one terminal barline
/// sitting on the last measure, lyrics from the first measure on, and at
/// least one printed verse label.
fn is_simple(doc: &Document, index: &ScoreIndex) -> bool {
    let main: Vec<&crate::model::Measure> =
        doc.measures.iter().filter(|m| !m.intro).collect();
    if main.is_empty() {
        return false;
    }
    let has_jump = main.iter().any(|m| {
        m.directions.iter().any(|d| d.is_jump())
            || m.barlines
                .iter()
                .any(|b| b.repeat.is_some() || b.ending.is_some())
    });
    if has_jump {
        return false;
    }
    let terminal_count: usize = main
        .iter()
        .flat_map(|m| m.barlines.iter())
        .filter(|b| b.is_terminal())
        .count();
    let last_is_terminal = main
        .last()
        .map(|m| m.barlines.iter().any(|b| b.is_terminal()))
        .unwrap_or(false);
    if !last_is_terminal || terminal_count != 1 {
        return false;
    }
    let first_has_lyrics = main
        .first()
        .map(|m| m.notes.iter().any(|n| !n.lyrics.is_empty()))
        .unwrap_or(false);
    if !first_has_lyrics {
        return false;
    }
    let labels = index
        .notes
        .iter()
        .flat_map(|n| n.lyrics.iter())
        .filter(|l| l.label.is_some())
        .count();
    labels > 0
}

/// Lyric line ids for one verse line across every staff that prints it.
fn line_ids(index: &ScoreIndex, line: u8) -> Vec<LyricLineId> {
    let mut ids = Vec::new();
    for staff in 1..=index.staff_count() {
        if index.lines_on_staff(staff).contains(&line) {
            ids.push(LyricLineId::new(staff, line));
        }
    }
    ids
}

/// Alternating verse/chorus spans over `[intro_end, n)`.
fn build_segments(
    intro_end: usize,
    n: usize,
    choruses: &[(usize, usize)],
) -> Vec<(bool, usize, usize)> {
    let mut segments = Vec::new();
    let mut cur = intro_end;
    for &(s, e) in choruses {
        let s = s.max(intro_end);
        let e = e.min(n);
        if e <= s {
            continue;
        }
        if s > cur {
            segments.push((false, cur, s));
        }
        segments.push((true, s, e));
        cur = cur.max(e);
    }
    if cur < n {
        segments.push((false, cur, n));
    }
    segments
}

fn infer_simple(
    index: &ScoreIndex,
    parts: &PartsTable,
    runs: &[(usize, usize)],
) -> Vec<Section> {
    let n = index.positions.len();
    let intro_end = index.intro_position_end();
    let segments = build_segments(intro_end, n, runs);
    let melody_staff = parts.melody_staff_at(intro_end);

    // Verse lines: every line printed outside the chorus spans.
    let mut verse_lines: Vec<u8> = Vec::new();
    for pos in &index.positions[intro_end..] {
        if segments
            .iter()
            .any(|&(chorus, s, e)| chorus && pos.index >= s && pos.index < e)
        {
            continue;
        }
        for &note in &pos.notes {
            let rec = &index.notes[note];
            if rec.staff != melody_staff {
                continue;
            }
            for lyric in &rec.lyrics {
                if !verse_lines.contains(&lyric.line) {
                    verse_lines.push(lyric.line);
                }
            }
        }
    }
    verse_lines.sort_unstable();

    let has_verse = segments.iter().any(|&(chorus, _, _)| !chorus);
    if !has_verse || verse_lines.is_empty() {
        // The whole score sings one line: a single pass, no repeats.
        return vec![Section {
            id: "verse-1".into(),
            kind: SectionKind::Verse,
            name: "Verse 1".into(),
            marker: Some("1".into()),
            placement: SectionPlacement::Inline,
            pause_after: true,
            ranges: vec![SectionRange {
                start: intro_end,
                end: n,
                staves: Vec::new(),
                lyric_lines: line_ids(index, 1),
            }],
        }];
    }

    // The chorus sings whichever single line its span prints.
    let chorus_line = segments
        .iter()
        .find(|&&(chorus, _, _)| chorus)
        .and_then(|&(_, s, e)| {
            index.positions[s..e]
                .iter()
                .flat_map(|p| p.notes.iter())
                .find_map(|&note| index.notes[note].lyrics.first().map(|l| l.line))
        })
        .unwrap_or(1);

    let initial_chorus = matches!(segments.first(), Some(&(true, _, _)));

    let mut sections = Vec::new();
    let mut ids: HashMap<String, usize> = HashMap::new();
    let mut chorus_count = 0usize;
    for (vi, &line) in verse_lines.iter().enumerate() {
        let vnum = vi + 1;
        for &(chorus, s, e) in &segments {
            if chorus {
                chorus_count += 1;
                sections.push(Section {
                    id: unique_id(&mut ids, &format!("chorus-{}", chorus_count)),
                    kind: SectionKind::Chorus,
                    name: "Chorus".into(),
                    marker: None,
                    placement: if chorus_count == 1 {
                        SectionPlacement::Inline
                    } else {
                        SectionPlacement::None
                    },
                    pause_after: true,
                    ranges: vec![SectionRange {
                        start: s,
                        end: e,
                        staves: Vec::new(),
                        lyric_lines: line_ids(index, chorus_line),
                    }],
                });
            } else {
                sections.push(Section {
                    id: unique_id(&mut ids, &format!("verse-{}", vnum)),
                    kind: SectionKind::Verse,
                    name: format!("Verse {}", vnum),
                    marker: Some(vnum.to_string()),
                    placement: if vnum == 1 {
                        SectionPlacement::Inline
                    } else {
                        SectionPlacement::Below
                    },
                    pause_after: true,
                    ranges: vec![SectionRange {
                        start: s,
                        end: e,
                        staves: Vec::new(),
                        lyric_lines: line_ids(index, line),
                    }],
                });
            }
        }
    }
    // Chorus-first scores close with one more chorus after the last verse.
    if initial_chorus {
        if let Some(&(true, s, e)) = segments.first() {
            chorus_count += 1;
            sections.push(Section {
                id: unique_id(&mut ids, &format!("chorus-{}", chorus_count)),
                kind: SectionKind::Chorus,
                name: "Chorus".into(),
                marker: None,
                placement: SectionPlacement::None,
                pause_after: true,
                ranges: vec![SectionRange {
                    start: s,
                    end: e,
                    staves: Vec::new(),
                    lyric_lines: line_ids(index, chorus_line),
                }],
            });
        }
    }
    sections
}

fn sections_from_stanzas(stanzas: &[LyricStanza], index: &ScoreIndex) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut ids: HashMap<String, usize> = HashMap::new();
    for (i, st) in stanzas.iter().enumerate() {
        if st.ranges.is_empty() {
            continue;
        }
        let base = match (&st.kind, &st.marker) {
            (SectionKind::Verse, Some(m)) => format!("verse-{}", m),
            (SectionKind::Chorus, _) => "chorus".to_string(),
            (SectionKind::Bridge, _) => "bridge".to_string(),
            (SectionKind::Interlude, _) => "interlude".to_string(),
            (SectionKind::Introduction, _) => "introduction".to_string(),
            _ => format!("stanza-{}", i + 1),
        };
        sections.push(Section {
            id: unique_id(&mut ids, &base),
            kind: st.kind,
            name: st.name.clone(),
            marker: st.marker.clone(),
            placement: SectionPlacement::Inline,
            pause_after: true,
            ranges: st
                .ranges
                .iter()
                .map(|&(start, end)| SectionRange {
                    start,
                    end,
                    staves: Vec::new(),
                    lyric_lines: line_ids(index, st.line),
                })
                .collect(),
        });
    }
    if sections.is_empty() {
        sections.push(unknown_section(index));
    }
    sections
}

fn unknown_section(index: &ScoreIndex) -> Section {
    Section {
        id: "unknown".into(),
        kind: SectionKind::Unknown,
        name: String::new(),
        marker: None,
        placement: SectionPlacement::Inline,
        pause_after: false,
        ranges: vec![SectionRange {
            start: index.intro_position_end(),
            end: index.positions.len(),
            staves: Vec::new(),
            lyric_lines: Vec::new(),
        }],
    }
}

/// Prepend an introduction section covering the extracted intro measures
/// and keep every other range out of that span.
fn prepend_introduction(sections: &mut Vec<Section>, index: &ScoreIndex) {
    let intro_end = index.intro_position_end();
    if intro_end == 0 || sections.iter().any(|s| s.kind == SectionKind::Introduction) {
        return;
    }
    for section in sections.iter_mut() {
        for range in &mut section.ranges {
            range.start = range.start.max(intro_end);
        }
        section.ranges.retain(|r| r.start < r.end);
    }
    sections.retain(|s| !s.ranges.is_empty());
    sections.insert(
        0,
        Section {
            id: "introduction".into(),
            kind: SectionKind::Introduction,
            name: "Introduction".into(),
            marker: None,
            placement: SectionPlacement::None,
            pause_after: true,
            ranges: vec![SectionRange {
                start: 0,
                end: intro_end,
                staves: Vec::new(),
                lyric_lines: Vec::new(),
            }],
        },
    );
}

fn unique_id(ids: &mut HashMap<String, usize>, base: &str) -> String {
    let count = ids.entry(base.to_string()).or_insert(0);
    *count += 1;
    if *count == 1 {
        base.to_string()
    } else {
        format!("{}-{}", base, count)
    }
}
