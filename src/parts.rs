//! Parts resolver: decide which logical part (voice) owns each staff,
//! layer, and chord slot, and which part carries the melody.
//!
//! Parts come in three ways: an explicit list, a compact template string,
//! or nothing at all (melody-on-staff-1 plus a full-score accompaniment).
//! The template grammar is `range(";"range)*` where a range is
//! `[position ":"] group("+"group)* ["#"melody]` and each group is a run
//! of part letters (M S A T B D P O I C, optional trailing digit for
//! numbered sub-parts).  Groups map to staves in order; `SATB` and
//! friends are alias-expanded first.  Malformed templates degrade to the
//! default layout with a warning, never an error.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::{EngineOptions, PartDef, PartsSpec, Placement};
use crate::indexer::{NoteRecord, ScoreIndex};
use crate::model::LyricLineId;

/// Letters the template grammar accepts, with display names and vocal
/// flags in `letter_meta`.
const PART_LETTERS: &str = "MSATBDPOIC";

/// A resolved part.
#[derive(Debug, Clone, Serialize)]
pub struct Part {
    pub id: String,
    pub name: String,
    /// Sung part (reads lyric lines) rather than an instrumental one
    pub vocal: bool,
    pub placement: Placement,
    /// Sparse changes-at map, ascending by position; each entry is valid
    /// until superseded by the next.
    pub changes: Vec<PartChange>,
}

/// One entry of a part's changes-at map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartChange {
    /// Valid from this chord position onward
    pub position: usize,
    pub is_melody: bool,
    /// Staves occupied (empty while the part is inactive)
    pub staves: Vec<u8>,
    /// Lyric lines this part reads
    pub lyric_lines: Vec<LyricLineId>,
}

impl Part {
    /// The change in effect at `position`.
    pub fn change_at(&self, position: usize) -> Option<&PartChange> {
        self.changes.iter().rev().find(|c| c.position <= position)
    }

    pub fn is_melody_at(&self, position: usize) -> bool {
        self.change_at(position).map(|c| c.is_melody).unwrap_or(false)
    }

    pub fn staves_at(&self, position: usize) -> &[u8] {
        self.change_at(position).map(|c| c.staves.as_slice()).unwrap_or(&[])
    }
}

/// The resolved part list plus per-note and per-position assignments.
#[derive(Debug, Clone, Serialize)]
pub struct PartsTable {
    pub parts: Vec<Part>,
    #[serde(skip)]
    by_id: HashMap<String, usize>,
    /// note arena index → indices of owning parts
    note_parts: Vec<Vec<usize>>,
    /// note arena index → designated melody note
    note_melody: Vec<bool>,
    /// chord position → melody note arena index
    position_melody: Vec<Option<usize>>,
}

impl PartsTable {
    pub fn part(&self, id: &str) -> Option<&Part> {
        self.by_id.get(id).map(|&i| &self.parts[i])
    }

    /// Parts owning a note, as indices into `parts`.
    pub fn parts_of_note(&self, note: usize) -> &[usize] {
        self.note_parts.get(note).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_melody_note(&self, note: usize) -> bool {
        self.note_melody.get(note).copied().unwrap_or(false)
    }

    /// The designated melody note at a position, if any.
    pub fn melody_note_at(&self, position: usize) -> Option<usize> {
        self.position_melody.get(position).copied().flatten()
    }

    /// Index of the part carrying the melody at a position.
    pub fn melody_part_at(&self, position: usize) -> Option<usize> {
        self.parts.iter().position(|p| p.is_melody_at(position))
    }

    /// Staff the melody part occupies at a position (1 when unknown).
    pub fn melody_staff_at(&self, position: usize) -> u8 {
        self.melody_part_at(position)
            .and_then(|pi| self.parts[pi].staves_at(position).first().copied())
            .unwrap_or(1)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Template parsing
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PartToken {
    letter: char,
    number: Option<u8>,
}

#[derive(Debug, Clone)]
struct TemplateRange {
    position: usize,
    groups: Vec<Vec<PartToken>>,
    melody: Option<PartToken>,
}

fn letter_meta(letter: char) -> (&'static str, bool) {
    match letter {
        'M' => ("Melody", true),
        'S' => ("Soprano", true),
        'A' => ("Alto", true),
        'T' => ("Tenor", true),
        'B' => ("Bass", true),
        'D' => ("Descant", true),
        'P' => ("Piano", false),
        'O' => ("Organ", false),
        'I' => ("Instrumental", false),
        _ => ("Accompaniment", false),
    }
}

/// Shorthand bodies expanded before parsing.
fn expand_alias(body: &str) -> &str {
    match body {
        "SATB" => "SA+TB",
        "TTBB" => "TT+BB",
        "SSAA" => "SS+AA",
        "SSA" => "SS+A",
        "SAB" => "SA+B",
        "Unison" | "unison" => "MC",
        other => other,
    }
}

fn parse_group(s: &str) -> Option<Vec<PartToken>> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if !PART_LETTERS.contains(c) {
            return None;
        }
        let mut number = None;
        if let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            chars.next();
            number = Some(d as u8);
        }
        tokens.push(PartToken { letter: c, number });
    }
    if tokens.is_empty() {
        None
    } else {
        Some(tokens)
    }
}

fn parse_melody_marker(s: &str) -> Option<PartToken> {
    let tokens = parse_group(s)?;
    if tokens.len() == 1 {
        Some(tokens[0])
    } else {
        None
    }
}

fn parse_template(template: &str) -> Option<Vec<TemplateRange>> {
    let mut ranges = Vec::new();
    for chunk in template.split(';') {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            return None;
        }
        let (position, body) = match chunk.split_once(':') {
            Some((pos, rest)) => (pos.trim().parse::<usize>().ok()?, rest.trim()),
            None => (0, chunk),
        };
        let body = expand_alias(body);
        let (body, melody) = match body.split_once('#') {
            Some((b, m)) => (b, Some(parse_melody_marker(m.trim())?)),
            None => (body, None),
        };
        let mut groups = Vec::new();
        for group in body.split('+') {
            groups.push(parse_group(group.trim())?);
        }
        ranges.push(TemplateRange { position, groups, melody });
    }
    if ranges.is_empty() {
        return None;
    }
    ranges.sort_by_key(|r| r.position);
    // The first layout always covers the score start.
    ranges[0].position = 0;
    Some(ranges)
}

/// Number repeated letters 1, 2, … in order of first appearance,
/// respecting explicitly written digits.
fn auto_number(range: &mut TemplateRange) {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut used: HashMap<char, Vec<u8>> = HashMap::new();
    for group in &range.groups {
        for t in group {
            *counts.entry(t.letter).or_insert(0) += 1;
            if let Some(n) = t.number {
                used.entry(t.letter).or_default().push(n);
            }
        }
    }
    let mut next: HashMap<char, u8> = HashMap::new();
    for group in &mut range.groups {
        for t in group {
            if t.number.is_some() || counts[&t.letter] <= 1 {
                continue;
            }
            let n = next.entry(t.letter).or_insert(1);
            while used.get(&t.letter).map_or(false, |u| u.contains(n)) {
                *n += 1;
            }
            t.number = Some(*n);
            *n += 1;
        }
    }
}

/// The token carrying the melody for one template range: the `#` marker
/// if given, else the first of M/S/P in staff order, else the first
/// token.
fn resolve_melody(range: &TemplateRange) -> PartToken {
    if let Some(marker) = range.melody {
        for group in &range.groups {
            for t in group {
                if t.letter == marker.letter
                    && (marker.number.is_none() || marker.number == t.number)
                {
                    return *t;
                }
            }
        }
        log::warn!(
            "melody marker {}{} not present in template range, using the default",
            marker.letter,
            marker.number.map(|n| n.to_string()).unwrap_or_default()
        );
    }
    for group in &range.groups {
        for t in group {
            if matches!(t.letter, 'M' | 'S' | 'P') {
                return *t;
            }
        }
    }
    range.groups[0][0]
}

fn token_id(token: PartToken) -> (String, String) {
    let (base, _) = letter_meta(token.letter);
    match token.number {
        Some(n) => (format!("{}-{}", base.to_lowercase(), n), format!("{} {}", base, n)),
        None => (base.to_lowercase(), base.to_string()),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Resolution
// ═══════════════════════════════════════════════════════════════════════

/// The two-part layout used when no configuration is supplied (and as the
/// fallback for malformed templates).
pub fn default_parts() -> Vec<PartDef> {
    vec![
        PartDef {
            id: "melody".into(),
            name: "Melody".into(),
            vocal: true,
            melody: true,
            placement: Placement::Staff(1),
        },
        PartDef {
            id: "accompaniment".into(),
            name: "Accompaniment".into(),
            vocal: false,
            melody: false,
            placement: Placement::Full,
        },
    ]
}

/// Resolve the configured parts against the indexed score.
pub fn resolve_parts(index: &ScoreIndex, options: &EngineOptions) -> PartsTable {
    let parts = match &options.parts {
        PartsSpec::Auto => build_from_defs(&default_parts(), index),
        PartsSpec::Explicit(defs) if defs.is_empty() => build_from_defs(&default_parts(), index),
        PartsSpec::Explicit(defs) => build_from_defs(defs, index),
        PartsSpec::Template(template) => match parse_template(template) {
            Some(ranges) => build_from_template(ranges, index),
            None => {
                log::warn!("unparseable parts template {:?}, using the default layout", template);
                build_from_defs(&default_parts(), index)
            }
        },
    };
    finish(parts, index)
}

fn lines_for_staves(index: &ScoreIndex, staves: &[u8]) -> Vec<LyricLineId> {
    let mut lines = Vec::new();
    for &s in staves {
        for line in index.lines_on_staff(s) {
            let id = LyricLineId::new(s, line);
            if !lines.contains(&id) {
                lines.push(id);
            }
        }
    }
    lines
}

fn build_from_defs(defs: &[PartDef], index: &ScoreIndex) -> Vec<Part> {
    let staff_count = index.staff_count();
    let melody_index = defs
        .iter()
        .position(|d| d.melody)
        .or_else(|| defs.iter().position(|d| d.vocal))
        .unwrap_or(0);
    let mut auto_staff = 0u8;
    let mut parts = Vec::new();
    for (i, def) in defs.iter().enumerate() {
        let staves: Vec<u8> = match def.placement {
            Placement::Staff(n) => vec![n.clamp(1, staff_count)],
            Placement::Full => (1..=staff_count).collect(),
            Placement::Auto => {
                auto_staff = (auto_staff + 1).min(staff_count);
                vec![auto_staff]
            }
        };
        let lyric_lines = if def.vocal {
            lines_for_staves(index, &staves)
        } else {
            Vec::new()
        };
        parts.push(Part {
            id: def.id.clone(),
            name: def.name.clone(),
            vocal: def.vocal,
            placement: def.placement,
            changes: vec![PartChange {
                position: 0,
                is_melody: i == melody_index,
                staves,
                lyric_lines,
            }],
        });
    }
    parts
}

fn build_from_template(mut ranges: Vec<TemplateRange>, index: &ScoreIndex) -> Vec<Part> {
    let staff_count = index.staff_count() as usize;
    let filler = if index.has_lyrics() { 'C' } else { 'I' };
    for range in &mut ranges {
        while range.groups.len() < staff_count {
            range.groups.push(vec![PartToken { letter: filler, number: None }]);
        }
        auto_number(range);
    }

    let mut parts: Vec<Part> = Vec::new();
    let mut part_keys: Vec<PartToken> = Vec::new();

    for range in &ranges {
        let melody = resolve_melody(range);

        // Token → staves for this range, in staff order then top-to-bottom.
        let mut active: Vec<(PartToken, Vec<u8>)> = Vec::new();
        for (g, group) in range.groups.iter().enumerate() {
            let staff = (g + 1) as u8;
            for t in group {
                match active.iter_mut().find(|(k, _)| k == t) {
                    Some((_, staves)) => staves.push(staff),
                    None => active.push((*t, vec![staff])),
                }
            }
        }

        for (token, staves) in &active {
            if part_keys.contains(token) {
                continue;
            }
            let (id, name) = token_id(*token);
            let (_, vocal) = letter_meta(token.letter);
            let placement = if staves.len() == 1 {
                Placement::Staff(staves[0])
            } else {
                Placement::Auto
            };
            part_keys.push(*token);
            parts.push(Part {
                id,
                name,
                vocal,
                placement,
                changes: Vec::new(),
            });
        }

        for (pi, part) in parts.iter_mut().enumerate() {
            let key = part_keys[pi];
            let staves = active
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, s)| s.clone())
                .unwrap_or_default();
            let lyric_lines = if part.vocal && !staves.is_empty() {
                lines_for_staves(index, &staves)
            } else {
                Vec::new()
            };
            let change = PartChange {
                position: range.position,
                is_melody: key == melody && !staves.is_empty(),
                staves,
                lyric_lines,
            };
            if part.changes.last() != Some(&change) {
                part.changes.push(change);
            }
        }
    }
    parts
}

// ═══════════════════════════════════════════════════════════════════════
// Note assignment
// ═══════════════════════════════════════════════════════════════════════

fn finish(parts: Vec<Part>, index: &ScoreIndex) -> PartsTable {
    let mut note_parts: Vec<Vec<usize>> = vec![Vec::new(); index.notes.len()];
    let mut note_melody = vec![false; index.notes.len()];
    let mut position_melody: Vec<Option<usize>> = vec![None; index.positions.len()];

    for pos in &index.positions {
        // Active parts per staff, preserving part order (top to bottom
        // within a staff by construction).
        for staff in 1..=index.staff_count() {
            let staff_parts: Vec<usize> = parts
                .iter()
                .enumerate()
                .filter(|(_, part)| part.staves_at(pos.index).contains(&staff))
                .map(|(pi, _)| pi)
                .collect();
            if staff_parts.is_empty() {
                continue;
            }
            let members: Vec<usize> = pos
                .notes
                .iter()
                .copied()
                .filter(|&n| index.notes[n].staff == staff)
                .collect();
            if members.is_empty() {
                continue;
            }
            assign_staff(&members, &staff_parts, &index.notes, &mut note_parts);
        }

        // Designated melody note: highest pitched note owned by the
        // melody part.
        let Some(mp) = parts.iter().position(|p| p.is_melody_at(pos.index)) else {
            continue;
        };
        let best = pos
            .notes
            .iter()
            .copied()
            .filter(|&n| note_parts[n].contains(&mp) && !index.notes[n].rest)
            .max_by_key(|&n| index.notes[n].midi.unwrap_or(i32::MIN));
        if let Some(n) = best {
            position_melody[pos.index] = Some(n);
            note_melody[n] = true;
        }
    }

    let by_id = parts
        .iter()
        .enumerate()
        .map(|(i, p)| (p.id.clone(), i))
        .collect();
    PartsTable {
        parts,
        by_id,
        note_parts,
        note_melody,
        position_melody,
    }
}

/// Distribute one staff's simultaneous notes over that staff's parts.
/// With more than one layer present, odd layers go to the upper half of
/// the parts and even layers to the lower half; within a half, chord
/// slots are taken top-down by pitch.
fn assign_staff(
    members: &[usize],
    staff_parts: &[usize],
    notes: &[NoteRecord],
    note_parts: &mut [Vec<usize>],
) {
    if staff_parts.len() == 1 {
        for &n in members {
            push_part(note_parts, n, staff_parts[0]);
        }
        return;
    }
    let odd: Vec<usize> = members.iter().copied().filter(|&n| notes[n].layer % 2 == 1).collect();
    let even: Vec<usize> = members.iter().copied().filter(|&n| notes[n].layer % 2 == 0).collect();
    if !odd.is_empty() && !even.is_empty() {
        let half = (staff_parts.len() + 1) / 2;
        assign_slots(&odd, &staff_parts[..half], notes, note_parts);
        assign_slots(&even, &staff_parts[half..], notes, note_parts);
    } else {
        assign_slots(members, staff_parts, notes, note_parts);
    }
}

/// Chord-slot assignment: part `j` takes the `j`-th note in descending
/// pitch order; a lone note belongs to every part, and surplus notes
/// fall to the lowest part.
fn assign_slots(
    members: &[usize],
    slot_parts: &[usize],
    notes: &[NoteRecord],
    note_parts: &mut [Vec<usize>],
) {
    if members.is_empty() || slot_parts.is_empty() {
        return;
    }
    let mut ordered: Vec<usize> = members.to_vec();
    ordered.sort_by(|&a, &b| {
        let ka = notes[a].midi.unwrap_or(i32::MIN);
        let kb = notes[b].midi.unwrap_or(i32::MIN);
        kb.cmp(&ka).then(a.cmp(&b))
    });
    for (j, &part) in slot_parts.iter().enumerate() {
        let n = ordered[j.min(ordered.len() - 1)];
        push_part(note_parts, n, part);
    }
    if ordered.len() > slot_parts.len() {
        let last = *slot_parts.last().unwrap_or(&0);
        for &n in &ordered[slot_parts.len()..] {
            push_part(note_parts, n, last);
        }
    }
}

fn push_part(note_parts: &mut [Vec<usize>], note: usize, part: usize) {
    if !note_parts[note].contains(&part) {
        note_parts[note].push(part);
    }
}
