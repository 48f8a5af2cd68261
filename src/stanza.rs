//! External lyric text: stanza parsing and fuzzy alignment against the
//! syllables embedded in the document.
//!
//! The text format is plain: stanzas separated by blank lines, each
//! optionally headed by a bracketed label (`[Verse 1]`, `[Chorus]`).
//! Alignment walks the document's per-line word stream with a cursor and
//! anchors each external word to chord positions, preferring an exact
//! match inside a bounded lookahead window and falling back to the best
//! longest-common-subsequence ratio above the acceptance threshold.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::Tuning;
use crate::indexer::ScoreIndex;
use crate::parts::PartsTable;
use crate::sections::SectionKind;

/// One stanza of the external lyric text.
#[derive(Debug, Clone, PartialEq)]
pub struct Stanza {
    pub kind: SectionKind,
    pub name: String,
    /// Sequence marker from the header (the "1" of `[Verse 1]`)
    pub marker: Option<String>,
    pub body: String,
}

/// One stanza after alignment: the chord positions it covers.
#[derive(Debug, Clone, Serialize)]
pub struct LyricStanza {
    pub kind: SectionKind,
    pub name: String,
    pub marker: Option<String>,
    /// Position ranges `[start, end)` covered by this stanza
    pub ranges: Vec<(usize, usize)>,
    /// Verse line the stanza aligned against
    pub line: u8,
    pub text: String,
}

/// One word recovered from the document syllables: `begin`/`middle`/`end`
/// syllabics concatenated, with the chord positions they occupy.
#[derive(Debug, Clone)]
pub struct DocWord {
    pub text: String,
    pub positions: Vec<usize>,
}

// ═══════════════════════════════════════════════════════════════════════
// Text utilities
// ═══════════════════════════════════════════════════════════════════════

/// Lowercase and strip everything but letters and digits.
pub fn normalize_word(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Whole-text normalization: normalized words joined by single spaces.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(normalize_word)
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Longest common subsequence length over characters.
pub fn lcs_len(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        for j in 0..b.len() {
            row[j + 1] = if a[i] == b[j] {
                prev[j] + 1
            } else {
                prev[j + 1].max(row[j])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// LCS ratio in `0..=1`: `2·lcs / (|a| + |b|)`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let la = a.chars().count();
    let lb = b.chars().count();
    if la == 0 || lb == 0 {
        return 0.0;
    }
    2.0 * lcs_len(a, b) as f64 / (la + lb) as f64
}

// ═══════════════════════════════════════════════════════════════════════
// Stanza parsing
// ═══════════════════════════════════════════════════════════════════════

fn header_kind(label: &str) -> SectionKind {
    let lower = label.to_lowercase();
    if lower.starts_with("verse") {
        SectionKind::Verse
    } else if lower.starts_with("chorus") || lower.starts_with("refrain") {
        SectionKind::Chorus
    } else if lower.starts_with("bridge") {
        SectionKind::Bridge
    } else if lower.starts_with("interlude") {
        SectionKind::Interlude
    } else if lower.starts_with("intro") {
        SectionKind::Introduction
    } else {
        SectionKind::Unknown
    }
}

/// Split external lyric text into stanzas.  A stanza without a header
/// counts as the next verse in sequence.
pub fn parse_stanzas(text: &str) -> Vec<Stanza> {
    let mut stanzas = Vec::new();
    let mut verse_count = 0u32;
    for block in text.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        let mut lines = block.lines();
        let first = lines.next().unwrap_or("").trim();
        let (kind, name, marker, body) = if first.starts_with('[') && first.ends_with(']') {
            let label = first[1..first.len() - 1].trim().to_string();
            let kind = header_kind(&label);
            let marker = label
                .rsplit(' ')
                .next()
                .filter(|tail| tail.chars().all(|c| c.is_ascii_digit()))
                .map(str::to_string);
            let body = lines.collect::<Vec<_>>().join("\n");
            (kind, label, marker, body)
        } else {
            verse_count += 1;
            (
                SectionKind::Verse,
                format!("Verse {}", verse_count),
                Some(verse_count.to_string()),
                block.to_string(),
            )
        };
        if kind == SectionKind::Verse {
            if let Some(ref m) = marker {
                verse_count = m.parse().unwrap_or(verse_count);
            }
        }
        stanzas.push(Stanza { kind, name, marker, body });
    }
    stanzas
}

// ═══════════════════════════════════════════════════════════════════════
// Document word streams
// ═══════════════════════════════════════════════════════════════════════

/// Reassemble the words of one verse line from the melody staff's
/// syllables, in position order.
pub fn doc_words(index: &ScoreIndex, parts: &PartsTable, line: u8) -> Vec<DocWord> {
    let mut words: Vec<DocWord> = Vec::new();
    let mut current: Option<DocWord> = None;

    for pos in &index.positions {
        let staff = parts.melody_staff_at(pos.index);
        // Prefer the designated melody note's lyric, else any member on
        // the melody staff.
        let lyric = parts
            .melody_note_at(pos.index)
            .and_then(|n| index.notes[n].lyric_on(line))
            .or_else(|| {
                pos.notes
                    .iter()
                    .filter(|&&n| index.notes[n].staff == staff)
                    .find_map(|&n| index.notes[n].lyric_on(line))
            });
        let Some(lyric) = lyric else { continue };
        if lyric.is_elision() {
            continue;
        }
        let fragment = normalize_word(&lyric.text);
        if fragment.is_empty() {
            continue;
        }
        match lyric.syllabic.as_deref() {
            Some("begin") => {
                if let Some(word) = current.take() {
                    words.push(word);
                }
                current = Some(DocWord { text: fragment, positions: vec![pos.index] });
            }
            Some("middle") | Some("end") => {
                match current.as_mut() {
                    Some(word) => {
                        word.text.push_str(&fragment);
                        word.positions.push(pos.index);
                    }
                    None => current = Some(DocWord { text: fragment, positions: vec![pos.index] }),
                }
                if lyric.syllabic.as_deref() == Some("end") {
                    if let Some(word) = current.take() {
                        words.push(word);
                    }
                }
            }
            _ => {
                if let Some(word) = current.take() {
                    words.push(word);
                }
                words.push(DocWord { text: fragment, positions: vec![pos.index] });
            }
        }
    }
    if let Some(word) = current.take() {
        words.push(word);
    }
    words
}

// ═══════════════════════════════════════════════════════════════════════
// Alignment
// ═══════════════════════════════════════════════════════════════════════

/// Align external lyric text against the document syllables.  Each
/// stanza walks its verse line's word stream with a persistent cursor; a
/// stanza that anchors nothing inherits the ranges of an earlier stanza
/// with the same normalized text (a repeated chorus).
pub fn align_stanzas(
    index: &ScoreIndex,
    parts: &PartsTable,
    text: &str,
    tuning: &Tuning,
) -> Vec<LyricStanza> {
    let stanzas = parse_stanzas(text);
    let mut streams: HashMap<u8, Vec<DocWord>> = HashMap::new();
    let mut cursors: HashMap<u8, usize> = HashMap::new();
    let mut out: Vec<LyricStanza> = Vec::new();

    for stanza in stanzas {
        let line: u8 = stanza
            .marker
            .as_deref()
            .and_then(|m| m.parse().ok())
            .filter(|_| stanza.kind == SectionKind::Verse)
            .unwrap_or(1);
        let words = streams
            .entry(line)
            .or_insert_with(|| doc_words(index, parts, line));
        let cursor = cursors.entry(line).or_insert(0);

        let mut anchored: Vec<usize> = Vec::new();
        for raw in stanza.body.split_whitespace() {
            let word = normalize_word(raw);
            if word.is_empty() {
                continue;
            }
            let window = window_len(words, *cursor, tuning.lookahead_chars);
            let candidates = &words[*cursor..*cursor + window];
            let hit = match candidates.iter().position(|dw| dw.text == word) {
                Some(off) => Some(off),
                None => best_fuzzy(candidates, &word, tuning.similarity_threshold),
            };
            if let Some(off) = hit {
                anchored.extend(words[*cursor + off].positions.iter().copied());
                *cursor += off + 1;
            }
        }

        let mut ranges: Vec<(usize, usize)> = Vec::new();
        let mut aligned_line = line;
        if anchored.is_empty() {
            // Repeated text (a chorus sung again) re-uses the earlier
            // occurrence's positions.
            let norm = normalize(&stanza.body);
            if let Some(prev) = out.iter().find(|s| normalize(&s.text) == norm) {
                ranges = prev.ranges.clone();
                aligned_line = prev.line;
            } else {
                log::warn!("stanza {:?} matched nothing in the score", stanza.name);
            }
        } else {
            let start = anchored.iter().copied().min().unwrap_or(0);
            let end = anchored.iter().copied().max().unwrap_or(0) + 1;
            ranges.push((start, end));
        }
        out.push(LyricStanza {
            kind: stanza.kind,
            name: stanza.name,
            marker: stanza.marker,
            ranges,
            line: aligned_line,
            text: stanza.body,
        });
    }
    out
}

/// Number of words from `cursor` whose combined length stays within the
/// lookahead budget (always at least one when any remain).
fn window_len(words: &[DocWord], cursor: usize, lookahead_chars: usize) -> usize {
    let mut chars = 0usize;
    let mut len = 0usize;
    for word in words.iter().skip(cursor) {
        chars += word.text.chars().count();
        if len > 0 && chars > lookahead_chars {
            break;
        }
        len += 1;
    }
    len
}

fn best_fuzzy(candidates: &[DocWord], word: &str, threshold: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (off, dw) in candidates.iter().enumerate() {
        let score = similarity(&dw.text, word);
        if score >= threshold && best.map_or(true, |(_, b)| score > b) {
            best = Some((off, score));
        }
    }
    best.map(|(off, _)| off)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lcs_and_similarity() {
        assert_eq!(lcs_len("grace", "grace"), 5);
        assert_eq!(lcs_len("gace", "grace"), 4);
        assert!((similarity("grace", "grace") - 1.0).abs() < 1e-9);
        let s = similarity("savior", "saviour");
        assert!(s > 0.9, "near-identical spellings must score high, got {}", s);
        assert!(similarity("", "grace") == 0.0);
    }

    #[test]
    fn normalization_strips_punctuation() {
        assert_eq!(normalize_word("Lord,"), "lord");
        assert_eq!(normalize("O  come, all ye faithful!"), "o come all ye faithful");
    }

    #[test]
    fn stanza_headers() {
        let text = "[Verse 1]\nAmazing grace\n\n[Chorus]\nPraise him\n\nHow sweet the sound";
        let stanzas = parse_stanzas(text);
        assert_eq!(stanzas.len(), 3);
        assert_eq!(stanzas[0].kind, SectionKind::Verse);
        assert_eq!(stanzas[0].marker.as_deref(), Some("1"));
        assert_eq!(stanzas[0].body, "Amazing grace");
        assert_eq!(stanzas[1].kind, SectionKind::Chorus);
        assert_eq!(stanzas[1].marker, None);
        // Headerless stanza continues the verse numbering.
        assert_eq!(stanzas[2].kind, SectionKind::Verse);
        assert_eq!(stanzas[2].marker.as_deref(), Some("2"));
    }

    #[test]
    fn window_respects_lookahead_budget() {
        let words: Vec<DocWord> = ["a", "bb", "ccc", "dddd"]
            .iter()
            .map(|t| DocWord { text: t.to_string(), positions: vec![0] })
            .collect();
        // 20 chars covers all four (1+2+3+4 = 10).
        assert_eq!(window_len(&words, 0, 20), 4);
        // A 3-char budget covers "a" + "bb" only.
        assert_eq!(window_len(&words, 0, 3), 2);
        // Always at least one candidate.
        assert_eq!(window_len(&words, 3, 1), 1);
    }
}
