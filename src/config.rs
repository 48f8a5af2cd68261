//! Engine configuration: the per-score options supplied by the embedding
//! application, plus the tuning constants for the heuristic passes.
//!
//! Everything here deserializes from plain JSON so that a host can store
//! per-song configuration alongside the score and hand it over unchanged.

use serde::{Deserialize, Serialize};

use crate::model::{ChordSet, Fermata, IntroBracket};
use crate::sections::Section;

/// How parts are supplied, if at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartsSpec {
    /// No configuration: fall back to melody-on-staff-1 + accompaniment.
    Auto,
    /// Compact template string, e.g. `"SA+TB"` or `"SATB"` or `"M;32:MC"`.
    #[serde(untagged)]
    Template(String),
    /// Explicit part list, used as-is.
    #[serde(untagged)]
    Explicit(Vec<PartDef>),
}

impl Default for PartsSpec {
    fn default() -> Self {
        PartsSpec::Auto
    }
}

/// One explicitly configured part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartDef {
    pub id: String,
    pub name: String,
    /// Sung part (carries lyrics) rather than an instrumental one
    #[serde(default)]
    pub vocal: bool,
    /// Carries the melody line
    #[serde(default)]
    pub melody: bool,
    #[serde(default)]
    pub placement: Placement,
}

/// Which staff (or staves) a part occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    /// Spans every staff (piano accompaniment of a vocal score).
    Full,
    /// Assigned a staff by declaration order.
    Auto,
    /// A specific 1-based staff number.
    #[serde(untagged)]
    Staff(u8),
}

impl Default for Placement {
    fn default() -> Self {
        Placement::Auto
    }
}

/// Empirically tuned constants for the heuristic passes.  Defaults carry
/// the values the heuristics were tuned with; hosts may override per
/// corpus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Fuzzy lyric match acceptance threshold (LCS ratio, 0..1).
    pub similarity_threshold: f64,
    /// Lookahead window for fuzzy lyric matching, in characters.
    pub lookahead_chars: usize,
    /// Longest run of positions ignored by the single-line / chorus
    /// detectors before a run counts as structural.
    pub max_allowed_gap: usize,
    /// Silence appended after a pausing section, in seconds.
    pub section_pause: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            lookahead_chars: 20,
            max_allowed_gap: 3,
            section_pause: 0.25,
        }
    }
}

/// All per-score engine options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Parts configuration (template, explicit list, or auto).
    pub parts: PartsSpec,
    /// Explicit sections; when present, section inference is skipped.
    pub sections: Option<Vec<Section>>,
    /// External plain-text lyrics (blank-line stanzas, bracketed headers).
    pub lyrics: Option<String>,
    /// Fermata holds keyed by chord position.
    pub fermatas: Vec<Fermata>,
    /// Opaque position-keyed annotation sets.
    pub chord_sets: Vec<ChordSet>,
    /// Piano-introduction bracket ranges.
    pub intro_brackets: Vec<IntroBracket>,
    /// Section ids excluded from expansion (and therefore playback).
    pub hidden_sections: Vec<String>,
    /// Restrict synthesized playback to the melody note of each position.
    pub melody_only: bool,
    /// Heuristic tuning constants.
    pub tuning: Tuning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_defaults() {
        let t = Tuning::default();
        assert!((t.similarity_threshold - 0.6).abs() < 1e-9);
        assert_eq!(t.lookahead_chars, 20);
        assert_eq!(t.max_allowed_gap, 3);
        assert!((t.section_pause - 0.25).abs() < 1e-9);
    }

    #[test]
    fn placement_from_json() {
        let full: Placement = serde_json::from_str("\"full\"").unwrap();
        assert_eq!(full, Placement::Full);
        let staff: Placement = serde_json::from_str("2").unwrap();
        assert_eq!(staff, Placement::Staff(2));
    }

    #[test]
    fn parts_spec_from_json() {
        let tpl: PartsSpec = serde_json::from_str("\"SA+TB\"").unwrap();
        assert_eq!(tpl, PartsSpec::Template("SA+TB".into()));
        let auto: PartsSpec = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(auto, PartsSpec::Auto);
    }
}
