//! Data model for the symbolic music document and the interchange inputs
//! supplied by the external rendering engine.
//!
//! The engine hands the document over as plain structured data (it owns the
//! MusicXML/MEI/ABC conversion); this crate only annotates it with derived
//! positional attributes and never restructures its musical content, except
//! for the explicit introduction-extraction transform in `intro`.

use serde::{Deserialize, Serialize};

/// Syllable text standing in for an elided (not re-articulated) lyric.
/// An expanded position whose active syllable equals this marker is
/// skip-flagged and must not produce an audible event.
pub const ELISION_MARKER: &str = "\u{2014}";

/// Tolerance when comparing quarter-note or second timestamps.
pub(crate) const EPS: f64 = 1e-6;

/// A complete symbolic document as delivered by the rendering engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Title of the piece
    pub title: Option<String>,
    /// Ordered list of measures
    pub measures: Vec<Measure>,
    /// Slurs, referencing note ids at both endpoints
    #[serde(default)]
    pub slurs: Vec<Slur>,
}

/// A single measure (bar) of music.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measure {
    /// Stable element id assigned by the engine
    pub id: String,
    /// Printed measure number
    pub number: i32,
    /// Attributes (key, time, staves) — only present when they change
    pub attributes: Option<Attributes>,
    /// Notes and rests in document order
    pub notes: Vec<Note>,
    /// Directions attached to this measure (tempo, jumps, words)
    #[serde(default)]
    pub directions: Vec<Direction>,
    /// Barlines (repeat signs, terminal bars, volta brackets)
    #[serde(default)]
    pub barlines: Vec<Barline>,
    /// True for measures produced by the introduction extractor
    #[serde(default)]
    pub intro: bool,
}

/// Musical attributes that may change at the start of a measure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attributes {
    /// Key signature
    pub key: Option<Key>,
    /// Time signature
    pub time: Option<TimeSignature>,
    /// Number of staves from this measure on
    pub staves: Option<u8>,
}

/// Key signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    /// Number of sharps (positive) or flats (negative)
    pub fifths: i32,
    /// Mode (e.g., "major", "minor")
    pub mode: Option<String>,
}

/// Time signature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Numerator (e.g., 3 in 3/4)
    pub beats: i32,
    /// Denominator (e.g., 4 in 3/4)
    pub beat_type: i32,
}

impl TimeSignature {
    /// Nominal duration of one full measure in quarter-note units.
    pub fn measure_quarters(&self) -> f64 {
        if self.beat_type == 0 {
            return 0.0;
        }
        self.beats as f64 / self.beat_type as f64 * 4.0
    }

    /// Quarter-note length of one denominator unit (one "tstamp step").
    pub fn denominator_quarters(&self) -> f64 {
        if self.beat_type == 0 {
            return 1.0;
        }
        4.0 / self.beat_type as f64
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self { beats: 4, beat_type: 4 }
    }
}

/// A single note or rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    /// Stable element id assigned by the engine
    pub id: String,
    /// Pitch (None if this is a rest)
    pub pitch: Option<Pitch>,
    /// Whether this is a rest
    #[serde(default)]
    pub rest: bool,
    /// Cue-sized note — notated but not performed
    #[serde(default)]
    pub cue: bool,
    /// Grace note — no own time slot
    #[serde(default)]
    pub grace: bool,
    /// Notated duration in quarter-note units
    pub duration: f64,
    /// Layer (voice) number, 1-based
    #[serde(default = "default_one")]
    pub layer: i32,
    /// Staff number, 1-based
    #[serde(default = "default_one_u8")]
    pub staff: u8,
    /// Whether this note shares its onset with the previous note (chord)
    #[serde(default)]
    pub chord: bool,
    /// Id of the note this one ties into, if any
    #[serde(default)]
    pub tie_to: Option<String>,
    /// Lyric syllables attached to this note, one per verse line
    #[serde(default)]
    pub lyrics: Vec<Lyric>,
}

fn default_one() -> i32 {
    1
}

fn default_one_u8() -> u8 {
    1
}

/// Pitch of a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pitch {
    /// Note name: A, B, C, D, E, F, G
    pub step: String,
    /// Octave number (middle C = C4)
    pub octave: i32,
    /// Chromatic alteration: -1.0 = flat, 1.0 = sharp
    pub alter: Option<f64>,
}

impl Pitch {
    /// Convert pitch to MIDI note number. Middle C (C4) = 60.
    pub fn to_midi(&self) -> i32 {
        let step_semitone = match self.step.as_str() {
            "C" => 0,
            "D" => 2,
            "E" => 4,
            "F" => 5,
            "G" => 7,
            "A" => 9,
            "B" => 11,
            _ => 0,
        };
        let alter = self.alter.unwrap_or(0.0) as i32;
        (self.octave + 1) * 12 + step_semitone + alter
    }
}

/// One lyric syllable on one verse line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lyric {
    /// Verse line number, 1-based
    pub line: u8,
    /// Syllable text
    pub text: String,
    /// Word position: "single", "begin", "middle", "end"
    #[serde(default)]
    pub syllabic: Option<String>,
    /// Verse-number label printed before the syllable (e.g. "1.")
    #[serde(default)]
    pub label: Option<String>,
}

impl Lyric {
    /// True if this syllable is the elision placeholder.
    pub fn is_elision(&self) -> bool {
        self.text == ELISION_MARKER
    }
}

/// Identifies one simultaneous lyric track: staff number + verse line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LyricLineId {
    pub staff: u8,
    pub line: u8,
}

impl LyricLineId {
    pub fn new(staff: u8, line: u8) -> Self {
        Self { staff, line }
    }
}

/// A direction attached to a measure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Direction {
    /// Free text ("Fine", "D.C. al Coda", rehearsal words, …)
    #[serde(default)]
    pub words: Option<String>,
    /// Tempo in quarter notes per minute, effective from this measure on
    #[serde(default)]
    pub tempo: Option<f64>,
    /// Segno mark
    #[serde(default)]
    pub segno: bool,
    /// Coda mark
    #[serde(default)]
    pub coda: bool,
    /// Dal segno jump instruction
    #[serde(default)]
    pub dal_segno: bool,
    /// Da capo jump instruction
    #[serde(default)]
    pub da_capo: bool,
    /// "To Coda" jump instruction
    #[serde(default)]
    pub to_coda: bool,
    /// Fine stop instruction
    #[serde(default)]
    pub fine: bool,
}

impl Direction {
    /// True for any navigation markup that forces "complex" classification.
    pub fn is_jump(&self) -> bool {
        self.segno || self.coda || self.dal_segno || self.da_capo || self.to_coda || self.fine
    }
}

/// A barline (may include repeat signs or volta brackets).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Barline {
    /// Location: "left" or "right"
    pub location: String,
    /// Visual style: "regular", "light-light", "light-heavy", "none", …
    #[serde(default)]
    pub style: Option<String>,
    /// Repeat sign
    #[serde(default)]
    pub repeat: Option<Repeat>,
    /// Volta bracket (1st/2nd ending)
    #[serde(default)]
    pub ending: Option<Ending>,
}

impl Barline {
    /// Terminal (final) barline — "light-heavy" in engine terms.
    pub fn is_terminal(&self) -> bool {
        self.style.as_deref() == Some("light-heavy")
    }
}

/// A repeat sign on a barline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repeat {
    /// "forward" or "backward"
    pub direction: String,
}

/// A volta bracket (1st/2nd ending).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ending {
    /// Ending number(s), e.g., "1", "2", "1, 2"
    pub number: String,
    /// "start", "stop", or "discontinue"
    pub ending_type: String,
}

/// A slur between two notes, referenced by element id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slur {
    pub from: String,
    pub to: String,
}

// ═══════════════════════════════════════════════════════════════════════
// Timeline — the onset/offset event stream
// ═══════════════════════════════════════════════════════════════════════

/// One entry of the time-ordered onset/offset stream: what turns on and
/// off at this quarter-note timestamp, and whether a measure starts here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Song-relative time in quarter-note units (0-based)
    pub qstamp: f64,
    /// Element ids whose sound starts at this time
    #[serde(default)]
    pub on: Vec<String>,
    /// Element ids whose sound stops at this time
    #[serde(default)]
    pub off: Vec<String>,
    /// Id of the measure that starts at this time, if any
    #[serde(default)]
    pub measure: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Performance input — MIDI-like note events and tempo changes
// ═══════════════════════════════════════════════════════════════════════

/// One performed (MIDI-like) note event, in real seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformedNote {
    /// MIDI pitch number
    pub pitch: u8,
    /// Onset in seconds
    pub start: f64,
    /// Release in seconds
    pub end: f64,
    /// Key velocity 0–127
    pub velocity: u8,
}

impl PerformedNote {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A tempo change point in the performance timeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TempoChange {
    /// Time in seconds at which the new tempo takes effect
    pub time: f64,
    /// Quarter notes per minute from this time on
    pub qpm: f64,
}

/// A complete performance: note events plus tempo change points.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Performance {
    pub notes: Vec<PerformedNote>,
    #[serde(default)]
    pub tempos: Vec<TempoChange>,
}

// ═══════════════════════════════════════════════════════════════════════
// Configuration inputs keyed by chord position
// ═══════════════════════════════════════════════════════════════════════

/// A fermata: stretches one chord position's performed duration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Fermata {
    /// Chord position the hold sits on
    pub position: usize,
    /// Duration multiplier; values ≤ 1 are ignored
    pub duration_factor: f64,
}

/// One bracket pair marking a piano-introduction range.
/// Offsets are tstamps: 1-based, in time-signature-denominator units
/// relative to the owning measure (1.0 = the measure's first beat).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntroBracket {
    /// Index of the first covered measure
    pub start_measure: usize,
    /// tstamp within the first measure where the range opens
    pub start_offset: f64,
    /// Index of the last covered measure
    pub end_measure: usize,
    /// tstamp within the last measure where the range closes (exclusive)
    pub end_offset: f64,
}

/// Position-indexed annotations, opaque to the engine except for the keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChordSet {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub entries: Vec<ChordSetEntry>,
}

/// One chord-set entry: a position key plus an opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChordSetEntry {
    /// Chord position this annotation belongs to
    pub position: usize,
    /// Payload passed through untouched (text, image reference, …)
    pub payload: serde_json::Value,
}

impl Document {
    /// Number of leading measures belonging to an extracted introduction.
    pub fn intro_measure_count(&self) -> usize {
        self.measures.iter().take_while(|m| m.intro).count()
    }

    /// Highest staff number used anywhere in the document (at least 1).
    pub fn staff_count(&self) -> u8 {
        let mut max_staff = 1u8;
        for measure in &self.measures {
            if let Some(ref attrs) = measure.attributes {
                if let Some(s) = attrs.staves {
                    max_staff = max_staff.max(s);
                }
            }
            for note in &measure.notes {
                max_staff = max_staff.max(note.staff);
            }
        }
        max_staff
    }

    /// True if any note anywhere carries a lyric syllable.
    pub fn has_lyrics(&self) -> bool {
        self.measures
            .iter()
            .any(|m| m.notes.iter().any(|n| !n.lyrics.is_empty()))
    }
}
