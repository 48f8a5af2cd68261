//! Shared score fixtures for the integration tests.
//!
//! The engine is exercised end to end on documents built in code: a
//! four-part hymn with two verses and a chorus, a single-line song for
//! stanza alignment, pickup scores in common and triple time, and a
//! tied melody for playback synthesis.

#![allow(dead_code)]

use scoresync::{
    Attributes, Barline, Document, Key, Lyric, Measure, Note, Pitch, TimeSignature,
};

/// A pitched note with no lyrics.
pub fn pitched(id: &str, step: &str, octave: i32, duration: f64, staff: u8, layer: i32) -> Note {
    Note {
        id: id.to_string(),
        pitch: Some(Pitch {
            step: step.to_string(),
            octave,
            alter: None,
        }),
        rest: false,
        cue: false,
        grace: false,
        duration,
        layer,
        staff,
        chord: false,
        tie_to: None,
        lyrics: Vec::new(),
    }
}

/// A lyric syllable on one verse line.
pub fn syllable(line: u8, text: &str, syllabic: &str) -> Lyric {
    Lyric {
        line,
        text: text.to_string(),
        syllabic: Some(syllabic.to_string()),
        label: None,
    }
}

pub fn measure(id: &str, number: i32, notes: Vec<Note>) -> Measure {
    Measure {
        id: id.to_string(),
        number,
        attributes: None,
        notes,
        directions: Vec::new(),
        barlines: Vec::new(),
        intro: false,
    }
}

pub fn document(measures: Vec<Measure>) -> Document {
    Document {
        title: None,
        measures,
        slurs: Vec::new(),
    }
}

fn terminal_barline() -> Barline {
    Barline {
        location: "right".to_string(),
        style: Some("light-heavy".to_string()),
        repeat: None,
        ending: None,
    }
}

const VERSE_1: [(&str, &str); 8] = [
    ("Sing", "single"),
    ("to", "single"),
    ("God", "single"),
    ("a", "single"),
    ("joy", "begin"),
    ("ful", "end"),
    ("song", "single"),
    ("now", "single"),
];
const VERSE_2: [(&str, &str); 8] = [
    ("Raise", "single"),
    ("your", "single"),
    ("voice", "single"),
    ("in", "single"),
    ("thank", "begin"),
    ("ful", "end"),
    ("praise", "single"),
    ("now", "single"),
];
const CHORUS: [(&str, &str); 8] = [
    ("Al", "begin"),
    ("le", "middle"),
    ("lu", "middle"),
    ("ia", "end"),
    ("Al", "begin"),
    ("le", "middle"),
    ("lu", "middle"),
    ("ia", "end"),
];

/// Four-part hymn on two staves: two verse lines over the first eight
/// quarter positions, a single-line chorus over the last eight, verse
/// labels on the first chord, and a final barline.  Section inference
/// reads this as verse 1 / chorus / verse 2 / chorus.
pub fn simple_hymn() -> Document {
    let mut measures = Vec::new();
    for mi in 0..4usize {
        let mut notes = Vec::new();
        for beat in 0..4usize {
            let pos = mi * 4 + beat;
            let mut soprano = pitched(&format!("s{}", pos), "C", 5, 1.0, 1, 1);
            if pos < 8 {
                let (t1, s1) = VERSE_1[pos];
                let (t2, s2) = VERSE_2[pos];
                soprano.lyrics.push(syllable(1, t1, s1));
                soprano.lyrics.push(syllable(2, t2, s2));
                if pos == 0 {
                    soprano.lyrics[0].label = Some("1.".to_string());
                    soprano.lyrics[1].label = Some("2.".to_string());
                }
            } else {
                let (t1, s1) = CHORUS[pos - 8];
                soprano.lyrics.push(syllable(1, t1, s1));
            }
            notes.push(soprano);
            notes.push(pitched(&format!("a{}", pos), "E", 4, 1.0, 1, 2));
            notes.push(pitched(&format!("t{}", pos), "G", 3, 1.0, 2, 1));
            notes.push(pitched(&format!("b{}", pos), "C", 3, 1.0, 2, 2));
        }
        let mut m = measure(&format!("m{}", mi + 1), (mi + 1) as i32, notes);
        if mi == 0 {
            m.attributes = Some(Attributes {
                key: Some(Key {
                    fifths: 1,
                    mode: Some("major".to_string()),
                }),
                time: Some(TimeSignature { beats: 4, beat_type: 4 }),
                staves: Some(2),
            });
        }
        if mi == 3 {
            m.barlines.push(terminal_barline());
        }
        measures.push(m);
    }
    document(measures)
}

const PLAIN_WORDS: [(&str, &str); 8] = [
    ("Shine", "single"),
    ("a", "single"),
    ("gen", "begin"),
    ("tle", "end"),
    ("light", "single"),
    ("on", "single"),
    ("me", "single"),
    ("now", "single"),
];

/// The lyric sheet matching [`plain_lyric_score`].
pub const PLAIN_LYRICS: &str = "[Verse 1]\nShine a gentle light on me now\n";

/// Eight quarters on one staff singing one lyric line, with no verse
/// labels and no final barline.  Too little markup for the simple-score
/// heuristics, so stanza alignment has to carry section detection.
pub fn plain_lyric_score() -> Document {
    let mut measures = Vec::new();
    for mi in 0..2usize {
        let mut notes = Vec::new();
        for beat in 0..4usize {
            let pos = mi * 4 + beat;
            let mut note = pitched(&format!("n{}", pos), "D", 4, 1.0, 1, 1);
            let (text, syllabic) = PLAIN_WORDS[pos];
            note.lyrics.push(syllable(1, text, syllabic));
            notes.push(note);
        }
        let mut m = measure(&format!("m{}", mi + 1), (mi + 1) as i32, notes);
        if mi == 0 {
            m.attributes = Some(Attributes {
                key: None,
                time: Some(TimeSignature { beats: 4, beat_type: 4 }),
                staves: Some(1),
            });
        }
        measures.push(m);
    }
    document(measures)
}

/// One-beat pickup, a full bar, and the three-beat bar that closes it.
pub fn pickup_score() -> Document {
    let mut m1 = measure("m1", 0, vec![pitched("p0", "G", 4, 1.0, 1, 1)]);
    m1.attributes = Some(Attributes {
        key: None,
        time: Some(TimeSignature { beats: 4, beat_type: 4 }),
        staves: Some(1),
    });
    let m2 = measure(
        "m2",
        1,
        (0..4)
            .map(|i| pitched(&format!("q{}", i), "A", 4, 1.0, 1, 1))
            .collect(),
    );
    let m3 = measure(
        "m3",
        2,
        (0..3)
            .map(|i| pitched(&format!("r{}", i), "B", 4, 1.0, 1, 1))
            .collect(),
    );
    document(vec![m1, m2, m3])
}

/// One-beat pickup into two full bars of 3/4.
pub fn waltz_pickup_score() -> Document {
    let mut m1 = measure("m1", 0, vec![pitched("w0", "G", 4, 1.0, 1, 1)]);
    m1.attributes = Some(Attributes {
        key: None,
        time: Some(TimeSignature { beats: 3, beat_type: 4 }),
        staves: Some(1),
    });
    let m2 = measure(
        "m2",
        1,
        (0..3)
            .map(|i| pitched(&format!("v{}", i), "A", 4, 1.0, 1, 1))
            .collect(),
    );
    let m3 = measure(
        "m3",
        2,
        (0..3)
            .map(|i| pitched(&format!("u{}", i), "B", 4, 1.0, 1, 1))
            .collect(),
    );
    document(vec![m1, m2, m3])
}

/// Two bars with a half note tied across the barline.  With
/// `rearticulate` the continuation carries its own syllable and must be
/// struck again instead of sustaining.
pub fn tied_melody(rearticulate: bool) -> Document {
    let mut head = pitched("c1", "C", 5, 2.0, 1, 1);
    head.tie_to = Some("c2".to_string());
    let mut m1 = measure("m1", 1, vec![head, pitched("d1", "D", 5, 2.0, 1, 1)]);
    m1.attributes = Some(Attributes {
        key: None,
        time: Some(TimeSignature { beats: 4, beat_type: 4 }),
        staves: Some(1),
    });
    let mut tail = pitched("c2", "C", 5, 2.0, 1, 1);
    if rearticulate {
        tail.lyrics.push(syllable(1, "new", "single"));
    }
    let m2 = measure("m2", 2, vec![tail, pitched("e1", "E", 5, 2.0, 1, 1)]);
    document(vec![m1, m2])
}

/// One bar of 6/8 filled with eighth notes.
pub fn six_eight_score() -> Document {
    let mut m1 = measure(
        "m1",
        1,
        (0..6)
            .map(|i| pitched(&format!("e{}", i), "C", 5, 0.5, 1, 1))
            .collect(),
    );
    m1.attributes = Some(Attributes {
        key: None,
        time: Some(TimeSignature { beats: 6, beat_type: 8 }),
        staves: Some(1),
    });
    document(vec![m1])
}
