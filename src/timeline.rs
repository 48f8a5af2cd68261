//! Derive the onset/offset event stream from a document tree.
//!
//! The rendering engine normally supplies this stream alongside the
//! document (it knows the true horizontal layout).  This builder exists
//! for the engine-rendered fallback path and for tests: it reconstructs
//! the stream from notated durations alone, tracking a running position
//! per (staff, layer) voice.

use std::collections::HashMap;

use crate::model::{Document, TimelineEvent, EPS};

/// Build the time-ordered onset/offset stream for `doc`.
///
/// Each measure contributes one measure-start marker; every non-grace
/// note contributes one `on` entry at its onset and one `off` entry at
/// onset + duration.  Chord members share the onset of the note they are
/// attached to.  An empty measure advances time by its nominal
/// time-signature length so the measure sequence stays intact.
pub fn from_document(doc: &Document) -> Vec<TimelineEvent> {
    let mut events: Vec<TimelineEvent> = Vec::new();
    let mut song_pos = 0.0f64;
    let mut time_sig = crate::model::TimeSignature::default();

    for measure in &doc.measures {
        if let Some(ref attrs) = measure.attributes {
            if let Some(ts) = attrs.time {
                time_sig = ts;
            }
        }
        slot(&mut events, song_pos).measure = Some(measure.id.clone());

        // Running position per (staff, layer) within the measure, plus the
        // last non-chord onset so chord members can attach to it.
        let mut cursors: HashMap<(u8, i32), f64> = HashMap::new();
        let mut last_onset: HashMap<(u8, i32), f64> = HashMap::new();
        let mut measure_len = 0.0f64;

        for note in &measure.notes {
            if note.grace {
                continue;
            }
            let voice = (note.staff, note.layer);
            let start_in_measure = if note.chord {
                let cur = cursors.get(&voice).copied().unwrap_or(0.0);
                last_onset.get(&voice).copied().unwrap_or(cur)
            } else {
                let cur = cursors.get(&voice).copied().unwrap_or(0.0);
                cursors.insert(voice, cur + note.duration);
                last_onset.insert(voice, cur);
                cur
            };
            let on_q = song_pos + start_in_measure;
            slot(&mut events, on_q).on.push(note.id.clone());
            slot(&mut events, on_q + note.duration).off.push(note.id.clone());
            measure_len = measure_len.max(start_in_measure + note.duration);
        }

        if measure_len <= EPS {
            measure_len = time_sig.measure_quarters();
        }
        song_pos += measure_len;
    }

    events
}

/// Find or insert the event entry at `qstamp`, keeping the list sorted.
fn slot(events: &mut Vec<TimelineEvent>, qstamp: f64) -> &mut TimelineEvent {
    let idx = events.partition_point(|e| e.qstamp < qstamp - EPS);
    let hit = idx < events.len() && (events[idx].qstamp - qstamp).abs() <= EPS;
    if !hit {
        events.insert(
            idx,
            TimelineEvent {
                qstamp,
                ..Default::default()
            },
        );
    }
    &mut events[idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn note(id: &str, dur: f64, staff: u8, layer: i32, chord: bool) -> Note {
        Note {
            id: id.into(),
            pitch: Some(Pitch {
                step: "C".into(),
                octave: 4,
                alter: None,
            }),
            rest: false,
            cue: false,
            grace: false,
            duration: dur,
            layer,
            staff,
            chord,
            tie_to: None,
            lyrics: Vec::new(),
        }
    }

    #[test]
    fn chord_members_share_onset() {
        let doc = Document {
            title: None,
            measures: vec![Measure {
                id: "m1".into(),
                number: 1,
                attributes: None,
                notes: vec![
                    note("n1", 1.0, 1, 1, false),
                    note("n2", 1.0, 1, 1, true),
                    note("n3", 1.0, 1, 1, false),
                ],
                directions: vec![],
                barlines: vec![],
                intro: false,
            }],
            slurs: vec![],
        };
        let events = from_document(&doc);
        let onsets: Vec<&TimelineEvent> =
            events.iter().filter(|e| !e.on.is_empty()).collect();
        assert_eq!(onsets.len(), 2, "chord member must not open a new onset");
        assert_eq!(onsets[0].on, vec!["n1".to_string(), "n2".to_string()]);
        assert_eq!(onsets[1].on, vec!["n3".to_string()]);
        assert!((onsets[1].qstamp - 1.0).abs() < 1e-9);
    }

    #[test]
    fn voices_interleave_by_time() {
        // Staff 1 moves in quarters while staff 2 holds a half note.
        let doc = Document {
            title: None,
            measures: vec![Measure {
                id: "m1".into(),
                number: 1,
                attributes: None,
                notes: vec![
                    note("a1", 1.0, 1, 1, false),
                    note("a2", 1.0, 1, 1, false),
                    note("b1", 2.0, 2, 1, false),
                ],
                directions: vec![],
                barlines: vec![],
                intro: false,
            }],
            slurs: vec![],
        };
        let events = from_document(&doc);
        // 0.0: a1+b1 on, measure marker; 1.0: a1 off, a2 on; 2.0: a2+b1 off
        assert!((events[0].qstamp - 0.0).abs() < 1e-9);
        assert_eq!(events[0].on.len(), 2);
        assert_eq!(events[0].measure.as_deref(), Some("m1"));
        assert!((events[1].qstamp - 1.0).abs() < 1e-9);
        assert_eq!(events[1].on, vec!["a2".to_string()]);
        assert_eq!(events[1].off, vec!["a1".to_string()]);
    }

    #[test]
    fn empty_measure_advances_by_time_signature() {
        let doc = Document {
            title: None,
            measures: vec![
                Measure {
                    id: "m1".into(),
                    number: 1,
                    attributes: Some(Attributes {
                        key: None,
                        time: Some(TimeSignature {
                            beats: 3,
                            beat_type: 4,
                        }),
                        staves: None,
                    }),
                    notes: vec![],
                    directions: vec![],
                    barlines: vec![],
                    intro: false,
                },
                Measure {
                    id: "m2".into(),
                    number: 2,
                    attributes: None,
                    notes: vec![note("n1", 1.0, 1, 1, false)],
                    directions: vec![],
                    barlines: vec![],
                    intro: false,
                },
            ],
            slurs: vec![],
        };
        let events = from_document(&doc);
        let m2 = events
            .iter()
            .find(|e| e.measure.as_deref() == Some("m2"))
            .unwrap();
        assert!((m2.qstamp - 3.0).abs() < 1e-9);
    }
}
