//! Piano-introduction extractor: clone a bracketed measure/time range
//! into a new leading block of intro-flagged measures.
//!
//! Bracket offsets are tstamps (1-based, in time-signature-denominator
//! units relative to the owning measure).  Elements that only partially
//! overlap the bracketed window are clipped, with their notated duration
//! re-derived from the overlap (up to two dots).  Every cloned id gets a
//! collision-free suffix, cross-references are rewritten, and ties or
//! slurs pointing outside the extraction are dropped.

use std::collections::HashMap;

use crate::model::{
    Attributes, Barline, Direction, Document, IntroBracket, Key, Measure, Note, Slur,
    TimeSignature, EPS,
};

/// Largest notated duration (a base power of two with up to two dots)
/// not exceeding `len` quarter-note units.
pub fn quarters_to_notated(len: f64) -> f64 {
    if len <= EPS {
        return 0.0;
    }
    let mut base = 8.0f64;
    while base > len + EPS && base > 0.015 {
        base /= 2.0;
    }
    if base > len + EPS {
        return 0.0;
    }
    if base * 1.75 <= len + EPS {
        base * 1.75
    } else if base * 1.5 <= len + EPS {
        base * 1.5
    } else {
        base
    }
}

/// Extract the bracketed ranges into a leading introduction.  Returns
/// the document unmodified when there is nothing to do (no brackets, or
/// an introduction already present).
pub fn extract_introduction(doc: &Document, brackets: &[IntroBracket]) -> Document {
    if brackets.is_empty() || doc.intro_measure_count() > 0 {
        return doc.clone();
    }

    let mut intro_measures: Vec<Measure> = Vec::new();
    let mut remapped: HashMap<String, String> = HashMap::new();
    let mut last_source: Option<usize> = None;

    for (bi, bracket) in brackets.iter().enumerate() {
        if bracket.start_measure > bracket.end_measure
            || bracket.end_measure >= doc.measures.len()
        {
            log::warn!(
                "introduction bracket {}..{} is out of range, skipping",
                bracket.start_measure,
                bracket.end_measure
            );
            continue;
        }
        let suffix = if bi == 0 {
            "-intro".to_string()
        } else {
            format!("-intro{}", bi + 1)
        };
        let first_of_bracket = intro_measures.len();
        for mi in bracket.start_measure..=bracket.end_measure {
            let (_, time, _) = effective_attrs(doc, mi);
            let lo = if mi == bracket.start_measure {
                bracket.start_offset
            } else {
                1.0
            };
            let hi = if mi == bracket.end_measure {
                bracket.end_offset
            } else {
                f64::INFINITY
            };
            let clipped = clip_measure(&doc.measures[mi], time, lo, hi, &suffix, &mut remapped);
            if !clipped.notes.is_empty() {
                intro_measures.push(clipped);
                last_source = Some(mi);
            }
        }
        // The first measure of each bracket restates the attributes in
        // effect at its source so the clones stand on their own.
        if let Some(first) = intro_measures.get_mut(first_of_bracket) {
            let (key, time, staves) = effective_attrs(doc, bracket.start_measure);
            first.attributes = Some(Attributes {
                key,
                time: Some(time),
                staves,
            });
        }
    }

    if intro_measures.is_empty() {
        return doc.clone();
    }

    rewrite_ties(&mut intro_measures, &remapped);

    // Effective tempo at the first bracket's source carries over.
    if let Some(qpm) = effective_tempo(doc, brackets[0].start_measure) {
        intro_measures[0].directions.push(Direction {
            tempo: Some(qpm),
            ..Default::default()
        });
    }

    // Join barline: invisible when both sides of the join are partial
    // measures, a double bar otherwise.  Each side is measured against
    // the meter in effect at its source measure.
    let last_partial = intro_measures
        .last()
        .zip(last_source)
        .map(|(m, src)| is_partial(m, effective_attrs(doc, src).1))
        .unwrap_or(false);
    let first_partial = doc
        .measures
        .first()
        .map(|m| is_partial(m, effective_attrs(doc, 0).1))
        .unwrap_or(false);
    if let Some(last) = intro_measures.last_mut() {
        last.barlines = vec![Barline {
            location: "right".into(),
            style: Some(if last_partial && first_partial {
                "none".into()
            } else {
                "light-light".into()
            }),
            repeat: None,
            ending: None,
        }];
    }

    // Renumber: introduction 1..k, original measures shifted past it.
    let k = intro_measures.len() as i32;
    for (i, m) in intro_measures.iter_mut().enumerate() {
        m.number = i as i32 + 1;
    }
    let mut measures = intro_measures;
    for m in &doc.measures {
        let mut m = m.clone();
        m.number += k;
        measures.push(m);
    }

    // Slurs fully inside the extraction are cloned with remapped ends.
    let mut slurs = doc.slurs.clone();
    for slur in &doc.slurs {
        if let (Some(from), Some(to)) = (remapped.get(&slur.from), remapped.get(&slur.to)) {
            slurs.push(Slur {
                from: from.clone(),
                to: to.clone(),
            });
        }
    }

    Document {
        title: doc.title.clone(),
        measures,
        slurs,
    }
}

/// Attributes in effect at a measure, walking from the start.
fn effective_attrs(
    doc: &Document,
    upto: usize,
) -> (Option<Key>, TimeSignature, Option<u8>) {
    let mut key = None;
    let mut time = TimeSignature::default();
    let mut staves = None;
    for m in doc.measures.iter().take(upto + 1) {
        if let Some(ref attrs) = m.attributes {
            if let Some(ref k) = attrs.key {
                key = Some(k.clone());
            }
            if let Some(ts) = attrs.time {
                time = ts;
            }
            if let Some(s) = attrs.staves {
                staves = Some(s);
            }
        }
    }
    (key, time, staves)
}

fn effective_tempo(doc: &Document, upto: usize) -> Option<f64> {
    let mut tempo = None;
    for m in doc.measures.iter().take(upto + 1) {
        for dir in &m.directions {
            if let Some(qpm) = dir.tempo {
                tempo = Some(qpm);
            }
        }
    }
    tempo
}

/// Clone one measure, keeping only content inside the tstamp window
/// `[lo, hi)` and clipping boundary elements to the overlap.
fn clip_measure(
    measure: &Measure,
    time: TimeSignature,
    lo: f64,
    hi: f64,
    suffix: &str,
    remapped: &mut HashMap<String, String>,
) -> Measure {
    let denomq = time.denominator_quarters();
    let mut cursors: HashMap<(u8, i32), f64> = HashMap::new();
    let mut last_onset: HashMap<(u8, i32), f64> = HashMap::new();
    let mut kept: Vec<Note> = Vec::new();
    // Voices whose previous note in this measure survived, for chord
    // flag repair.
    let mut prev_survived: HashMap<(u8, i32), bool> = HashMap::new();

    for note in &measure.notes {
        let voice = (note.staff, note.layer);
        let onset_q = if note.grace {
            cursors.get(&voice).copied().unwrap_or(0.0)
        } else if note.chord {
            last_onset.get(&voice).copied().unwrap_or(0.0)
        } else {
            let cur = cursors.get(&voice).copied().unwrap_or(0.0);
            cursors.insert(voice, cur + note.duration);
            last_onset.insert(voice, cur);
            cur
        };
        let ts_start = 1.0 + onset_q / denomq;
        let ts_end = ts_start + note.duration / denomq;
        let survives = if note.grace {
            ts_start >= lo - EPS && ts_start < hi - EPS
        } else {
            let ov = ts_end.min(hi) - ts_start.max(lo);
            ov > EPS
        };
        if !survives {
            if !note.chord {
                prev_survived.insert(voice, false);
            }
            continue;
        }

        let mut clone = note.clone();
        let new_id = format!("{}{}", note.id, suffix);
        remapped.insert(note.id.clone(), new_id.clone());
        clone.id = new_id;
        // The extracted introduction is instrumental.
        clone.lyrics.clear();
        if !note.grace {
            let fully_inside = ts_start >= lo - EPS && ts_end <= hi + EPS;
            if !fully_inside {
                let overlap_q = (ts_end.min(hi) - ts_start.max(lo)) * denomq;
                clone.duration = quarters_to_notated(overlap_q);
                if clone.duration <= EPS {
                    remapped.remove(&note.id);
                    if !note.chord {
                        prev_survived.insert(voice, false);
                    }
                    continue;
                }
            }
        }
        if clone.chord && !prev_survived.get(&voice).copied().unwrap_or(false) {
            clone.chord = false;
        }
        if !note.chord {
            prev_survived.insert(voice, true);
        }
        kept.push(clone);
    }

    Measure {
        id: format!("{}{}", measure.id, suffix),
        number: measure.number,
        attributes: None,
        notes: kept,
        directions: Vec::new(),
        barlines: Vec::new(),
        intro: true,
    }
}

/// Rewrite tie targets to their cloned ids; a tie whose endpoint was not
/// extracted is dropped.
fn rewrite_ties(measures: &mut [Measure], remapped: &HashMap<String, String>) {
    for measure in measures {
        for note in &mut measure.notes {
            note.tie_to = note
                .tie_to
                .take()
                .and_then(|target| remapped.get(&target).cloned());
        }
    }
}

/// Shorter than the given time signature implies.
fn is_partial(measure: &Measure, time: TimeSignature) -> bool {
    content_quarters(measure) + EPS < time.measure_quarters()
}

/// Longest voice extent inside a measure, in quarter-note units.
fn content_quarters(measure: &Measure) -> f64 {
    let mut cursors: HashMap<(u8, i32), f64> = HashMap::new();
    let mut max_end = 0.0f64;
    for note in &measure.notes {
        if note.grace || note.chord {
            continue;
        }
        let voice = (note.staff, note.layer);
        let cur = cursors.get(&voice).copied().unwrap_or(0.0);
        cursors.insert(voice, cur + note.duration);
        max_end = max_end.max(cur + note.duration);
    }
    max_end
}
