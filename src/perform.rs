//! Minimal-profile performance rendering: synthesize the note-event list
//! the aligner falls back on when no external performance is supplied.
//! One onset per audible chord position, tie chains emitted as a single
//! sustained event, real times derived from the document's tempo points.

use crate::indexer::{ScoreIndex, TempoPoint, DEFAULT_QPM};
use crate::model::{Performance, PerformedNote, TempoChange, EPS};

/// Key velocity for engine-rendered events.
pub const RENDER_VELOCITY: u8 = 80;

/// Piecewise mapping from score time (quarter-note units) to seconds
/// under a sorted list of tempo change points.
#[derive(Debug, Clone, Copy)]
pub struct TempoMap<'a> {
    points: &'a [TempoPoint],
}

impl<'a> TempoMap<'a> {
    pub fn new(points: &'a [TempoPoint]) -> Self {
        Self { points }
    }

    /// Seconds elapsed from score start to `qstamp`, accumulating each
    /// constant-tempo segment on the way.
    pub fn seconds_at(&self, qstamp: f64) -> f64 {
        let mut seconds = 0.0;
        let mut prev_q = 0.0;
        let mut prev_qpm = DEFAULT_QPM;
        for point in self.points {
            if qstamp <= point.qstamp + EPS {
                break;
            }
            seconds += (point.qstamp - prev_q) * 60.0 / prev_qpm;
            prev_q = point.qstamp;
            prev_qpm = point.qpm;
        }
        seconds + (qstamp - prev_q) * 60.0 / prev_qpm
    }

    /// Tempo in effect at `qstamp` (last change at-or-before).
    pub fn qpm_at(&self, qstamp: f64) -> f64 {
        let mut qpm = DEFAULT_QPM;
        for point in self.points {
            if point.qstamp <= qstamp + EPS {
                qpm = point.qpm;
            } else {
                break;
            }
        }
        qpm
    }
}

/// Render the "minimal" profile: every audible note of every audible
/// chord position, in written order, with no repeats.  A tie chain
/// becomes one event lasting until the final tied note's offset, so the
/// distinct onset count equals the audible position count.
pub fn render_minimal(index: &ScoreIndex) -> Performance {
    let tempo_map = TempoMap::new(&index.tempos);
    let mut notes = Vec::new();

    for position in &index.positions {
        if !position.audible {
            continue;
        }
        let start = tempo_map.seconds_at(position.start);
        for &ni in &position.notes {
            let note = &index.notes[ni];
            if !note.audible() {
                continue;
            }
            let midi = match note.midi {
                Some(m) => m.clamp(0, 127) as u8,
                None => continue,
            };
            let end = tempo_map.seconds_at(chain_end(index, ni));
            notes.push(PerformedNote {
                pitch: midi,
                start,
                end,
                velocity: RENDER_VELOCITY,
            });
        }
    }

    let tempos = index
        .tempos
        .iter()
        .map(|p| TempoChange {
            time: tempo_map.seconds_at(p.qstamp),
            qpm: p.qpm,
        })
        .collect();

    Performance { notes, tempos }
}

/// Offset (quarter-note units) of the last note in a tie chain.
pub fn chain_end(index: &ScoreIndex, note_index: usize) -> f64 {
    let mut ni = note_index;
    let mut end = index.notes[ni].end;
    // Bounded walk in case a malformed document ties in a cycle.
    for _ in 0..index.notes.len() {
        match index.notes[ni].tie_to {
            Some(next) => {
                ni = next;
                end = index.notes[ni].end;
            }
            None => break,
        }
    }
    end
}
