//! Metronome beat derivation: a click timeline over the playback order,
//! with beat numbers, downbeat flags, and a beats-per-minute value
//! converted from the local quarter-note tempo by meter.
//!
//! Compound meters click on the dotted beat (6/8 at 120 QPM clicks in
//! twos at 80 BPM); cut time clicks on the half note.  Pickup measures
//! anchor their beat grid at the barline so the count meets the next
//! downbeat, numbering backward from the full bar.

use serde::Serialize;

use crate::align::{ExpandedTiming, PositionTiming};
use crate::expansion::Expansion;
use crate::indexer::ScoreIndex;
use crate::model::{TimeSignature, EPS};

/// One metronome click in the playback timeline.
#[derive(Debug, Clone, Serialize)]
pub struct MetronomeBeat {
    /// Click time in seconds
    pub time: f64,
    /// Beat number within the measure, 1-based
    pub number: u32,
    /// First beat of a measure that opens on beat one
    pub downbeat: bool,
    /// Metronome rate at this click, in beats per minute
    pub bpm: f64,
}

/// A beat slot in the written score, in quarter-note units.
#[derive(Debug, Clone, Copy)]
struct GridBeat {
    q: f64,
    number: u32,
    downbeat: bool,
    beat_len: f64,
}

/// Quarter-note length of one metronome beat for a meter.
fn beat_len(time: &TimeSignature) -> f64 {
    match time.beat_type {
        1 => 4.0,
        2 => 2.0,
        4 => 1.0,
        8 if time.beats % 3 == 0 => 1.5,
        8 => 0.5,
        16 => 0.25,
        _ => time.denominator_quarters(),
    }
}

/// Walk the playback timeline and emit one click per written beat slot
/// inside each expanded position's span, interpolating real times from
/// the position's reconciled start/end.
pub fn derive_metronome(
    index: &ScoreIndex,
    expansion: &Expansion,
    positions: &[PositionTiming],
    expanded: &[ExpandedTiming],
) -> Vec<MetronomeBeat> {
    let grid = build_grid(index);
    if grid.is_empty() {
        return Vec::new();
    }

    let mut beats = Vec::new();
    for (e, timing) in expansion.expanded.iter().zip(expanded) {
        let pos = &index.positions[e.position];
        let qspan = pos.qlen();
        let real = timing.end - timing.start;
        if qspan <= EPS || real <= EPS {
            continue;
        }
        let lo = grid.partition_point(|b| b.q < pos.start - EPS);
        for beat in &grid[lo..] {
            if beat.q >= pos.end - EPS {
                break;
            }
            let frac = (beat.q - pos.start) / qspan;
            let qpm = positions[e.position].qpm;
            beats.push(MetronomeBeat {
                time: timing.start + frac * real,
                number: beat.number,
                downbeat: beat.downbeat,
                bpm: qpm / beat.beat_len,
            });
        }
    }
    beats
}

/// Beat slots for every measure in written order.  Measures that open
/// on a downbeat count forward from the bar; pickups count backward
/// from the barline, skipping any slot that would start mid-beat.
fn build_grid(index: &ScoreIndex) -> Vec<GridBeat> {
    let mut grid = Vec::new();
    for m in &index.measures {
        let len = beat_len(&m.time);
        if len <= EPS || m.end - m.start <= EPS {
            continue;
        }
        let nominal = (m.time.measure_quarters() / len).round().max(1.0) as u32;
        if m.kind.opens_on_downbeat() {
            let mut k = 0u32;
            loop {
                let q = m.start + k as f64 * len;
                if q >= m.end - EPS {
                    break;
                }
                grid.push(GridBeat {
                    q,
                    number: k + 1,
                    downbeat: k == 0,
                    beat_len: len,
                });
                k += 1;
            }
        } else {
            let mut picked = Vec::new();
            let mut k = 1u32;
            loop {
                let q = m.end - k as f64 * len;
                if q < m.start - EPS {
                    break;
                }
                picked.push(GridBeat {
                    q,
                    number: nominal.saturating_sub(k) + 1,
                    downbeat: false,
                    beat_len: len,
                });
                k += 1;
            }
            picked.reverse();
            grid.extend(picked);
        }
    }
    grid
}
