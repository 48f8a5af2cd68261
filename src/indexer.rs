//! Position indexer: walk the onset/offset event stream and assign every
//! unique onset instant a chord position (0-based, written order).
//! Simultaneous note starts share one position.  Also derives per-measure
//! timing, measure kind, downbeat flags, and the key/tempo change lists.
//!
//! The indexer never fails: unknown ids, unsorted streams, and missing
//! markers degrade with a logged warning while the rest of the index
//! stays usable.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::{Document, Key, Lyric, LyricLineId, TimeSignature, TimelineEvent, EPS};

/// Tempo assumed until the first tempo direction.
pub const DEFAULT_QPM: f64 = 120.0;

/// One notated event (note or rest) in the flat arena.
#[derive(Debug, Clone, Serialize)]
pub struct NoteRecord {
    /// Element id assigned by the engine
    pub id: String,
    /// Index of the owning measure
    pub measure: usize,
    pub staff: u8,
    pub layer: i32,
    /// MIDI pitch number (None for rests)
    pub midi: Option<i32>,
    pub rest: bool,
    pub cue: bool,
    /// Notated duration in quarter-note units
    pub duration: f64,
    /// Arena index of the note this one ties into
    pub tie_to: Option<usize>,
    /// This note is a tied continuation (some note ties into it)
    pub tied_from: bool,
    /// Lyric syllables, one per verse line
    pub lyrics: Vec<Lyric>,
    /// Chord position, assigned from the timeline
    pub position: Option<usize>,
    /// Onset in quarter-note units
    pub start: f64,
    /// Offset in quarter-note units
    pub end: f64,
}

impl NoteRecord {
    /// Produces sound of its own: not a rest, cue, or tied continuation.
    pub fn audible(&self) -> bool {
        !self.rest && !self.cue && !self.tied_from
    }

    /// The syllable this note carries on the given verse line.
    pub fn lyric_on(&self, line: u8) -> Option<&Lyric> {
        self.lyrics.iter().find(|l| l.line == line)
    }
}

/// One unique written onset instant.
#[derive(Debug, Clone, Serialize)]
pub struct ChordPosition {
    pub index: usize,
    /// Onset in quarter-note units
    pub start: f64,
    /// Start of the next position, or the last member offset for the
    /// final position.  `end - start` is the rest-reconstruction span.
    pub end: f64,
    /// Index of the owning measure
    pub measure: usize,
    /// Arena indices of the simultaneous notes/rests starting here
    pub notes: Vec<usize>,
    /// At least one member produces sound
    pub audible: bool,
    /// First beat of a measure that opens on beat one
    pub downbeat: bool,
}

impl ChordPosition {
    /// Written span of this position in quarter-note units.
    pub fn qlen(&self) -> f64 {
        self.end - self.start
    }
}

/// How a measure's actual length relates to its time signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeasureKind {
    /// Actual length matches the time signature
    Full,
    /// Short opening measure (anacrusis), starts mid-measure
    PartialPickup,
    /// Short closing measure, balances an opening pickup
    PartialPickdown,
    /// Short mid-score measure opening a phrase, starts mid-measure
    PartialStart,
    /// Short mid-score measure closing a phrase, opens on beat one
    PartialEnd,
}

impl MeasureKind {
    /// Whether this kind of measure opens on a downbeat.
    pub fn opens_on_downbeat(&self) -> bool {
        matches!(
            self,
            MeasureKind::Full | MeasureKind::PartialEnd | MeasureKind::PartialPickdown
        )
    }
}

/// Derived timing and classification for one measure.
#[derive(Debug, Clone, Serialize)]
pub struct MeasureInfo {
    pub index: usize,
    pub id: String,
    pub number: i32,
    /// Start in quarter-note units
    pub start: f64,
    /// End in quarter-note units (start of the next measure)
    pub end: f64,
    /// Effective time signature
    pub time: TimeSignature,
    /// First chord position inside this measure, if any
    pub first_position: Option<usize>,
    pub kind: MeasureKind,
    /// Belongs to an extracted piano introduction
    pub intro: bool,
}

/// A key signature change, keyed by chord position.
#[derive(Debug, Clone, Serialize)]
pub struct KeyChange {
    pub position: usize,
    pub key: Key,
}

/// A tempo change, keyed by song-relative quarter-note time.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TempoPoint {
    pub qstamp: f64,
    pub qpm: f64,
}

/// The full positional index of one document.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreIndex {
    pub notes: Vec<NoteRecord>,
    pub positions: Vec<ChordPosition>,
    pub measures: Vec<MeasureInfo>,
    pub keys: Vec<KeyChange>,
    pub tempos: Vec<TempoPoint>,
    #[serde(skip)]
    id_to_note: HashMap<String, usize>,
}

// ═══════════════════════════════════════════════════════════════════════
// Index construction
// ═══════════════════════════════════════════════════════════════════════

/// Build the positional index for `doc` from its onset/offset stream.
pub fn index_document(doc: &Document, timeline: &[TimelineEvent]) -> ScoreIndex {
    let (mut notes, id_to_note) = build_note_arena(doc);
    resolve_ties(doc, &mut notes, &id_to_note);

    let mut measures = build_measure_scaffold(doc);
    let measure_by_id: HashMap<&str, usize> = doc
        .measures
        .iter()
        .enumerate()
        .map(|(i, m)| (m.id.as_str(), i))
        .collect();

    let merged = merge_events(timeline);

    // ── Walk: one chord position per onset instant ──────────────────
    let mut positions: Vec<ChordPosition> = Vec::new();
    let mut measure_order: Vec<usize> = Vec::new();
    let mut has_off = vec![false; notes.len()];
    let mut current_measure: Option<usize> = None;

    for ev in &merged {
        if let Some(ref mid) = ev.measure {
            match measure_by_id.get(mid.as_str()) {
                Some(&mi) => {
                    measures[mi].start = ev.qstamp;
                    measure_order.push(mi);
                    current_measure = Some(mi);
                }
                None => log::warn!("timeline references unknown measure id {:?}", mid),
            }
        }
        for id in &ev.off {
            if let Some(&n) = id_to_note.get(id) {
                notes[n].end = ev.qstamp;
                has_off[n] = true;
            } else {
                log::warn!("timeline stops unknown element id {:?}", id);
            }
        }
        if ev.on.is_empty() {
            continue;
        }
        let p = positions.len();
        let mut members: Vec<usize> = Vec::new();
        for id in &ev.on {
            match id_to_note.get(id) {
                Some(&n) => {
                    notes[n].position = Some(p);
                    notes[n].start = ev.qstamp;
                    members.push(n);
                }
                None => log::warn!("timeline starts unknown element id {:?}", id),
            }
        }
        if members.is_empty() {
            continue;
        }
        let audible = members.iter().any(|&n| notes[n].audible());
        let mi = current_measure.unwrap_or(0);
        if measures[mi].first_position.is_none() {
            measures[mi].first_position = Some(p);
        }
        positions.push(ChordPosition {
            index: p,
            start: ev.qstamp,
            end: ev.qstamp,
            measure: mi,
            notes: members,
            audible,
            downbeat: false,
        });
    }

    // ── Close dangling durations ────────────────────────────────────
    for (n, rec) in notes.iter_mut().enumerate() {
        if rec.position.is_some() && !has_off[n] {
            rec.end = rec.start + rec.duration;
        }
    }
    let unplaced = notes
        .iter()
        .filter(|r| r.position.is_none())
        .count();
    if unplaced > 0 {
        log::warn!("{} notated elements never appear in the timeline", unplaced);
    }

    close_positions(&mut positions, &notes);
    classify_measures(&mut measures, &measure_order, &merged);
    mark_downbeats(&mut positions, &measures);

    let keys = collect_keys(doc, &measures);
    let tempos = collect_tempos(doc, &measures);

    ScoreIndex {
        notes,
        positions,
        measures,
        keys,
        tempos,
        id_to_note,
    }
}

fn build_note_arena(doc: &Document) -> (Vec<NoteRecord>, HashMap<String, usize>) {
    let mut notes = Vec::new();
    let mut id_to_note = HashMap::new();
    for (mi, measure) in doc.measures.iter().enumerate() {
        for note in &measure.notes {
            // Grace notes have no time slot of their own and never reach
            // the timeline.
            if note.grace {
                continue;
            }
            let rec = NoteRecord {
                id: note.id.clone(),
                measure: mi,
                staff: note.staff,
                layer: note.layer,
                midi: note.pitch.as_ref().map(|p| p.to_midi()),
                rest: note.rest,
                cue: note.cue,
                duration: note.duration,
                tie_to: None,
                tied_from: false,
                lyrics: note.lyrics.clone(),
                position: None,
                start: 0.0,
                end: 0.0,
            };
            if id_to_note.insert(note.id.clone(), notes.len()).is_some() {
                log::warn!("duplicate element id {:?}, keeping the later one", note.id);
            }
            notes.push(rec);
        }
    }
    (notes, id_to_note)
}

fn resolve_ties(doc: &Document, notes: &mut [NoteRecord], id_to_note: &HashMap<String, usize>) {
    for measure in &doc.measures {
        for note in &measure.notes {
            let Some(ref target_id) = note.tie_to else {
                continue;
            };
            match (id_to_note.get(&note.id), id_to_note.get(target_id)) {
                (Some(&from), Some(&to)) => {
                    notes[from].tie_to = Some(to);
                    notes[to].tied_from = true;
                }
                _ => log::warn!("tie {:?} -> {:?} references an unknown id", note.id, target_id),
            }
        }
    }
}

fn build_measure_scaffold(doc: &Document) -> Vec<MeasureInfo> {
    let mut out = Vec::with_capacity(doc.measures.len());
    let mut time_sig = TimeSignature::default();
    for (mi, m) in doc.measures.iter().enumerate() {
        if let Some(ref attrs) = m.attributes {
            if let Some(ts) = attrs.time {
                time_sig = ts;
            }
        }
        out.push(MeasureInfo {
            index: mi,
            id: m.id.clone(),
            number: m.number,
            start: 0.0,
            end: 0.0,
            time: time_sig,
            first_position: None,
            kind: MeasureKind::Full,
            intro: m.intro,
        });
    }
    out
}

/// Sort (if needed) and merge entries closer than the timing tolerance.
fn merge_events(timeline: &[TimelineEvent]) -> Vec<TimelineEvent> {
    let mut sorted: Vec<TimelineEvent> = timeline.to_vec();
    let in_order = sorted.windows(2).all(|w| w[0].qstamp <= w[1].qstamp + EPS);
    if !in_order {
        log::warn!("timeline not sorted by qstamp, sorting");
        sorted.sort_by(|a, b| {
            a.qstamp
                .partial_cmp(&b.qstamp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    let mut merged: Vec<TimelineEvent> = Vec::with_capacity(sorted.len());
    for ev in sorted {
        match merged.last_mut() {
            Some(last) if (last.qstamp - ev.qstamp).abs() <= EPS => {
                last.on.extend(ev.on);
                last.off.extend(ev.off);
                if last.measure.is_none() {
                    last.measure = ev.measure;
                }
            }
            _ => merged.push(ev),
        }
    }
    merged
}

fn close_positions(positions: &mut [ChordPosition], notes: &[NoteRecord]) {
    let count = positions.len();
    for p in 0..count {
        positions[p].end = if p + 1 < count {
            positions[p + 1].start
        } else {
            positions[p]
                .notes
                .iter()
                .map(|&n| notes[n].end)
                .fold(positions[p].start, f64::max)
        };
    }
}

/// Compute measure ends and kinds.  A measure's kind needs the next
/// measure-start (its own end), so this runs after the full walk.
fn classify_measures(
    measures: &mut [MeasureInfo],
    measure_order: &[usize],
    merged: &[TimelineEvent],
) {
    let last_time = merged.last().map(|e| e.qstamp).unwrap_or(0.0);
    let count = measure_order.len();
    let mut prev_kind = MeasureKind::Full;
    for k in 0..count {
        let mi = measure_order[k];
        let end = if k + 1 < count {
            measures[measure_order[k + 1]].start
        } else {
            last_time
        };
        measures[mi].end = end;
        let nominal = measures[mi].time.measure_quarters();
        let actual = end - measures[mi].start;
        let kind = if actual + EPS < nominal {
            if k == 0 {
                MeasureKind::PartialPickup
            } else if k + 1 == count {
                MeasureKind::PartialPickdown
            } else if prev_kind == MeasureKind::PartialEnd {
                MeasureKind::PartialStart
            } else {
                MeasureKind::PartialEnd
            }
        } else {
            MeasureKind::Full
        };
        measures[mi].kind = kind;
        prev_kind = kind;
    }
    if measure_order.len() < measures.len() {
        log::warn!(
            "{} measures never marked in the timeline",
            measures.len() - measure_order.len()
        );
    }
}

fn mark_downbeats(positions: &mut [ChordPosition], measures: &[MeasureInfo]) {
    for pos in positions.iter_mut() {
        let m = &measures[pos.measure];
        pos.downbeat = m.first_position == Some(pos.index) && m.kind.opens_on_downbeat();
    }
}

/// Key changes, keyed by the first chord position at or after the
/// declaring measure.
fn collect_keys(doc: &Document, measures: &[MeasureInfo]) -> Vec<KeyChange> {
    let mut keys: Vec<KeyChange> = Vec::new();
    for (mi, m) in doc.measures.iter().enumerate() {
        let Some(key) = m.attributes.as_ref().and_then(|a| a.key.clone()) else {
            continue;
        };
        // An empty measure defers the change to the next one that has a
        // position.
        let position = measures[mi..]
            .iter()
            .find_map(|info| info.first_position);
        let Some(position) = position else { continue };
        match keys.last_mut() {
            Some(last) if last.position == position => last.key = key,
            _ => keys.push(KeyChange { position, key }),
        }
    }
    keys
}

fn collect_tempos(doc: &Document, measures: &[MeasureInfo]) -> Vec<TempoPoint> {
    let mut tempos: Vec<TempoPoint> = Vec::new();
    for (mi, m) in doc.measures.iter().enumerate() {
        for dir in &m.directions {
            let Some(qpm) = dir.tempo else { continue };
            if qpm <= 0.0 {
                log::warn!("ignoring non-positive tempo {} in measure {:?}", qpm, m.id);
                continue;
            }
            let qstamp = measures[mi].start;
            match tempos.last_mut() {
                Some(last) if (last.qstamp - qstamp).abs() <= EPS => last.qpm = qpm,
                _ => tempos.push(TempoPoint { qstamp, qpm }),
            }
        }
    }
    tempos
}

// ═══════════════════════════════════════════════════════════════════════
// Lookups
// ═══════════════════════════════════════════════════════════════════════

impl ScoreIndex {
    /// Arena index for an element id.
    pub fn note_index(&self, id: &str) -> Option<usize> {
        self.id_to_note.get(id).copied()
    }

    /// Note record for an element id.
    pub fn note(&self, id: &str) -> Option<&NoteRecord> {
        self.note_index(id).map(|n| &self.notes[n])
    }

    /// Number of audible chord positions (the "minimal" profile count).
    pub fn audible_position_count(&self) -> usize {
        self.positions.iter().filter(|p| p.audible).count()
    }

    /// Tempo in quarter notes per minute at a song-relative time.
    pub fn tempo_at(&self, qstamp: f64) -> f64 {
        let mut qpm = DEFAULT_QPM;
        for t in &self.tempos {
            if t.qstamp <= qstamp + EPS {
                qpm = t.qpm;
            } else {
                break;
            }
        }
        qpm
    }

    /// Key signature in effect at a chord position.
    pub fn key_at(&self, position: usize) -> Option<&Key> {
        let mut found = None;
        for change in &self.keys {
            if change.position <= position {
                found = Some(&change.key);
            } else {
                break;
            }
        }
        found
    }

    /// Highest staff number used by any note (at least 1).
    pub fn staff_count(&self) -> u8 {
        self.notes.iter().map(|n| n.staff).max().unwrap_or(1).max(1)
    }

    /// Any note carries a lyric syllable.
    pub fn has_lyrics(&self) -> bool {
        self.notes.iter().any(|n| !n.lyrics.is_empty())
    }

    /// Distinct lyric lines (staff + verse line), sorted.
    pub fn lyric_lines(&self) -> Vec<LyricLineId> {
        let mut lines: Vec<LyricLineId> = Vec::new();
        for note in &self.notes {
            for lyric in &note.lyrics {
                let id = LyricLineId::new(note.staff, lyric.line);
                if !lines.contains(&id) {
                    lines.push(id);
                }
            }
        }
        lines.sort();
        lines
    }

    /// Distinct verse-line numbers present on one staff, sorted.
    pub fn lines_on_staff(&self, staff: u8) -> Vec<u8> {
        let mut lines: Vec<u8> = Vec::new();
        for note in &self.notes {
            if note.staff != staff {
                continue;
            }
            for lyric in &note.lyrics {
                if !lines.contains(&lyric.line) {
                    lines.push(lyric.line);
                }
            }
        }
        lines.sort_unstable();
        lines
    }

    /// First position at or after the end of the extracted introduction
    /// (0 when the document has none).
    pub fn intro_position_end(&self) -> usize {
        self.measures
            .iter()
            .filter(|m| !m.intro)
            .find_map(|m| m.first_position)
            .unwrap_or(0)
    }
}
