// Harmonic timeline: the single answer to "what harmony is active at tick T".
//
// The fugue planner (structure.rs) describes the piece as a list of
// `HarmonicSpan`s, each a tick range with a key and a role (entry, episode,
// stretto, ...). `HarmonicTimeline::build` turns that plan into one
// `HarmonicEvent` per beat using per-role chord tables, then collapses
// neighbouring events that carry the same (key, chord, bass). Spans that end
// in a cadence get a fixed cadential bar (ii6 ii6 V V), so the cadence
// detector below finds a V -> I arrival at every section seam where the
// following span opens on its tonic.
//
// Once built, the timeline is frozen and shared read-only by every generator
// stage. Lookups go through a binary search over event start ticks.

use serde::{Deserialize, Serialize};

use crate::chord::{Chord, ChordDegree};
use crate::error::TimelineError;
use crate::pitch::KeySignature;
use crate::timing::{self, Tick, TICKS_PER_BEAT, TICKS_PER_BAR};

/// What a span of the harmonic plan is used for. Selects the chord table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanRole {
    Entry,
    Codetta,
    Episode,
    MiddleEntry,
    Stretto,
    Coda,
    Prelude,
}

impl SpanRole {
    /// Roles whose final bar is a half-cadence onto the next span's tonic.
    fn cadences_at_end(self) -> bool {
        matches!(
            self,
            SpanRole::Codetta
                | SpanRole::Episode
                | SpanRole::MiddleEntry
                | SpanRole::Stretto
                | SpanRole::Prelude
        )
    }

    /// Chord degrees per beat for one bar, cycling by bar index.
    fn bar_table(self) -> &'static [[ChordDegree; 4]] {
        use ChordDegree::*;
        match self {
            SpanRole::Entry | SpanRole::MiddleEntry => &[[I, I, V, V], [I, IV, V, I]],
            // Descending-fifths sequence, the standard episode engine.
            SpanRole::Episode => &[[I, IV, VII, III], [VI, II, V, I]],
            SpanRole::Stretto => &[[I, IV, V, I], [VI, II, V, I]],
            SpanRole::Codetta => &[[I, IV, V, I]],
            SpanRole::Coda => &[[I, IV, V, V]],
            SpanRole::Prelude => &[[I, I, IV, IV], [II, II, V, V], [I, I, VI, VI], [IV, IV, V, V]],
        }
    }
}

/// One entry of the harmonic plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HarmonicSpan {
    pub start: Tick,
    pub end: Tick,
    pub key: KeySignature,
    pub role: SpanRole,
}

/// A stretch of constant harmony.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HarmonicEvent {
    pub start_tick: Tick,
    pub end_tick: Tick,
    pub key: KeySignature,
    pub chord: Chord,
    /// Suggested bass pitch (MIDI, octave 2).
    pub bass_pitch: u8,
    /// Structural importance in [0, 1].
    pub weight: f64,
    /// Harmonic pace multiplier; < 1 accelerates, > 1 broadens.
    pub rhythm_factor: f64,
}

impl HarmonicEvent {
    pub fn is_minor(&self) -> bool {
        self.key.is_minor
    }

    pub fn covers(&self, tick: Tick) -> bool {
        self.start_tick <= tick && tick < self.end_tick
    }

    fn same_harmony(&self, other: &HarmonicEvent) -> bool {
        self.key == other.key && self.chord == other.chord && self.bass_pitch == other.bass_pitch
    }
}

/// Rhythm factors by position in the piece.
pub const ESTABLISH_RHYTHM_FACTOR: f64 = 1.00;
pub const DEVELOP_RHYTHM_FACTOR: f64 = 0.85;
pub const RESOLVE_RHYTHM_FACTOR: f64 = 1.20;
pub const PRE_CADENCE_RHYTHM_FACTOR: f64 = 0.70;
/// How far before a cadence the pre-cadence factor applies.
pub const PRE_CADENCE_WINDOW: Tick = 2 * TICKS_PER_BEAT;

/// Frozen, gap-free sequence of harmonic events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicTimeline {
    events: Vec<HarmonicEvent>,
    total_ticks: Tick,
}

impl HarmonicTimeline {
    /// Build from a contiguous span plan covering `[0, total_ticks)`.
    pub fn build(
        spans: &[HarmonicSpan],
        total_ticks: Tick,
    ) -> Result<HarmonicTimeline, TimelineError> {
        if spans.is_empty() || total_ticks == 0 {
            return Err(TimelineError::Empty);
        }
        let mut events: Vec<HarmonicEvent> = Vec::new();
        let mut cursor: Tick = 0;
        for span in spans {
            if span.start != cursor {
                return Err(TimelineError::Gap(cursor));
            }
            let end = span.end.min(total_ticks);
            if end <= span.start {
                continue;
            }
            let span_bars = (end - span.start).div_ceil(TICKS_PER_BAR);
            let mut t = span.start;
            let mut first = true;
            while t < end {
                let next = (timing::round_down_to_beat(t) + TICKS_PER_BEAT).min(end);
                let bar_in_span = (t - span.start) / TICKS_PER_BAR;
                let beat = timing::beat_in_bar(t - span.start) as usize;
                let (degree, inversion) = chord_for(span.role, bar_in_span, span_bars, beat);
                let chord = Chord::in_key(span.key, degree).with_inversion(inversion);
                let weight = if first {
                    1.0
                } else {
                    beat_weight(t - span.start)
                };
                events.push(HarmonicEvent {
                    start_tick: t,
                    end_tick: next,
                    key: span.key,
                    chord,
                    bass_pitch: 36 + chord.bass_pc(),
                    weight,
                    rhythm_factor: ESTABLISH_RHYTHM_FACTOR,
                });
                first = false;
                t = next;
            }
            cursor = end;
            if cursor >= total_ticks {
                break;
            }
        }
        if cursor < total_ticks {
            return Err(TimelineError::Gap(cursor));
        }

        let mut timeline = HarmonicTimeline {
            events: collapse(events),
            total_ticks,
        };
        for tick in timeline.cadence_points() {
            if let Ok(idx) = timeline.index_at(tick) {
                timeline.events[idx].weight = 1.0;
            }
        }
        Ok(timeline)
    }

    pub fn events(&self) -> &[HarmonicEvent] {
        &self.events
    }

    pub fn total_ticks(&self) -> Tick {
        self.total_ticks
    }

    fn index_at(&self, tick: Tick) -> Result<usize, TimelineError> {
        if tick >= self.total_ticks {
            return Err(TimelineError::OutOfRange {
                tick,
                total: self.total_ticks,
            });
        }
        let idx = self.events.partition_point(|e| e.start_tick <= tick);
        idx.checked_sub(1).ok_or(TimelineError::OutOfRange {
            tick,
            total: self.total_ticks,
        })
    }

    /// The event covering `tick`.
    pub fn get_at(&self, tick: Tick) -> Result<&HarmonicEvent, TimelineError> {
        let idx = self.index_at(tick)?;
        Ok(&self.events[idx])
    }

    /// Like `get_at` but clamps past-the-end ticks to the last event.
    pub fn at_or_last(&self, tick: Tick) -> Option<&HarmonicEvent> {
        self.get_at(tick).ok().or_else(|| self.events.last())
    }

    pub fn key_at(&self, tick: Tick) -> Option<KeySignature> {
        self.at_or_last(tick).map(|e| e.key)
    }

    /// Whether `pitch` belongs to the chord sounding at `tick`.
    pub fn is_chord_tone(&self, tick: Tick, pitch: u8) -> bool {
        self.at_or_last(tick).is_some_and(|e| e.chord.contains(pitch))
    }

    /// Ticks where a cadential progression resolves, ascending.
    ///
    /// A cadence is V -> I or V -> vi within a key, or any change of key.
    /// The reported tick is the start of the arrival event.
    pub fn cadence_points(&self) -> Vec<Tick> {
        self.events
            .windows(2)
            .filter(|w| {
                let (a, b) = (&w[0], &w[1]);
                let key_change = a.key != b.key;
                let authentic = a.chord.degree == ChordDegree::V
                    && matches!(b.chord.degree, ChordDegree::I | ChordDegree::VI);
                key_change || authentic
            })
            .map(|w| w[1].start_tick)
            .collect()
    }

    /// Assign each event's rhythm factor from its position (thirds of
    /// `total_ticks`) with the pre-cadence override.
    pub fn apply_rhythm_factors(&mut self, total_ticks: Tick, cadence_ticks: &[Tick]) {
        let first_third = total_ticks / 3;
        let second_third = total_ticks / 3 * 2;
        for event in &mut self.events {
            let t = event.start_tick;
            let near_cadence = cadence_ticks
                .iter()
                .any(|&c| c > t && c - t <= PRE_CADENCE_WINDOW);
            event.rhythm_factor = if near_cadence {
                PRE_CADENCE_RHYTHM_FACTOR
            } else if t < first_third {
                ESTABLISH_RHYTHM_FACTOR
            } else if t < second_third {
                DEVELOP_RHYTHM_FACTOR
            } else {
                RESOLVE_RHYTHM_FACTOR
            };
        }
    }

    /// Append `other` shifted by this timeline's length.
    pub fn concat(mut self, other: &HarmonicTimeline) -> HarmonicTimeline {
        let offset = self.total_ticks;
        self.events.extend(other.events.iter().map(|e| HarmonicEvent {
            start_tick: e.start_tick + offset,
            end_tick: e.end_tick + offset,
            ..*e
        }));
        self.total_ticks += other.total_ticks;
        self
    }
}

/// Chord degree and inversion for a beat of a span.
fn chord_for(role: SpanRole, bar_in_span: u32, span_bars: u32, beat: usize) -> (ChordDegree, u8) {
    let last_bar = bar_in_span + 1 == span_bars;
    if last_bar && role.cadences_at_end() {
        return match beat {
            0 | 1 => (ChordDegree::II, 1),
            _ => (ChordDegree::V, 0),
        };
    }
    if last_bar && role == SpanRole::Coda {
        return (ChordDegree::I, 0);
    }
    let table = role.bar_table();
    let bar = table[bar_in_span as usize % table.len()];
    (bar[beat % 4], 0)
}

fn beat_weight(offset: Tick) -> f64 {
    if offset % TICKS_PER_BAR == 0 {
        0.75
    } else if timing::beat_in_bar(offset) == 2 {
        0.5
    } else {
        0.25
    }
}

fn collapse(events: Vec<HarmonicEvent>) -> Vec<HarmonicEvent> {
    let mut out: Vec<HarmonicEvent> = Vec::with_capacity(events.len());
    for e in events {
        match out.last_mut() {
            Some(prev) if prev.same_harmony(&e) && prev.end_tick == e.start_tick => {
                prev.end_tick = e.end_tick;
                prev.weight = prev.weight.max(e.weight);
            }
            _ => out.push(e),
        }
    }
    out
}
