// Articulation and expression.
//
// Runs on the composed tracks right before the quality gate. Each voice gets a role that sets
// its gate ratio (how much of the written duration actually sounds); notes
// leading into a cadence breathe a little more. Velocity-sensitive
// instruments get beat accents, bowed ones get bowing directions, and every
// track receives an expression (CC 11) arch per phrase, phrases being the
// stretches between the timeline's cadence points.
//
// Only durations shrink here; pitches and onsets are left to the gate's
// normalization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::Instrument;
use crate::counterpoint;
use crate::harmony::HarmonicTimeline;
use crate::instrument;
use crate::note::{BowDirection, CC_EXPRESSION, ControlEvent, Track, VoiceId};
use crate::timing::{self, Tick};

/// Duration kept by the note before a cadence, before the gate ratio.
pub const CADENCE_BREATH_PERCENT: u32 = 80;

pub const EXPRESSION_START: u8 = 100;
pub const EXPRESSION_PEAK: u8 = 115;
pub const EXPRESSION_END: u8 = 95;
pub const EXPRESSION_BREATH: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceRole {
    /// Leads; the top voice.
    Assert,
    /// Inner voices.
    Respond,
    /// Lowest voice on instruments without a pedal division.
    Propel,
    /// Organ pedal, held legato.
    Ground,
}

impl VoiceRole {
    pub fn gate_percent(self) -> u32 {
        match self {
            VoiceRole::Assert => 85,
            VoiceRole::Respond => 86,
            VoiceRole::Propel => 87,
            VoiceRole::Ground => 95,
        }
    }
}

pub fn voice_role(instrument: Instrument, voice: VoiceId, num_voices: usize) -> VoiceRole {
    if voice == counterpoint::lowest_voice(num_voices) {
        if instrument == Instrument::Organ {
            VoiceRole::Ground
        } else {
            VoiceRole::Propel
        }
    } else if voice == 0 {
        VoiceRole::Assert
    } else {
        VoiceRole::Respond
    }
}

/// Velocity change for a note starting at `tick`.
pub fn beat_accent(tick: Tick) -> i16 {
    if !timing::is_on_beat(tick) {
        return 0;
    }
    match timing::beat_in_bar(tick) {
        0 => 10,
        2 => 5,
        _ => -5,
    }
}

/// Expression value at `tick` within the phrase `[start, end)`.
pub fn expression_at(tick: Tick, start: Tick, end: Tick) -> u8 {
    let mid = start + (end - start) / 2;
    let lerp = |from: u8, to: u8, t: Tick, a: Tick, b: Tick| -> u8 {
        if b <= a {
            return from;
        }
        let span = to as i64 - from as i64;
        (from as i64 + span * (t - a) as i64 / (b - a) as i64) as u8
    };
    if tick < mid {
        lerp(EXPRESSION_START, EXPRESSION_PEAK, tick, start, mid)
    } else {
        lerp(EXPRESSION_PEAK, EXPRESSION_END, tick.min(end), mid, end)
    }
}

/// CC 11 events for phrases split at `cadences`, ending at `end`.
pub fn expression_curve(cadences: &[Tick], end: Tick) -> Vec<ControlEvent> {
    let mut bounds: Vec<Tick> = vec![0];
    bounds.extend(cadences.iter().copied().filter(|&c| c > 0 && c < end));
    bounds.dedup();
    bounds.push(end);

    let mut events = Vec::new();
    for w in bounds.windows(2) {
        let (start, stop) = (w[0], w[1]);
        if start > 0 {
            events.push(ControlEvent {
                tick: start - 1,
                controller: CC_EXPRESSION,
                value: EXPRESSION_BREATH,
            });
        }
        for t in timing::beat_ticks(start, stop) {
            events.push(ControlEvent {
                tick: t,
                controller: CC_EXPRESSION,
                value: expression_at(t, start, stop),
            });
        }
    }
    events.sort_by_key(|e| e.tick);
    events
}

/// Apply roles, cadence breaths, accents, bowing and expression to tracks
/// laid out one per voice.
pub fn articulate(
    tracks: &mut [Track],
    timeline: &HarmonicTimeline,
    instrument: Instrument,
    num_voices: usize,
) {
    let profile = instrument::profile(instrument);
    let cadences = timeline.cadence_points();
    let end = crate::note::total_duration(tracks);
    let curve = expression_curve(&cadences, end);

    for (i, track) in tracks.iter_mut().enumerate() {
        let voice = track.notes.first().map(|n| n.voice_id).unwrap_or(i as VoiceId);
        let role = voice_role(instrument, voice, num_voices);

        let mut breathing = BTreeSet::new();
        for &c in &cadences {
            let idx = track.notes.partition_point(|n| n.start_tick < c);
            if let Some(last) = idx.checked_sub(1) {
                breathing.insert(last);
            }
        }

        let mut bow = BowDirection::Up;
        for (j, note) in track.notes.iter_mut().enumerate() {
            if breathing.contains(&j) {
                note.duration = timing::scale_percent(note.duration, CADENCE_BREATH_PERCENT);
            }
            note.duration = timing::scale_percent(note.duration, role.gate_percent());

            if profile.velocity_sensitive {
                let v = note.velocity as i16 + beat_accent(note.start_tick);
                note.velocity = v.clamp(1, 127) as u8;
            }

            if profile.bowed {
                let downbeat = timing::is_on_beat(note.start_tick)
                    && timing::beat_in_bar(note.start_tick) == 0;
                bow = if downbeat {
                    BowDirection::Down
                } else if bow == BowDirection::Down {
                    BowDirection::Up
                } else {
                    BowDirection::Down
                };
                note.bow_direction = bow;
            }
        }

        track.raw_events = curve.clone();
    }
}

/// Ticks of the beats whose accent is positive.
pub fn accented_beats(from: Tick, to: Tick) -> impl Iterator<Item = Tick> {
    timing::beat_ticks(from, to).filter(|&t| beat_accent(t) > 0)
}

/// How long a note of `duration` sounds for a voice with `role`.
pub fn sounding_length(duration: Tick, role: VoiceRole) -> Tick {
    timing::scale_percent(duration, role.gate_percent())
}
