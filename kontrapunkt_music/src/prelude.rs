// Prelude figuration for prelude_and_fugue.
//
// A compact broken-chord prelude over its own harmonic plan: one Prelude
// span covering the whole piece, whose chord table walks I IV ii V vi and
// closes on a half cadence so the fugue that follows opens on an arrival.
// The top voice plays sixteenth-note figures through the chord, inner voices
// sustain the nearest chord tone for up to half a bar, and the lowest voice
// plays the timeline's bass pitch on every beat.
//
// Length follows the fugue: half its bar count, clamped to 8..=32 bars. The
// prelude is played 10% faster than the fugue.

use kontrapunkt_prng::ScoreRng;
use tracing::debug;

use crate::config::MAX_BPM;
use crate::counterpoint;
use crate::error::GenerationError;
use crate::harmony::{HarmonicSpan, HarmonicTimeline, SpanRole};
use crate::note::{NoteEvent, Provenance, VoiceId};
use crate::pitch::KeySignature;
use crate::quality::fold_into_range;
use crate::timing::{self, HALF, SIXTEENTH, TICKS_PER_BEAT, Tick};

pub const MIN_PRELUDE_BARS: u32 = 8;
pub const MAX_PRELUDE_BARS: u32 = 32;
pub const PRELUDE_TEMPO_PERCENT: u32 = 110;

/// Offsets into the chord-tone ladder for one beat of sixteenths.
const FIGURES: [[usize; 4]; 3] = [[0, 1, 2, 3], [0, 2, 1, 2], [3, 2, 1, 0]];

#[derive(Debug, Clone)]
pub struct Prelude {
    pub voices: Vec<(VoiceId, Vec<NoteEvent>)>,
    pub timeline: HarmonicTimeline,
    pub length_ticks: Tick,
    pub bpm: u16,
}

pub fn prelude_bars(fugue_bars: u32) -> u32 {
    (fugue_bars / 2).clamp(MIN_PRELUDE_BARS, MAX_PRELUDE_BARS)
}

pub fn prelude_bpm(fugue_bpm: u16) -> u16 {
    (fugue_bpm as u32 * PRELUDE_TEMPO_PERCENT / 100).min(MAX_BPM as u32) as u16
}

pub fn generate_prelude(
    key: KeySignature,
    num_voices: usize,
    fugue_bars: u32,
    fugue_bpm: u16,
    rng: &mut ScoreRng,
) -> Result<Prelude, GenerationError> {
    let bars = prelude_bars(fugue_bars);
    let length_ticks = timing::bars(bars);
    let timeline = HarmonicTimeline::build(
        &[HarmonicSpan {
            start: 0,
            end: length_ticks,
            key,
            role: SpanRole::Prelude,
        }],
        length_ticks,
    )?;

    let ranges = counterpoint::voice_ranges(num_voices);
    let bass = counterpoint::lowest_voice(num_voices);
    let mut voices = Vec::with_capacity(ranges.len());
    for (i, &(low, high)) in ranges.iter().enumerate() {
        let id = i as VoiceId;
        let notes = if id == 0 {
            figuration(&timeline, low, high, rng)
        } else if id == bass {
            walking_bass(&timeline, id, low, high)
        } else {
            sustained(&timeline, id, low, high)
        };
        voices.push((id, notes));
    }
    debug!(bars, voices = voices.len(), "prelude written");
    Ok(Prelude {
        voices,
        timeline,
        length_ticks,
        bpm: prelude_bpm(fugue_bpm),
    })
}

fn note(start: Tick, dur: Tick, pitch: u8, voice: VoiceId) -> NoteEvent {
    NoteEvent::new(start, dur, pitch, voice, Provenance::PreludeFiguration)
}

fn figuration(
    timeline: &HarmonicTimeline,
    low: u8,
    high: u8,
    rng: &mut ScoreRng,
) -> Vec<NoteEvent> {
    let center = (low as i32 + high as i32) / 2;
    let mut notes = Vec::new();
    for beat in timing::beat_ticks(0, timeline.total_ticks()) {
        let Some(event) = timeline.at_or_last(beat) else {
            continue;
        };
        let tones = event.chord.tones_in_range(low, high);
        if tones.is_empty() {
            continue;
        }
        // Start the ladder on the chord tone nearest the middle of the range.
        let nearest = tones
            .iter()
            .enumerate()
            .min_by_key(|&(_, &p)| (p as i32 - center).abs())
            .map(|(i, _)| i)
            .unwrap_or(0);
        let base = nearest.min(tones.len().saturating_sub(4));
        let figure = rng.choose(&FIGURES).copied().unwrap_or(FIGURES[0]);
        for (k, &offset) in figure.iter().enumerate() {
            let pitch = tones[(base + offset).min(tones.len() - 1)];
            notes.push(note(beat + k as Tick * SIXTEENTH, SIXTEENTH, pitch, 0));
        }
    }
    notes
}

fn sustained(timeline: &HarmonicTimeline, voice: VoiceId, low: u8, high: u8) -> Vec<NoteEvent> {
    let mut notes: Vec<NoteEvent> = Vec::new();
    let mut prev = ((low as i32 + high as i32) / 2) as u8;
    for event in timeline.events() {
        let mut t = event.start_tick;
        while t < event.end_tick {
            // Split at half-bar lines.
            let next = ((t / HALF + 1) * HALF).min(event.end_tick);
            let tones = event.chord.tones_in_range(low, high);
            let nearest = tones
                .iter()
                .min_by_key(|&&p| ((p as i32 - prev as i32).abs(), p));
            let Some(&pitch) = nearest else {
                t = next;
                continue;
            };
            let tie = notes
                .last_mut()
                .filter(|n| n.pitch == pitch && n.end_tick() == t && t % HALF != 0);
            match tie {
                Some(last) => last.duration += next - t,
                None => notes.push(note(t, next - t, pitch, voice)),
            }
            prev = pitch;
            t = next;
        }
    }
    notes
}

fn walking_bass(timeline: &HarmonicTimeline, voice: VoiceId, low: u8, high: u8) -> Vec<NoteEvent> {
    timing::beat_ticks(0, timeline.total_ticks())
        .filter_map(|beat| timeline.at_or_last(beat).map(|e| (beat, e.bass_pitch)))
        .map(|(beat, pitch)| note(beat, TICKS_PER_BEAT, fold_into_range(pitch, low, high), voice))
        .collect()
}
