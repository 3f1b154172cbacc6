// Voice writer: free counterpoint with candidate scoring and local repair.
//
// Every non-thematic note in a fugue goes through `VoiceWriter::place`. For
// a given voice, start tick and duration it scores every diatonic pitch of
// the active harmonic event inside the voice's range and picks the best.
// Scoring combines:
// - harmony: chord tones are rewarded, adaptively toward a chord-tone target
//   that depends on voice count; non-chord tones on strong beats cost extra
// - melody: steps are preferred, large leaps and tritones are penalised
// - vertical: consonance with every sounding voice, no unisons, no crossing
//   the registered register order, no parallel perfects
// - contrary motion against moving voices, weighted toward a
//   character-specific target ratio
// - register: soft range penalty plus a pull toward the voice's centre
// - an optional pitch hint (motif fragments in episodes, countersubject
//   shapes)
// - a small PRNG jitter so equal-scoring candidates vary by seed
//
// Local repair: the chosen pitch is checked against the critical rules in a
// window around the note. If it adds Critical violations, up to
// REPAIR_ALTERNATIVES other candidates are tried, chord tones first. If all
// of them fail too, the least-bad pitch is kept and flagged
// `ModifiedBy::PARALLEL_REPAIR`.
//
// `fill` covers every silent stretch of a voice in a range with rhythm drawn
// from the local harmonic rhythm factor and the subject character.

use kontrapunkt_prng::ScoreRng;
use serde::Serialize;
use tracing::trace;

use crate::config::Character;
use crate::counterpoint::CounterpointState;
use crate::error::{CounterpointError, GenerationError};
use crate::harmony::{HarmonicEvent, HarmonicTimeline};
use crate::note::{ModifiedBy, NoteEvent, Provenance, VoiceId};
use crate::pitch::interval;
use crate::rules::{self, RuleSet};
use crate::timing::{self, EIGHTH, HALF, TICKS_PER_BEAT, Tick};

/// Alternatives tried when the first choice adds Critical violations.
pub const REPAIR_ALTERNATIVES: usize = 6;

const CHORD_TONE_BONUS: f64 = 2.0;
const NON_CHORD_STRONG_PENALTY: f64 = 1.0;
const DISSONANCE_STRONG_PENALTY: f64 = 2.0;
const DISSONANCE_WEAK_PENALTY: f64 = 0.8;
const CONSONANCE_BONUS: f64 = 0.3;
const UNISON_PENALTY: f64 = 1.0;
const CROSSING_PENALTY: f64 = 4.0;
const PARALLEL_PENALTY: f64 = 8.0;
const CONTRARY_BONUS: f64 = 1.0;
const CENTER_PULL: f64 = 0.05;
const HINT_PULL: f64 = 0.4;
const HINT_BONUS: f64 = 2.0;
const JITTER: f64 = 0.3;

/// Chord-tone ratio the writer steers toward.
pub fn chord_tone_target(num_voices: usize) -> f64 {
    match num_voices {
        0..=2 => 0.70,
        3 => 0.75,
        _ => 0.80,
    }
}

/// Share of moving-voice motions that should be contrary.
pub fn contrary_motion_target(character: Character) -> f64 {
    match character {
        Character::Severe => 0.55,
        Character::Noble => 0.50,
        Character::Restless => 0.45,
        Character::Playful => 0.40,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct WriterStats {
    pub notes: usize,
    pub chord_tones: usize,
    pub motions: usize,
    pub contrary: usize,
    /// Notes whose first choice was replaced by a clean alternative.
    pub repaired: usize,
    /// Notes kept despite Critical violations.
    pub forced: usize,
}

impl WriterStats {
    pub fn chord_tone_ratio(&self) -> f64 {
        if self.notes == 0 {
            0.0
        } else {
            self.chord_tones as f64 / self.notes as f64
        }
    }

    pub fn contrary_ratio(&self) -> f64 {
        if self.motions == 0 {
            0.0
        } else {
            self.contrary as f64 / self.motions as f64
        }
    }
}

pub struct VoiceWriter<'a> {
    timeline: &'a HarmonicTimeline,
    character: Character,
    chord_tone_target: f64,
    contrary_target: f64,
    repair_rules: RuleSet,
    stats: WriterStats,
}

impl<'a> VoiceWriter<'a> {
    pub fn new(timeline: &'a HarmonicTimeline, character: Character, num_voices: usize) -> Self {
        VoiceWriter {
            timeline,
            character,
            chord_tone_target: chord_tone_target(num_voices),
            contrary_target: contrary_motion_target(character),
            repair_rules: RuleSet::critical(),
            stats: WriterStats::default(),
        }
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    pub fn timeline(&self) -> &'a HarmonicTimeline {
        self.timeline
    }

    pub fn character(&self) -> Character {
        self.character
    }

    fn event_at(&self, tick: Tick) -> Result<HarmonicEvent, GenerationError> {
        self.timeline
            .at_or_last(tick)
            .copied()
            .ok_or_else(|| GenerationError::Internal("harmonic timeline is empty".to_string()))
    }

    /// Choose a pitch for one note and add it to `state`.
    #[allow(clippy::too_many_arguments)]
    pub fn place(
        &mut self,
        state: &mut CounterpointState,
        rng: &mut ScoreRng,
        voice: VoiceId,
        start: Tick,
        duration: Tick,
        provenance: Provenance,
        hint: Option<u8>,
    ) -> Result<NoteEvent, GenerationError> {
        let event = self.event_at(start)?;
        let line = state.voice(voice).ok_or(CounterpointError::UnknownVoice(voice))?;
        let (low, high, center) = (line.low, line.high, line.center());
        let prev = state.previous_note(voice, start).map(|n| n.pitch);

        let pool = event
            .key
            .pitches_in_range(low.saturating_sub(2), high.saturating_add(2).min(127));
        let near: Vec<u8> = pool
            .iter()
            .copied()
            .filter(|&p| prev.is_none_or(|q| (p as i16 - q as i16).abs() <= 12))
            .collect();
        let pitches = if near.is_empty() { pool } else { near };
        if pitches.is_empty() {
            return Err(GenerationError::Internal(format!(
                "no candidate pitches for voice {voice} at tick {start}"
            )));
        }

        let mut candidates: Vec<(u8, f64)> = pitches
            .iter()
            .map(|&p| {
                let s = self.score(state, voice, start, p, &event, prev, hint, center);
                (p, s + rng.next_f64() * JITTER)
            })
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        let pitch = self.repair(state, voice, start, duration, &event, &candidates, provenance)?;
        let mut note = NoteEvent::new(start, duration, pitch.0, voice, provenance);
        if pitch.1 {
            note.modified_by.insert(ModifiedBy::PARALLEL_REPAIR);
        }
        self.record(state, &note, &event, prev);
        state.add_note(note)?;
        Ok(note)
    }

    /// Try candidates in preference order; returns the pitch and whether it
    /// had to be forced.
    #[allow(clippy::too_many_arguments)]
    fn repair(
        &mut self,
        state: &mut CounterpointState,
        voice: VoiceId,
        start: Tick,
        duration: Tick,
        event: &HarmonicEvent,
        candidates: &[(u8, f64)],
        provenance: Provenance,
    ) -> Result<(u8, bool), GenerationError> {
        let from = start.saturating_sub(2 * TICKS_PER_BEAT);
        let to = start + duration + TICKS_PER_BEAT;
        let rules = &self.repair_rules;
        let baseline = rules.critical_count(state, from, to);
        let added = |state: &mut CounterpointState, pitch: u8| -> Result<usize, GenerationError> {
            let trial = NoteEvent::new(start, duration, pitch, voice, provenance);
            let after = state.with_trial(trial, |s| {
                rules.critical_count(s, from, to)
            })?;
            Ok(after.saturating_sub(baseline))
        };

        let first = candidates[0].0;
        let first_added = added(state, first)?;
        if first_added == 0 {
            return Ok((first, false));
        }

        let chord_first = candidates[1..]
            .iter()
            .filter(|(p, _)| event.chord.contains(*p))
            .chain(candidates[1..].iter().filter(|(p, _)| !event.chord.contains(*p)))
            .take(REPAIR_ALTERNATIVES);
        let mut best = (first, first_added);
        for &(p, _) in chord_first {
            let n = added(state, p)?;
            if n == 0 {
                self.stats.repaired += 1;
                trace!(voice, start, from = first, to = p, "local repair");
                return Ok((p, false));
            }
            if n < best.1 {
                best = (p, n);
            }
        }
        self.stats.forced += 1;
        trace!(voice, start, pitch = best.0, critical = best.1, "repair exhausted");
        Ok((best.0, true))
    }

    fn record(
        &mut self,
        state: &CounterpointState,
        note: &NoteEvent,
        event: &HarmonicEvent,
        prev: Option<u8>,
    ) {
        self.stats.notes += 1;
        if event.chord.contains(note.pitch) {
            self.stats.chord_tones += 1;
        }
        let Some(q) = prev else { return };
        let mine = interval::direction(interval::semitones(q, note.pitch));
        for other in state.voice_ids() {
            if other == note.voice_id {
                continue;
            }
            let Some(od) = other_motion(state, other, note.start_tick) else {
                continue;
            };
            if od != 0 && mine != 0 {
                self.stats.motions += 1;
                if od == -mine {
                    self.stats.contrary += 1;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn score(
        &self,
        state: &CounterpointState,
        voice: VoiceId,
        start: Tick,
        pitch: u8,
        event: &HarmonicEvent,
        prev: Option<u8>,
        hint: Option<u8>,
        center: u8,
    ) -> f64 {
        let strong = timing::is_strong_beat(start);
        let mut s = 0.0;

        if event.chord.contains(pitch) {
            let deficit = self.chord_tone_target - self.stats.chord_tone_ratio();
            s += CHORD_TONE_BONUS * (1.0 + deficit).max(0.2);
        } else if strong {
            s -= NON_CHORD_STRONG_PENALTY;
        }

        let my_dir = prev.map(|q| interval::direction(interval::semitones(q, pitch)));
        if let Some(q) = prev {
            s += melodic_score(interval::semitones(q, pitch));
        }

        let contrary_weight =
            CONTRARY_BONUS * (1.0 + self.contrary_target - self.stats.contrary_ratio()).max(0.0);
        for other in state.voice_ids() {
            if other == voice {
                continue;
            }
            let Some(op) = state.sounding_pitch(other, start) else {
                continue;
            };
            let iv = interval::semitones(op, pitch);
            if interval::is_dissonant(iv) {
                s -= if strong {
                    DISSONANCE_STRONG_PENALTY
                } else {
                    DISSONANCE_WEAK_PENALTY
                };
            } else {
                s += CONSONANCE_BONUS;
            }
            if iv == 0 {
                s -= UNISON_PENALTY;
            }
            let (upper, _) = state.register_order(voice, other);
            if (upper == voice && pitch < op) || (upper != voice && pitch > op) {
                s -= CROSSING_PENALTY;
            }
            let other_prev = start
                .checked_sub(1)
                .and_then(|t| state.sounding_pitch(other, t));
            if let (Some(q), Some(op0)) = (prev, other_prev) {
                if rules::is_parallel_perfect(q, op0, pitch, op) {
                    s -= PARALLEL_PENALTY;
                }
                let od = interval::direction(interval::semitones(op0, op));
                if my_dir.is_some_and(|d| d != 0 && d == -od) {
                    s += contrary_weight;
                }
            }
        }

        s -= state.range_penalty(voice, pitch);
        s -= CENTER_PULL * (pitch as i32 - center as i32).abs() as f64;

        if let Some(h) = hint {
            let dist = (pitch as i32 - h as i32).abs().min(12);
            s -= HINT_PULL * dist as f64;
            if dist == 0 {
                s += HINT_BONUS;
            }
        }
        s
    }

    /// Fill every silent stretch of `voice` within `[from, to)`.
    pub fn fill(
        &mut self,
        state: &mut CounterpointState,
        rng: &mut ScoreRng,
        voice: VoiceId,
        from: Tick,
        to: Tick,
        provenance: Provenance,
    ) -> Result<usize, GenerationError> {
        self.fill_with_hints(state, rng, voice, from, to, provenance, |_| None)
    }

    /// `fill` with a per-tick pitch hint.
    #[allow(clippy::too_many_arguments)]
    pub fn fill_with_hints(
        &mut self,
        state: &mut CounterpointState,
        rng: &mut ScoreRng,
        voice: VoiceId,
        from: Tick,
        to: Tick,
        provenance: Provenance,
        hint: impl Fn(Tick) -> Option<u8>,
    ) -> Result<usize, GenerationError> {
        let mut placed = 0;
        for (gap_start, gap_end) in state.gaps(voice, from, to) {
            let mut t = gap_start.div_ceil(EIGHTH) * EIGHTH;
            while t + EIGHTH <= gap_end {
                let factor = self.event_at(t)?.rhythm_factor;
                let mut duration = self.choose_duration(rng, t, gap_end - t, factor);
                if gap_end - t - duration < EIGHTH {
                    duration = gap_end - t;
                }
                self.place(state, rng, voice, t, duration, provenance, hint(t))?;
                placed += 1;
                t += duration;
            }
        }
        Ok(placed)
    }

    /// Duration for a free note starting at `start` with `remaining` ticks
    /// of room.
    fn choose_duration(
        &self,
        rng: &mut ScoreRng,
        start: Tick,
        remaining: Tick,
        rhythm_factor: f64,
    ) -> Tick {
        let (eighth, quarter, half) = if rhythm_factor <= 0.75 {
            (0.6, 0.4, 0.0)
        } else if rhythm_factor >= 1.1 {
            (0.1, 0.6, 0.3)
        } else {
            match self.character {
                Character::Severe => (0.25, 0.6, 0.15),
                Character::Noble => (0.2, 0.55, 0.25),
                Character::Playful => (0.5, 0.45, 0.05),
                Character::Restless => (0.6, 0.35, 0.05),
            }
        };
        let options = [(EIGHTH, eighth), (TICKS_PER_BEAT, quarter), (HALF, half)];
        let weights: Vec<f64> = options
            .iter()
            .map(|&(d, w)| {
                let fits = d <= remaining;
                let aligned = d != HALF || timing::is_on_beat(start);
                if fits && aligned { w } else { 0.0 }
            })
            .collect();
        rng.weighted_index(&weights)
            .map(|i| options[i].0)
            .unwrap_or(EIGHTH)
    }
}

/// Direction the other voice moved into `tick`, if it sounds on both sides.
fn other_motion(state: &CounterpointState, voice: VoiceId, tick: Tick) -> Option<i8> {
    let before = state.sounding_pitch(voice, tick.checked_sub(1)?)?;
    let now = state.sounding_pitch(voice, tick)?;
    Some(interval::direction(interval::semitones(before, now)))
}

fn melodic_score(m: i16) -> f64 {
    if interval::is_tritone(m) {
        return -10.0;
    }
    match m.unsigned_abs() {
        0 => -0.6,
        1 | 2 => 1.5,
        3 | 4 => 0.7,
        5 => 0.3,
        7 => 0.2,
        8 | 9 => -0.5,
        12 => -0.3,
        _ => -2.5,
    }
}

/// Octave shift (a multiple of 12) that best fits a line spanning
/// `[lowest, highest]` into `[low, high]`, preferring the shift that centres
/// it.
pub fn octave_shift(lowest: i32, highest: i32, low: u8, high: u8) -> i32 {
    let (low, high) = (low as i32, high as i32);
    let range_center = (low + high) / 2;
    let line_center = (lowest + highest) / 2;
    (-4..=4)
        .map(|k| k * 12)
        .min_by_key(|&shift| {
            let below = (low - (lowest + shift)).max(0);
            let above = (highest + shift - high).max(0);
            (below + above, (line_center + shift - range_center).abs(), shift.abs())
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmony::{HarmonicSpan, SpanRole};
    use crate::pitch::{KeySignature, PitchClass};

    fn timeline(bars: u32) -> HarmonicTimeline {
        let key = KeySignature::major(PitchClass::C);
        let total = timing::bars(bars);
        HarmonicTimeline::build(
            &[HarmonicSpan {
                start: 0,
                end: total,
                key,
                role: SpanRole::Episode,
            }],
            total,
        )
        .unwrap()
    }

    fn state() -> CounterpointState {
        let mut s = CounterpointState::new();
        s.register_voice(0, "soprano", 60, 81).unwrap();
        s.register_voice(1, "bass", 40, 64).unwrap();
        s
    }

    #[test]
    fn targets_by_voice_count_and_character() {
        assert_eq!(chord_tone_target(2), 0.70);
        assert_eq!(chord_tone_target(3), 0.75);
        assert_eq!(chord_tone_target(5), 0.80);
        assert_eq!(contrary_motion_target(Character::Severe), 0.55);
        assert_eq!(contrary_motion_target(Character::Playful), 0.40);
    }

    #[test]
    fn fill_covers_span_without_overlap() {
        let tl = timeline(4);
        let mut st = state();
        let mut rng = ScoreRng::new(3);
        let mut w = VoiceWriter::new(&tl, Character::Severe, 2);
        let n = w
            .fill(
                &mut st,
                &mut rng,
                1,
                0,
                tl.total_ticks(),
                Provenance::FreeCounterpoint,
            )
            .unwrap();
        assert!(n > 0);
        let notes = st.voice_notes(1);
        assert_eq!(notes[0].start_tick, 0);
        assert_eq!(notes.last().unwrap().end_tick(), tl.total_ticks());
        for pair in notes.windows(2) {
            assert_eq!(pair[0].end_tick(), pair[1].start_tick);
        }
        let key = KeySignature::major(PitchClass::C);
        assert!(notes.iter().all(|n| key.is_diatonic(n.pitch)));
    }

    #[test]
    fn second_voice_avoids_new_criticals_mostly() {
        let tl = timeline(8);
        let mut st = state();
        let mut rng = ScoreRng::new(11);
        let mut w = VoiceWriter::new(&tl, Character::Noble, 2);
        let end = tl.total_ticks();
        w.fill(&mut st, &mut rng, 1, 0, end, Provenance::FreeCounterpoint).unwrap();
        w.fill(&mut st, &mut rng, 0, 0, end, Provenance::FreeCounterpoint).unwrap();
        let critical = RuleSet::critical().critical_count(&st, 0, end);
        let beats = (end / TICKS_PER_BEAT) as usize;
        assert!(rules::compliance_rate(critical, beats, 1) > 0.8);
        assert!(w.stats().notes > 0);
    }

    #[test]
    fn writer_is_deterministic() {
        let tl = timeline(4);
        let run = || {
            let mut st = state();
            let mut rng = ScoreRng::new(99);
            let mut w = VoiceWriter::new(&tl, Character::Playful, 2);
            w.fill(&mut st, &mut rng, 0, 0, tl.total_ticks(), Provenance::EpisodeMaterial).unwrap();
            st.voice_notes(0).to_vec()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn misaligned_gap_start_is_skipped_to_eighth_grid() {
        let tl = timeline(1);
        let mut st = state();
        st.add_note(NoteEvent::new(0, 160, 72, 0, Provenance::FugueSubject)).unwrap();
        let mut rng = ScoreRng::new(1);
        let mut w = VoiceWriter::new(&tl, Character::Severe, 2);
        w.fill(&mut st, &mut rng, 0, 0, 960, Provenance::FreeCounterpoint).unwrap();
        assert_eq!(st.voice_notes(0)[1].start_tick, 240);
    }

    #[test]
    fn hint_pulls_toward_pitch() {
        let tl = timeline(1);
        let mut st = state();
        let mut rng = ScoreRng::new(5);
        let mut w = VoiceWriter::new(&tl, Character::Severe, 2);
        let n = w
            .place(
                &mut st,
                &mut rng,
                0,
                0,
                480,
                Provenance::EpisodeMaterial,
                Some(72),
            )
            .unwrap();
        assert_eq!(n.pitch, 72);
    }

    #[test]
    fn octave_shift_fits_range() {
        assert_eq!(octave_shift(60, 72, 36, 60), -12);
        assert_eq!(octave_shift(60, 70, 57, 81), 0);
        assert_eq!(octave_shift(48, 55, 60, 84), 24);
    }
}
