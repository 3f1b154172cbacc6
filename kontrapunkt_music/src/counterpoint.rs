// Counterpoint state: per-voice note lists with fast sounding-pitch queries.
//
// This is the only mutable structure shared across pipeline stages. The
// exposition, episode, stretto and coda builders each take it by `&mut`,
// append notes, and hand it on; the rule evaluators in rules.rs read it by
// shared reference. Within a voice, notes are kept sorted by start tick and
// never overlap, so "what is voice v sounding at tick t" is a binary search.
//
// Voices are registered up front with a display name and a comfortable
// range. Range is soft: `range_penalty` reports how far outside it a pitch
// lies, and candidate scoring (line.rs) turns that into a cost. Register
// order (which voice is "upper") comes from range midpoints, not ids.
//
// `with_trial` supports local repair: add a tentative note, inspect the state,
// and remove it again, all without cloning.

use serde::{Deserialize, Serialize};

use crate::error::CounterpointError;
use crate::note::{NoteEvent, VoiceId};
use crate::timing::Tick;

/// Cost per semitone outside a voice's registered range.
pub const RANGE_PENALTY_PER_SEMITONE: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceLine {
    pub id: VoiceId,
    pub name: String,
    pub low: u8,
    pub high: u8,
    notes: Vec<NoteEvent>,
}

impl VoiceLine {
    pub fn notes(&self) -> &[NoteEvent] {
        &self.notes
    }

    /// Midpoint of the registered range.
    pub fn center(&self) -> u8 {
        ((self.low as u16 + self.high as u16) / 2) as u8
    }

    pub fn in_range(&self, pitch: u8) -> bool {
        (self.low..=self.high).contains(&pitch)
    }

    fn index_at(&self, tick: Tick) -> Option<usize> {
        let idx = self.notes.partition_point(|n| n.start_tick <= tick);
        let i = idx.checked_sub(1)?;
        self.notes[i].covers(tick).then_some(i)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CounterpointState {
    voices: Vec<VoiceLine>,
}

impl CounterpointState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_voice(
        &mut self,
        id: VoiceId,
        name: impl Into<String>,
        low: u8,
        high: u8,
    ) -> Result<(), CounterpointError> {
        if self.voice(id).is_some() {
            return Err(CounterpointError::DuplicateVoice(id));
        }
        self.voices.push(VoiceLine {
            id,
            name: name.into(),
            low: low.min(high),
            high: high.max(low),
            notes: Vec::new(),
        });
        Ok(())
    }

    pub fn voice(&self, id: VoiceId) -> Option<&VoiceLine> {
        self.voices.iter().find(|v| v.id == id)
    }

    fn voice_mut(&mut self, id: VoiceId) -> Result<&mut VoiceLine, CounterpointError> {
        self.voices
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or(CounterpointError::UnknownVoice(id))
    }

    /// Registered voice ids in registration order.
    pub fn voice_ids(&self) -> Vec<VoiceId> {
        self.voices.iter().map(|v| v.id).collect()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Voices that hold at least one note, ascending by id.
    pub fn active_voices(&self) -> Vec<VoiceId> {
        let mut ids: Vec<VoiceId> = self
            .voices
            .iter()
            .filter(|v| !v.notes.is_empty())
            .map(|v| v.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn voice_notes(&self, id: VoiceId) -> &[NoteEvent] {
        self.voice(id).map(|v| v.notes.as_slice()).unwrap_or(&[])
    }

    /// Insert a note, keeping the voice sorted. Fails on overlap.
    pub fn add_note(&mut self, note: NoteEvent) -> Result<(), CounterpointError> {
        if note.duration == 0 {
            return Err(CounterpointError::EmptyNote {
                voice: note.voice_id,
                tick: note.start_tick,
            });
        }
        let line = self.voice_mut(note.voice_id)?;
        let idx = line.notes.partition_point(|n| n.start_tick < note.start_tick);
        let clashes_prev = idx > 0 && line.notes[idx - 1].end_tick() > note.start_tick;
        let clashes_next = line
            .notes
            .get(idx)
            .is_some_and(|n| n.start_tick < note.end_tick());
        if clashes_prev || clashes_next {
            return Err(CounterpointError::Overlap {
                voice: note.voice_id,
                tick: note.start_tick,
            });
        }
        line.notes.insert(idx, note);
        Ok(())
    }

    /// Remove the note of `voice` starting exactly at `start_tick`.
    pub fn remove_note(&mut self, voice: VoiceId, start_tick: Tick) -> Option<NoteEvent> {
        let line = self.voice_mut(voice).ok()?;
        let idx = line
            .notes
            .binary_search_by_key(&start_tick, |n| n.start_tick)
            .ok()?;
        Some(line.notes.remove(idx))
    }

    /// Mutable access to the note of `voice` starting at `start_tick`.
    pub fn note_mut(&mut self, voice: VoiceId, start_tick: Tick) -> Option<&mut NoteEvent> {
        let line = self.voice_mut(voice).ok()?;
        let idx = line
            .notes
            .binary_search_by_key(&start_tick, |n| n.start_tick)
            .ok()?;
        line.notes.get_mut(idx)
    }

    /// Add `note`, run `f` on the resulting state, then remove it again.
    pub fn with_trial<R>(
        &mut self,
        note: NoteEvent,
        f: impl FnOnce(&CounterpointState) -> R,
    ) -> Result<R, CounterpointError> {
        self.add_note(note)?;
        let result = f(self);
        self.remove_note(note.voice_id, note.start_tick);
        Ok(result)
    }

    /// The note whose half-open span contains `tick`.
    pub fn sounding_note(&self, voice: VoiceId, tick: Tick) -> Option<&NoteEvent> {
        let line = self.voice(voice)?;
        line.index_at(tick).map(|i| &line.notes[i])
    }

    pub fn sounding_pitch(&self, voice: VoiceId, tick: Tick) -> Option<u8> {
        self.sounding_note(voice, tick).map(|n| n.pitch)
    }

    /// Last note of `voice` starting strictly before `tick`.
    pub fn previous_note(&self, voice: VoiceId, tick: Tick) -> Option<&NoteEvent> {
        let line = self.voice(voice)?;
        let idx = line.notes.partition_point(|n| n.start_tick < tick);
        idx.checked_sub(1).map(|i| &line.notes[i])
    }

    /// First note of `voice` starting at or after `tick`.
    pub fn next_note(&self, voice: VoiceId, tick: Tick) -> Option<&NoteEvent> {
        let line = self.voice(voice)?;
        let idx = line.notes.partition_point(|n| n.start_tick < tick);
        line.notes.get(idx)
    }

    /// Whether `[start, end)` is free in `voice`.
    pub fn is_free(&self, voice: VoiceId, start: Tick, end: Tick) -> bool {
        let Some(line) = self.voice(voice) else {
            return false;
        };
        let idx = line.notes.partition_point(|n| n.end_tick() <= start);
        line.notes.get(idx).is_none_or(|n| n.start_tick >= end)
    }

    /// Silent stretches of `voice` inside `[from, to)`, in order.
    pub fn gaps(&self, voice: VoiceId, from: Tick, to: Tick) -> Vec<(Tick, Tick)> {
        let mut out = Vec::new();
        let mut cursor = from;
        for n in self.voice_notes(voice) {
            if n.end_tick() <= cursor {
                continue;
            }
            if n.start_tick >= to {
                break;
            }
            if n.start_tick > cursor {
                out.push((cursor, n.start_tick));
            }
            cursor = cursor.max(n.end_tick());
        }
        if cursor < to {
            out.push((cursor, to));
        }
        out
    }

    /// Soft range cost of `pitch` in `voice`.
    pub fn range_penalty(&self, voice: VoiceId, pitch: u8) -> f64 {
        let Some(v) = self.voice(voice) else {
            return 0.0;
        };
        let outside = if pitch < v.low {
            v.low - pitch
        } else if pitch > v.high {
            pitch - v.high
        } else {
            0
        };
        outside as f64 * RANGE_PENALTY_PER_SEMITONE
    }

    /// Order two voices as (upper, lower) by range midpoint; ties go by id.
    pub fn register_order(&self, a: VoiceId, b: VoiceId) -> (VoiceId, VoiceId) {
        let center = |id| self.voice(id).map(|v| v.center()).unwrap_or(0);
        let (ca, cb) = (center(a), center(b));
        if ca > cb || (ca == cb && a < b) { (a, b) } else { (b, a) }
    }

    /// All unordered voice pairs as (upper, lower).
    pub fn voice_pairs(&self) -> Vec<(VoiceId, VoiceId)> {
        let ids = self.voice_ids();
        let mut pairs = Vec::new();
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                pairs.push(self.register_order(a, b));
            }
        }
        pairs
    }

    /// Highest and lowest registered voices.
    pub fn outer_voices(&self) -> Option<(VoiceId, VoiceId)> {
        let top = self.voices.iter().max_by_key(|v| (v.center(), std::cmp::Reverse(v.id)))?;
        let bottom = self.voices.iter().min_by_key(|v| (v.center(), std::cmp::Reverse(v.id)))?;
        (top.id != bottom.id).then_some((top.id, bottom.id))
    }

    /// Exclusive end of the last note in any voice.
    pub fn end_tick(&self) -> Tick {
        self.voices
            .iter()
            .filter_map(|v| v.notes.last())
            .map(NoteEvent::end_tick)
            .max()
            .unwrap_or(0)
    }

    pub fn note_count(&self) -> usize {
        self.voices.iter().map(|v| v.notes.len()).sum()
    }

    /// Consume the state, returning each voice's notes in registration order.
    pub fn into_voice_notes(self) -> Vec<(VoiceId, Vec<NoteEvent>)> {
        self.voices.into_iter().map(|v| (v.id, v.notes)).collect()
    }
}

/// Comfortable range per voice, voice 0 first. Counts outside 2..=5 are
/// clamped. The fifth voice of a five-voice texture sits between alto and
/// tenor.
pub fn voice_ranges(num_voices: usize) -> &'static [(u8, u8)] {
    match num_voices {
        0..=2 => &[(55, 81), (40, 64)],
        3 => &[(57, 81), (48, 72), (36, 60)],
        4 => &[(60, 84), (52, 76), (45, 69), (31, 55)],
        _ => &[(62, 86), (55, 79), (46, 70), (31, 55), (50, 74)],
    }
}

fn voice_name(num_voices: usize, id: usize) -> &'static str {
    const TWO: [&str; 2] = ["upper", "lower"];
    const THREE: [&str; 3] = ["soprano", "alto", "bass"];
    const FIVE: [&str; 5] = ["soprano", "alto", "tenor", "bass", "quinta vox"];
    match num_voices {
        0..=2 => TWO.get(id),
        3 => THREE.get(id),
        _ => FIVE.get(id),
    }
    .copied()
    .unwrap_or("voice")
}

/// The voice with the lowest range in a layout of `num_voices`.
pub fn lowest_voice(num_voices: usize) -> VoiceId {
    voice_ranges(num_voices)
        .iter()
        .enumerate()
        .min_by_key(|&(i, &(low, high))| (low as u16 + high as u16, i))
        .map(|(i, _)| i as VoiceId)
        .unwrap_or(0)
}

impl CounterpointState {
    /// State with the standard layout for `num_voices` registered.
    pub fn with_voices(num_voices: usize) -> Result<CounterpointState, CounterpointError> {
        let mut state = CounterpointState::new();
        for (i, &(low, high)) in voice_ranges(num_voices).iter().enumerate() {
            state.register_voice(i as VoiceId, voice_name(num_voices, i), low, high)?;
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::Provenance;

    fn two_voices() -> CounterpointState {
        let mut s = CounterpointState::new();
        s.register_voice(0, "upper", 60, 84).unwrap();
        s.register_voice(1, "lower", 40, 64).unwrap();
        s
    }

    fn note(voice: VoiceId, start: Tick, dur: Tick, pitch: u8) -> NoteEvent {
        NoteEvent::new(start, dur, pitch, voice, Provenance::FreeCounterpoint)
    }

    #[test]
    fn overlap_in_same_voice_fails_other_voice_succeeds() {
        let mut s = two_voices();
        s.add_note(note(0, 0, 960, 72)).unwrap();
        let clash = note(0, 480, 480, 74);
        assert_eq!(
            s.add_note(clash),
            Err(CounterpointError::Overlap { voice: 0, tick: 480 })
        );
        let other = NoteEvent {
            voice_id: 1,
            ..clash
        };
        assert_eq!(s.add_note(other), Ok(()));
    }

    #[test]
    fn notes_stay_sorted_and_adjacent_notes_fit() {
        let mut s = two_voices();
        s.add_note(note(0, 960, 480, 72)).unwrap();
        s.add_note(note(0, 0, 480, 67)).unwrap();
        s.add_note(note(0, 480, 480, 69)).unwrap();
        let starts: Vec<Tick> = s.voice_notes(0).iter().map(|n| n.start_tick).collect();
        assert_eq!(starts, vec![0, 480, 960]);
    }

    #[test]
    fn sounding_pitch_is_half_open() {
        let mut s = two_voices();
        s.add_note(note(1, 480, 480, 48)).unwrap();
        assert_eq!(s.sounding_pitch(1, 479), None);
        assert_eq!(s.sounding_pitch(1, 480), Some(48));
        assert_eq!(s.sounding_pitch(1, 959), Some(48));
        assert_eq!(s.sounding_pitch(1, 960), None);
    }

    #[test]
    fn unknown_and_duplicate_voices() {
        let mut s = two_voices();
        assert_eq!(
            s.add_note(note(7, 0, 480, 60)),
            Err(CounterpointError::UnknownVoice(7))
        );
        assert_eq!(
            s.register_voice(1, "again", 40, 60),
            Err(CounterpointError::DuplicateVoice(1))
        );
        assert_eq!(
            s.add_note(note(0, 0, 0, 60)),
            Err(CounterpointError::EmptyNote { voice: 0, tick: 0 })
        );
    }

    #[test]
    fn gaps_and_free_spans() {
        let mut s = two_voices();
        s.add_note(note(0, 480, 480, 72)).unwrap();
        s.add_note(note(0, 1440, 480, 72)).unwrap();
        assert_eq!(
            s.gaps(0, 0, 2400),
            vec![(0, 480), (960, 1440), (1920, 2400)]
        );
        assert!(s.is_free(0, 960, 1440));
        assert!(!s.is_free(0, 900, 1000));
        assert_eq!(s.gaps(1, 0, 960), vec![(0, 960)]);
    }

    #[test]
    fn trial_note_leaves_state_unchanged() {
        let mut s = two_voices();
        s.add_note(note(0, 0, 480, 72)).unwrap();
        let before = s.clone();
        let seen = s
            .with_trial(note(1, 0, 480, 48), |st| st.sounding_pitch(1, 0))
            .unwrap();
        assert_eq!(seen, Some(48));
        assert_eq!(s, before);
    }

    #[test]
    fn range_penalty_and_register_order() {
        let s = two_voices();
        assert_eq!(s.range_penalty(0, 70), 0.0);
        assert_eq!(s.range_penalty(0, 58), 10.0);
        assert_eq!(s.register_order(1, 0), (0, 1));
        assert_eq!(s.voice_pairs(), vec![(0, 1)]);
        assert_eq!(s.outer_voices(), Some((0, 1)));
    }

    #[test]
    fn active_voices_only_lists_voices_with_notes() {
        let mut s = two_voices();
        assert!(s.active_voices().is_empty());
        s.add_note(note(1, 0, 480, 48)).unwrap();
        assert_eq!(s.active_voices(), vec![1]);
    }

    #[test]
    fn standard_layouts() {
        for n in 2..=5 {
            let s = CounterpointState::with_voices(n).unwrap();
            assert_eq!(s.voice_count(), n);
        }
        assert_eq!(lowest_voice(2), 1);
        assert_eq!(lowest_voice(4), 3);
        assert_eq!(lowest_voice(5), 3);
        let s = CounterpointState::with_voices(5).unwrap();
        assert_eq!(s.voice(3).map(|v| v.name.as_str()), Some("bass"));
        assert_eq!(s.outer_voices(), Some((0, 3)));
    }
}
