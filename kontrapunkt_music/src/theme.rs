// Thematic transformations.
//
// A `Theme` is a pitch/duration line relative to tick 0: the subject, its
// answer, a countersubject, or any transform of them. The exposition,
// middle-entry and stretto builders derive every thematic statement from
// the subject through the operations here, then place the result in a voice
// with `place_theme`, which fits it into the voice's range by octaves.
//
// Diatonic operations (transposition by degree into another key, mirror
// inversion) can create tritone leaps the subject never had.
// `soften_tritones` moves the offending note by one scale degree.

use crate::counterpoint::CounterpointState;
use crate::error::GenerationError;
use crate::line;
use crate::note::{NoteEvent, Provenance, VoiceId};
use crate::pitch::{KeySignature, clamp_midi, interval};
use crate::subject::Subject;
use crate::timing::Tick;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    /// (pitch, duration) pairs played back to back from tick 0.
    pub notes: Vec<(i32, Tick)>,
}

impl Theme {
    pub fn from_subject(subject: &Subject) -> Theme {
        Theme {
            notes: subject
                .notes
                .iter()
                .map(|n| (n.pitch as i32, n.duration))
                .collect(),
        }
    }

    pub fn from_notes(notes: &[NoteEvent]) -> Theme {
        Theme {
            notes: notes.iter().map(|n| (n.pitch as i32, n.duration)).collect(),
        }
    }

    pub fn len_ticks(&self) -> Tick {
        self.notes.iter().map(|&(_, d)| d).sum()
    }

    pub fn lowest(&self) -> i32 {
        self.notes.iter().map(|&(p, _)| p).min().unwrap_or(60)
    }

    pub fn highest(&self) -> i32 {
        self.notes.iter().map(|&(p, _)| p).max().unwrap_or(60)
    }

    /// Real transposition by semitones.
    pub fn transposed(&self, semitones: i32) -> Theme {
        Theme {
            notes: self.notes.iter().map(|&(p, d)| (p + semitones, d)).collect(),
        }
    }

    /// Transpose by scale position from `from` into `to`, keeping each note's
    /// degree. Non-diatonic notes are snapped first.
    pub fn transposed_diatonic(&self, from: KeySignature, to: KeySignature, degrees: i32) -> Theme {
        let tonic_shift = (to.tonic.index() as i32 - from.tonic.index() as i32).rem_euclid(12);
        let tonic_shift = if tonic_shift > 6 { tonic_shift - 12 } else { tonic_shift };
        let notes = self
            .notes
            .iter()
            .map(|&(p, d)| {
                let snapped = from.snap(clamp_midi(p));
                let pos = from.position_of(snapped).unwrap_or(0);
                let from_tonic_pos = from.position_of(from.tonic_near_middle_c()).unwrap_or(0);
                let rel = pos - from_tonic_pos + degrees;
                let target_base = to.tonic_near_middle_c() as i32;
                let to_tonic_pos = to.position_of(target_base as u8).unwrap_or(0);
                let mut pitch = to.pitch_at(to_tonic_pos + rel);
                // Keep the statement in the register of the source.
                let drift = target_base - from.tonic_near_middle_c() as i32 - tonic_shift;
                pitch -= drift;
                (pitch, d)
            })
            .collect();
        Theme { notes }
    }

    /// Diatonic mirror inversion around the first pitch.
    pub fn inverted(&self, key: KeySignature) -> Theme {
        let Some(&(first, _)) = self.notes.first() else {
            return self.clone();
        };
        let axis = key.position_of(key.snap(clamp_midi(first))).unwrap_or(0);
        let notes = self
            .notes
            .iter()
            .map(|&(p, d)| {
                let pos = key.position_of(key.snap(clamp_midi(p))).unwrap_or(axis);
                (key.pitch_at(2 * axis - pos), d)
            })
            .collect();
        Theme { notes }
    }

    pub fn retrograde(&self) -> Theme {
        Theme {
            notes: self.notes.iter().rev().copied().collect(),
        }
    }

    pub fn augmented(&self) -> Theme {
        Theme {
            notes: self.notes.iter().map(|&(p, d)| (p, d * 2)).collect(),
        }
    }

    /// Move the second note of every tritone leap by one scale degree,
    /// choosing the direction that clears both neighbours.
    pub fn soften_tritones(mut self, key: KeySignature) -> Theme {
        for i in 1..self.notes.len() {
            let prev = self.notes[i - 1].0;
            let cur = self.notes[i].0;
            if !interval::is_tritone((cur - prev) as i16) {
                continue;
            }
            let pos = key.position_of(key.snap(clamp_midi(cur))).unwrap_or(0);
            let next = self.notes.get(i + 1).map(|&(p, _)| p);
            let clean = |p: i32| {
                !interval::is_tritone((p - prev) as i16)
                    && next.is_none_or(|n| !interval::is_tritone((n - p) as i16))
            };
            let candidates = [key.pitch_at(pos - 1), key.pitch_at(pos + 1)];
            if let Some(&p) = candidates.iter().find(|&&p| clean(p)) {
                self.notes[i].0 = p;
            }
        }
        self
    }

    pub fn has_tritone_leap(&self) -> bool {
        self.notes
            .windows(2)
            .any(|w| interval::is_tritone((w[1].0 - w[0].0) as i16))
    }
}

/// Answer to `subject`: a real answer a fifth up, or a tonal answer when the
/// subject opens on the dominant. The tonal answer answers that first
/// dominant note with the tonic (a fourth up instead of a fifth), unless the
/// adjustment would create a tritone leap.
pub fn answer(subject: &Subject) -> (Theme, bool) {
    let real = Theme::from_subject(subject).transposed(7);
    if !subject.opens_on_dominant() {
        return (real, false);
    }
    let mut tonal = real.clone();
    if let Some(note) = tonal.notes.get_mut(1) {
        note.0 -= 2;
    }
    if tonal.has_tritone_leap() {
        (real, false)
    } else {
        (tonal, true)
    }
}

/// Place `theme` in `voice` starting at `start`, shifted by octaves into the
/// voice's range. Returns the placed notes.
pub fn place_theme(
    state: &mut CounterpointState,
    theme: &Theme,
    voice: VoiceId,
    start: Tick,
    provenance: Provenance,
) -> Result<Vec<NoteEvent>, GenerationError> {
    let Some(line) = state.voice(voice) else {
        return Err(GenerationError::Internal(format!("voice {voice} not registered")));
    };
    let shift = line::octave_shift(theme.lowest(), theme.highest(), line.low, line.high);
    let mut placed = Vec::with_capacity(theme.notes.len());
    let mut t = start;
    for &(p, d) in &theme.notes {
        let note = NoteEvent::new(t, d, clamp_midi(p + shift), voice, provenance);
        state.add_note(note)?;
        placed.push(note);
        t += d;
    }
    Ok(placed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Character;
    use crate::pitch::PitchClass;

    fn subject(pitches: &[u8]) -> Subject {
        let notes = pitches
            .iter()
            .enumerate()
            .map(|(i, &p)| NoteEvent::new(i as Tick * 480, 480, p, 0, Provenance::FugueSubject))
            .collect();
        Subject {
            notes,
            key: KeySignature::major(PitchClass::C),
            length_ticks: pitches.len() as Tick * 480,
            character: Character::Severe,
        }
    }

    #[test]
    fn real_answer_is_a_fifth_up() {
        let s = subject(&[60, 62, 64, 65, 64, 62, 60]);
        let (a, tonal) = answer(&s);
        assert!(!tonal);
        assert_eq!(a.notes[0].0, 67);
        assert_eq!(a.notes[3].0, 72);
    }

    #[test]
    fn tonal_answer_maps_dominant_to_tonic() {
        let s = subject(&[60, 67, 65, 64, 62, 60]);
        let (a, tonal) = answer(&s);
        assert!(tonal);
        assert_eq!(a.notes[0].0, 67); // tonic answered by dominant
        assert_eq!(a.notes[1].0, 72); // dominant answered by tonic
        assert_eq!(a.notes[2].0, 72); // rest is real
    }

    #[test]
    fn diatonic_transposition_keeps_degrees() {
        let c = KeySignature::major(PitchClass::C);
        let a_minor = KeySignature::minor(PitchClass::A);
        let t = Theme::from_subject(&subject(&[60, 62, 64, 65, 67]));
        let moved = t.transposed_diatonic(c, a_minor, 0);
        let pcs: Vec<i32> = moved.notes.iter().map(|&(p, _)| p.rem_euclid(12)).collect();
        assert_eq!(pcs, vec![9, 11, 0, 2, 4]);
        // Stays near the original register.
        assert!((moved.notes[0].0 - 60).abs() <= 6);
    }

    #[test]
    fn inversion_mirrors_around_first_pitch() {
        let c = KeySignature::major(PitchClass::C);
        let t = Theme::from_subject(&subject(&[64, 65, 67, 62]));
        let inv = t.inverted(c);
        let p: Vec<i32> = inv.notes.iter().map(|&(p, _)| p).collect();
        assert_eq!(p, vec![64, 62, 60, 65]);
    }

    #[test]
    fn retrograde_and_augmentation() {
        let t = Theme {
            notes: vec![(60, 480), (62, 240), (64, 240)],
        };
        assert_eq!(t.retrograde().notes, vec![(64, 240), (62, 240), (60, 480)]);
        assert_eq!(t.augmented().len_ticks(), 1920);
    }

    #[test]
    fn soften_removes_tritone() {
        let c = KeySignature::major(PitchClass::C);
        let t = Theme {
            notes: vec![(65, 480), (71, 480), (72, 480)],
        };
        assert!(t.has_tritone_leap());
        let fixed = t.soften_tritones(c);
        assert!(!fixed.has_tritone_leap());
    }

    #[test]
    fn place_theme_fits_voice_range() {
        let mut state = CounterpointState::new();
        state.register_voice(0, "bass", 36, 60).unwrap();
        let t = Theme {
            notes: vec![(72, 480), (74, 480), (76, 480)],
        };
        let placed = place_theme(&mut state, &t, 0, 960, Provenance::FugueAnswer).unwrap();
        assert_eq!(placed[0].start_tick, 960);
        assert!(placed.iter().all(|n| (36..=60).contains(&n.pitch)));
        assert_eq!(state.voice_notes(0).len(), 3);
    }
}
