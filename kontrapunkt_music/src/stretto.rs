// Stretto planning and realisation.
//
// A stretto stacks one subject entry per voice with entry intervals that
// shrink as the section goes on. The first interval is the subject length
// divided by the voice count, rounded up to a whole bar; every following
// interval is 75% of the previous one, rounded down to the beat and never
// shorter than a bar. Even-indexed entries alternate between the subject at
// the tonic and at the dominant (a diatonic fifth up); odd-indexed entries
// carry the character's transform.
//
// `plan_stretto` is pure arithmetic so the structure planner can size the
// section before any notes exist. `realize_stretto` places the planned
// entries and then lets the voice writer fill whatever each voice leaves
// silent.

use kontrapunkt_prng::ScoreRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Character;
use crate::counterpoint::CounterpointState;
use crate::error::GenerationError;
use crate::line::VoiceWriter;
use crate::note::{Provenance, VoiceId};
use crate::pitch::KeySignature;
use crate::subject::Subject;
use crate::theme::{self, Theme};
use crate::timing::{self, TICKS_PER_BAR, Tick};

/// Each entry interval is this percentage of the previous one.
pub const INTERVAL_SHORTENING_PERCENT: u32 = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrettoTransform {
    Tonic,
    Dominant,
    Inversion,
    Retrograde,
    Augmentation,
}

impl StrettoTransform {
    /// Transform for odd-indexed entries.
    pub fn for_character(character: Character) -> StrettoTransform {
        match character {
            Character::Severe | Character::Restless => StrettoTransform::Inversion,
            Character::Playful => StrettoTransform::Retrograde,
            Character::Noble => StrettoTransform::Augmentation,
        }
    }

    pub fn apply(self, subject: &Theme, key: KeySignature) -> Theme {
        let out = match self {
            StrettoTransform::Tonic => subject.clone(),
            StrettoTransform::Dominant => subject.transposed_diatonic(key, key, 4),
            StrettoTransform::Inversion => subject.inverted(key),
            StrettoTransform::Retrograde => subject.retrograde(),
            StrettoTransform::Augmentation => subject.augmented(),
        };
        out.soften_tritones(key)
    }

    fn length(self, subject_len: Tick) -> Tick {
        if self == StrettoTransform::Augmentation {
            subject_len * 2
        } else {
            subject_len
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrettoEntry {
    pub voice: VoiceId,
    pub start_tick: Tick,
    pub length: Tick,
    pub transform: StrettoTransform,
}

impl StrettoEntry {
    pub fn end_tick(&self) -> Tick {
        self.start_tick + self.length
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrettoPlan {
    pub start_tick: Tick,
    pub entries: Vec<StrettoEntry>,
    pub end_tick: Tick,
}

impl StrettoPlan {
    pub fn duration(&self) -> Tick {
        self.end_tick - self.start_tick
    }

    /// Gaps between consecutive entry starts.
    pub fn intervals(&self) -> Vec<Tick> {
        self.entries
            .windows(2)
            .map(|w| w[1].start_tick - w[0].start_tick)
            .collect()
    }
}

/// Lay out one entry per voice starting at `start`.
///
/// The section ends when the longest entry does; with augmentation that is
/// not necessarily the last one to start.
pub fn plan_stretto(
    start: Tick,
    subject_len: Tick,
    num_voices: usize,
    character: Character,
) -> StrettoPlan {
    let num_voices = num_voices.max(1);
    let odd_transform = StrettoTransform::for_character(character);
    let mut interval =
        timing::round_up_to_bar(subject_len.div_ceil(num_voices as Tick)).max(TICKS_PER_BAR);
    let mut entries = Vec::with_capacity(num_voices);
    let mut t = start;
    for i in 0..num_voices {
        let transform = if i % 2 == 1 {
            odd_transform
        } else if (i / 2) % 2 == 0 {
            StrettoTransform::Tonic
        } else {
            StrettoTransform::Dominant
        };
        entries.push(StrettoEntry {
            voice: i as VoiceId,
            start_tick: t,
            length: transform.length(subject_len),
            transform,
        });
        t += interval;
        let shortened = timing::scale_percent(interval, INTERVAL_SHORTENING_PERCENT);
        interval = timing::round_down_to_beat(shortened).max(TICKS_PER_BAR);
    }
    let last = entries.iter().map(StrettoEntry::end_tick).max().unwrap_or(start);
    StrettoPlan {
        start_tick: start,
        entries,
        end_tick: timing::round_up_to_bar(last),
    }
}

/// What `realize_stretto` wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StrettoSummary {
    pub entries: usize,
    /// Free-counterpoint notes filled around the entries.
    pub free_notes: usize,
}

/// Place every planned entry, then fill each voice's silences up to the
/// section end.
pub fn realize_stretto(
    state: &mut CounterpointState,
    writer: &mut VoiceWriter<'_>,
    rng: &mut ScoreRng,
    plan: &StrettoPlan,
    subject: &Subject,
    home: KeySignature,
) -> Result<StrettoSummary, GenerationError> {
    let base = Theme::from_subject(subject);
    for entry in &plan.entries {
        let theme = entry.transform.apply(&base, home);
        // Whatever the voice still holds from the previous section gives way.
        clear_from(state, entry.voice, entry.start_tick)?;
        theme::place_theme(
            state,
            &theme,
            entry.voice,
            entry.start_tick,
            Provenance::StrettoEntry,
        )?;
    }
    let mut free_notes = 0;
    for voice in state.voice_ids() {
        free_notes += writer.fill(
            state,
            rng,
            voice,
            plan.start_tick,
            plan.end_tick,
            Provenance::FreeCounterpoint,
        )?;
    }
    debug!(
        entries = plan.entries.len(),
        free_notes,
        start = plan.start_tick,
        end = plan.end_tick,
        "stretto realised"
    );
    Ok(StrettoSummary {
        entries: plan.entries.len(),
        free_notes,
    })
}

/// Drop everything `voice` sounds from `tick` on; a note straddling `tick`
/// is cut short there.
fn clear_from(
    state: &mut CounterpointState,
    voice: VoiceId,
    tick: Tick,
) -> Result<(), GenerationError> {
    let starts: Vec<Tick> = state
        .voice_notes(voice)
        .iter()
        .filter(|n| n.end_tick() > tick)
        .map(|n| n.start_tick)
        .collect();
    for s in starts {
        if let Some(mut note) = state.remove_note(voice, s) {
            if note.start_tick < tick {
                note.duration = tick - note.start_tick;
                state.add_note(note)?;
            }
        }
    }
    Ok(())
}
