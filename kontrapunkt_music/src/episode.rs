// Development material: episodes and middle entries.
//
// An episode spins a motif fragment into a descending sequence in a lead
// voice (each repetition one scale degree lower), answers it with the
// inverted fragment in a partner voice two beats later, optionally adds
// suspension chains in a third voice, and leaves the rest to free
// counterpoint. Fragment pitches are passed to the voice writer as hints,
// so the sequence bends where it would break a rule instead of forcing it.
//
// Suspension chains follow a character x phase density table: each bar of
// the episode starts a chain with that probability. A chain of n
// suspensions spans 3n beats (preparation, dissonance, resolution), with
// each resolution tied over as the next suspension's preparation; all
// motion is a step down. The lowest voice writes 2-3 chains, upper voices
// 4-3, 7-6 or 9-8. A chain that would add critical violations is dropped.
//
// A middle entry restates the subject, moved diatonically into the
// section's key, in the voice the structure planner picked.

use kontrapunkt_prng::ScoreRng;
use serde::Serialize;
use tracing::debug;

use crate::config::Character;
use crate::counterpoint::CounterpointState;
use crate::error::GenerationError;
use crate::line::{self, VoiceWriter};
use crate::motif::{Motif, MotifPool};
use crate::note::{NoteEvent, Provenance, VoiceId};
use crate::pitch::{KeySignature, clamp_midi};
use crate::rules::RuleSet;
use crate::structure::{FuguePhase, Section, ThematicEntry};
use crate::subject::Subject;
use crate::theme::{self, Theme};
use crate::timing::{self, TICKS_PER_BAR, TICKS_PER_BEAT, Tick};

/// Delay before the partner voice imitates the lead.
pub const IMITATION_DELAY: Tick = 2 * TICKS_PER_BEAT;
pub const MAX_CHAIN_SUSPENSIONS: u32 = 2;

/// Expected suspension chains per bar.
pub fn suspension_density(character: Character, phase: FuguePhase) -> f64 {
    use FuguePhase::*;
    match (character, phase) {
        (Character::Severe, Establish) => 0.15,
        (Character::Severe, Develop) => 0.30,
        (Character::Severe, Resolve) => 0.20,
        (Character::Playful, Establish) => 0.10,
        (Character::Playful, Develop) => 0.15,
        (Character::Playful, Resolve) => 0.10,
        (Character::Noble, Establish) => 0.20,
        (Character::Noble, Develop) => 0.35,
        (Character::Noble, Resolve) => 0.25,
        (Character::Restless, Establish) => 0.15,
        (Character::Restless, Develop) => 0.25,
        (Character::Restless, Resolve) => 0.20,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionKind {
    FourThree,
    SevenSix,
    NineEight,
    /// Bass suspension, dissonant against the voice above.
    TwoThree,
}

impl SuspensionKind {
    pub const UPPER: [SuspensionKind; 3] =
        [SuspensionKind::FourThree, SuspensionKind::SevenSix, SuspensionKind::NineEight];

    /// Semitones from the reference voice to the suspended note.
    fn offset(self) -> i32 {
        match self {
            SuspensionKind::FourThree => 5,
            SuspensionKind::SevenSix => 10,
            SuspensionKind::NineEight => 14,
            SuspensionKind::TwoThree => -2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EpisodeSummary {
    pub lead_voice: VoiceId,
    pub sequence_notes: usize,
    pub imitation_notes: usize,
    pub suspension_chains: usize,
    pub free_notes: usize,
}

pub fn write_episode(
    state: &mut CounterpointState,
    writer: &mut VoiceWriter<'_>,
    rng: &mut ScoreRng,
    section: &Section,
    episode_index: usize,
    pool: &MotifPool,
    character: Character,
) -> Result<EpisodeSummary, GenerationError> {
    let voices = state.voice_ids();
    if voices.is_empty() {
        return Err(GenerationError::Internal("episode with no voices".to_string()));
    }
    let lead = voices[episode_index % voices.len()];
    let partner = voices[(episode_index + 1) % voices.len()];
    let mut summary = EpisodeSummary {
        lead_voice: lead,
        ..EpisodeSummary::default()
    };

    if let Some(fragment) = pool.fragment(episode_index) {
        summary.sequence_notes = write_sequence(
            state,
            writer,
            rng,
            lead,
            fragment,
            section,
            section.start_tick,
        )?;
        if partner != lead {
            let start = (section.start_tick + IMITATION_DELAY).min(section.end_tick);
            summary.imitation_notes =
                write_sequence(
                    state,
                    writer,
                    rng,
                    partner,
                    &fragment.inverted(),
                    section,
                    start,
                )?;
        }
    }

    let density = suspension_density(character, section.phase);
    let others: Vec<VoiceId> = voices
        .iter()
        .copied()
        .filter(|&v| v != lead && v != partner)
        .collect();
    let mut bar = section.start_tick;
    while bar < section.end_tick && !others.is_empty() {
        if rng.random_bool(density) {
            let chain_start = bar + TICKS_PER_BEAT;
            let room_beats = section.end_tick.saturating_sub(chain_start) / TICKS_PER_BEAT;
            let n = (room_beats / 3).min(MAX_CHAIN_SUSPENSIONS);
            if n > 0 {
                let voice = others[rng.range_usize(0, others.len())];
                if write_suspension_chain(state, rng, voice, section.key, chain_start, n)? {
                    summary.suspension_chains += 1;
                }
            }
        }
        bar += TICKS_PER_BAR;
    }

    for &v in &voices {
        summary.free_notes += writer.fill(
            state,
            rng,
            v,
            section.start_tick,
            section.end_tick,
            Provenance::FreeCounterpoint,
        )?;
    }
    debug!(
        start = section.start_tick,
        key = %section.key,
        lead = summary.lead_voice,
        sequence_notes = summary.sequence_notes,
        imitation_notes = summary.imitation_notes,
        suspension_chains = summary.suspension_chains,
        free_notes = summary.free_notes,
        "episode written"
    );
    Ok(summary)
}

/// Repeat `fragment` from `from` to the section end, one degree lower each
/// time. Returns the number of notes placed.
fn write_sequence(
    state: &mut CounterpointState,
    writer: &mut VoiceWriter<'_>,
    rng: &mut ScoreRng,
    voice: VoiceId,
    fragment: &Motif,
    section: &Section,
    from: Tick,
) -> Result<usize, GenerationError> {
    let key = section.key;
    let anchor = state
        .previous_note(voice, from)
        .map(|n| n.pitch)
        .or_else(|| state.voice(voice).map(|v| v.center()))
        .unwrap_or(60);
    let start_pos = key.position_of(key.snap(anchor)).unwrap_or(35);
    let mut t = from;
    let mut placed = 0;
    let mut rep = 0;
    while t + timing::EIGHTH <= section.end_tick && fragment.len_ticks() > 0 {
        let pitches = fragment.realize(key, start_pos - rep);
        for (&pitch, &dur) in pitches.iter().zip(&fragment.durations) {
            if t >= section.end_tick {
                break;
            }
            let dur = dur.min(section.end_tick - t);
            if !state.is_free(voice, t, t + dur) {
                t += dur;
                continue;
            }
            writer.place(
                state,
                rng,
                voice,
                t,
                dur,
                Provenance::EpisodeMaterial,
                Some(clamp_midi(pitch)),
            )?;
            placed += 1;
            t += dur;
        }
        rep += 1;
    }
    Ok(placed)
}

/// Try to write a chain of `n` suspensions in `voice` from `start`. Returns
/// false, leaving the state untouched, when the chain does not fit.
fn write_suspension_chain(
    state: &mut CounterpointState,
    rng: &mut ScoreRng,
    voice: VoiceId,
    key: KeySignature,
    start: Tick,
    n: u32,
) -> Result<bool, GenerationError> {
    let end = start + 3 * n * TICKS_PER_BEAT;
    if !state.is_free(voice, start, end) {
        return Ok(false);
    }
    let Some(line) = state.voice(voice) else {
        return Ok(false);
    };
    let (low, high) = (line.low, line.high);
    let is_lowest = state.voice_ids().iter().all(|&v| {
        v == voice || state.voice(v).is_some_and(|other| other.low >= low)
    });
    let kind = if is_lowest {
        SuspensionKind::TwoThree
    } else {
        *rng.choose(&SuspensionKind::UPPER).unwrap_or(&SuspensionKind::FourThree)
    };

    // The dissonance sounds against whichever other voice is nearest below
    // (or above, for a bass suspension) on the first dissonant beat.
    let dissonance = start + TICKS_PER_BEAT;
    let reference = state
        .voice_ids()
        .into_iter()
        .filter(|&v| v != voice)
        .filter_map(|v| state.sounding_pitch(v, dissonance))
        .filter(|&p| if is_lowest { p as i32 > low as i32 } else { (p as i32) < high as i32 })
        .min_by_key(|&p| (p as i32 - line.center() as i32).abs());
    let Some(reference) = reference else {
        return Ok(false);
    };
    let target = reference as i32 + kind.offset();
    let shift = line::octave_shift(target, target, low, high);
    let first = key.snap(clamp_midi(target + shift));
    let Some(mut pos) = key.position_of(first) else {
        return Ok(false);
    };

    let mut notes = Vec::with_capacity(n as usize + 1);
    let mut t = start;
    for i in 0..=n {
        let beats = if i == 0 {
            2
        } else if i == n {
            1
        } else {
            3
        };
        let pitch = clamp_midi(key.pitch_at(pos));
        if pitch < low.saturating_sub(2) || pitch > high.saturating_add(2) {
            return Ok(false);
        }
        let dur = beats * TICKS_PER_BEAT;
        notes.push(NoteEvent::new(t, dur, pitch, voice, Provenance::EpisodeMaterial));
        t += dur;
        pos -= 1;
    }

    let rules = RuleSet::critical();
    let window_end = end + TICKS_PER_BEAT;
    let before = rules.critical_count(state, start, window_end);
    let mut trial = state.clone();
    for note in &notes {
        trial.add_note(*note)?;
    }
    if rules.critical_count(&trial, start, window_end) > before {
        return Ok(false);
    }
    *state = trial;
    debug!(voice, ?kind, suspensions = n, start, "suspension chain");
    Ok(true)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MiddleEntrySummary {
    pub voice: VoiceId,
    pub subject_notes: usize,
    pub free_notes: usize,
}

/// State the subject in `entry.voice`, moved into `entry.key`, and fill the
/// other voices.
pub fn write_middle_entry(
    state: &mut CounterpointState,
    writer: &mut VoiceWriter<'_>,
    rng: &mut ScoreRng,
    entry: &ThematicEntry,
    section: &Section,
    subject: &Subject,
) -> Result<MiddleEntrySummary, GenerationError> {
    let moved = Theme::from_subject(subject)
        .transposed_diatonic(subject.key, entry.key, 0)
        .soften_tritones(entry.key);
    let placed = theme::place_theme(
        state,
        &moved,
        entry.voice,
        entry.start_tick,
        Provenance::FugueSubject,
    )?;
    let mut free_notes = 0;
    for v in state.voice_ids() {
        free_notes += writer.fill(
            state,
            rng,
            v,
            section.start_tick,
            section.end_tick,
            Provenance::FreeCounterpoint,
        )?;
    }
    debug!(voice = entry.voice, key = %entry.key, free_notes, "middle entry written");
    Ok(MiddleEntrySummary {
        voice: entry.voice,
        subject_notes: placed.len(),
        free_notes,
    })
}
