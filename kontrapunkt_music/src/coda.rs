// Coda: tonic pedal and final chord.
//
// The lowest voice holds the tonic for the whole coda. The other voices
// write free counterpoint over it until the last bar, then each takes a
// tone of the final tonic triad, the top voice on the root or third. In
// minor the third is raised (Picardy third). Chord tones are chosen nearest
// to each voice's previous pitch, preferring tones no other voice has taken
// yet and rejecting placements that add critical violations when a clean
// one exists.

use kontrapunkt_prng::ScoreRng;
use serde::Serialize;
use tracing::debug;

use crate::counterpoint::CounterpointState;
use crate::error::GenerationError;
use crate::line::VoiceWriter;
use crate::note::{NoteEvent, Provenance, VoiceId};
use crate::pitch::KeySignature;
use crate::rules::RuleSet;
use crate::structure::Section;
use crate::timing::{TICKS_PER_BAR, TICKS_PER_BEAT};

/// Extra cost for doubling a chord tone another voice already holds.
const DOUBLING_COST: i32 = 6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodaSummary {
    pub pedal_voice: VoiceId,
    pub final_chord: Vec<u8>,
    pub picardy: bool,
    pub free_notes: usize,
}

/// Pitch classes of the closing triad: root, third, fifth.
pub fn final_triad(key: KeySignature) -> ([u8; 3], bool) {
    let root = key.tonic.index();
    // Always a major third: in minor that is the Picardy third.
    ([root, (root + 4) % 12, (root + 7) % 12], key.is_minor)
}

pub fn write_coda(
    state: &mut CounterpointState,
    writer: &mut VoiceWriter<'_>,
    rng: &mut ScoreRng,
    section: &Section,
) -> Result<CodaSummary, GenerationError> {
    let key = section.key;
    let mut voices: Vec<(VoiceId, u8, u8)> = state
        .voice_ids()
        .into_iter()
        .filter_map(|v| state.voice(v).map(|l| (v, l.low, l.high)))
        .collect();
    // Highest range first; the pedal goes to the last.
    voices.sort_by_key(|&(v, low, high)| (std::cmp::Reverse(low as u16 + high as u16), v));
    let Some(&(pedal_voice, low, high)) = voices.last() else {
        return Err(GenerationError::Internal("coda with no voices".to_string()));
    };

    let tonic = key.tonic.index();
    let center = (low as i32 + high as i32) / 2;
    let pedal_pitch = (low..=high)
        .filter(|p| p % 12 == tonic)
        .min_by_key(|&p| (p as i32 - center).abs())
        .unwrap_or(low);
    state.add_note(NoteEvent::new(
        section.start_tick,
        section.duration(),
        pedal_pitch,
        pedal_voice,
        Provenance::FreeCounterpoint,
    ))?;

    let final_bar = section.end_tick.saturating_sub(TICKS_PER_BAR).max(section.start_tick);
    let mut free_notes = 0;
    for &(v, _, _) in &voices[..voices.len() - 1] {
        free_notes += writer.fill(
            state,
            rng,
            v,
            section.start_tick,
            final_bar,
            Provenance::FreeCounterpoint,
        )?;
    }

    let (triad, picardy) = final_triad(key);
    let rules = RuleSet::critical();
    let mut chord = vec![pedal_pitch];
    let mut used = vec![tonic];
    for (i, &(v, low, high)) in voices[..voices.len() - 1].iter().enumerate() {
        let prev = state
            .previous_note(v, final_bar)
            .map(|n| n.pitch as i32)
            .unwrap_or((low as i32 + high as i32) / 2);
        let allowed: &[u8] = if i == 0 { &triad[..2] } else { &triad };
        let mut candidates: Vec<(u8, i32)> = (low..=high)
            .filter(|p| allowed.contains(&(p % 12)))
            .map(|p| {
                let doubling = if used.contains(&(p % 12)) { DOUBLING_COST } else { 0 };
                (p, (p as i32 - prev).abs() + doubling)
            })
            .collect();
        candidates.sort_by_key(|&(p, cost)| (cost, p));
        let Some(&(fallback, _)) = candidates.first() else {
            continue;
        };
        let window_start = final_bar.saturating_sub(TICKS_PER_BEAT);
        let before = rules.critical_count(state, window_start, section.end_tick);
        let mut pitch = fallback;
        for &(p, _) in &candidates {
            let note = NoteEvent::new(
                final_bar,
                section.end_tick - final_bar,
                p,
                v,
                Provenance::FreeCounterpoint,
            );
            let after = state.with_trial(note, |s| {
                rules.critical_count(s, window_start, section.end_tick)
            })?;
            if after <= before {
                pitch = p;
                break;
            }
        }
        state.add_note(NoteEvent::new(
            final_bar,
            section.end_tick - final_bar,
            pitch,
            v,
            Provenance::FreeCounterpoint,
        ))?;
        used.push(pitch % 12);
        chord.push(pitch);
    }

    debug!(pedal_voice, ?chord, picardy, free_notes, "coda written");
    Ok(CodaSummary {
        pedal_voice,
        final_chord: chord,
        picardy,
        free_notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Character;
    use crate::harmony::{HarmonicSpan, HarmonicTimeline, SpanRole};
    use crate::pitch::PitchClass;
    use crate::structure::{FuguePhase, SectionType};

    fn run(key: KeySignature, voices: usize) -> (CounterpointState, CodaSummary, Section) {
        let section = Section {
            section_type: SectionType::Coda,
            phase: FuguePhase::Resolve,
            start_tick: 0,
            end_tick: 2 * TICKS_PER_BAR,
            key,
        };
        let span = HarmonicSpan {
            start: 0,
            end: section.end_tick,
            key,
            role: SpanRole::Coda,
        };
        let timeline = HarmonicTimeline::build(&[span], section.end_tick).unwrap();
        let ranges = [(60u8, 84u8), (52, 76), (45, 69), (31, 55)];
        let mut st = CounterpointState::new();
        for (i, &(lo, hi)) in ranges.iter().take(voices).enumerate() {
            st.register_voice(i as VoiceId, format!("v{i}"), lo, hi).unwrap();
        }
        let mut writer = VoiceWriter::new(&timeline, Character::Noble, voices);
        let mut rng = ScoreRng::new(17);
        let summary = write_coda(&mut st, &mut writer, &mut rng, &section).unwrap();
        (st, summary, section)
    }

    #[test]
    fn pedal_holds_the_tonic_in_the_lowest_voice() {
        let key = KeySignature::major(PitchClass::D);
        let (st, summary, section) = run(key, 4);
        assert_eq!(summary.pedal_voice, 3);
        let pedal = st.voice_notes(3);
        assert_eq!(pedal.len(), 1);
        assert_eq!(pedal[0].pitch % 12, PitchClass::D.index());
        assert_eq!(pedal[0].duration, section.duration());
    }

    #[test]
    fn every_voice_ends_on_the_tonic_triad() {
        let key = KeySignature::major(PitchClass::C);
        let (st, summary, section) = run(key, 4);
        assert!(!summary.picardy);
        assert_eq!(summary.final_chord.len(), 4);
        for v in 0..4u8 {
            let last = st.voice_notes(v).last().unwrap();
            assert_eq!(last.end_tick(), section.end_tick);
            assert!([0, 4, 7].contains(&(last.pitch % 12)));
        }
        let top = st.voice_notes(0).last().unwrap().pitch % 12;
        assert!(top == 0 || top == 4);
    }

    #[test]
    fn minor_keys_close_with_a_picardy_third() {
        let key = KeySignature::minor(PitchClass::A);
        let (triad, picardy) = final_triad(key);
        assert!(picardy);
        assert_eq!(triad, [9, 1, 4]);
        let (st, summary, _) = run(key, 3);
        assert!(summary.picardy);
        for v in 0..3u8 {
            let pc = st.voice_notes(v).last().unwrap().pitch % 12;
            assert_ne!(pc, 0, "minor third in the final chord");
        }
    }

    #[test]
    fn upper_voices_move_before_the_final_bar() {
        let key = KeySignature::major(PitchClass::C);
        let (st, summary, _) = run(key, 3);
        assert!(summary.free_notes > 0);
        assert!(st.gaps(0, 0, 2 * TICKS_PER_BAR).is_empty());
    }
}
