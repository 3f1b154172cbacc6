// Exposition builder.
//
// Voice k enters at k * subject length: even voices with the subject in the
// home key, odd voices with the answer (see theme::answer for the real/tonal
// choice). Every thematic statement is placed first, shifted by octaves into
// its voice's range.
//
// The countersubject is composed once, in voice 0 against voice 1's answer,
// using a rhythm that moves where the answer holds and holds where it moves.
// Its first notes lean toward a motif fragment so it stays related to the
// subject. Each attempt is written into a cloned state and kept only if
// dropping it below the answer by octaves adds no parallel perfects; after
// `COUNTERSUBJECT_ATTEMPTS` the attempt with the fewest new parallels wins.
// Later entries reuse it by real transposition in the voice that just
// finished its own entry.
//
// Remaining silence from each voice's entry to the end of the codetta is
// free counterpoint, written window by window so every voice sees its
// neighbours' material for the same stretch.

use kontrapunkt_prng::ScoreRng;
use serde::Serialize;
use tracing::debug;

use crate::counterpoint::CounterpointState;
use crate::error::{CounterpointError, GenerationError};
use crate::line::VoiceWriter;
use crate::motif::MotifPool;
use crate::note::{NoteEvent, Provenance, VoiceId};
use crate::pitch::clamp_midi;
use crate::rules::{ParallelPerfects, RuleSet};
use crate::structure::{EntryKind, FuguePlan};
use crate::subject::Subject;
use crate::theme::{self, Theme};
use crate::timing::{self, EIGHTH, TICKS_PER_BEAT, Tick};

pub const COUNTERSUBJECT_ATTEMPTS: usize = 4;

/// Chance of splitting a beat where the entry attacks but does not move.
const SPLIT_ON_ATTACK: f64 = 0.4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpositionSummary {
    pub entries: usize,
    pub tonal_answer: bool,
    pub countersubject_notes: usize,
    /// Whether the countersubject passed the octave-inversion check.
    pub invertible: bool,
    pub free_notes: usize,
}

pub fn build_exposition(
    state: &mut CounterpointState,
    writer: &mut VoiceWriter<'_>,
    rng: &mut ScoreRng,
    plan: &FuguePlan,
    subject: &Subject,
    pool: &MotifPool,
) -> Result<ExpositionSummary, GenerationError> {
    let subject_theme = Theme::from_subject(subject);
    let (answer_theme, tonal_answer) = theme::answer(subject);

    let mut placed_entries = Vec::with_capacity(plan.exposition_entries.len());
    for entry in &plan.exposition_entries {
        let (t, provenance) = match entry.kind {
            EntryKind::Subject => (&subject_theme, Provenance::FugueSubject),
            EntryKind::Answer => (&answer_theme, Provenance::FugueAnswer),
        };
        let placed = theme::place_theme(state, t, entry.voice, entry.start_tick, provenance)?;
        placed_entries.push(placed);
    }

    let mut summary = ExpositionSummary {
        entries: placed_entries.len(),
        tonal_answer,
        countersubject_notes: 0,
        invertible: true,
        free_notes: 0,
    };

    if plan.exposition_entries.len() >= 2 {
        let first = plan.exposition_entries[0];
        let against = &placed_entries[1];
        let (cs_notes, invertible) =
            compose_countersubject(state, writer, rng, first.voice, against, pool)?;
        summary.countersubject_notes = cs_notes.len();
        summary.invertible = invertible;

        // The countersubject was written against the answer; subject entries
        // take it a fifth lower.
        let cs_theme = Theme::from_notes(&cs_notes);
        for pair in plan.exposition_entries.windows(2).skip(1) {
            let (holder, entry) = (pair[0], pair[1]);
            let t = match entry.kind {
                EntryKind::Answer => cs_theme.clone(),
                EntryKind::Subject => cs_theme.transposed(-7),
            };
            theme::place_theme(
                state,
                &t,
                holder.voice,
                entry.start_tick,
                Provenance::FugueCountersubject,
            )?;
        }
    }

    // Free counterpoint, one subject-length window at a time, then the codetta.
    let len = plan.subject_ticks;
    let mut window_start = len;
    while window_start < plan.codetta_end {
        let window_end = if window_start >= plan.codetta_start {
            plan.codetta_end
        } else {
            (window_start + len).min(plan.codetta_start)
        };
        for entry in &plan.exposition_entries {
            if entry.start_tick < window_start {
                summary.free_notes += writer.fill(
                    state,
                    rng,
                    entry.voice,
                    window_start,
                    window_end,
                    Provenance::FreeCounterpoint,
                )?;
            }
        }
        window_start = window_end;
    }

    debug!(
        entries = summary.entries,
        tonal_answer = summary.tonal_answer,
        countersubject_notes = summary.countersubject_notes,
        invertible = summary.invertible,
        free_notes = summary.free_notes,
        "exposition built"
    );
    Ok(summary)
}

/// Write the countersubject in `voice` against `against`; returns its notes
/// and whether it survives octave inversion.
fn compose_countersubject(
    state: &mut CounterpointState,
    writer: &mut VoiceWriter<'_>,
    rng: &mut ScoreRng,
    voice: VoiceId,
    against: &[NoteEvent],
    pool: &MotifPool,
) -> Result<(Vec<NoteEvent>, bool), GenerationError> {
    let (Some(first), Some(last)) = (against.first(), against.last()) else {
        return Ok((Vec::new(), true));
    };
    let (from, to) = (first.start_tick, last.end_tick());
    let key = writer
        .timeline()
        .key_at(from)
        .ok_or_else(|| GenerationError::Internal(format!("no harmony at tick {from}")))?;

    let center = state.voice(voice).map(|v| v.center()).unwrap_or(72);
    let hints: Vec<u8> = pool
        .fragment(0)
        .map(|m| {
            let start = key.position_of(key.snap(center)).unwrap_or(35);
            m.inverted().realize(key, start).into_iter().map(clamp_midi).collect()
        })
        .unwrap_or_default();

    let mut best: Option<(CounterpointState, Vec<NoteEvent>, usize)> = None;
    for attempt in 0..COUNTERSUBJECT_ATTEMPTS {
        let rhythm = complementary_rhythm(against, from, to, rng);
        let mut trial = state.clone();
        let mut notes = Vec::with_capacity(rhythm.len());
        for (i, &(t, d)) in rhythm.iter().enumerate() {
            let hint = hints.get(i).copied();
            notes.push(writer.place(
                &mut trial,
                rng,
                voice,
                t,
                d,
                Provenance::FugueCountersubject,
                hint,
            )?);
        }
        let added = inversion_parallels(against, &notes)?;
        debug!(attempt, added_parallels = added, "countersubject attempt");
        if best.as_ref().is_none_or(|b| added < b.2) {
            best = Some((trial, notes, added));
        }
        if added == 0 {
            break;
        }
    }
    let Some((trial, notes, added)) = best else {
        return Ok((Vec::new(), true));
    };
    *state = trial;
    Ok((notes, added == 0))
}

/// Beat-by-beat rhythm that fills the entry's held notes with motion.
fn complementary_rhythm(
    against: &[NoteEvent],
    from: Tick,
    to: Tick,
    rng: &mut ScoreRng,
) -> Vec<(Tick, Tick)> {
    let mut out = Vec::new();
    for beat in timing::beat_ticks(from, to) {
        let beat_end = (beat + TICKS_PER_BEAT).min(to);
        let attacks = against.iter().any(|n| n.start_tick == beat);
        let moves_inside = against
            .iter()
            .any(|n| n.start_tick > beat && n.start_tick < beat_end);
        let split = beat_end - beat == TICKS_PER_BEAT
            && !moves_inside
            && (!attacks || rng.random_bool(SPLIT_ON_ATTACK));
        if split {
            out.push((beat, EIGHTH));
            out.push((beat + EIGHTH, EIGHTH));
        } else {
            out.push((beat, beat_end - beat));
        }
    }
    out
}

/// Parallel perfects the pair gains when the upper line drops below the
/// lower one by octaves.
fn inversion_parallels(
    lower: &[NoteEvent],
    upper: &[NoteEvent],
) -> Result<usize, CounterpointError> {
    let count = |upper_shift: i32| -> Result<usize, CounterpointError> {
        let mut st = CounterpointState::new();
        st.register_voice(0, "upper", 0, 127)?;
        st.register_voice(1, "lower", 0, 127)?;
        for n in upper {
            let mut m = *n;
            m.voice_id = 0;
            m.pitch = clamp_midi(n.pitch as i32 + upper_shift);
            st.add_note(m)?;
        }
        for n in lower {
            let mut m = *n;
            m.voice_id = 1;
            st.add_note(m)?;
        }
        Ok(RuleSet::empty()
            .with_rule(ParallelPerfects)
            .validate(&st, 0, st.end_tick())
            .len())
    };
    let mean = |notes: &[NoteEvent]| {
        if notes.is_empty() {
            return 0;
        }
        notes.iter().map(|n| n.pitch as i32).sum::<i32>() / notes.len() as i32
    };
    let (upper_mean, lower_mean) = (mean(upper), mean(lower));
    let mut shift = 0;
    while upper_mean + shift >= lower_mean {
        shift -= 12;
    }
    Ok(count(shift)?.saturating_sub(count(0)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Character;
    use crate::harmony::HarmonicTimeline;
    use crate::modulation::ModulationPlan;
    use crate::pitch::{KeySignature, PitchClass};
    use crate::structure;
    use crate::subject;

    struct Fixture {
        plan: FuguePlan,
        timeline: HarmonicTimeline,
        subject: Subject,
        pool: MotifPool,
    }

    fn fixture(voices: usize) -> Fixture {
        let key = KeySignature::major(PitchClass::C);
        let accepted = subject::generate_acceptable(key, Character::Severe, 42, 10).unwrap();
        let plan = structure::plan_fugue(
            key,
            voices,
            accepted.subject.length_ticks,
            Character::Severe,
            &ModulationPlan::for_key(key),
            24,
        )
        .unwrap();
        let timeline = HarmonicTimeline::build(&plan.spans, plan.total_ticks()).unwrap();
        let pool = MotifPool::build(&accepted.subject);
        Fixture {
            plan,
            timeline,
            subject: accepted.subject,
            pool,
        }
    }

    fn state(voices: usize) -> CounterpointState {
        let ranges = [(57, 81), (48, 72), (36, 60), (31, 55)];
        let mut st = CounterpointState::new();
        for (i, &(lo, hi)) in ranges.iter().take(voices).enumerate() {
            st.register_voice(i as u8, format!("v{i}"), lo, hi).unwrap();
        }
        st
    }

    #[test]
    fn entries_and_countersubject_land_where_planned() {
        let f = fixture(3);
        let mut st = state(3);
        let mut writer = VoiceWriter::new(&f.timeline, Character::Severe, 3);
        let mut rng = ScoreRng::new(9);
        let summary =
            build_exposition(&mut st, &mut writer, &mut rng, &f.plan, &f.subject, &f.pool).unwrap();
        assert_eq!(summary.entries, 3);
        assert!(summary.countersubject_notes > 0);

        let len = f.plan.subject_ticks;
        let v0 = st.voice_notes(0);
        assert_eq!(v0[0].start_tick, 0);
        assert_eq!(v0[0].provenance, Provenance::FugueSubject);
        assert!(
            v0.iter()
                .any(|n| n.start_tick == len && n.provenance == Provenance::FugueCountersubject)
        );

        let v1 = st.voice_notes(1);
        assert_eq!(v1[0].start_tick, len);
        assert_eq!(v1[0].provenance, Provenance::FugueAnswer);
        // Voice 1 carries the countersubject against voice 2's subject.
        assert!(
            v1.iter()
                .any(|n| n.start_tick == 2 * len && n.provenance == Provenance::FugueCountersubject)
        );

        assert_eq!(st.voice_notes(2)[0].start_tick, 2 * len);
    }

    #[test]
    fn voices_sound_from_entry_through_codetta() {
        let f = fixture(3);
        let mut st = state(3);
        let mut writer = VoiceWriter::new(&f.timeline, Character::Severe, 3);
        let mut rng = ScoreRng::new(3);
        build_exposition(&mut st, &mut writer, &mut rng, &f.plan, &f.subject, &f.pool).unwrap();
        for e in &f.plan.exposition_entries {
            assert!(st.gaps(e.voice, e.start_tick, f.plan.codetta_end).is_empty());
            assert!(st.voice_notes(e.voice).iter().all(|n| n.start_tick >= e.start_tick));
        }
    }

    #[test]
    fn rhythm_moves_against_held_notes() {
        let held = [NoteEvent::new(0, 960, 60, 1, Provenance::FugueAnswer)];
        let mut rng = ScoreRng::new(1);
        let r = complementary_rhythm(&held, 0, 960, &mut rng);
        // Beat 1 is held, so it must split.
        assert!(r.contains(&(480, EIGHTH)));
        assert_eq!(r.iter().map(|&(_, d)| d).sum::<Tick>(), 960);

        let busy = [
            NoteEvent::new(0, 240, 60, 1, Provenance::FugueAnswer),
            NoteEvent::new(240, 240, 62, 1, Provenance::FugueAnswer),
        ];
        assert_eq!(
            complementary_rhythm(&busy, 0, 480, &mut rng),
            vec![(0, 480)]
        );
    }

    #[test]
    fn parallel_fourths_fail_inversion() {
        // Upper a fourth above lower, moving in parallel: fifths once inverted.
        let lower: Vec<NoteEvent> = [60u8, 62, 64]
            .iter()
            .enumerate()
            .map(|(i, &p)| NoteEvent::new(i as Tick * 480, 480, p, 1, Provenance::FugueAnswer))
            .collect();
        let upper: Vec<NoteEvent> = lower
            .iter()
            .map(|n| {
                NoteEvent::new(
                    n.start_tick,
                    480,
                    n.pitch + 5,
                    0,
                    Provenance::FugueCountersubject,
                )
            })
            .collect();
        assert!(inversion_parallels(&lower, &upper).unwrap() >= 2);

        let thirds: Vec<NoteEvent> = lower
            .iter()
            .zip([64u8, 65, 67])
            .map(|(n, p)| NoteEvent::new(n.start_tick, 480, p, 0, Provenance::FugueCountersubject))
            .collect();
        assert_eq!(inversion_parallels(&lower, &thirds).unwrap(), 0);
    }
}
