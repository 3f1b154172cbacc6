// Diagnostic analysis of a finished score.
//
// `analyze_counterpoint` rebuilds a `CounterpointState` from a flat note
// list (one voice per `voice_id`, register order from each voice's actual
// pitch span) and runs the standard rule battery over it. The resulting
// `CounterpointReport` is what the quality gate reads its metrics from and
// what `--analyze` prints.
//
// Parallels are split into all parallels and structural ones: a parallel is
// structural when both sounding notes are thematic (subject, answer or
// countersubject). Those come from the invertible-counterpoint contract
// failing, which is worse than an incidental parallel between free voices.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::counterpoint::CounterpointState;
use crate::note::{NoteEvent, VoiceId};
use crate::rules::{self, RuleSet, RuleViolation};
use crate::subject::{Subject, SubjectScore};
use crate::timing::{self, Tick};

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CounterpointReport {
    pub parallel_perfect_count: usize,
    pub structural_parallel_count: usize,
    pub hidden_perfect_count: usize,
    pub voice_crossing_count: usize,
    pub tritone_leap_count: usize,
    pub cross_relation_count: usize,
    pub dissonance_count: usize,
    pub unresolved_dissonance_count: usize,
    pub dissonance_resolution_rate: f64,
    pub dissonance_per_beat: f64,
    pub critical_count: usize,
    pub total_beats: usize,
    pub voice_pairs: usize,
    pub compliance_rate: f64,
}

/// Group notes by voice and run the rule battery.
pub fn analyze_counterpoint(notes: &[NoteEvent]) -> CounterpointReport {
    analyze_state(&state_from_notes(notes))
}

/// Build a state with one voice per distinct `voice_id`. Notes the state
/// refuses (overlapping or empty) are skipped and logged.
pub fn state_from_notes(notes: &[NoteEvent]) -> CounterpointState {
    let mut by_voice: BTreeMap<VoiceId, Vec<NoteEvent>> = BTreeMap::new();
    for n in notes {
        by_voice.entry(n.voice_id).or_default().push(*n);
    }
    let mut state = CounterpointState::new();
    let mut skipped = 0;
    for (id, mut voice_notes) in by_voice {
        let low = voice_notes.iter().map(|n| n.pitch).min().unwrap_or(60);
        let high = voice_notes.iter().map(|n| n.pitch).max().unwrap_or(60);
        if state.register_voice(id, format!("voice {id}"), low, high).is_err() {
            continue;
        }
        voice_notes.sort_by_key(|n| (n.start_tick, std::cmp::Reverse(n.duration)));
        for n in voice_notes {
            if let Err(e) = state.add_note(n) {
                // Overlaps are a trimming problem, not an analysis one.
                trace!(voice = id, error = %e, "note left out of analysis");
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        debug!(skipped, "analysis skipped notes the voice state refused");
    }
    state
}

pub fn analyze_state(state: &CounterpointState) -> CounterpointReport {
    let end = state.end_tick();
    let violations = RuleSet::standard().validate(state, 0, end);
    let count = |name: &str| violations.iter().filter(|v| v.rule_name == name).count();

    let structural_parallel_count = violations
        .iter()
        .filter(|v| v.rule_name == rules::PARALLEL_PERFECTS && is_structural(state, v))
        .count();

    let mut dissonance_count = 0;
    let mut resolved = 0;
    for (a, b) in state.voice_pairs() {
        for t in timing::beat_ticks(0, end) {
            if let Some(ok) = rules::dissonance_resolves(state, a, b, t) {
                dissonance_count += 1;
                if ok {
                    resolved += 1;
                }
            }
        }
    }

    let total_beats = end.div_ceil(timing::TICKS_PER_BEAT) as usize;
    let voice_pairs = state.voice_pairs().len();
    let critical_count = violations.iter().filter(|v| v.is_critical()).count();

    CounterpointReport {
        parallel_perfect_count: count(rules::PARALLEL_PERFECTS),
        structural_parallel_count,
        hidden_perfect_count: count(rules::HIDDEN_PERFECT),
        voice_crossing_count: count(rules::VOICE_CROSSING),
        tritone_leap_count: count(rules::TRITONE_LEAP),
        cross_relation_count: count(rules::CROSS_RELATION),
        dissonance_count,
        unresolved_dissonance_count: count(rules::UNRESOLVED_DISSONANCE),
        dissonance_resolution_rate: if dissonance_count == 0 {
            1.0
        } else {
            resolved as f64 / dissonance_count as f64
        },
        dissonance_per_beat: if total_beats == 0 {
            0.0
        } else {
            dissonance_count as f64 / total_beats as f64
        },
        critical_count,
        total_beats,
        voice_pairs,
        compliance_rate: rules::compliance_rate(critical_count, total_beats, voice_pairs),
    }
}

fn is_structural(state: &CounterpointState, v: &RuleViolation) -> bool {
    let thematic = |voice: VoiceId, tick: Tick| {
        state
            .sounding_note(voice, tick)
            .is_some_and(|n| n.provenance.is_thematic())
    };
    thematic(v.voice_a, v.tick) && thematic(v.voice_b, v.tick)
}

/// Fraction of voices that stated the subject or answer in the exposition.
/// A subject of two notes or fewer cannot carry an exposition and scores 0.
pub fn exposition_completeness(subject: &Subject, entries: usize, num_voices: usize) -> f64 {
    if subject.notes.len() <= 2 || num_voices == 0 {
        return 0.0;
    }
    (entries as f64 / num_voices as f64).min(1.0)
}

/// Full diagnostic report attached to the result when analysis is requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub counterpoint: CounterpointReport,
    pub exposition_completeness: f64,
    pub subject_score: SubjectScore,
    pub subject_composite: f64,
    pub notes_by_provenance: BTreeMap<String, usize>,
}

impl AnalysisReport {
    pub fn build(
        notes: &[NoteEvent],
        subject: &Subject,
        subject_score: SubjectScore,
        exposition_entries: usize,
        num_voices: usize,
    ) -> AnalysisReport {
        let mut notes_by_provenance = BTreeMap::new();
        for n in notes {
            let name = serde_json::to_value(n.provenance)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("{:?}", n.provenance));
            *notes_by_provenance.entry(name).or_insert(0) += 1;
        }
        AnalysisReport {
            counterpoint: analyze_counterpoint(notes),
            exposition_completeness: exposition_completeness(
                subject,
                exposition_entries,
                num_voices,
            ),
            subject_score,
            subject_composite: subject_score.composite(),
            notes_by_provenance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Character;
    use crate::note::Provenance;
    use crate::pitch::{KeySignature, PitchClass};

    fn parallel_fifths(upper: Provenance, lower: Provenance) -> Vec<NoteEvent> {
        let mut notes = Vec::new();
        for (i, (u, l)) in [(67u8, 60u8), (69, 62), (71, 64), (72, 65)].iter().enumerate() {
            let t = i as Tick * 480;
            notes.push(NoteEvent::new(t, 480, *u, 0, upper));
            notes.push(NoteEvent::new(t, 480, *l, 1, lower));
        }
        notes
    }

    #[test]
    fn free_parallels_are_not_structural() {
        let report = analyze_counterpoint(&parallel_fifths(
            Provenance::FreeCounterpoint,
            Provenance::FugueSubject,
        ));
        assert!(report.parallel_perfect_count >= 2);
        assert_eq!(report.structural_parallel_count, 0);
        assert!(report.compliance_rate < 1.0);
    }

    #[test]
    fn thematic_parallels_are_structural() {
        let report = analyze_counterpoint(&parallel_fifths(
            Provenance::FugueSubject,
            Provenance::FugueAnswer,
        ));
        assert_eq!(
            report.structural_parallel_count,
            report.parallel_perfect_count
        );
        assert!(report.structural_parallel_count >= 2);
    }

    #[test]
    fn clean_thirds_comply_fully() {
        let mut notes = Vec::new();
        for (i, (u, l)) in [(64u8, 60u8), (65, 62), (67, 64)].iter().enumerate() {
            let t = i as Tick * 480;
            notes.push(NoteEvent::new(t, 480, *u, 0, Provenance::FreeCounterpoint));
            notes.push(NoteEvent::new(t, 480, *l, 1, Provenance::FreeCounterpoint));
        }
        let report = analyze_counterpoint(&notes);
        assert_eq!(report.critical_count, 0);
        assert_eq!(report.compliance_rate, 1.0);
        assert_eq!(report.total_beats, 3);
        assert_eq!(report.dissonance_count, 0);
        assert_eq!(report.dissonance_resolution_rate, 1.0);
    }

    #[test]
    fn overlapping_notes_are_left_out() {
        let notes = vec![
            NoteEvent::new(0, 960, 64, 0, Provenance::FreeCounterpoint),
            NoteEvent::new(480, 480, 67, 0, Provenance::FreeCounterpoint),
            NoteEvent::new(960, 480, 65, 0, Provenance::FreeCounterpoint),
        ];
        let state = state_from_notes(&notes);
        let kept: Vec<Tick> = state.voice_notes(0).iter().map(|n| n.start_tick).collect();
        assert_eq!(kept, vec![0, 960]);
    }

    #[test]
    fn short_subject_has_zero_completeness() {
        let key = KeySignature::major(PitchClass::C);
        let two = Subject {
            notes: vec![
                NoteEvent::new(0, 1920, 60, 0, Provenance::FugueSubject),
                NoteEvent::new(1920, 1920, 67, 0, Provenance::FugueSubject),
            ],
            key,
            length_ticks: 3840,
            character: Character::Severe,
        };
        assert_eq!(exposition_completeness(&two, 3, 3), 0.0);
        let mut three = two.clone();
        three.notes.push(NoteEvent::new(3840, 480, 64, 0, Provenance::FugueSubject));
        assert_eq!(exposition_completeness(&three, 3, 3), 1.0);
        assert_eq!(exposition_completeness(&three, 2, 4), 0.5);
    }
}
