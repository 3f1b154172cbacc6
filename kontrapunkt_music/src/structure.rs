// Fugue form planning.
//
// Before any note is written, the planner lays out the whole piece as a
// sequence of sections and a matching harmonic span list:
//
//   Exposition (one subject-length entry per voice, then a one-bar codetta
//   that turns toward the first development key)
//   Development: [Episode, MiddleEntry] x n, then a closing Episode that
//   returns to the home key
//   Stretto (sized by `stretto::plan_stretto`)
//   Coda (two bars)
//
// The development count n is chosen so the piece lands near the requested
// bar count, with at least one episode/middle-entry pair. Phases follow the
// sections: the exposition establishes, episodes and middle entries
// develop, and the closing episode, stretto and coda resolve.
//
// `FugueStructure::validate` checks the structural invariants the rest of
// the pipeline relies on; the generator refuses to continue past a plan
// that violates them.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Character;
use crate::error::GenerationError;
use crate::harmony::{HarmonicSpan, SpanRole};
use crate::modulation::ModulationPlan;
use crate::note::VoiceId;
use crate::pitch::KeySignature;
use crate::stretto::{self, StrettoPlan};
use crate::timing::{self, TICKS_PER_BAR, Tick};

/// Bars per development episode.
pub const EPISODE_BARS: u32 = 2;
pub const CODETTA_BARS: u32 = 1;
pub const CODA_BARS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Exposition,
    Episode,
    MiddleEntry,
    Stretto,
    Coda,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuguePhase {
    Establish,
    Develop,
    Resolve,
}

impl FuguePhase {
    pub const ALL: [FuguePhase; 3] = [
        FuguePhase::Establish,
        FuguePhase::Develop,
        FuguePhase::Resolve,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub section_type: SectionType,
    pub phase: FuguePhase,
    pub start_tick: Tick,
    pub end_tick: Tick,
    pub key: KeySignature,
}

impl Section {
    pub fn is_minor(&self) -> bool {
        self.key.is_minor
    }

    pub fn duration(&self) -> Tick {
        self.end_tick.saturating_sub(self.start_tick)
    }
}

/// One broken structural invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructureViolation {
    pub section_index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FugueStructure {
    pub sections: Vec<Section>,
}

impl FugueStructure {
    pub fn push(&mut self, section: Section) {
        self.sections.push(section);
    }

    pub fn total_ticks(&self) -> Tick {
        self.sections.last().map(|s| s.end_tick).unwrap_or(0)
    }

    pub fn sections_of(&self, section_type: SectionType) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(move |s| s.section_type == section_type)
    }

    pub fn count(&self, section_type: SectionType) -> usize {
        self.sections_of(section_type).count()
    }

    pub fn validate(&self) -> Vec<StructureViolation> {
        let mut out = Vec::new();
        let mut violation = |section_index: usize, reason: String| {
            out.push(StructureViolation { section_index, reason });
        };
        let Some(first) = self.sections.first() else {
            violation(0, "structure has no sections".to_string());
            return out;
        };
        if first.section_type != SectionType::Exposition {
            violation(
                0,
                format!("first section is {:?}, not an exposition", first.section_type),
            );
        }
        if first.start_tick != 0 {
            violation(
                0,
                format!("first section starts at tick {}", first.start_tick),
            );
        }
        let last_index = self.sections.len() - 1;
        if self.sections[last_index].section_type != SectionType::Coda {
            violation(
                last_index,
                format!("last section is {:?}, not a coda", self.sections[last_index].section_type),
            );
        }
        for (i, s) in self.sections.iter().enumerate() {
            if s.end_tick <= s.start_tick {
                violation(i, format!("non-positive duration [{}, {})", s.start_tick, s.end_tick));
            }
            if i > 0 {
                let prev = &self.sections[i - 1];
                if s.start_tick != prev.end_tick {
                    violation(
                        i,
                        format!(
                            "starts at {} but the previous section ends at {}",
                            s.start_tick, prev.end_tick
                        ),
                    );
                }
                if s.phase < prev.phase {
                    violation(
                        i,
                        format!("phase regresses from {:?} to {:?}", prev.phase, s.phase),
                    );
                }
            }
        }
        for phase in FuguePhase::ALL {
            if !self.sections.iter().any(|s| s.phase == phase) {
                violation(last_index, format!("no section in the {phase:?} phase"));
            }
        }
        out
    }

    /// `validate`, surfacing the first violation as a structural error.
    pub fn ensure_valid(&self) -> Result<(), GenerationError> {
        match self.validate().into_iter().next() {
            None => Ok(()),
            Some(v) => Err(GenerationError::Structural {
                section_index: v.section_index,
                reason: v.reason,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Subject,
    Answer,
}

/// A planned thematic statement in one voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThematicEntry {
    pub voice: VoiceId,
    pub start_tick: Tick,
    pub kind: EntryKind,
    pub key: KeySignature,
}

/// Everything the note builders need to know about the form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuguePlan {
    pub home: KeySignature,
    pub num_voices: usize,
    pub subject_ticks: Tick,
    pub structure: FugueStructure,
    pub exposition_entries: Vec<ThematicEntry>,
    pub codetta_start: Tick,
    pub codetta_end: Tick,
    pub middle_entries: Vec<ThematicEntry>,
    pub stretto: StrettoPlan,
    pub spans: Vec<HarmonicSpan>,
}

impl FuguePlan {
    pub fn total_ticks(&self) -> Tick {
        self.structure.total_ticks()
    }

    pub fn total_bars(&self) -> u32 {
        timing::bar_of(self.total_ticks().saturating_sub(1)) + 1
    }
}

/// Lay out a fugue of roughly `target_bars` bars.
pub fn plan_fugue(
    home: KeySignature,
    num_voices: usize,
    subject_ticks: Tick,
    character: Character,
    modulation: &ModulationPlan,
    target_bars: u32,
) -> Result<FuguePlan, GenerationError> {
    if num_voices == 0 || subject_ticks == 0 {
        return Err(GenerationError::Internal(format!(
            "cannot plan a fugue with {num_voices} voices and a {subject_ticks}-tick subject"
        )));
    }
    let subject_ticks = timing::round_up_to_bar(subject_ticks);
    let subject_bars = subject_ticks / TICKS_PER_BAR;
    let mut structure = FugueStructure::default();
    let mut spans = Vec::new();

    // Exposition.
    let mut exposition_entries = Vec::with_capacity(num_voices);
    for k in 0..num_voices {
        let start = k as Tick * subject_ticks;
        let (kind, key) = if k % 2 == 0 {
            (EntryKind::Subject, home)
        } else {
            (EntryKind::Answer, home.dominant())
        };
        exposition_entries.push(ThematicEntry {
            voice: k as VoiceId,
            start_tick: start,
            kind,
            key,
        });
        spans.push(HarmonicSpan {
            start,
            end: start + subject_ticks,
            key,
            role: SpanRole::Entry,
        });
    }
    let codetta_start = num_voices as Tick * subject_ticks;
    let codetta_end = codetta_start + timing::bars(CODETTA_BARS);
    spans.push(HarmonicSpan {
        start: codetta_start,
        end: codetta_end,
        key: modulation.develop_key(0),
        role: SpanRole::Codetta,
    });
    structure.push(Section {
        section_type: SectionType::Exposition,
        phase: FuguePhase::Establish,
        start_tick: 0,
        end_tick: codetta_end,
        key: home,
    });

    // Size the development from what is left after the fixed sections.
    let stretto_sketch = stretto::plan_stretto(0, subject_ticks, num_voices, character);
    let stretto_bars = stretto_sketch.duration() / TICKS_PER_BAR;
    let fixed_bars = codetta_end / TICKS_PER_BAR + stretto_bars + CODA_BARS + EPISODE_BARS;
    let dev_bars = target_bars.saturating_sub(fixed_bars);
    let pairs = (dev_bars / (EPISODE_BARS + subject_bars)).max(1) as usize;

    let mut t = codetta_end;
    let mut middle_entries = Vec::with_capacity(pairs);
    for m in 0..pairs {
        let key = modulation.develop_key(m);
        let episode_end = t + timing::bars(EPISODE_BARS);
        structure.push(Section {
            section_type: SectionType::Episode,
            phase: FuguePhase::Develop,
            start_tick: t,
            end_tick: episode_end,
            key,
        });
        spans.push(HarmonicSpan {
            start: t,
            end: episode_end,
            key,
            role: SpanRole::Episode,
        });
        t = episode_end;

        let entry_end = t + subject_ticks;
        structure.push(Section {
            section_type: SectionType::MiddleEntry,
            phase: FuguePhase::Develop,
            start_tick: t,
            end_tick: entry_end,
            key,
        });
        spans.push(HarmonicSpan {
            start: t,
            end: entry_end,
            key,
            role: SpanRole::MiddleEntry,
        });
        // Never the voice that just finished a thematic statement.
        middle_entries.push(ThematicEntry {
            voice: (m % num_voices) as VoiceId,
            start_tick: t,
            kind: EntryKind::Subject,
            key,
        });
        t = entry_end;
    }

    // The closing episode leads home.
    let episode_end = t + timing::bars(EPISODE_BARS);
    structure.push(Section {
        section_type: SectionType::Episode,
        phase: FuguePhase::Resolve,
        start_tick: t,
        end_tick: episode_end,
        key: home,
    });
    spans.push(HarmonicSpan {
        start: t,
        end: episode_end,
        key: home,
        role: SpanRole::Episode,
    });
    t = episode_end;

    let stretto = stretto::plan_stretto(t, subject_ticks, num_voices, character);
    structure.push(Section {
        section_type: SectionType::Stretto,
        phase: FuguePhase::Resolve,
        start_tick: t,
        end_tick: stretto.end_tick,
        key: home,
    });
    spans.push(HarmonicSpan {
        start: t,
        end: stretto.end_tick,
        key: home,
        role: SpanRole::Stretto,
    });
    t = stretto.end_tick;

    let coda_end = t + timing::bars(CODA_BARS);
    structure.push(Section {
        section_type: SectionType::Coda,
        phase: FuguePhase::Resolve,
        start_tick: t,
        end_tick: coda_end,
        key: home,
    });
    spans.push(HarmonicSpan {
        start: t,
        end: coda_end,
        key: home,
        role: SpanRole::Coda,
    });

    debug!(
        sections = structure.sections.len(),
        development_pairs = pairs,
        bars = coda_end / TICKS_PER_BAR,
        target_bars,
        "fugue planned"
    );

    Ok(FuguePlan {
        home,
        num_voices,
        subject_ticks,
        structure,
        exposition_entries,
        codetta_start,
        codetta_end,
        middle_entries,
        stretto,
        spans,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::PitchClass;
    use pretty_assertions::assert_eq;

    fn plan(voices: usize, bars: u32, character: Character) -> FuguePlan {
        let home = KeySignature::major(PitchClass::C);
        plan_fugue(home, voices, 3840, character, &ModulationPlan::for_key(home), bars).unwrap()
    }

    #[test]
    fn every_plan_validates() {
        for voices in 2..=5 {
            for bars in [24, 40, 64, 96] {
                for c in Character::ALL {
                    let p = plan(voices, bars, *c);
                    assert_eq!(p.structure.validate(), vec![]);
                    assert!(p.structure.ensure_valid().is_ok());
                }
            }
        }
    }

    #[test]
    fn exposition_entries_alternate_subject_and_answer() {
        let p = plan(4, 40, Character::Severe);
        let kinds: Vec<EntryKind> = p.exposition_entries.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EntryKind::Subject, EntryKind::Answer, EntryKind::Subject, EntryKind::Answer]
        );
        assert_eq!(p.exposition_entries[3].start_tick, 3 * 3840);
        assert_eq!(
            p.exposition_entries[1].key,
            KeySignature::major(PitchClass::G)
        );
        assert_eq!(p.codetta_start, 4 * 3840);
        assert_eq!(p.codetta_end - p.codetta_start, TICKS_PER_BAR);
    }

    #[test]
    fn longer_targets_add_development() {
        let short = plan(3, 24, Character::Severe);
        let long = plan(3, 96, Character::Severe);
        assert!(
            long.structure.count(SectionType::MiddleEntry)
                > short.structure.count(SectionType::MiddleEntry)
        );
        assert!(long.total_bars() > short.total_bars());
        assert!(short.structure.count(SectionType::Episode) >= 2);
        assert_eq!(short.structure.count(SectionType::Stretto), 1);
    }

    #[test]
    fn long_target_lands_near_request() {
        let p = plan(3, 96, Character::Severe);
        let bars = p.total_bars() as i64;
        assert!((bars - 96).abs() <= 6, "{bars} bars");
    }

    #[test]
    fn middle_entries_never_repeat_a_voice() {
        let p = plan(3, 96, Character::Playful);
        let last_expo = p.exposition_entries.last().unwrap().voice;
        assert_ne!(p.middle_entries[0].voice, last_expo);
        for w in p.middle_entries.windows(2) {
            assert_ne!(w[0].voice, w[1].voice);
        }
    }

    #[test]
    fn spans_cover_the_piece() {
        let p = plan(3, 40, Character::Noble);
        assert_eq!(p.spans[0].start, 0);
        for w in p.spans.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
        assert_eq!(p.spans.last().unwrap().end, p.total_ticks());
    }

    #[test]
    fn validate_reports_broken_structures() {
        let key = KeySignature::major(PitchClass::C);
        let s = |section_type, phase, start_tick, end_tick| Section {
            section_type,
            phase,
            start_tick,
            end_tick,
            key,
        };
        let broken = FugueStructure {
            sections: vec![
                s(SectionType::Episode, FuguePhase::Develop, 0, 1920),
                s(SectionType::Exposition, FuguePhase::Establish, 1920, 1920),
                s(SectionType::Stretto, FuguePhase::Resolve, 3840, 5760),
            ],
        };
        let v = broken.validate();
        let indices: Vec<usize> = v.iter().map(|x| x.section_index).collect();
        assert!(indices.contains(&0)); // not an exposition
        assert!(indices.contains(&1)); // zero length and phase regression
        assert!(indices.contains(&2)); // gap and not a coda
        let err = broken.ensure_valid().unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Structural {
                section_index: 0,
                ..
            }
        ));
        assert_eq!(FugueStructure::default().validate().len(), 1);
    }
}
