// The fugue pipeline: subject to coda.
//
// `compose_fugue` runs one complete attempt for one seed. It picks a
// subject (widening the search once when the first pass finds nothing and
// strict mode is off), derives the motif pool and modulation plan, lays out
// the form, builds and freezes the harmonic timeline, then threads a single
// `CounterpointState` through the section builders in form order:
// exposition, development (episodes and middle entries interleaved),
// stretto, coda.
//
// Randomness: the subject search owns its own stream (subject.rs); every
// note builder shares one pipeline stream drawn in section order, so the
// same seed always produces the same notes.

use kontrapunkt_prng::ScoreRng;
use serde::Serialize;
use tracing::{debug, info};

use crate::coda::{self, CodaSummary};
use crate::config::GeneratorConfig;
use crate::counterpoint::CounterpointState;
use crate::episode::{self, EpisodeSummary, MiddleEntrySummary};
use crate::error::GenerationError;
use crate::exposition::{self, ExpositionSummary};
use crate::harmony::HarmonicTimeline;
use crate::line::{VoiceWriter, WriterStats};
use crate::modulation::ModulationPlan;
use crate::motif::MotifPool;
use crate::note::{NoteEvent, VoiceId};
use crate::stretto::{self, StrettoSummary};
use crate::structure::{self, FuguePlan, SectionType};
use crate::subject::{self, AcceptedSubject};

const PIPELINE_STREAM: u64 = 0xf06e;

/// Offset and candidate count of the widened subject search.
pub const WIDENED_SEED_OFFSET: u64 = 10;
pub const WIDENED_CANDIDATES: usize = 20;

/// Per-section summaries of one composed fugue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositionReport {
    pub exposition: ExpositionSummary,
    pub episodes: Vec<EpisodeSummary>,
    pub middle_entries: Vec<MiddleEntrySummary>,
    pub stretto: StrettoSummary,
    pub coda: CodaSummary,
    pub writer: WriterStats,
}

#[derive(Debug, Clone)]
pub struct ComposedFugue {
    pub voices: Vec<(VoiceId, Vec<NoteEvent>)>,
    pub plan: FuguePlan,
    pub timeline: HarmonicTimeline,
    pub subject: AcceptedSubject,
    pub report: CompositionReport,
}

impl ComposedFugue {
    pub fn note_count(&self) -> usize {
        self.voices.iter().map(|(_, n)| n.len()).sum()
    }
}

/// Find an acceptable subject for `seed`, widening the search once unless
/// `strict`.
pub fn select_subject(
    cfg: &GeneratorConfig,
    seed: u64,
) -> Result<AcceptedSubject, GenerationError> {
    let first = subject::generate_acceptable(
        cfg.key,
        cfg.character,
        seed,
        subject::DEFAULT_CANDIDATES,
    );
    match first {
        Ok(found) => Ok(found),
        Err(e @ GenerationError::SubjectUnacceptable { .. }) if !cfg.strict => {
            debug!(seed, error = %e, "widening subject search");
            subject::generate_acceptable(
                cfg.key,
                cfg.character,
                seed.wrapping_add(WIDENED_SEED_OFFSET),
                WIDENED_CANDIDATES,
            )
        }
        Err(e) => Err(e),
    }
}

/// Compose a complete fugue from a normalized configuration.
pub fn compose_fugue(
    cfg: &GeneratorConfig,
    seed: u64,
) -> Result<ComposedFugue, GenerationError> {
    let accepted = select_subject(cfg, seed)?;
    info!(
        seed = accepted.seed,
        notes = accepted.subject.notes.len(),
        composite = accepted.score.composite(),
        "subject accepted"
    );
    let subject = &accepted.subject;
    let num_voices = cfg.num_voices as usize;

    let pool = MotifPool::build(subject);
    let modulation = ModulationPlan::for_key(cfg.key);
    let plan = structure::plan_fugue(
        cfg.key,
        num_voices,
        subject.length_ticks,
        cfg.character,
        &modulation,
        cfg.bar_target(),
    )?;
    plan.structure.ensure_valid()?;
    info!(
        sections = plan.structure.sections.len(),
        bars = plan.total_bars(),
        episodes = plan.structure.count(SectionType::Episode),
        middle_entries = plan.middle_entries.len(),
        "structure planned"
    );

    let total = plan.total_ticks();
    let mut timeline = HarmonicTimeline::build(&plan.spans, total)?;
    let cadences = timeline.cadence_points();
    timeline.apply_rhythm_factors(total, &cadences);

    let mut state = CounterpointState::with_voices(num_voices)?;
    let mut rng = ScoreRng::for_stream(seed, PIPELINE_STREAM);
    let mut writer = VoiceWriter::new(&timeline, cfg.character, num_voices);

    let exposition = exposition::build_exposition(
        &mut state,
        &mut writer,
        &mut rng,
        &plan,
        subject,
        &pool,
    )?;

    let mut episodes = Vec::new();
    let mut middle_entries = Vec::new();
    let mut stretto_summary = StrettoSummary::default();
    let mut coda_summary = None;
    for (index, section) in plan.structure.sections.iter().enumerate() {
        match section.section_type {
            SectionType::Exposition => {}
            SectionType::Episode => {
                let summary = episode::write_episode(
                    &mut state,
                    &mut writer,
                    &mut rng,
                    section,
                    episodes.len(),
                    &pool,
                    cfg.character,
                )?;
                episodes.push(summary);
            }
            SectionType::MiddleEntry => {
                let Some(entry) = plan.middle_entries.get(middle_entries.len()) else {
                    return Err(GenerationError::Structural {
                        section_index: index,
                        reason: "middle entry section without a planned entry".to_string(),
                    });
                };
                let summary = episode::write_middle_entry(
                    &mut state,
                    &mut writer,
                    &mut rng,
                    entry,
                    section,
                    subject,
                )?;
                middle_entries.push(summary);
            }
            SectionType::Stretto => {
                stretto_summary = stretto::realize_stretto(
                    &mut state,
                    &mut writer,
                    &mut rng,
                    &plan.stretto,
                    subject,
                    cfg.key,
                )?;
            }
            SectionType::Coda => {
                coda_summary = Some(coda::write_coda(&mut state, &mut writer, &mut rng, section)?);
            }
        }
    }
    let Some(coda) = coda_summary else {
        return Err(GenerationError::Structural {
            section_index: plan.structure.sections.len(),
            reason: "fugue has no coda".to_string(),
        });
    };

    let writer_stats = writer.stats();
    debug!(
        notes = state.note_count(),
        repaired = writer_stats.repaired,
        forced = writer_stats.forced,
        chord_tone_ratio = writer_stats.chord_tone_ratio(),
        "fugue composed"
    );

    Ok(ComposedFugue {
        voices: state.into_voice_notes(),
        plan,
        timeline,
        subject: accepted,
        report: CompositionReport {
            exposition,
            episodes,
            middle_entries,
            stretto: stretto_summary,
            coda,
            writer: writer_stats,
        },
    })
}
