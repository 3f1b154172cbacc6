// Generator façade: the single public entry point.
//
// `generate` never returns an error. It resolves the seed, normalizes the
// configuration, dispatches on the form, renders tracks (instrument mapping,
// articulation, quality gate) and retries with the next seed while the gate
// rejects an attempt and strict mode is off. Any error that escapes becomes
// a failed `GeneratorResult` with an empty score and a one-line message.
//
// `seed_used` is always the resolved job seed, not the seed of the attempt
// that won: feeding it back in replays the same retry sequence and so
// reproduces the same result.

use kontrapunkt_prng::ScoreRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::AnalysisReport;
use crate::articulation;
use crate::config::{FormType, GeneratorConfig};
use crate::error::GenerationError;
use crate::fugue::{self, ComposedFugue};
use crate::harmony::HarmonicTimeline;
use crate::instrument;
use crate::note::{self, NoteEvent, TempoEvent, Track, VoiceId};
use crate::prelude;
use crate::quality::{self, QualityMetrics};
use crate::structure::FugueStructure;
use crate::timing::Tick;

const PRELUDE_STREAM: u64 = 0x9e1d;

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorResult {
    pub tracks: Vec<Track>,
    pub tempo_events: Vec<TempoEvent>,
    pub total_duration_ticks: Tick,
    pub success: bool,
    pub seed_used: u64,
    pub form_description: String,
    /// Empty on success.
    pub error_message: String,
    pub timeline: Option<HarmonicTimeline>,
    pub quality: QualityMetrics,
    pub structure: Option<FugueStructure>,
    /// Present when analysis was requested.
    pub analysis: Option<AnalysisReport>,
    /// Attempts made, including the one returned.
    pub attempts: u32,
}

impl GeneratorResult {
    fn failure(
        config: &GeneratorConfig,
        seed: u64,
        error: &GenerationError,
        attempts: u32,
    ) -> GeneratorResult {
        GeneratorResult {
            tracks: Vec::new(),
            tempo_events: Vec::new(),
            total_duration_ticks: 0,
            success: false,
            seed_used: seed,
            form_description: config.form.description().to_string(),
            error_message: error.to_string(),
            timeline: None,
            quality: QualityMetrics::default(),
            structure: None,
            analysis: None,
            attempts,
        }
    }

    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|t| t.notes.len()).sum()
    }
}

/// A rendered attempt, before it becomes a result.
struct Rendered {
    tracks: Vec<Track>,
    tempo_events: Vec<TempoEvent>,
    timeline: HarmonicTimeline,
    structure: FugueStructure,
    quality: QualityMetrics,
    analysis: Option<AnalysisReport>,
}

/// 0 draws a non-zero seed from system entropy.
pub fn resolve_seed(seed: u64) -> u64 {
    let mut seed = seed;
    while seed == 0 {
        seed = rand::random::<u64>();
    }
    seed
}

pub fn describe(config: &GeneratorConfig) -> String {
    format!(
        "{} in {} for {} voices ({}, {})",
        config.form.description(),
        config.key,
        config.num_voices,
        config.character,
        config.instrument
    )
}

/// Generate a piece. Failures are reported in the result.
pub fn generate(config: &GeneratorConfig) -> GeneratorResult {
    let seed = resolve_seed(config.seed);
    let mut attempts = 0;
    match run(config, seed, &mut attempts) {
        Ok(result) => result,
        Err(e) => {
            warn!(seed, error = %e, "generation failed");
            GeneratorResult::failure(config, seed, &e, attempts)
        }
    }
}

fn run(
    config: &GeneratorConfig,
    seed: u64,
    attempts: &mut u32,
) -> Result<GeneratorResult, GenerationError> {
    let cfg = config.normalized()?;
    if !cfg.form.uses_fugue_pipeline() {
        return Err(GenerationError::Config(format!(
            "form '{}' is not produced by the fugue generator",
            cfg.form
        )));
    }
    let retries = if cfg.strict { 0 } else { cfg.max_retry };
    info!(seed, form = %cfg.form, key = %cfg.key, voices = cfg.num_voices, "generating");

    let mut best: Option<Rendered> = None;
    let mut last_error = None;
    for attempt in 0..=retries {
        *attempts = attempt + 1;
        let attempt_seed = seed.wrapping_add(attempt as u64);
        let rendered = match render(&cfg, attempt_seed) {
            Ok(r) => r,
            Err(e) if e.is_retryable() && !cfg.strict => {
                debug!(attempt, attempt_seed, error = %e, "attempt failed, retrying");
                last_error = Some(e);
                continue;
            }
            Err(e) => return Err(e),
        };
        if rendered.quality.passed {
            info!(
                attempt,
                compliance = rendered.quality.counterpoint_compliance,
                "quality gate passed"
            );
            return Ok(finish(&cfg, seed, rendered, *attempts));
        }
        let reason = rendered.quality.failure_reason().unwrap_or_default();
        warn!(attempt, attempt_seed, %reason, "quality gate rejected attempt");
        if cfg.strict {
            return Err(GenerationError::QualityGateFailure {
                attempts: *attempts as usize,
                reason,
            });
        }
        let better = best
            .as_ref()
            .is_none_or(|b| ranks_above(&rendered.quality, &b.quality));
        if better {
            best = Some(rendered);
        }
    }

    match best {
        Some(rendered) => {
            info!(
                compliance = rendered.quality.counterpoint_compliance,
                "returning best attempt after retries"
            );
            Ok(finish(&cfg, seed, rendered, *attempts))
        }
        None => Err(last_error
            .unwrap_or_else(|| GenerationError::Internal("no attempt was made".to_string()))),
    }
}

/// Ordering of gate-rejected attempts: fewer integrity defects, then fewer
/// critical violations, then higher compliance.
fn ranks_above(a: &QualityMetrics, b: &QualityMetrics) -> bool {
    let key = |q: &QualityMetrics| (q.integrity_issues, q.critical_issues);
    match key(a).cmp(&key(b)) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => a.counterpoint_compliance > b.counterpoint_compliance,
    }
}

fn finish(cfg: &GeneratorConfig, seed: u64, rendered: Rendered, attempts: u32) -> GeneratorResult {
    GeneratorResult {
        total_duration_ticks: note::total_duration(&rendered.tracks),
        tracks: rendered.tracks,
        tempo_events: rendered.tempo_events,
        success: true,
        seed_used: seed,
        form_description: describe(cfg),
        error_message: String::new(),
        timeline: Some(rendered.timeline),
        quality: rendered.quality,
        structure: Some(rendered.structure),
        analysis: rendered.analysis,
        attempts,
    }
}

/// One full attempt: compose, map to tracks, articulate, gate.
fn render(cfg: &GeneratorConfig, seed: u64) -> Result<Rendered, GenerationError> {
    let fugue = fugue::compose_fugue(cfg, seed)?;
    let num_voices = cfg.num_voices as usize;
    let ComposedFugue {
        voices,
        plan,
        timeline,
        subject,
        report,
    } = fugue;

    let (voices, timeline, tempo_events) = if cfg.form == FormType::PreludeAndFugue {
        let mut rng = ScoreRng::for_stream(seed, PRELUDE_STREAM);
        let pre = prelude::generate_prelude(
            cfg.key,
            num_voices,
            plan.total_bars(),
            cfg.bpm,
            &mut rng,
        )?;
        let tempo = vec![
            TempoEvent {
                tick: 0,
                bpm: pre.bpm,
            },
            TempoEvent {
                tick: pre.length_ticks,
                bpm: cfg.bpm,
            },
        ];
        let merged = merge_voices(pre.voices, voices, pre.length_ticks);
        (merged, pre.timeline.concat(&timeline), tempo)
    } else {
        let tempo = vec![TempoEvent {
            tick: 0,
            bpm: cfg.bpm,
        }];
        (voices, timeline, tempo)
    };

    let profile = instrument::profile(cfg.instrument);
    let mut tracks = instrument::build_tracks(cfg.instrument, voices);
    articulation::articulate(&mut tracks, &timeline, cfg.instrument, num_voices);
    // The gate and the report see exactly the notes that are returned.
    let normalized = quality::normalize_tracks(&mut tracks, profile.low, profile.high);
    let metrics = quality::evaluate(&tracks, &timeline, profile.low, profile.high, normalized);

    let analysis = cfg.analyze.then(|| {
        let notes: Vec<NoteEvent> = tracks
            .iter()
            .flat_map(|t| t.notes.iter().copied())
            .collect();
        AnalysisReport::build(
            &notes,
            &subject.subject,
            subject.score,
            report.exposition.entries,
            num_voices,
        )
    });

    Ok(Rendered {
        tracks,
        tempo_events,
        timeline,
        structure: plan.structure,
        quality: metrics,
        analysis,
    })
}

/// Concatenate per-voice note lists, `later` shifted by `offset`.
pub fn merge_voices(
    earlier: Vec<(VoiceId, Vec<NoteEvent>)>,
    later: Vec<(VoiceId, Vec<NoteEvent>)>,
    offset: Tick,
) -> Vec<(VoiceId, Vec<NoteEvent>)> {
    let mut merged = earlier;
    for (id, notes) in later {
        let shifted = notes.into_iter().map(|n| n.shifted(offset));
        match merged.iter_mut().find(|(v, _)| *v == id) {
            Some((_, existing)) => existing.extend(shifted),
            None => merged.push((id, shifted.collect())),
        }
    }
    merged.sort_by_key(|(id, _)| *id);
    merged
}
