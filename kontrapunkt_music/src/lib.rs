// Kontrapunkt: deterministic Bach-style fugue generator.
//
// Given a key, voice count, character and seed, produces a complete fugue
// (optionally preceded by a prelude) as MIDI-ready tracks, together with the
// form plan, the harmonic timeline and counterpoint quality metrics. The
// same configuration with the same seed always yields the same score.
//
// Architecture:
// - timing.rs: integer tick model (480 per beat, 4/4)
// - pitch.rs: pitch classes, keys, scale positions, interval helpers
// - note.rs: note events, provenance and modification flags, tracks
// - chord.rs / harmony.rs: diatonic chords and the frozen harmonic timeline
// - modulation.rs: development key plan per home key
// - config.rs / error.rs: input surface with stable names, error taxonomy
// - subject.rs: subject generation and seven-dimension scoring
// - motif.rs: motif pool derived from the subject
// - counterpoint.rs / rules.rs: voice state and the rule battery
// - line.rs: note-by-note voice writer with local repair
// - theme.rs: transformations of thematic material and its placement
// - structure.rs: form plan (sections, entries, harmonic spans)
// - exposition.rs, episode.rs, stretto.rs, coda.rs: section builders
// - fugue.rs: one complete composition attempt
// - instrument.rs, quality.rs, articulation.rs: tracks, gate, expression
// - prelude.rs: broken-chord prelude for prelude_and_fugue
// - analysis.rs: counterpoint report
// - generator.rs: the `generate` façade with seed resolution and retries
// - midi.rs: SMF output via midly

pub mod analysis;
pub mod articulation;
pub mod chord;
pub mod coda;
pub mod config;
pub mod counterpoint;
pub mod episode;
pub mod error;
pub mod exposition;
pub mod fugue;
pub mod generator;
pub mod harmony;
pub mod instrument;
pub mod line;
pub mod midi;
pub mod modulation;
pub mod motif;
pub mod note;
pub mod pitch;
pub mod prelude;
pub mod quality;
pub mod rules;
pub mod stretto;
pub mod structure;
pub mod subject;
pub mod theme;
pub mod timing;

pub use config::GeneratorConfig;
pub use error::GenerationError;
pub use generator::{GeneratorResult, generate};
