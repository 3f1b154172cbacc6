// Kontrapunkt command-line generator.
//
// Thin shell over `generate`: every configuration field is a flag, the
// result goes to a MIDI file, and `--json` prints the result summary on
// stdout. Logs go to stderr (RUST_LOG, default info) so stdout stays clean.
//
// Usage:
//   generate [output.mid] [--form fugue] [--key C_major] [--voices 3]
//     [--bpm 72] [--seed N] [--character severe] [--instrument organ]
//     [--duration short] [--bars N] [--max-retry 3] [--strict] [--analyze]
//     [--json]
//
// Exit status is 0 on success and 1 on any generation or output error.

use clap::Parser;
use kontrapunkt_music::config::{Character, DurationScale, FormType, GeneratorConfig, Instrument};
use kontrapunkt_music::generator::generate;
use kontrapunkt_music::midi::write_midi;
use kontrapunkt_music::pitch::KeySignature;
use std::path::PathBuf;
use std::process::ExitCode;

/// Generates Bach-style fugues as MIDI files.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path of the MIDI output.
    #[arg(default_value = "output.mid")]
    output: PathBuf,
    /// Musical form, e.g. "fugue" or "prelude_and_fugue".
    #[arg(long, default_value = "fugue")]
    form: FormType,
    /// Home key, e.g. "C_major", "g_minor", "F#_major".
    #[arg(long, default_value = "C_major")]
    key: KeySignature,
    /// Number of voices (clamped to 2..=5).
    #[arg(long, default_value_t = 3)]
    voices: u8,
    #[arg(long, default_value_t = 72)]
    bpm: u16,
    /// 0 draws a seed from system entropy.
    #[arg(long, default_value_t = 0)]
    seed: u64,
    #[arg(long, default_value = "severe")]
    character: Character,
    #[arg(long, default_value = "organ")]
    instrument: Instrument,
    /// Length class: short, medium, long or full.
    #[arg(long, default_value = "short")]
    duration: DurationScale,
    /// Target length in bars; overrides --duration.
    #[arg(long, default_value_t = 0)]
    bars: u32,
    #[arg(long, default_value_t = 3)]
    max_retry: u32,
    /// Fail instead of retrying.
    #[arg(long)]
    strict: bool,
    /// Attach the counterpoint analysis report.
    #[arg(long)]
    analyze: bool,
    /// Print the result as JSON on stdout.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn config(&self) -> GeneratorConfig {
        GeneratorConfig {
            form: self.form,
            key: self.key,
            num_voices: self.voices,
            bpm: self.bpm,
            seed: self.seed,
            character: self.character,
            instrument: self.instrument,
            json_output: self.json,
            analyze: self.analyze,
            strict: self.strict,
            max_retry: self.max_retry,
            duration_scale: self.duration,
            target_bars: self.bars,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.config();
    let result = generate(&config);

    if config.json_output {
        match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("error: cannot serialize result: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if !result.success {
        eprintln!("error: {}", result.error_message);
        return ExitCode::FAILURE;
    }

    if let Err(e) = write_midi(&result, &args.output) {
        eprintln!("error: cannot write {}: {e}", args.output.display());
        return ExitCode::FAILURE;
    }

    tracing::info!(
        path = %args.output.display(),
        seed = result.seed_used,
        tracks = result.tracks.len(),
        notes = result.note_count(),
        ticks = result.total_duration_ticks,
        compliance = result.quality.counterpoint_compliance,
        "wrote {}",
        result.form_description
    );
    ExitCode::SUCCESS
}
