// Error taxonomy for the generator.
//
// `GenerationError` is the closed set every pipeline stage reports through.
// Leaf errors from the counterpoint state, the harmonic timeline and enum
// parsing convert into it with `?`. The façade (generator.rs) is the only
// place errors turn into the `success` / `error_message` pair of the result.
//
// Retry policy lives in the façade: SubjectUnacceptable and
// QualityGateFailure are retryable, Structural and Internal are not.

use thiserror::Error;

use crate::timing::Tick;

/// Errors surfaced by the generation pipeline.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Unknown enum name or a numeric field that cannot be clamped.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Every subject candidate scored below the acceptance threshold.
    #[error("no acceptable subject after {attempts} candidates (best composite {best_score:.3})")]
    SubjectUnacceptable { attempts: usize, best_score: f64 },

    /// The quality gate rejected every attempt.
    #[error("quality gate failed after {attempts} attempt(s): {reason}")]
    QualityGateFailure { attempts: usize, reason: String },

    /// Fugue structure invariants were violated during planning.
    #[error("fugue structure invalid at section {section_index}: {reason}")]
    Structural {
        section_index: usize,
        reason: String,
    },

    /// A programmer invariant was breached.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GenerationError {
    /// Whether the façade may retry with a fresh seed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::SubjectUnacceptable { .. } | GenerationError::QualityGateFailure { .. }
        )
    }
}

/// Failure to parse one of the stable enum names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        ParseError {
            kind,
            value: value.to_string(),
        }
    }
}

impl From<ParseError> for GenerationError {
    fn from(e: ParseError) -> Self {
        GenerationError::Config(e.to_string())
    }
}

/// Errors from the counterpoint state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CounterpointError {
    #[error("note at tick {tick} overlaps an existing note in voice {voice}")]
    Overlap { voice: u8, tick: Tick },
    #[error("voice {0} is not registered")]
    UnknownVoice(u8),
    #[error("voice {0} is already registered")]
    DuplicateVoice(u8),
    #[error("note at tick {tick} in voice {voice} has zero duration")]
    EmptyNote { voice: u8, tick: Tick },
}

impl From<CounterpointError> for GenerationError {
    fn from(e: CounterpointError) -> Self {
        GenerationError::Internal(e.to_string())
    }
}

/// Errors from the harmonic timeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimelineError {
    #[error("tick {tick} is outside the timeline (total {total})")]
    OutOfRange { tick: Tick, total: Tick },
    #[error("harmonic plan leaves a gap at tick {0}")]
    Gap(Tick),
    #[error("harmonic plan is empty")]
    Empty,
}

impl From<TimelineError> for GenerationError {
    fn from(e: TimelineError) -> Self {
        GenerationError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(
            GenerationError::SubjectUnacceptable {
                attempts: 10,
                best_score: 0.4
            }
            .is_retryable()
        );
        assert!(
            GenerationError::QualityGateFailure {
                attempts: 1,
                reason: "x".into()
            }
            .is_retryable()
        );
        assert!(!GenerationError::Internal("bug".into()).is_retryable());
        assert!(
            !GenerationError::Structural {
                section_index: 2,
                reason: "phase regression".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn messages_are_single_line() {
        let e: GenerationError = ParseError::new("form", "sonata").into();
        assert_eq!(
            e.to_string(),
            "invalid configuration: unknown form 'sonata'"
        );
        let e: GenerationError = CounterpointError::Overlap { voice: 1, tick: 480 }.into();
        assert!(!e.to_string().contains('\n'));
    }
}
