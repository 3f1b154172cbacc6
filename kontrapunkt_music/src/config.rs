// Generator configuration.
//
// `GeneratorConfig` is the whole input surface of the generator: form, key,
// voice count, tempo, seed, subject character, instrument and the output /
// retry switches. Every enumerated field has a stable lowercase string name
// shared by the CLI (main.rs) and the JSON output; those names must not
// change between releases.
//
// `normalized()` is applied once by the façade before anything else runs. It
// clamps the numeric fields into their supported ranges and rejects the
// values that cannot be clamped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{GenerationError, ParseError};
use crate::pitch::{KeySignature, PitchClass};

/// Implements `FromStr`, `Display` and string-based serde for a fieldless
/// enum from a table of (variant, name) pairs.
macro_rules! named_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn name(self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $ty {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    _ => Err(ParseError::new($kind, s)),
                }
            }
        }

        impl Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.name())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormType {
    Fugue,
    PreludeAndFugue,
    TrioSonata,
    ChoralePrelude,
    ToccataAndFugue,
    Passacaglia,
    FantasiaAndFugue,
    CelloPrelude,
    Chaconne,
}

named_enum!(FormType, "form", {
    Fugue => "fugue",
    PreludeAndFugue => "prelude_and_fugue",
    TrioSonata => "trio_sonata",
    ChoralePrelude => "chorale_prelude",
    ToccataAndFugue => "toccata_and_fugue",
    Passacaglia => "passacaglia",
    FantasiaAndFugue => "fantasia_and_fugue",
    CelloPrelude => "cello_prelude",
    Chaconne => "chaconne",
});

impl FormType {
    /// Forms realised by the fugue pipeline in this crate.
    pub fn uses_fugue_pipeline(self) -> bool {
        matches!(
            self,
            FormType::Fugue
                | FormType::PreludeAndFugue
                | FormType::ToccataAndFugue
                | FormType::Passacaglia
                | FormType::FantasiaAndFugue
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            FormType::Fugue => "Fugue",
            FormType::PreludeAndFugue => "Prelude and Fugue",
            FormType::TrioSonata => "Trio Sonata",
            FormType::ChoralePrelude => "Chorale Prelude",
            FormType::ToccataAndFugue => "Toccata and Fugue",
            FormType::Passacaglia => "Passacaglia",
            FormType::FantasiaAndFugue => "Fantasia and Fugue",
            FormType::CelloPrelude => "Cello Prelude",
            FormType::Chaconne => "Chaconne",
        }
    }
}

/// Subject character: drives rhythm vocabulary, contrary-motion target,
/// stretto transform and suspension density.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Character {
    Severe,
    Playful,
    Noble,
    Restless,
}

named_enum!(Character, "character", {
    Severe => "severe",
    Playful => "playful",
    Noble => "noble",
    Restless => "restless",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instrument {
    Organ,
    Harpsichord,
    Piano,
    Violin,
    Cello,
    Guitar,
}

named_enum!(Instrument, "instrument", {
    Organ => "organ",
    Harpsichord => "harpsichord",
    Piano => "piano",
    Violin => "violin",
    Cello => "cello",
    Guitar => "guitar",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurationScale {
    Short,
    Medium,
    Long,
    Full,
}

named_enum!(DurationScale, "duration scale", {
    Short => "short",
    Medium => "medium",
    Long => "long",
    Full => "full",
});

impl DurationScale {
    /// Default length of the fugue in bars.
    pub fn default_bars(self) -> u32 {
        match self {
            DurationScale::Short => 24,
            DurationScale::Medium => 40,
            DurationScale::Long => 64,
            DurationScale::Full => 96,
        }
    }
}

pub const MIN_VOICES: u8 = 2;
pub const MAX_VOICES: u8 = 5;
pub const MIN_BPM: u16 = 40;
pub const MAX_BPM: u16 = 200;

/// Full input to `generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub form: FormType,
    pub key: KeySignature,
    pub num_voices: u8,
    pub bpm: u16,
    /// 0 draws a seed from system entropy.
    pub seed: u64,
    pub character: Character,
    pub instrument: Instrument,
    pub json_output: bool,
    pub analyze: bool,
    /// Fail instead of widening the subject search or retrying the gate.
    pub strict: bool,
    pub max_retry: u32,
    pub duration_scale: DurationScale,
    /// 0 derives the length from `duration_scale`.
    pub target_bars: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            form: FormType::Fugue,
            key: KeySignature::major(PitchClass::C),
            num_voices: 3,
            bpm: 72,
            seed: 0,
            character: Character::Severe,
            instrument: Instrument::Organ,
            json_output: false,
            analyze: false,
            strict: false,
            max_retry: 3,
            duration_scale: DurationScale::Short,
            target_bars: 0,
        }
    }
}

impl GeneratorConfig {
    /// Clamp numeric fields into range. `bpm == 0` cannot be clamped and is
    /// rejected.
    pub fn normalized(&self) -> Result<GeneratorConfig, GenerationError> {
        if self.bpm == 0 {
            return Err(GenerationError::Config("bpm must be positive".to_string()));
        }
        let mut cfg = self.clone();
        cfg.num_voices = cfg.num_voices.clamp(MIN_VOICES, MAX_VOICES);
        cfg.bpm = cfg.bpm.clamp(MIN_BPM, MAX_BPM);
        Ok(cfg)
    }

    /// Requested fugue length in bars.
    pub fn bar_target(&self) -> u32 {
        if self.target_bars > 0 {
            self.target_bars
        } else {
            self.duration_scale.default_bars()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for f in FormType::ALL {
            assert_eq!(f.to_string().parse::<FormType>().unwrap(), *f);
        }
        for c in Character::ALL {
            assert_eq!(c.to_string().parse::<Character>().unwrap(), *c);
        }
        for i in Instrument::ALL {
            assert_eq!(i.to_string().parse::<Instrument>().unwrap(), *i);
        }
        for d in DurationScale::ALL {
            assert_eq!(d.to_string().parse::<DurationScale>().unwrap(), *d);
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = "sonata".parse::<FormType>().unwrap_err();
        assert_eq!(err, ParseError::new("form", "sonata"));
        assert!("Organ".parse::<Instrument>().is_err());
    }

    #[test]
    fn voice_count_clamps() {
        let cfg = GeneratorConfig {
            num_voices: 1,
            ..Default::default()
        };
        assert_eq!(cfg.normalized().unwrap().num_voices, 2);
        let cfg = GeneratorConfig {
            num_voices: 10,
            bpm: 500,
            ..Default::default()
        };
        let n = cfg.normalized().unwrap();
        assert_eq!(n.num_voices, 5);
        assert_eq!(n.bpm, 200);
    }

    #[test]
    fn zero_bpm_is_config_error() {
        let cfg = GeneratorConfig {
            bpm: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.normalized(), Err(GenerationError::Config(_))));
    }

    #[test]
    fn bar_target_prefers_explicit_value() {
        let mut cfg = GeneratorConfig::default();
        assert_eq!(cfg.bar_target(), 24);
        cfg.duration_scale = DurationScale::Full;
        assert_eq!(cfg.bar_target(), 96);
        cfg.target_bars = 30;
        assert_eq!(cfg.bar_target(), 30);
    }

    #[test]
    fn config_json_uses_stable_names() {
        let cfg = GeneratorConfig {
            form: FormType::PreludeAndFugue,
            key: "g_minor".parse().unwrap(),
            ..Default::default()
        };
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["form"], "prelude_and_fugue");
        assert_eq!(json["key"], "G_minor");
        assert_eq!(json["instrument"], "organ");
        let back: GeneratorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, cfg);
    }
}
