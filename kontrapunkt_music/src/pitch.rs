// Pitch, key and scale support.
//
// Pitches are MIDI numbers (0-127). Keys are a tonic pitch class plus a
// major/minor flag. Scales are table-driven: major, the three minor forms,
// and the Dorian and Mixolydian modes used for colour in episodes.
//
// This module provides:
// - `PitchClass` / `KeySignature` with the stable string names used by the
//   CLI and JSON output ("C_major", "g_minor", "F#_major", "Eb_minor")
// - Diatonic position arithmetic: a pitch maps to an absolute scale position
//   (octave * 7 + degree), which lets melodies be transposed by degree into
//   another key instead of by semitone
// - The `interval` helpers used by every counterpoint rule
//
// Minor keys treat the raised seventh (leading tone) as part of the diatonic
// collection, because both subject generation and cadences depend on it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// The twelve pitch classes, C = 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    Cs,
    D,
    Eb,
    E,
    F,
    Fs,
    G,
    Ab,
    A,
    Bb,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::Cs,
        PitchClass::D,
        PitchClass::Eb,
        PitchClass::E,
        PitchClass::F,
        PitchClass::Fs,
        PitchClass::G,
        PitchClass::Ab,
        PitchClass::A,
        PitchClass::Bb,
        PitchClass::B,
    ];

    pub fn from_index(pc: u8) -> PitchClass {
        Self::ALL[(pc % 12) as usize]
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::Cs => "C#",
            PitchClass::D => "D",
            PitchClass::Eb => "Eb",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::Fs => "F#",
            PitchClass::G => "G",
            PitchClass::Ab => "Ab",
            PitchClass::A => "A",
            PitchClass::Bb => "Bb",
            PitchClass::B => "B",
        }
    }

    /// Transpose by a signed number of semitones.
    pub fn transpose(self, semitones: i32) -> PitchClass {
        PitchClass::from_index((self.index() as i32 + semitones).rem_euclid(12) as u8)
    }
}

impl FromStr for PitchClass {
    type Err = ParseError;

    /// Accepts a letter (either case) followed by an optional `#`/`s` or `b`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let letter = chars
            .next()
            .ok_or_else(|| ParseError::new("pitch class", s))?
            .to_ascii_uppercase();
        let natural: i32 = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(ParseError::new("pitch class", s)),
        };
        let accidental: i32 = match chars.as_str() {
            "" => 0,
            "#" | "s" => 1,
            "b" => -1,
            _ => return Err(ParseError::new("pitch class", s)),
        };
        Ok(PitchClass::from_index((natural + accidental).rem_euclid(12) as u8))
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Table-driven scale types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleType {
    Major,
    NaturalMinor,
    HarmonicMinor,
    MelodicMinor,
    Dorian,
    Mixolydian,
}

impl ScaleType {
    /// Semitone offsets from the tonic for degrees 1-7.
    pub fn intervals(self) -> [u8; 7] {
        match self {
            ScaleType::Major => [0, 2, 4, 5, 7, 9, 11],
            ScaleType::NaturalMinor => [0, 2, 3, 5, 7, 8, 10],
            ScaleType::HarmonicMinor => [0, 2, 3, 5, 7, 8, 11],
            ScaleType::MelodicMinor => [0, 2, 3, 5, 7, 9, 11],
            ScaleType::Dorian => [0, 2, 3, 5, 7, 9, 10],
            ScaleType::Mixolydian => [0, 2, 4, 5, 7, 9, 10],
        }
    }

    /// Membership table indexed by pitch class relative to the tonic.
    pub fn pitch_classes(self) -> [bool; 12] {
        let mut pcs = [false; 12];
        for &interval in &self.intervals() {
            pcs[interval as usize] = true;
        }
        pcs
    }
}

/// A key: tonic pitch class plus mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeySignature {
    pub tonic: PitchClass,
    pub is_minor: bool,
}

impl KeySignature {
    pub fn new(tonic: PitchClass, is_minor: bool) -> Self {
        KeySignature { tonic, is_minor }
    }

    pub fn major(tonic: PitchClass) -> Self {
        Self::new(tonic, false)
    }

    pub fn minor(tonic: PitchClass) -> Self {
        Self::new(tonic, true)
    }

    /// The scale that defines degree spelling for this key.
    pub fn scale(&self) -> ScaleType {
        if self.is_minor {
            ScaleType::NaturalMinor
        } else {
            ScaleType::Major
        }
    }

    fn relative_pc(&self, pitch: u8) -> u8 {
        (pitch % 12 + 12 - self.tonic.index()) % 12
    }

    /// Diatonic membership. In minor the raised seventh also counts.
    pub fn is_diatonic(&self, pitch: u8) -> bool {
        let rel = self.relative_pc(pitch);
        self.scale().pitch_classes()[rel as usize] || (self.is_minor && rel == 11)
    }

    /// True when `pitch` is the raised seventh of a minor key.
    pub fn is_leading_tone(&self, pitch: u8) -> bool {
        self.relative_pc(pitch) == 11
    }

    /// Scale degree 0-6 of a pitch, or None if not diatonic.
    pub fn degree_of(&self, pitch: u8) -> Option<u8> {
        let rel = self.relative_pc(pitch);
        if self.is_minor && rel == 11 {
            return Some(6);
        }
        self.scale()
            .intervals()
            .iter()
            .position(|&iv| iv == rel)
            .map(|d| d as u8)
    }

    /// Absolute diatonic position (octave * 7 + degree) of a diatonic pitch.
    ///
    /// The octave is counted from the tonic at or below `pitch`, so positions
    /// increase monotonically with pitch.
    pub fn position_of(&self, pitch: u8) -> Option<i32> {
        let degree = self.degree_of(pitch)? as i32;
        let tonic_below = pitch as i32 - self.relative_pc(pitch) as i32;
        Some((tonic_below / 12) * 7 + degree)
    }

    /// MIDI pitch at an absolute diatonic position (natural form of the scale).
    pub fn pitch_at(&self, position: i32) -> i32 {
        let octave = position.div_euclid(7);
        let degree = position.rem_euclid(7) as usize;
        octave * 12 + self.tonic.index() as i32 + self.scale().intervals()[degree] as i32
    }

    /// Snap an arbitrary pitch to the nearest diatonic pitch (downward first).
    pub fn snap(&self, pitch: u8) -> u8 {
        if self.is_diatonic(pitch) {
            return pitch;
        }
        for offset in 1u8..=6 {
            if pitch >= offset && self.is_diatonic(pitch - offset) {
                return pitch - offset;
            }
            if pitch as u16 + offset as u16 <= 127 && self.is_diatonic(pitch + offset) {
                return pitch + offset;
            }
        }
        pitch
    }

    /// All diatonic pitches in `[low, high]`, ascending.
    pub fn pitches_in_range(&self, low: u8, high: u8) -> Vec<u8> {
        (low..=high).filter(|&p| self.is_diatonic(p)).collect()
    }

    /// Pitch classes of the tonic triad (0 = root).
    pub fn tonic_triad(&self) -> [u8; 3] {
        let root = self.tonic.index();
        let third = if self.is_minor { 3 } else { 4 };
        [root, (root + third) % 12, (root + 7) % 12]
    }

    pub fn is_in_tonic_triad(&self, pitch: u8) -> bool {
        self.tonic_triad().contains(&(pitch % 12))
    }

    /// Dominant key: V in major, v (minor) in minor.
    pub fn dominant(&self) -> KeySignature {
        KeySignature::new(self.tonic.transpose(7), self.is_minor)
    }

    pub fn subdominant(&self) -> KeySignature {
        KeySignature::new(self.tonic.transpose(5), self.is_minor)
    }

    /// Relative minor of a major key, relative major of a minor key.
    pub fn relative(&self) -> KeySignature {
        if self.is_minor {
            KeySignature::major(self.tonic.transpose(3))
        } else {
            KeySignature::minor(self.tonic.transpose(-3))
        }
    }

    /// Tonic pitch in the octave nearest middle C (54..=65).
    pub fn tonic_near_middle_c(&self) -> u8 {
        let pc = self.tonic.index();
        if pc <= 5 { 60 + pc } else { 48 + pc }
    }
}

impl fmt::Display for KeySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.tonic, if self.is_minor { "minor" } else { "major" })
    }
}

impl FromStr for KeySignature {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tonic, mode) = s
            .split_once('_')
            .ok_or_else(|| ParseError::new("key", s))?;
        let tonic: PitchClass = tonic.parse().map_err(|_| ParseError::new("key", s))?;
        let is_minor = match mode.to_ascii_lowercase().as_str() {
            "major" => false,
            "minor" => true,
            _ => return Err(ParseError::new("key", s)),
        };
        Ok(KeySignature::new(tonic, is_minor))
    }
}

impl TryFrom<String> for KeySignature {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeySignature> for String {
    fn from(key: KeySignature) -> String {
        key.to_string()
    }
}

/// Convert a MIDI pitch to a compact note name (e.g., "C4", "F#3").
pub fn pitch_name(pitch: u8) -> String {
    let octave = pitch as i32 / 12 - 1;
    format!("{}{}", PitchClass::from_index(pitch % 12), octave)
}

/// Clamp a signed pitch computation into MIDI range.
pub fn clamp_midi(pitch: i32) -> u8 {
    pitch.clamp(0, 127) as u8
}

/// Musical interval helpers.
pub mod interval {
    /// Signed interval in semitones; positive means `b` is higher.
    pub fn semitones(a: u8, b: u8) -> i16 {
        b as i16 - a as i16
    }

    /// Simple interval class 0-11: absolute distance modulo the octave.
    pub fn simple(semitones: i16) -> u8 {
        (semitones.unsigned_abs() % 12) as u8
    }

    /// Perfect consonance: unison, fifth or octave (and compounds).
    pub fn is_perfect(semitones: i16) -> bool {
        matches!(simple(semitones), 0 | 7)
    }

    /// Dissonant simple classes: seconds, fourth, tritone, sevenths.
    ///
    /// The fourth counts as dissonant because every rule here measures
    /// two-voice intervals in isolation.
    pub fn is_dissonant(semitones: i16) -> bool {
        matches!(simple(semitones), 1 | 2 | 5 | 6 | 10 | 11)
    }

    pub fn is_consonant(semitones: i16) -> bool {
        !is_dissonant(semitones)
    }

    /// Melodic step: one or two semitones.
    pub fn is_step(semitones: i16) -> bool {
        matches!(semitones.unsigned_abs(), 1 | 2)
    }

    /// Tritone leap (augmented fourth / diminished fifth, or compounds).
    pub fn is_tritone(semitones: i16) -> bool {
        semitones != 0 && simple(semitones) == 6
    }

    /// Direction of motion: -1, 0 or 1.
    pub fn direction(semitones: i16) -> i8 {
        semitones.signum() as i8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_keys() {
        let k: KeySignature = "C_major".parse().unwrap();
        assert_eq!(k, KeySignature::major(PitchClass::C));
        let k: KeySignature = "g_minor".parse().unwrap();
        assert_eq!(k, KeySignature::minor(PitchClass::G));
        let k: KeySignature = "F#_major".parse().unwrap();
        assert_eq!(k.tonic, PitchClass::Fs);
        let k: KeySignature = "Eb_minor".parse().unwrap();
        assert_eq!(k.to_string(), "Eb_minor");
        let k: KeySignature = "Db_major".parse().unwrap();
        assert_eq!(k.tonic, PitchClass::Cs);
        assert!("H_major".parse::<KeySignature>().is_err());
        assert!("C-major".parse::<KeySignature>().is_err());
        assert!("C_lydian".parse::<KeySignature>().is_err());
    }

    #[test]
    fn key_round_trips_through_display() {
        for pc in PitchClass::ALL {
            for minor in [false, true] {
                let key = KeySignature::new(pc, minor);
                assert_eq!(key.to_string().parse::<KeySignature>().unwrap(), key);
            }
        }
    }

    #[test]
    fn diatonic_membership_includes_leading_tone_in_minor() {
        let a_minor = KeySignature::minor(PitchClass::A);
        assert!(a_minor.is_diatonic(67)); // G natural
        assert!(a_minor.is_diatonic(68)); // G# leading tone
        assert!(!a_minor.is_diatonic(66)); // F#
        assert_eq!(a_minor.degree_of(68), Some(6));

        let c_major = KeySignature::major(PitchClass::C);
        assert!(!c_major.is_diatonic(61));
        assert_eq!(c_major.degree_of(67), Some(4));
    }

    #[test]
    fn positions_round_trip_for_diatonic_pitches() {
        let key = KeySignature::major(PitchClass::D);
        for pitch in key.pitches_in_range(40, 90) {
            let pos = key.position_of(pitch).unwrap();
            assert_eq!(key.pitch_at(pos), pitch as i32);
        }
    }

    #[test]
    fn positions_are_monotonic() {
        let key = KeySignature::minor(PitchClass::E);
        let mut last = i32::MIN;
        for pitch in 40u8..90 {
            if let Some(pos) = key.position_of(pitch) {
                assert!(pos >= last, "position went backwards at {pitch}");
                last = pos;
            }
        }
    }

    #[test]
    fn snap_prefers_lower_neighbour() {
        let key = KeySignature::major(PitchClass::C);
        assert_eq!(key.snap(60), 60);
        assert_eq!(key.snap(61), 60);
        assert_eq!(key.snap(66), 65);
    }

    #[test]
    fn related_keys() {
        let c = KeySignature::major(PitchClass::C);
        assert_eq!(c.dominant(), KeySignature::major(PitchClass::G));
        assert_eq!(c.relative(), KeySignature::minor(PitchClass::A));
        assert_eq!(c.subdominant(), KeySignature::major(PitchClass::F));
        let g = KeySignature::minor(PitchClass::G);
        assert_eq!(g.relative(), KeySignature::major(PitchClass::Bb));
        assert_eq!(g.dominant(), KeySignature::minor(PitchClass::D));
    }

    #[test]
    fn interval_classification() {
        assert!(interval::is_perfect(7));
        assert!(interval::is_perfect(-12));
        assert!(interval::is_perfect(19));
        assert!(!interval::is_perfect(4));
        assert!(interval::is_dissonant(5));
        assert!(interval::is_dissonant(-6));
        assert!(interval::is_consonant(3));
        assert!(interval::is_consonant(9));
        assert!(interval::is_tritone(-6));
        assert!(interval::is_tritone(18));
        assert!(!interval::is_tritone(0));
        assert!(interval::is_step(-2));
        assert!(!interval::is_step(3));
    }

    #[test]
    fn pitch_names() {
        assert_eq!(pitch_name(60), "C4");
        assert_eq!(pitch_name(66), "F#4");
        assert_eq!(pitch_name(24), "C1");
    }
}
