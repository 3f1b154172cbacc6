// Diatonic triads.
//
// A `Chord` is derived from a key and a scale degree by a fixed table: the
// triad is stacked in thirds on the natural scale, except that in minor keys
// the dominant (V) and leading-tone (vii°) chords use the raised seventh from
// harmonic minor. Everything downstream (harmonic timeline, candidate scoring,
// the chord-tone metric of the quality gate) asks this module "is this pitch a
// chord tone?" rather than doing its own spelling.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::pitch::{KeySignature, ScaleType};

/// Roman-numeral scale degree of a chord root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChordDegree {
    I,
    II,
    III,
    IV,
    V,
    VI,
    VII,
}

impl ChordDegree {
    pub const ALL: [ChordDegree; 7] = [
        ChordDegree::I,
        ChordDegree::II,
        ChordDegree::III,
        ChordDegree::IV,
        ChordDegree::V,
        ChordDegree::VI,
        ChordDegree::VII,
    ];

    /// Zero-based scale index (I = 0).
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> ChordDegree {
        Self::ALL[i % 7]
    }

    /// Dominant-function chords.
    pub fn is_dominant(self) -> bool {
        matches!(self, ChordDegree::V | ChordDegree::VII)
    }
}

impl fmt::Display for ChordDegree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChordDegree::I => "I",
            ChordDegree::II => "ii",
            ChordDegree::III => "iii",
            ChordDegree::IV => "IV",
            ChordDegree::V => "V",
            ChordDegree::VI => "vi",
            ChordDegree::VII => "vii",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
}

impl ChordQuality {
    /// Semitones from the root to the third and to the fifth.
    pub fn intervals(self) -> (u8, u8) {
        match self {
            ChordQuality::Major => (4, 7),
            ChordQuality::Minor => (3, 7),
            ChordQuality::Diminished => (3, 6),
            ChordQuality::Augmented => (4, 8),
        }
    }

    fn from_intervals(third: u8, fifth: u8) -> ChordQuality {
        match (third, fifth) {
            (4, 8) => ChordQuality::Augmented,
            (4, _) => ChordQuality::Major,
            (3, 6) => ChordQuality::Diminished,
            _ => ChordQuality::Minor,
        }
    }
}

/// A triad in a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chord {
    pub degree: ChordDegree,
    pub quality: ChordQuality,
    /// Root as a MIDI pitch in the octave starting at C3 (48..=59).
    pub root_pitch: u8,
    /// 0 = root position, 1 = first inversion, 2 = second inversion.
    pub inversion: u8,
}

impl Chord {
    /// Root-position triad on `degree` of `key`.
    pub fn in_key(key: KeySignature, degree: ChordDegree) -> Chord {
        let scale = if key.is_minor && degree.is_dominant() {
            ScaleType::HarmonicMinor
        } else {
            key.scale()
        };
        let iv = scale.intervals();
        let d = degree.index();
        let root = iv[d];
        let third = (iv[(d + 2) % 7] + 12 - root) % 12;
        let fifth = (iv[(d + 4) % 7] + 12 - root) % 12;
        Chord {
            degree,
            quality: ChordQuality::from_intervals(third, fifth),
            root_pitch: 48 + (key.tonic.index() + root) % 12,
            inversion: 0,
        }
    }

    pub fn with_inversion(mut self, inversion: u8) -> Chord {
        self.inversion = inversion % 3;
        self
    }

    pub fn root_pc(&self) -> u8 {
        self.root_pitch % 12
    }

    /// Pitch classes as [root, third, fifth].
    pub fn pitch_classes(&self) -> [u8; 3] {
        let (third, fifth) = self.quality.intervals();
        let r = self.root_pc();
        [r, (r + third) % 12, (r + fifth) % 12]
    }

    /// Pitch class in the bass given the inversion.
    pub fn bass_pc(&self) -> u8 {
        self.pitch_classes()[self.inversion as usize % 3]
    }

    pub fn contains(&self, pitch: u8) -> bool {
        self.pitch_classes().contains(&(pitch % 12))
    }

    /// Chord tones of this triad in `[low, high]`, ascending.
    pub fn tones_in_range(&self, low: u8, high: u8) -> Vec<u8> {
        (low..=high).filter(|&p| self.contains(p)).collect()
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inversion {
            0 => write!(f, "{}", self.degree),
            1 => write!(f, "{}6", self.degree),
            _ => write!(f, "{}64", self.degree),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::PitchClass;

    #[test]
    fn major_key_qualities() {
        let c = KeySignature::major(PitchClass::C);
        let q: Vec<ChordQuality> = ChordDegree::ALL
            .iter()
            .map(|&d| Chord::in_key(c, d).quality)
            .collect();
        assert_eq!(
            q,
            vec![
                ChordQuality::Major,
                ChordQuality::Minor,
                ChordQuality::Minor,
                ChordQuality::Major,
                ChordQuality::Major,
                ChordQuality::Minor,
                ChordQuality::Diminished,
            ]
        );
    }

    #[test]
    fn minor_dominant_uses_leading_tone() {
        let a = KeySignature::minor(PitchClass::A);
        let v = Chord::in_key(a, ChordDegree::V);
        assert_eq!(v.quality, ChordQuality::Major);
        assert_eq!(v.pitch_classes(), [4, 8, 11]); // E G# B
        let vii = Chord::in_key(a, ChordDegree::VII);
        assert_eq!(vii.root_pc(), 8);
        assert_eq!(vii.quality, ChordQuality::Diminished);
        assert_eq!(
            Chord::in_key(a, ChordDegree::III).quality,
            ChordQuality::Major
        );
        assert_eq!(
            Chord::in_key(a, ChordDegree::I).quality,
            ChordQuality::Minor
        );
    }

    #[test]
    fn inversion_changes_bass() {
        let g = KeySignature::major(PitchClass::G);
        let ii = Chord::in_key(g, ChordDegree::II);
        assert_eq!(ii.bass_pc(), 9);
        assert_eq!(ii.with_inversion(1).bass_pc(), 0);
        assert_eq!(ii.with_inversion(1).to_string(), "ii6");
    }

    #[test]
    fn chord_tones_in_range() {
        let c = KeySignature::major(PitchClass::C);
        let tones = Chord::in_key(c, ChordDegree::I).tones_in_range(60, 72);
        assert_eq!(tones, vec![60, 64, 67, 72]);
    }
}
