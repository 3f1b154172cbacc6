// Subject generation and validation.
//
// A subject is a two-bar monophonic theme in the home key, starting at tick
// 0. Generation is two independent draws from the subject's own PRNG stream:
// a rhythm built from a character-specific cell vocabulary, then pitches from
// a weighted diatonic random walk that starts on the tonic and is forced to
// end on a tonic-triad member. Tritone leaps are never drawn.
//
// `evaluate` scores a subject on seven dimensions in [0, 1] and combines them
// with the named weights below. `generate_acceptable` walks seeds
// `seed, seed + 1, ...` until a candidate reaches `ACCEPT_THRESHOLD` or the
// candidate count runs out.

use kontrapunkt_prng::ScoreRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::config::Character;
use crate::error::GenerationError;
use crate::note::{NoteEvent, Provenance};
use crate::pitch::{KeySignature, clamp_midi, interval};
use crate::timing::{
    self, DOTTED_EIGHTH, DOTTED_QUARTER, EIGHTH, SIXTEENTH, TICKS_PER_BEAT, TRIPLET_EIGHTH, Tick,
};

pub const SUBJECT_BARS: u32 = 2;
pub const SUBJECT_TICKS: Tick = SUBJECT_BARS * timing::TICKS_PER_BAR;

/// Composite score a subject must reach.
pub const ACCEPT_THRESHOLD: f64 = 0.5;
/// Default number of candidate seeds per search.
pub const DEFAULT_CANDIDATES: usize = 10;

pub const WEIGHT_INTERVAL_VARIETY: f64 = 0.15;
pub const WEIGHT_RHYTHM_DIVERSITY: f64 = 0.10;
pub const WEIGHT_CONTOUR: f64 = 0.15;
pub const WEIGHT_RANGE: f64 = 0.15;
pub const WEIGHT_STEP_MOTION: f64 = 0.15;
pub const WEIGHT_TONAL_STABILITY: f64 = 0.15;
pub const WEIGHT_ANSWER_COMPAT: f64 = 0.15;

/// Step-motion ratio the scorer treats as ideal.
pub const TARGET_STEP_RATIO: f64 = 0.65;

/// PRNG stream id for subject search.
const SUBJECT_STREAM: u64 = 0x5eb1;

/// Probability that the second note leaps to the dominant.
const DOMINANT_OPENING_P: f64 = 0.35;

/// Lowest and highest walk degree relative to the starting tonic.
const MIN_DEGREE: i32 = -2;
const MAX_DEGREE: i32 = 9;

/// The monophonic theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub notes: Vec<NoteEvent>,
    pub key: KeySignature,
    pub length_ticks: Tick,
    pub character: Character,
}

impl Subject {
    pub fn pitches(&self) -> Vec<u8> {
        self.notes.iter().map(|n| n.pitch).collect()
    }

    pub fn first_pitch(&self) -> Option<u8> {
        self.notes.first().map(|n| n.pitch)
    }

    pub fn lowest(&self) -> u8 {
        self.notes.iter().map(|n| n.pitch).min().unwrap_or(60)
    }

    pub fn highest(&self) -> u8 {
        self.notes.iter().map(|n| n.pitch).max().unwrap_or(60)
    }

    /// Signed intervals between consecutive notes.
    pub fn intervals(&self) -> Vec<i16> {
        self.notes
            .windows(2)
            .map(|w| interval::semitones(w[0].pitch, w[1].pitch))
            .collect()
    }

    /// True when the subject's opening interval lands on the dominant, which
    /// calls for a tonal answer.
    pub fn opens_on_dominant(&self) -> bool {
        self.notes.get(1).is_some_and(|n| {
            self.key.degree_of(n.pitch) == Some(4)
                && self.notes[0].pitch % 12 == self.key.tonic.index()
        })
    }
}

/// Seven-dimension subject score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SubjectScore {
    pub interval_variety: f64,
    pub rhythm_diversity: f64,
    pub contour_balance: f64,
    pub range: f64,
    pub step_motion: f64,
    pub tonal_stability: f64,
    pub answer_compatibility: f64,
}

impl SubjectScore {
    pub fn composite(&self) -> f64 {
        self.interval_variety * WEIGHT_INTERVAL_VARIETY
            + self.rhythm_diversity * WEIGHT_RHYTHM_DIVERSITY
            + self.contour_balance * WEIGHT_CONTOUR
            + self.range * WEIGHT_RANGE
            + self.step_motion * WEIGHT_STEP_MOTION
            + self.tonal_stability * WEIGHT_TONAL_STABILITY
            + self.answer_compatibility * WEIGHT_ANSWER_COMPAT
    }

    pub fn is_acceptable(&self) -> bool {
        self.composite() >= ACCEPT_THRESHOLD
    }
}

/// Rhythm cells (tick durations) a character may draw from.
fn rhythm_cells(character: Character) -> &'static [&'static [Tick]] {
    const QUARTER: Tick = TICKS_PER_BEAT;
    match character {
        Character::Severe | Character::Noble => {
            &[&[QUARTER], &[DOTTED_QUARTER, DOTTED_QUARTER, QUARTER]]
        }
        Character::Playful => &[
            &[QUARTER],
            &[DOTTED_EIGHTH, SIXTEENTH],
            &[TRIPLET_EIGHTH, TRIPLET_EIGHTH, TRIPLET_EIGHTH],
            &[SIXTEENTH, DOTTED_EIGHTH],
        ],
        Character::Restless => &[
            &[DOTTED_EIGHTH, SIXTEENTH],
            &[EIGHTH, QUARTER, EIGHTH],
            &[SIXTEENTH, DOTTED_EIGHTH],
            &[TRIPLET_EIGHTH, TRIPLET_EIGHTH, TRIPLET_EIGHTH],
        ],
    }
}

/// Draw durations filling `SUBJECT_TICKS`. Whatever the cells leave is
/// filled with quarters, so the final note is a quarter.
fn draw_rhythm(character: Character, rng: &mut ScoreRng) -> Vec<Tick> {
    let cells = rhythm_cells(character);
    let mut durations = Vec::new();
    let mut remaining = SUBJECT_TICKS;
    while remaining > 2 * TICKS_PER_BEAT {
        let cell = cells[rng.range_usize(0, cells.len())];
        let total: Tick = cell.iter().sum();
        if total + TICKS_PER_BEAT > remaining {
            break;
        }
        durations.extend_from_slice(cell);
        remaining -= total;
    }
    while remaining > 0 {
        let d = remaining.min(TICKS_PER_BEAT);
        durations.push(d);
        remaining -= d;
    }
    durations
}

/// Weighted degree moves: steps 60%, thirds 20%, leaps 15%, repeats 5%.
const MOVES: [(i32, f64); 9] = [
    (-1, 0.30),
    (1, 0.30),
    (-2, 0.10),
    (2, 0.10),
    (-3, 0.0375),
    (3, 0.0375),
    (-4, 0.0375),
    (4, 0.0375),
    (0, 0.05),
];

/// Generate one candidate from `seed`.
pub fn generate(key: KeySignature, character: Character, seed: u64) -> Subject {
    let mut rng = ScoreRng::for_stream(seed, SUBJECT_STREAM);
    let durations = draw_rhythm(character, &mut rng);
    let base = key.tonic_near_middle_c();
    let base_pos = key.position_of(base).unwrap_or(0);
    let pitch_of = |degree: i32| key.pitch_at(base_pos + degree);

    let n = durations.len();
    let mut degrees: Vec<i32> = Vec::with_capacity(n);
    degrees.push(0);
    for i in 1..n {
        let prev = degrees[i - 1];
        if i + 1 == n {
            degrees.push(closing_degree(prev, &pitch_of));
            continue;
        }
        if i == 1 && rng.random_bool(DOMINANT_OPENING_P) {
            degrees.push(4);
            continue;
        }
        let weights: Vec<f64> = MOVES
            .iter()
            .map(|&(mv, w)| {
                let d = prev + mv;
                let leap = pitch_of(d) - pitch_of(prev);
                if !(MIN_DEGREE..=MAX_DEGREE).contains(&d) || interval::is_tritone(leap as i16) {
                    0.0
                } else {
                    w
                }
            })
            .collect();
        let mv = rng.weighted_index(&weights).map(|i| MOVES[i].0).unwrap_or(0);
        degrees.push(prev + mv);
    }

    let mut pitches: Vec<i32> = degrees.iter().map(|&d| pitch_of(d)).collect();
    if key.is_minor {
        raise_leading_tones(&degrees, &mut pitches);
    }

    let mut tick = 0;
    let notes = pitches
        .iter()
        .zip(&durations)
        .map(|(&p, &d)| {
            let note = NoteEvent::new(tick, d, clamp_midi(p), 0, Provenance::FugueSubject);
            tick += d;
            note
        })
        .collect();

    Subject {
        notes,
        key,
        length_ticks: SUBJECT_TICKS,
        character,
    }
}

/// Nearest tonic-triad degree to `prev` that is not a tritone away.
fn closing_degree(prev: i32, pitch_of: &impl Fn(i32) -> i32) -> i32 {
    (MIN_DEGREE..=MAX_DEGREE)
        .filter(|d| matches!(d.rem_euclid(7), 0 | 2 | 4))
        .filter(|&d| !interval::is_tritone((pitch_of(d) - pitch_of(prev)) as i16))
        .min_by_key(|&d| {
            let tonic_bonus = if d.rem_euclid(7) == 0 { 0 } else { 1 };
            ((d - prev).abs(), tonic_bonus)
        })
        .unwrap_or(0)
}

/// In minor, a seventh degree that rises to the tonic becomes the leading
/// tone, unless that would create a tritone with the note before it.
fn raise_leading_tones(degrees: &[i32], pitches: &mut [i32]) {
    for i in 0..degrees.len().saturating_sub(1) {
        if degrees[i].rem_euclid(7) == 6 && degrees[i + 1] == degrees[i] + 1 {
            let raised = pitches[i] + 1;
            let tritone_before = i > 0 && interval::is_tritone((raised - pitches[i - 1]) as i16);
            if !tritone_before {
                pitches[i] = raised;
            }
        }
    }
}

/// Score a subject on all seven dimensions.
pub fn evaluate(subject: &Subject) -> SubjectScore {
    let pitches = subject.pitches();
    if pitches.is_empty() {
        return SubjectScore::default();
    }
    let intervals = subject.intervals();
    let key = subject.key;

    let classes: BTreeSet<u8> = intervals.iter().map(|&i| interval::simple(i)).collect();
    let interval_variety = (classes.len() as f64 / 7.0).min(1.0);

    let mut counts: Vec<(Tick, usize)> = Vec::new();
    for n in &subject.notes {
        match counts.iter_mut().find(|(d, _)| *d == n.duration) {
            Some((_, c)) => *c += 1,
            None => counts.push((n.duration, 1)),
        }
    }
    let max_share = counts.iter().map(|&(_, c)| c).max().unwrap_or(0) as f64 / pitches.len() as f64;
    let rhythm_diversity = 1.0 - max_share;

    let high = subject.highest();
    let peaks = pitches.iter().filter(|&&p| p == high).count();
    let contour_balance = (1.0 - 0.25 * (peaks as f64 - 1.0)).clamp(0.0, 1.0);

    let range = range_score((high - subject.lowest()) as i32);

    let step_motion = if intervals.is_empty() {
        0.0
    } else {
        let steps = intervals.iter().filter(|&&i| interval::is_step(i)).count();
        let ratio = steps as f64 / intervals.len() as f64;
        (1.0 - (ratio - TARGET_STEP_RATIO).abs() / TARGET_STEP_RATIO).clamp(0.0, 1.0)
    };

    let non_diatonic = pitches.iter().filter(|&&p| !key.is_diatonic(p)).count();
    let mut tonal_stability = 0.5;
    if key.is_in_tonic_triad(pitches[0]) {
        tonal_stability += 0.25;
    }
    if pitches.last().is_some_and(|&p| key.is_in_tonic_triad(p)) {
        tonal_stability += 0.25;
    }
    tonal_stability = (tonal_stability - 0.1 * non_diatonic as f64).clamp(0.0, 1.0);

    let answer_compatibility = (pitches.len() - non_diatonic) as f64 / pitches.len() as f64;

    SubjectScore {
        interval_variety,
        rhythm_diversity,
        contour_balance,
        range,
        step_motion,
        tonal_stability,
        answer_compatibility,
    }
}

/// 1.0 for a range of 7-12 semitones, tapering to 0.6 at 4 and 18, and
/// falling off beyond.
fn range_score(semitones: i32) -> f64 {
    match semitones {
        7..=12 => 1.0,
        4..=6 => 0.6 + 0.4 * (semitones - 4) as f64 / 3.0,
        13..=18 => 1.0 - 0.4 * (semitones - 12) as f64 / 6.0,
        0..=3 => 0.15 * semitones as f64,
        _ => (0.6 - 0.1 * (semitones - 18) as f64).max(0.0),
    }
}

/// An accepted subject and the seed that produced it.
#[derive(Debug, Clone)]
pub struct AcceptedSubject {
    pub subject: Subject,
    pub score: SubjectScore,
    pub seed: u64,
}

/// Try `candidates` seeds starting at `seed`; the first acceptable subject
/// wins.
pub fn generate_acceptable(
    key: KeySignature,
    character: Character,
    seed: u64,
    candidates: usize,
) -> Result<AcceptedSubject, GenerationError> {
    let mut best = 0.0f64;
    for i in 0..candidates {
        let s = seed.wrapping_add(i as u64);
        let subject = generate(key, character, s);
        let score = evaluate(&subject);
        let composite = score.composite();
        if score.is_acceptable() {
            debug!(seed = s, composite, notes = subject.notes.len(), "subject accepted");
            return Ok(AcceptedSubject {
                subject,
                score,
                seed: s,
            });
        }
        debug!(seed = s, composite, "subject candidate rejected");
        best = best.max(composite);
    }
    Err(GenerationError::SubjectUnacceptable {
        attempts: candidates,
        best_score: best,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::PitchClass;

    #[test]
    fn weights_sum_to_one() {
        let sum = WEIGHT_INTERVAL_VARIETY
            + WEIGHT_RHYTHM_DIVERSITY
            + WEIGHT_CONTOUR
            + WEIGHT_RANGE
            + WEIGHT_STEP_MOTION
            + WEIGHT_TONAL_STABILITY
            + WEIGHT_ANSWER_COMPAT;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn subject_fills_two_bars_from_tick_zero() {
        for character in Character::ALL {
            let s = generate(KeySignature::major(PitchClass::C), *character, 7);
            assert_eq!(s.notes[0].start_tick, 0);
            let end = s.notes.last().unwrap().end_tick();
            assert_eq!(end, SUBJECT_TICKS);
            for w in s.notes.windows(2) {
                assert_eq!(w[0].end_tick(), w[1].start_tick);
            }
            assert!(s.notes.last().unwrap().duration >= TICKS_PER_BEAT);
        }
    }

    #[test]
    fn severe_uses_quarter_and_dotted_quarter_cells() {
        for seed in 0..40 {
            let s = generate(KeySignature::major(PitchClass::D), Character::Severe, seed);
            assert!(
                s.notes
                    .iter()
                    .all(|n| matches!(n.duration, TICKS_PER_BEAT | DOTTED_QUARTER)),
                "seed {seed}"
            );
            assert_eq!(s.notes.last().unwrap().duration, TICKS_PER_BEAT);
        }
    }

    #[test]
    fn starts_on_tonic_ends_on_triad_and_avoids_tritones() {
        for seed in 0..40 {
            let key = KeySignature::minor(PitchClass::E);
            let s = generate(key, Character::Restless, seed);
            assert_eq!(s.notes[0].pitch % 12, key.tonic.index());
            assert!(key.is_in_tonic_triad(s.notes.last().unwrap().pitch));
            for i in s.intervals() {
                assert!(!interval::is_tritone(i), "seed {seed} has a tritone leap");
            }
        }
    }

    #[test]
    fn same_seed_same_subject() {
        let key = KeySignature::major(PitchClass::F);
        assert_eq!(
            generate(key, Character::Playful, 5),
            generate(key, Character::Playful, 5)
        );
    }

    #[test]
    fn monotone_subject_scores_low_on_variety() {
        let key = KeySignature::major(PitchClass::C);
        let notes = (0..8)
            .map(|i| NoteEvent::new(i * 480, 480, 60, 0, Provenance::FugueSubject))
            .collect();
        let s = Subject {
            notes,
            key,
            length_ticks: 3840,
            character: Character::Severe,
        };
        let score = evaluate(&s);
        assert_eq!(score.interval_variety, 1.0 / 7.0);
        assert_eq!(score.rhythm_diversity, 0.0);
        assert_eq!(score.contour_balance, 0.0);
        assert!(!score.is_acceptable());
    }

    #[test]
    fn acceptable_subject_found_for_common_keys() {
        for key in ["C_major", "G_minor", "F#_major", "Eb_minor"] {
            let key: KeySignature = key.parse().unwrap();
            let accepted =
                generate_acceptable(key, Character::Noble, 42, DEFAULT_CANDIDATES).unwrap();
            assert!(accepted.score.composite() >= ACCEPT_THRESHOLD);
            assert!(accepted.seed >= 42);
        }
    }

    #[test]
    fn zero_candidates_is_unacceptable() {
        let c_major = KeySignature::major(PitchClass::C);
        let err = generate_acceptable(c_major, Character::Severe, 1, 0).unwrap_err();
        assert!(matches!(err, GenerationError::SubjectUnacceptable { attempts: 0, .. }));
    }

    #[test]
    fn range_score_shape() {
        assert_eq!(range_score(9), 1.0);
        assert!(range_score(4) < range_score(7));
        assert!(range_score(18) < range_score(12));
        assert!(range_score(30) < range_score(18));
    }
}
