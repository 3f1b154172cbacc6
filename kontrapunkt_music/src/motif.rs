// Motif pool: ranked variants of the subject.
//
// Built once per piece from the accepted subject. Every variant is stored in
// key-independent form: a list of diatonic degree steps plus a list of
// durations, so episodes can realise a fragment in whatever key the
// modulation plan has reached by starting it on any scale position.
//
// The pool is bounded (MAX_MOTIFS) and ranked by a small heuristic score
// that prefers stepwise, rhythmically active material of three to four
// intervals (the length episodes sequence best). Ties keep insertion order,
// so the ranking is deterministic. The pool is immutable after `build`.

use serde::{Deserialize, Serialize};

use crate::pitch::KeySignature;
use crate::subject::Subject;
use crate::timing::{SIXTEENTH, Tick};

pub const MAX_MOTIFS: usize = 12;

/// Shortest and longest fragment, in intervals.
pub const MIN_FRAGMENT_INTERVALS: usize = 3;
pub const MAX_FRAGMENT_INTERVALS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotifTag {
    Original,
    Inversion,
    Retrograde,
    Augmentation,
    Diminution,
    /// Fragment starting at the given subject note index.
    Fragment(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Motif {
    pub tag: MotifTag,
    /// Diatonic steps between consecutive notes; `len() == durations.len() - 1`.
    pub degree_steps: Vec<i32>,
    pub durations: Vec<Tick>,
    pub score: f64,
}

impl Motif {
    pub fn len_ticks(&self) -> Tick {
        self.durations.iter().sum()
    }

    pub fn note_count(&self) -> usize {
        self.durations.len()
    }

    /// Scale positions of each note when the motif starts at `start`.
    pub fn positions_from(&self, start: i32) -> Vec<i32> {
        let mut pos = start;
        let mut out = Vec::with_capacity(self.durations.len());
        out.push(pos);
        for step in &self.degree_steps {
            pos += step;
            out.push(pos);
        }
        out
    }

    /// MIDI pitches in `key` starting from scale position `start`.
    pub fn realize(&self, key: KeySignature, start: i32) -> Vec<i32> {
        self.positions_from(start)
            .into_iter()
            .map(|p| key.pitch_at(p))
            .collect()
    }

    pub fn inverted(&self) -> Motif {
        Motif {
            tag: MotifTag::Inversion,
            degree_steps: self.degree_steps.iter().map(|s| -s).collect(),
            durations: self.durations.clone(),
            score: self.score,
        }
    }

    /// Net diatonic displacement from first to last note.
    pub fn span(&self) -> i32 {
        self.degree_steps.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MotifPool {
    motifs: Vec<Motif>,
}

impl MotifPool {
    pub fn build(subject: &Subject) -> MotifPool {
        let key = subject.key;
        let positions: Vec<i32> = subject
            .notes
            .iter()
            .map(|n| key.position_of(key.snap(n.pitch)).unwrap_or(0))
            .collect();
        let steps: Vec<i32> = positions.windows(2).map(|w| w[1] - w[0]).collect();
        let durations: Vec<Tick> = subject.notes.iter().map(|n| n.duration).collect();
        if durations.is_empty() {
            return MotifPool::default();
        }

        let mut candidates = vec![
            make(MotifTag::Original, steps.clone(), durations.clone()),
            make(
                MotifTag::Inversion,
                steps.iter().map(|s| -s).collect(),
                durations.clone(),
            ),
            make(
                MotifTag::Retrograde,
                steps.iter().rev().map(|s| -s).collect(),
                durations.iter().rev().copied().collect(),
            ),
            make(
                MotifTag::Augmentation,
                steps.clone(),
                durations.iter().map(|d| d * 2).collect(),
            ),
            make(
                MotifTag::Diminution,
                steps.clone(),
                durations.iter().map(|d| (d / 2).max(SIXTEENTH)).collect(),
            ),
        ];

        for start in 0..steps.len() {
            for len in (MIN_FRAGMENT_INTERVALS..=MAX_FRAGMENT_INTERVALS).rev() {
                if start + len <= steps.len() {
                    candidates.push(make(
                        MotifTag::Fragment(start),
                        steps[start..start + len].to_vec(),
                        durations[start..=start + len].to_vec(),
                    ));
                    break;
                }
            }
        }

        // Stable sort keeps insertion order among equal scores.
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(MAX_MOTIFS);
        MotifPool { motifs: candidates }
    }

    pub fn motifs(&self) -> &[Motif] {
        &self.motifs
    }

    pub fn len(&self) -> usize {
        self.motifs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motifs.is_empty()
    }

    pub fn get(&self, tag: MotifTag) -> Option<&Motif> {
        self.motifs.iter().find(|m| m.tag == tag)
    }

    pub fn best(&self) -> Option<&Motif> {
        self.motifs.first()
    }

    /// Fragments in rank order.
    pub fn fragments(&self) -> impl Iterator<Item = &Motif> {
        self.motifs
            .iter()
            .filter(|m| matches!(m.tag, MotifTag::Fragment(_)))
    }

    /// The n-th fragment, cycling. Falls back to the best motif when the
    /// subject was too short to fragment.
    pub fn fragment(&self, n: usize) -> Option<&Motif> {
        let count = self.fragments().count();
        if count == 0 {
            return self.best();
        }
        self.fragments().nth(n % count)
    }
}

fn make(tag: MotifTag, degree_steps: Vec<i32>, durations: Vec<Tick>) -> Motif {
    let score = motif_score(&degree_steps, &durations);
    Motif {
        tag,
        degree_steps,
        durations,
        score,
    }
}

/// Heuristic rank: stepwise motion, rhythmic activity, and a preference for
/// sequence-sized material.
fn motif_score(steps: &[i32], durations: &[Tick]) -> f64 {
    if steps.is_empty() {
        return 0.0;
    }
    let stepwise = steps.iter().filter(|s| s.abs() == 1).count() as f64 / steps.len() as f64;
    let distinct = {
        let mut d: Vec<Tick> = durations.to_vec();
        d.sort_unstable();
        d.dedup();
        d.len()
    };
    let rhythm = (distinct as f64 / 3.0).min(1.0);
    let size = if (MIN_FRAGMENT_INTERVALS..=MAX_FRAGMENT_INTERVALS).contains(&steps.len()) {
        1.0
    } else {
        0.5
    };
    0.5 * stepwise + 0.2 * rhythm + 0.3 * size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Character;
    use crate::note::{NoteEvent, Provenance};
    use crate::pitch::PitchClass;

    fn scale_subject() -> Subject {
        let pitches = [60u8, 62, 64, 65, 67, 65, 64, 62, 60];
        let durations = [480u32, 240, 240, 480, 480, 480, 240, 240, 960];
        let mut tick = 0;
        let notes = pitches
            .iter()
            .zip(durations)
            .map(|(&p, d)| {
                let n = NoteEvent::new(tick, d, p, 0, Provenance::FugueSubject);
                tick += d;
                n
            })
            .collect();
        Subject {
            notes,
            key: KeySignature::major(PitchClass::C),
            length_ticks: tick,
            character: Character::Severe,
        }
    }

    #[test]
    fn pool_is_bounded_and_ranked() {
        let pool = MotifPool::build(&scale_subject());
        assert!(pool.len() <= MAX_MOTIFS);
        for w in pool.motifs().windows(2) {
            assert!(w[0].score >= w[1].score);
        }
    }

    #[test]
    fn transforms_preserve_shape() {
        let pool = MotifPool::build(&scale_subject());
        let original = pool.get(MotifTag::Original).unwrap();
        let inversion = pool.get(MotifTag::Inversion).unwrap();
        assert_eq!(original.degree_steps.len() + 1, original.durations.len());
        assert_eq!(original.span(), -inversion.span());
        if let Some(aug) = pool.get(MotifTag::Augmentation) {
            assert_eq!(aug.len_ticks(), original.len_ticks() * 2);
        }
    }

    #[test]
    fn fragments_have_three_or_four_intervals() {
        let pool = MotifPool::build(&scale_subject());
        assert!(pool.fragments().count() > 0);
        for f in pool.fragments() {
            let steps = f.degree_steps.len();
            assert!((MIN_FRAGMENT_INTERVALS..=MAX_FRAGMENT_INTERVALS).contains(&steps));
        }
        let first = pool.fragment(0).unwrap().clone();
        let count = pool.fragments().count();
        assert_eq!(pool.fragment(count).unwrap(), &first);
    }

    #[test]
    fn realize_in_another_key() {
        let pool = MotifPool::build(&scale_subject());
        let original = pool.get(MotifTag::Original).unwrap();
        let g = KeySignature::major(PitchClass::G);
        let start = g.position_of(67).unwrap();
        let pitches = original.realize(g, start);
        assert_eq!(&pitches[..5], &[67, 69, 71, 72, 74]);
    }
}
