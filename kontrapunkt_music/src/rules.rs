// Counterpoint rule evaluators.
//
// Each rule implements `CounterpointRule::validate(state, from, to)` and
// returns the violations it finds at beat positions inside `[from, to)`.
// Rules that judge motion look back one beat before `from` for context but
// only report ticks inside the window. `RuleSet` is the registry: an ordered
// vector of boxed rules run in turn, so callers (local repair in line.rs,
// the quality gate, the analysis report) all see the same rule battery.
//
// Severity matters downstream. Critical violations drive local repair and
// the compliance rate; Warnings and Info are metrics only.

use serde::{Deserialize, Serialize};

use crate::counterpoint::CounterpointState;
use crate::note::VoiceId;
use crate::pitch::interval;
use crate::timing::{self, TICKS_PER_BEAT, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleViolation {
    pub voice_a: VoiceId,
    /// Equal to `voice_a` for single-voice rules.
    pub voice_b: VoiceId,
    pub tick: Tick,
    pub rule_name: &'static str,
    pub severity: Severity,
}

impl RuleViolation {
    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

pub trait CounterpointRule {
    fn name(&self) -> &'static str;

    fn validate(&self, state: &CounterpointState, from: Tick, to: Tick) -> Vec<RuleViolation>;
}

pub const PARALLEL_PERFECTS: &str = "parallel_perfects";
pub const HIDDEN_PERFECT: &str = "hidden_perfect";
pub const VOICE_CROSSING: &str = "voice_crossing";
pub const TRITONE_LEAP: &str = "tritone_leap";
pub const UNRESOLVED_DISSONANCE: &str = "unresolved_dissonance";
pub const CROSS_RELATION: &str = "cross_relation";

/// Beats of crossing before a crossing counts as persistent.
pub const PERSISTENT_CROSSING_BEATS: u32 = 2;

/// Pitches of both voices at the previous beat and at `tick`.
fn motion(
    state: &CounterpointState,
    a: VoiceId,
    b: VoiceId,
    tick: Tick,
) -> Option<((u8, u8), (u8, u8))> {
    let prev = tick.checked_sub(TICKS_PER_BEAT)?;
    let pa0 = state.sounding_pitch(a, prev)?;
    let pb0 = state.sounding_pitch(b, prev)?;
    let pa1 = state.sounding_pitch(a, tick)?;
    let pb1 = state.sounding_pitch(b, tick)?;
    Some(((pa0, pb0), (pa1, pb1)))
}

fn violation(
    a: VoiceId,
    b: VoiceId,
    tick: Tick,
    rule_name: &'static str,
    severity: Severity,
) -> RuleViolation {
    RuleViolation {
        voice_a: a,
        voice_b: b,
        tick,
        rule_name,
        severity,
    }
}

/// Same perfect class reached by motion in the same direction.
pub struct ParallelPerfects;

impl CounterpointRule for ParallelPerfects {
    fn name(&self) -> &'static str {
        PARALLEL_PERFECTS
    }

    fn validate(&self, state: &CounterpointState, from: Tick, to: Tick) -> Vec<RuleViolation> {
        let mut out = Vec::new();
        for (a, b) in state.voice_pairs() {
            for t in timing::beat_ticks(from, to) {
                let Some(((pa0, pb0), (pa1, pb1))) = motion(state, a, b, t) else {
                    continue;
                };
                if is_parallel_perfect(pa0, pb0, pa1, pb1) {
                    out.push(violation(a, b, t, PARALLEL_PERFECTS, Severity::Critical));
                }
            }
        }
        out
    }
}

/// Two voices moving from one perfect interval to the same perfect class in
/// the same direction.
pub fn is_parallel_perfect(pa0: u8, pb0: u8, pa1: u8, pb1: u8) -> bool {
    let before = interval::semitones(pb0, pa0);
    let after = interval::semitones(pb1, pa1);
    if !interval::is_perfect(before) || !interval::is_perfect(after) {
        return false;
    }
    if interval::simple(before) != interval::simple(after) {
        return false;
    }
    let da = interval::direction(interval::semitones(pa0, pa1));
    let db = interval::direction(interval::semitones(pb0, pb1));
    da != 0 && da == db
}

/// Perfect interval approached by similar motion with a leap in the upper
/// outer voice.
pub struct HiddenPerfect;

impl CounterpointRule for HiddenPerfect {
    fn name(&self) -> &'static str {
        HIDDEN_PERFECT
    }

    fn validate(&self, state: &CounterpointState, from: Tick, to: Tick) -> Vec<RuleViolation> {
        let Some((top, bottom)) = state.outer_voices() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for t in timing::beat_ticks(from, to) {
            let Some(((pa0, pb0), (pa1, pb1))) = motion(state, top, bottom, t) else {
                continue;
            };
            let after = interval::semitones(pb1, pa1);
            if !interval::is_perfect(after) || is_parallel_perfect(pa0, pb0, pa1, pb1) {
                continue;
            }
            let top_move = interval::semitones(pa0, pa1);
            let bottom_move = interval::semitones(pb0, pb1);
            let similar = top_move != 0
                && interval::direction(top_move) == interval::direction(bottom_move);
            if similar && top_move.abs() > 2 {
                out.push(violation(top, bottom, t, HIDDEN_PERFECT, Severity::Warning));
            }
        }
        out
    }
}

/// Upper voice below the lower voice for at least two consecutive beats.
pub struct VoiceCrossing;

impl CounterpointRule for VoiceCrossing {
    fn name(&self) -> &'static str {
        VOICE_CROSSING
    }

    fn validate(&self, state: &CounterpointState, from: Tick, to: Tick) -> Vec<RuleViolation> {
        let mut out = Vec::new();
        for (upper, lower) in state.voice_pairs() {
            let mut run = 0u32;
            for t in timing::beat_ticks(from, to) {
                let pair = (state.sounding_pitch(upper, t), state.sounding_pitch(lower, t));
                let crossed = match pair {
                    (Some(u), Some(l)) => u < l,
                    _ => false,
                };
                if crossed {
                    run += 1;
                    if run == PERSISTENT_CROSSING_BEATS {
                        out.push(violation(upper, lower, t, VOICE_CROSSING, Severity::Critical));
                    }
                } else {
                    run = 0;
                }
            }
        }
        out
    }
}

/// Tritone between consecutive notes of one voice.
pub struct TritoneLeap;

impl CounterpointRule for TritoneLeap {
    fn name(&self) -> &'static str {
        TRITONE_LEAP
    }

    fn validate(&self, state: &CounterpointState, from: Tick, to: Tick) -> Vec<RuleViolation> {
        let mut out = Vec::new();
        for v in state.voice_ids() {
            for w in state.voice_notes(v).windows(2) {
                let t = w[1].start_tick;
                if t < from || t >= to {
                    continue;
                }
                if interval::is_tritone(interval::semitones(w[0].pitch, w[1].pitch)) {
                    out.push(violation(v, v, t, TRITONE_LEAP, Severity::Critical));
                }
            }
        }
        out
    }
}

/// A dissonance that does not move to a consonance by step on the next beat.
pub struct UnresolvedDissonance;

impl CounterpointRule for UnresolvedDissonance {
    fn name(&self) -> &'static str {
        UNRESOLVED_DISSONANCE
    }

    fn validate(&self, state: &CounterpointState, from: Tick, to: Tick) -> Vec<RuleViolation> {
        let mut out = Vec::new();
        for (a, b) in state.voice_pairs() {
            for t in timing::beat_ticks(from, to) {
                if dissonance_resolves(state, a, b, t) == Some(false) {
                    out.push(violation(a, b, t, UNRESOLVED_DISSONANCE, Severity::Warning));
                }
            }
        }
        out
    }
}

/// `None` when the pair is not dissonant at `tick`; otherwise whether it
/// resolves on the next beat.
pub fn dissonance_resolves(
    state: &CounterpointState,
    a: VoiceId,
    b: VoiceId,
    tick: Tick,
) -> Option<bool> {
    let pa = state.sounding_pitch(a, tick)?;
    let pb = state.sounding_pitch(b, tick)?;
    if !interval::is_dissonant(interval::semitones(pb, pa)) {
        return None;
    }
    let next = tick + TICKS_PER_BEAT;
    let (Some(na), Some(nb)) = (state.sounding_pitch(a, next), state.sounding_pitch(b, next)) else {
        return Some(false);
    };
    let consonant = interval::is_consonant(interval::semitones(nb, na));
    let stepped = interval::is_step(interval::semitones(pa, na))
        || interval::is_step(interval::semitones(pb, nb));
    Some(consonant && stepped)
}

/// Chromatic clash of adjacent pitch classes between two voices.
pub struct CrossRelation;

impl CounterpointRule for CrossRelation {
    fn name(&self) -> &'static str {
        CROSS_RELATION
    }

    fn validate(&self, state: &CounterpointState, from: Tick, to: Tick) -> Vec<RuleViolation> {
        let mut out = Vec::new();
        for (a, b) in state.voice_pairs() {
            for t in timing::beat_ticks(from, to) {
                let (Some(pa), Some(pb)) = (state.sounding_pitch(a, t), state.sounding_pitch(b, t))
                else {
                    continue;
                };
                if is_cross_relation(pa, pb) {
                    out.push(violation(a, b, t, CROSS_RELATION, Severity::Warning));
                }
            }
        }
        out
    }
}

/// Pitch classes a semitone apart, excluding the natural half steps E/F and
/// B/C.
pub fn is_cross_relation(a: u8, b: u8) -> bool {
    let (pa, pb) = (a % 12, b % 12);
    let diff = (pa + 12 - pb) % 12;
    if diff != 1 && diff != 11 {
        return false;
    }
    let (lo, hi) = if diff == 1 { (pb, pa) } else { (pa, pb) };
    !matches!((lo, hi), (4, 5) | (11, 0))
}

/// Ordered collection of rules run as one battery.
pub struct RuleSet {
    rules: Vec<Box<dyn CounterpointRule>>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl RuleSet {
    pub fn empty() -> Self {
        RuleSet { rules: Vec::new() }
    }

    /// All six core rules.
    pub fn standard() -> Self {
        RuleSet::empty()
            .with_rule(ParallelPerfects)
            .with_rule(HiddenPerfect)
            .with_rule(VoiceCrossing)
            .with_rule(TritoneLeap)
            .with_rule(UnresolvedDissonance)
            .with_rule(CrossRelation)
    }

    /// The rules that can produce Critical violations; used by local repair.
    pub fn critical() -> Self {
        RuleSet::empty()
            .with_rule(ParallelPerfects)
            .with_rule(VoiceCrossing)
            .with_rule(TritoneLeap)
    }

    pub fn with_rule(mut self, rule: impl CounterpointRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn validate(&self, state: &CounterpointState, from: Tick, to: Tick) -> Vec<RuleViolation> {
        self.rules
            .iter()
            .flat_map(|r| r.validate(state, from, to))
            .collect()
    }

    pub fn critical_count(&self, state: &CounterpointState, from: Tick, to: Tick) -> usize {
        self.validate(state, from, to)
            .iter()
            .filter(|v| v.is_critical())
            .count()
    }
}

/// `1 - critical / (beats * voice_pairs)`, clamped to [0, 1].
pub fn compliance_rate(critical: usize, beats: usize, voice_pairs: usize) -> f64 {
    let opportunities = beats * voice_pairs;
    if opportunities == 0 {
        return 1.0;
    }
    (1.0 - critical as f64 / opportunities as f64).clamp(0.0, 1.0)
}
