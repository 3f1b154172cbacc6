// Post-validation quality gate.
//
// Runs on the finished tracks before the façade returns. `normalize_tracks`
// makes every track well-formed: duplicates collapsed, pitches folded into
// the instrument's range, same-tick collisions split by one tick and
// overlaps trimmed. Every note it touches carries a `ModifiedBy` flag, and a
// second run over its own output changes nothing.
//
// `evaluate` then measures the normalized score with the full rule battery
// (via analysis.rs) and decides pass/fail. A score passes only when no
// integrity defect and no Critical rule violation (parallel perfects,
// voice crossing, tritone leap) remains and compliance clears the
// threshold. A failing gate is not an error here; the façade decides whether
// to retry.

use serde::Serialize;
use std::cmp::Reverse;
use tracing::debug;

use crate::analysis;
use crate::harmony::HarmonicTimeline;
use crate::note::{ModifiedBy, NoteEvent, Track};

/// Compliance must be strictly above this to pass.
pub const COMPLIANCE_THRESHOLD: f64 = 0.8;

/// What normalization did to a set of tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NormalizeStats {
    pub rejected: usize,
    pub adjusted: usize,
}

impl NormalizeStats {
    fn merge(&mut self, other: NormalizeStats) {
        self.rejected += other.rejected;
        self.adjusted += other.adjusted;
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QualityMetrics {
    pub dissonance_per_beat: f64,
    pub chord_tone_ratio: f64,
    pub voice_crossings: usize,
    pub parallel_perfects: usize,
    /// Parallels between two thematic notes.
    pub structural_parallel_count: usize,
    pub tritone_leaps: usize,
    pub counterpoint_compliance: f64,
    pub notes_rejected: usize,
    pub notes_adjusted: usize,
    /// Critical rule violations.
    pub critical_issues: usize,
    /// Integrity defects left after normalization: unsorted notes,
    /// overlaps, zero durations, out-of-range pitches.
    pub integrity_issues: usize,
    pub passed: bool,
}

impl QualityMetrics {
    /// One-line explanation of a failed verdict.
    pub fn failure_reason(&self) -> Option<String> {
        if self.integrity_issues > 0 {
            Some(format!("{} integrity issue(s) remain", self.integrity_issues))
        } else if self.critical_issues > 0 {
            Some(format!(
                "{} critical violation(s) remain ({} parallel, {} crossing, {} tritone)",
                self.critical_issues,
                self.parallel_perfects,
                self.voice_crossings,
                self.tritone_leaps
            ))
        } else if self.counterpoint_compliance <= COMPLIANCE_THRESHOLD {
            Some(format!(
                "counterpoint compliance {:.3} not above {COMPLIANCE_THRESHOLD}",
                self.counterpoint_compliance
            ))
        } else {
            None
        }
    }
}

/// Fold `pitch` by octaves into `[low, high]`. Ranges narrower than an
/// octave clamp instead.
pub fn fold_into_range(pitch: u8, low: u8, high: u8) -> u8 {
    if high < low.saturating_add(11) {
        return pitch.clamp(low, high);
    }
    let mut p = pitch as i32;
    while p < low as i32 {
        p += 12;
    }
    while p > high as i32 {
        p -= 12;
    }
    p as u8
}

/// Normalize one track in place.
pub fn normalize_track(track: &mut Track, low: u8, high: u8) -> NormalizeStats {
    let mut stats = NormalizeStats::default();
    let mut notes = std::mem::take(&mut track.notes);
    notes.sort_by_key(|n| (n.start_tick, n.voice_id, Reverse(n.duration), n.pitch));

    // Same voice, tick and pitch: keep the longest, which sorts first.
    let before = notes.len();
    notes.dedup_by(|later, kept| {
        later.voice_id == kept.voice_id
            && later.start_tick == kept.start_tick
            && later.pitch == kept.pitch
    });
    stats.rejected += before - notes.len();
    let zero = notes.iter().filter(|n| n.duration == 0).count();
    notes.retain(|n| n.duration > 0);
    stats.rejected += zero;

    for n in &mut notes {
        let folded = fold_into_range(n.pitch, low, high);
        if folded != n.pitch {
            n.pitch = folded;
            n.modified_by.insert(ModifiedBy::RANGE_FOLD);
            stats.adjusted += 1;
        }
    }

    let mut out: Vec<NoteEvent> = Vec::with_capacity(notes.len());
    for mut note in notes {
        let Some(prev) = out.last_mut() else {
            out.push(note);
            continue;
        };
        if note.start_tick <= prev.start_tick {
            let new_start = prev.start_tick + 1;
            let shift = new_start - note.start_tick;
            if note.duration <= shift {
                stats.rejected += 1;
                continue;
            }
            note.start_tick = new_start;
            note.duration -= shift;
            note.modified_by.insert(ModifiedBy::TICK_OFFSET);
            stats.adjusted += 1;
        }
        if prev.end_tick() > note.start_tick {
            prev.duration = note.start_tick - prev.start_tick;
            prev.modified_by.insert(ModifiedBy::OVERLAP_TRIM);
            stats.adjusted += 1;
        }
        out.push(note);
    }
    track.notes = out;
    track.sort_notes();
    stats
}

/// Normalize every track against the playable range `[low, high]`.
pub fn normalize_tracks(tracks: &mut [Track], low: u8, high: u8) -> NormalizeStats {
    let mut stats = NormalizeStats::default();
    for track in tracks.iter_mut() {
        stats.merge(normalize_track(track, low, high));
    }
    stats
}

/// Count integrity defects in normalized tracks.
pub fn integrity_issues(tracks: &[Track], low: u8, high: u8) -> usize {
    let mut issues = 0;
    for track in tracks {
        for n in &track.notes {
            if n.duration == 0 || n.pitch > 127 || n.pitch < low || n.pitch > high {
                issues += 1;
            }
        }
        for w in track.notes.windows(2) {
            if w[1].start_tick <= w[0].start_tick || w[0].end_tick() > w[1].start_tick {
                issues += 1;
            }
        }
    }
    issues
}

/// Measure normalized tracks and decide the verdict.
pub fn evaluate(
    tracks: &[Track],
    timeline: &HarmonicTimeline,
    low: u8,
    high: u8,
    normalize: NormalizeStats,
) -> QualityMetrics {
    let notes: Vec<NoteEvent> = tracks.iter().flat_map(|t| t.notes.iter().copied()).collect();
    let report = analysis::analyze_counterpoint(&notes);
    let chord_tones = notes
        .iter()
        .filter(|n| timeline.is_chord_tone(n.start_tick, n.pitch))
        .count();
    let integrity = integrity_issues(tracks, low, high);

    let mut metrics = QualityMetrics {
        dissonance_per_beat: report.dissonance_per_beat,
        chord_tone_ratio: if notes.is_empty() {
            0.0
        } else {
            chord_tones as f64 / notes.len() as f64
        },
        voice_crossings: report.voice_crossing_count,
        parallel_perfects: report.parallel_perfect_count,
        structural_parallel_count: report.structural_parallel_count,
        tritone_leaps: report.tritone_leap_count,
        counterpoint_compliance: report.compliance_rate,
        notes_rejected: normalize.rejected,
        notes_adjusted: normalize.adjusted,
        critical_issues: report.critical_count,
        integrity_issues: integrity,
        passed: false,
    };
    metrics.passed = metrics.failure_reason().is_none();
    debug!(
        compliance = metrics.counterpoint_compliance,
        critical = metrics.critical_issues,
        integrity = metrics.integrity_issues,
        parallels = metrics.parallel_perfects,
        structural = metrics.structural_parallel_count,
        rejected = metrics.notes_rejected,
        adjusted = metrics.notes_adjusted,
        passed = metrics.passed,
        "quality evaluated"
    );
    metrics
}
