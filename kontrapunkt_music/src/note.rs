// Note event and track model.
//
// The in-memory score is a vector of `Track`s, each holding `NoteEvent`s and
// controller events. Notes carry non-musical metadata alongside pitch and
// timing: the voice that owns them, the subsystem that produced them
// (`Provenance`), and which post-processing steps touched them
// (`ModifiedBy`). The quality gate and the analysis report read that
// metadata; the MIDI writer ignores it.
//
// After the pipeline completes, notes in a track are sorted by
// (start_tick, pitch) and never overlap.

use serde::{Deserialize, Serialize};

use crate::timing::Tick;

/// Stable integer id of a logical voice.
pub type VoiceId = u8;

/// Default MIDI velocity for generated notes.
pub const DEFAULT_VELOCITY: u8 = 80;

/// Which subsystem produced a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Unknown,
    FugueSubject,
    FugueAnswer,
    FugueCountersubject,
    FreeCounterpoint,
    EpisodeMaterial,
    StrettoEntry,
    Ornament,
    PreludeFiguration,
    ToccataGesture,
    GroundBass,
    ArpeggioFlow,
}

impl Provenance {
    /// Subject, answer and countersubject: the material whose parallels
    /// count as structural.
    pub fn is_thematic(self) -> bool {
        matches!(
            self,
            Provenance::FugueSubject | Provenance::FugueAnswer | Provenance::FugueCountersubject
        )
    }
}

/// Bowing metadata for string instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BowDirection {
    #[default]
    Natural,
    Down,
    Up,
}

/// Bit set recording post-generation modifications of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct ModifiedBy(u8);

impl ModifiedBy {
    /// Local repair gave up and kept the least-bad pitch.
    pub const PARALLEL_REPAIR: ModifiedBy = ModifiedBy(1 << 0);
    /// Duration truncated to remove an overlap.
    pub const OVERLAP_TRIM: ModifiedBy = ModifiedBy(1 << 1);
    /// Start moved by one tick to separate a same-tick collision.
    pub const TICK_OFFSET: ModifiedBy = ModifiedBy(1 << 2);
    /// Pitch folded by octaves into the playable range.
    pub const RANGE_FOLD: ModifiedBy = ModifiedBy(1 << 3);

    pub fn empty() -> Self {
        ModifiedBy(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, flag: ModifiedBy) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub fn insert(&mut self, flag: ModifiedBy) {
        self.0 |= flag.0;
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

/// One sounding note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub start_tick: Tick,
    /// Always > 0.
    pub duration: Tick,
    /// MIDI pitch 0-127.
    pub pitch: u8,
    pub velocity: u8,
    pub voice_id: VoiceId,
    pub provenance: Provenance,
    pub bow_direction: BowDirection,
    pub is_harmonic: bool,
    pub modified_by: ModifiedBy,
}

impl NoteEvent {
    pub fn new(
        start_tick: Tick,
        duration: Tick,
        pitch: u8,
        voice_id: VoiceId,
        provenance: Provenance,
    ) -> Self {
        NoteEvent {
            start_tick,
            duration,
            pitch,
            velocity: DEFAULT_VELOCITY,
            voice_id,
            provenance,
            bow_direction: BowDirection::Natural,
            is_harmonic: false,
            modified_by: ModifiedBy::empty(),
        }
    }

    /// Exclusive end tick.
    pub fn end_tick(&self) -> Tick {
        self.start_tick + self.duration
    }

    /// Half-open containment: `[start, end)`.
    pub fn covers(&self, tick: Tick) -> bool {
        self.start_tick <= tick && tick < self.end_tick()
    }

    pub fn overlaps(&self, other: &NoteEvent) -> bool {
        self.start_tick < other.end_tick() && other.start_tick < self.end_tick()
    }

    /// Copy moved by `delta` ticks.
    pub fn shifted(mut self, delta: Tick) -> Self {
        self.start_tick += delta;
        self
    }
}

/// A MIDI controller change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEvent {
    pub tick: Tick,
    pub controller: u8,
    pub value: u8,
}

/// Expression controller number.
pub const CC_EXPRESSION: u8 = 11;

/// A tempo change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoEvent {
    pub tick: Tick,
    pub bpm: u16,
}

impl TempoEvent {
    pub fn microseconds_per_quarter(&self) -> u32 {
        60_000_000 / self.bpm.max(1) as u32
    }
}

/// An output track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub channel: u8,
    pub program: u8,
    pub name: String,
    pub notes: Vec<NoteEvent>,
    pub raw_events: Vec<ControlEvent>,
}

impl Track {
    pub fn new(channel: u8, program: u8, name: impl Into<String>) -> Self {
        Track {
            channel,
            program,
            name: name.into(),
            notes: Vec::new(),
            raw_events: Vec::new(),
        }
    }

    /// Sort notes by (start_tick, pitch), the final output order.
    pub fn sort_notes(&mut self) {
        self.notes.sort_by_key(|n| (n.start_tick, n.pitch, n.voice_id));
    }

    /// Exclusive end of the last sounding note, or 0 when empty.
    pub fn end_tick(&self) -> Tick {
        self.notes.iter().map(NoteEvent::end_tick).max().unwrap_or(0)
    }
}

/// Max over all notes of `start_tick + duration`.
pub fn total_duration(tracks: &[Track]) -> Tick {
    tracks.iter().map(Track::end_tick).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modified_by_flags() {
        let mut m = ModifiedBy::empty();
        assert!(m.is_empty());
        m.insert(ModifiedBy::OVERLAP_TRIM);
        assert!(m.contains(ModifiedBy::OVERLAP_TRIM));
        assert!(!m.contains(ModifiedBy::PARALLEL_REPAIR));
        m.insert(ModifiedBy::PARALLEL_REPAIR);
        assert_eq!(m.bits(), 0b11);
    }

    #[test]
    fn note_coverage_is_half_open() {
        let n = NoteEvent::new(480, 480, 60, 0, Provenance::FugueSubject);
        assert!(n.covers(480));
        assert!(n.covers(959));
        assert!(!n.covers(960));
        assert!(!n.covers(479));
        assert_eq!(n.end_tick(), 960);
    }

    #[test]
    fn overlap_detection() {
        let a = NoteEvent::new(0, 480, 60, 0, Provenance::Unknown);
        let b = NoteEvent::new(480, 480, 62, 0, Provenance::Unknown);
        let c = NoteEvent::new(240, 480, 64, 0, Provenance::Unknown);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn thematic_provenance() {
        assert!(Provenance::FugueSubject.is_thematic());
        assert!(Provenance::FugueCountersubject.is_thematic());
        assert!(!Provenance::StrettoEntry.is_thematic());
        assert!(!Provenance::FreeCounterpoint.is_thematic());
    }

    #[test]
    fn track_end_and_sort() {
        let mut t = Track::new(0, 19, "Manual I (Great)");
        t.notes.push(NoteEvent::new(960, 480, 64, 0, Provenance::Unknown));
        t.notes.push(NoteEvent::new(0, 480, 60, 0, Provenance::Unknown));
        t.sort_notes();
        assert_eq!(t.notes[0].start_tick, 0);
        assert_eq!(t.end_tick(), 1440);
        assert_eq!(total_duration(&[t, Track::new(1, 20, "x")]), 1440);
    }

    #[test]
    fn tempo_conversion() {
        assert_eq!(
            TempoEvent { tick: 0, bpm: 120 }.microseconds_per_quarter(),
            500_000
        );
    }
}
