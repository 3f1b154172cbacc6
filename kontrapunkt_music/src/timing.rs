// Timing model: integer ticks, beats and bars.
//
// All time in the generator is expressed in `Tick`s. One quarter-note beat is
// 480 ticks and every piece is in 4/4, so one bar is 1920 ticks. There is no
// floating-point time anywhere in the core; durations scaled by ratios go
// through integer helpers here so rounding is identical on every platform.
//
// The MIDI writer (midi.rs) uses the same resolution as its ticks-per-quarter,
// so ticks map 1:1 onto the file.

/// A non-negative timestamp or duration in ticks.
pub type Tick = u32;

/// Ticks per quarter-note beat.
pub const TICKS_PER_BEAT: Tick = 480;

/// Beats per bar (4/4 throughout).
pub const BEATS_PER_BAR: Tick = 4;

/// Ticks per bar.
pub const TICKS_PER_BAR: Tick = TICKS_PER_BEAT * BEATS_PER_BAR;

pub const EIGHTH: Tick = TICKS_PER_BEAT / 2;
pub const SIXTEENTH: Tick = TICKS_PER_BEAT / 4;
pub const TRIPLET_EIGHTH: Tick = TICKS_PER_BEAT / 3;
pub const HALF: Tick = TICKS_PER_BEAT * 2;
pub const DOTTED_QUARTER: Tick = TICKS_PER_BEAT + EIGHTH;
pub const DOTTED_EIGHTH: Tick = EIGHTH + SIXTEENTH;

/// Bar index (0-based) containing `tick`.
pub fn bar_of(tick: Tick) -> u32 {
    tick / TICKS_PER_BAR
}

/// Beat index within its bar (0..4) for `tick`.
pub fn beat_in_bar(tick: Tick) -> u32 {
    (tick % TICKS_PER_BAR) / TICKS_PER_BEAT
}

/// True when `tick` falls exactly on a beat.
pub fn is_on_beat(tick: Tick) -> bool {
    tick % TICKS_PER_BEAT == 0
}

/// True when `tick` falls on beat 0 or beat 2 of its bar.
pub fn is_strong_beat(tick: Tick) -> bool {
    is_on_beat(tick) && beat_in_bar(tick) % 2 == 0
}

/// Round up to the next bar boundary (identity on a boundary).
pub fn round_up_to_bar(ticks: Tick) -> Tick {
    ticks.div_ceil(TICKS_PER_BAR) * TICKS_PER_BAR
}

/// Round down to the previous beat boundary.
pub fn round_down_to_beat(ticks: Tick) -> Tick {
    ticks - ticks % TICKS_PER_BEAT
}

/// Round up to the next beat boundary (identity on a boundary).
pub fn round_up_to_beat(ticks: Tick) -> Tick {
    ticks.div_ceil(TICKS_PER_BEAT) * TICKS_PER_BEAT
}

pub fn bars(n: u32) -> Tick {
    n * TICKS_PER_BAR
}

pub fn beats(n: u32) -> Tick {
    n * TICKS_PER_BEAT
}

/// Scale a duration by `percent / 100` with integer rounding toward zero,
/// never returning less than one tick for a positive input.
pub fn scale_percent(duration: Tick, percent: u32) -> Tick {
    if duration == 0 {
        return 0;
    }
    let scaled = (duration as u64 * percent as u64 / 100) as Tick;
    scaled.max(1)
}

/// Iterate over every beat boundary in `[from, to)`, starting at the first
/// boundary at or after `from`.
pub fn beat_ticks(from: Tick, to: Tick) -> impl Iterator<Item = Tick> {
    let start = round_up_to_beat(from);
    (start..to).step_by(TICKS_PER_BEAT as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_and_beat_positions() {
        assert_eq!(TICKS_PER_BAR, 1920);
        assert_eq!(bar_of(0), 0);
        assert_eq!(bar_of(1919), 0);
        assert_eq!(bar_of(1920), 1);
        assert_eq!(beat_in_bar(480 * 2), 2);
        assert_eq!(beat_in_bar(1920 + 480 * 3 + 5), 3);
    }

    #[test]
    fn strong_beats_are_one_and_three() {
        assert!(is_strong_beat(0));
        assert!(!is_strong_beat(480));
        assert!(is_strong_beat(960));
        assert!(!is_strong_beat(961));
    }

    #[test]
    fn rounding_helpers() {
        assert_eq!(round_up_to_bar(0), 0);
        assert_eq!(round_up_to_bar(1), 1920);
        assert_eq!(round_up_to_bar(1920), 1920);
        assert_eq!(round_down_to_beat(719), 480);
        assert_eq!(round_up_to_beat(481), 960);
    }

    #[test]
    fn scale_percent_never_zero() {
        assert_eq!(scale_percent(480, 85), 408);
        assert_eq!(scale_percent(1, 50), 1);
        assert_eq!(scale_percent(0, 50), 0);
    }

    #[test]
    fn beat_ticks_cover_half_open_range() {
        let ticks: Vec<Tick> = beat_ticks(100, 1500).collect();
        assert_eq!(ticks, vec![480, 960, 1440]);
    }
}
