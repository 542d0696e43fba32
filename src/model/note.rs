//! Absolute-time, paired MIDI note representation.
//!
//! A [`Note`] is produced once per matched note-on/note-off pair during
//! compilation (see [`crate::parser`]) and is immutable afterward except
//! for its `start_seconds`/`end_seconds` fields, which are back-patched by
//! the owning [`crate::tempo::TempoMap`] in a single sequential pass.

/// A single note-on/note-off pair, timed in both ticks and seconds.
///
/// Invariants: `end_tick >= start_tick`, `velocity > 0` (a note-on with
/// velocity 0 is normalized to a note-off during compilation and never
/// produces a `Note`), and the `*_seconds` fields are monotone in the
/// corresponding `*_tick` fields under the owning `TempoMap`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    /// MIDI note number (0-127).
    pub note_number: u8,
    /// Note-on velocity (1-127).
    pub velocity: u8,
    /// MIDI channel (0-15).
    pub channel: u8,
    /// Start tick, absolute from the beginning of the song.
    pub start_tick: u32,
    /// End tick, absolute from the beginning of the song.
    pub end_tick: u32,
    /// Start time in seconds. Filled once by `TempoMap::apply_times_to_notes`.
    pub start_seconds: f64,
    /// End time in seconds. Filled once by `TempoMap::apply_times_to_notes`.
    pub end_seconds: f64,
}

impl Note {
    /// Creates a note with tick timing only; `start_seconds`/`end_seconds`
    /// are left at `0.0` until the compiler applies the tempo map.
    pub fn new(note_number: u8, velocity: u8, channel: u8, start_tick: u32, end_tick: u32) -> Self {
        Self {
            note_number,
            velocity,
            channel,
            start_tick,
            end_tick: end_tick.max(start_tick),
            start_seconds: 0.0,
            end_seconds: 0.0,
        }
    }

    /// Duration of the note in ticks.
    pub fn duration_ticks(&self) -> u32 {
        self.end_tick - self.start_tick
    }

    /// Duration of the note in seconds. Only meaningful after the tempo
    /// map has been applied.
    pub fn duration_seconds(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }

    /// Whether the note is sounding at the given tick.
    pub fn is_active_at_tick(&self, tick: u32) -> bool {
        tick >= self.start_tick && tick < self.end_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_tick_never_precedes_start() {
        let n = Note::new(60, 100, 0, 480, 10);
        assert_eq!(n.end_tick, 480);
        assert_eq!(n.duration_ticks(), 0);
    }

    #[test]
    fn duration_ticks_basic() {
        let n = Note::new(60, 100, 0, 0, 480);
        assert_eq!(n.duration_ticks(), 480);
    }

    #[test]
    fn active_at_tick_is_half_open() {
        let n = Note::new(60, 100, 0, 100, 200);
        assert!(!n.is_active_at_tick(99));
        assert!(n.is_active_at_tick(100));
        assert!(n.is_active_at_tick(199));
        assert!(!n.is_active_at_tick(200));
    }
}
