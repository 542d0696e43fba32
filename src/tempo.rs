//! Bidirectional tick <-> wall-clock-seconds mapping under piecewise-constant
//! tempo (spec.md §4.1).
//!
//! Grounded on `litong01-solobandultra/rust/scorelib/src/timemap.rs`'s
//! precompute-then-walk shape (`precompute_measure_states` +
//! `generate_timemap`), adapted from MusicXML measure/millisecond units to
//! MIDI tick/microseconds-per-beat units.

use crate::model::{Note, TempoChange, TimelineEvent};

/// Precomputed tick <-> seconds mapping for a sequence of tempo changes.
///
/// Construction precomputes, for each segment `i`, the absolute wall-clock
/// second at which `tempo_changes[i].tick` occurs, using the *preceding*
/// tempo: `seconds[i] = seconds[i-1] + (tick[i]-tick[i-1]) * µs[i-1] /
/// (ticks_per_beat * 1e6)`, with `seconds[0] = 0`.
#[derive(Debug, Clone)]
pub struct TempoMap {
    ticks_per_beat: f64,
    /// `(tick, seconds, microseconds_per_beat)` per segment, sorted by tick.
    segments: Vec<(u32, f64, u32)>,
}

impl TempoMap {
    /// Builds a tempo map from `ticks_per_beat` and a sorted, non-empty
    /// sequence of tempo changes. The first change's `tick` need not be 0
    /// in the input (callers are expected to have synthesized a default
    /// `{tick: 0, µs_per_beat: 500000}` entry during compilation if the
    /// file had none) but this constructor does not enforce that itself —
    /// it only requires a non-empty, tick-sorted sequence.
    ///
    /// # Panics
    ///
    /// Panics if `changes` is empty.
    pub fn new(ticks_per_beat: u16, changes: &[TempoChange]) -> Self {
        assert!(
            !changes.is_empty(),
            "TempoMap requires at least one tempo change"
        );
        let ticks_per_beat = ticks_per_beat as f64;
        let mut segments = Vec::with_capacity(changes.len());
        let mut seconds_acc = 0.0_f64;
        let mut prev_tick = changes[0].tick;
        let mut prev_usec = changes[0].microseconds_per_beat;

        for (i, change) in changes.iter().enumerate() {
            if i == 0 {
                segments.push((change.tick, 0.0, change.microseconds_per_beat));
            } else {
                let delta_ticks = (change.tick - prev_tick) as f64;
                seconds_acc += delta_ticks * prev_usec as f64 / (ticks_per_beat * 1e6);
                segments.push((change.tick, seconds_acc, change.microseconds_per_beat));
            }
            prev_tick = change.tick;
            prev_usec = change.microseconds_per_beat;
        }

        Self {
            ticks_per_beat,
            segments,
        }
    }

    /// Index of the segment governing `tick`: the largest `i` with
    /// `segments[i].0 <= tick`.
    fn segment_index_for_tick(&self, tick: u32) -> usize {
        match self.segments.binary_search_by_key(&tick, |s| s.0) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        }
    }

    /// Index of the segment governing wall-clock second `seconds`: the
    /// largest `i` with `segments[i].1 <= seconds`.
    fn segment_index_for_seconds(&self, seconds: f64) -> usize {
        match self
            .segments
            .binary_search_by(|s| s.1.partial_cmp(&seconds).unwrap())
        {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        }
    }

    /// Converts an absolute tick to wall-clock seconds.
    pub fn tick_to_seconds(&self, tick: u32) -> f64 {
        let i = self.segment_index_for_tick(tick);
        let (seg_tick, seg_seconds, seg_usec) = self.segments[i];
        let delta_ticks = tick.saturating_sub(seg_tick) as f64;
        seg_seconds + delta_ticks * seg_usec as f64 / (self.ticks_per_beat * 1e6)
    }

    /// Converts wall-clock seconds to an absolute tick (inverse of
    /// `tick_to_seconds`, linear within the governing segment).
    pub fn seconds_to_tick(&self, seconds: f64) -> i64 {
        let i = self.segment_index_for_seconds(seconds);
        let (seg_tick, seg_seconds, seg_usec) = self.segments[i];
        let delta_seconds = (seconds - seg_seconds).max(0.0);
        let delta_ticks = delta_seconds * self.ticks_per_beat * 1e6 / seg_usec as f64;
        seg_tick as i64 + delta_ticks.round() as i64
    }

    /// Current tempo in beats-per-minute at `tick`.
    pub fn bpm_at_tick(&self, tick: u32) -> f64 {
        let i = self.segment_index_for_tick(tick);
        6.0e7 / self.segments[i].2 as f64
    }

    /// Applies `tick_to_seconds` to every event in an already-tick-sorted
    /// slice via a single sequential walk (mandated by spec.md §4.1: this
    /// must be O(N + S), not O(N log S)).
    pub fn apply_times_to_events(&self, events: &mut [TimelineEvent]) {
        let mut seg = 0usize;
        for event in events.iter_mut() {
            while seg + 1 < self.segments.len() && self.segments[seg + 1].0 <= event.tick {
                seg += 1;
            }
            let (seg_tick, seg_seconds, seg_usec) = self.segments[seg];
            let delta_ticks = event.tick.saturating_sub(seg_tick) as f64;
            event.seconds =
                seg_seconds + delta_ticks * seg_usec as f64 / (self.ticks_per_beat * 1e6);
        }
    }

    /// Applies tick-to-seconds conversion to every note's `start_seconds`/
    /// `end_seconds` via a single sequential walk, same contract as
    /// `apply_times_to_events`. Notes must already be sorted by
    /// `start_tick`; `end_tick` may fall in a later segment than
    /// `start_tick`; the walk handles that by re-resolving the segment
    /// for `end_tick` independently (still amortized O(N+S) because the
    /// segment cursor for `end_tick` only ever advances).
    pub fn apply_times_to_notes(&self, notes: &mut [Note]) {
        let mut start_seg = 0usize;
        let mut end_seg = 0usize;
        for note in notes.iter_mut() {
            while start_seg + 1 < self.segments.len() && self.segments[start_seg + 1].0 <= note.start_tick {
                start_seg += 1;
            }
            let (seg_tick, seg_seconds, seg_usec) = self.segments[start_seg];
            let delta_ticks = note.start_tick.saturating_sub(seg_tick) as f64;
            note.start_seconds =
                seg_seconds + delta_ticks * seg_usec as f64 / (self.ticks_per_beat * 1e6);

            if end_seg < start_seg {
                end_seg = start_seg;
            }
            while end_seg + 1 < self.segments.len() && self.segments[end_seg + 1].0 <= note.end_tick {
                end_seg += 1;
            }
            let (seg_tick, seg_seconds, seg_usec) = self.segments[end_seg];
            let delta_ticks = note.end_tick.saturating_sub(seg_tick) as f64;
            note.end_seconds =
                seg_seconds + delta_ticks * seg_usec as f64 / (self.ticks_per_beat * 1e6);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempo(tick: u32, usec: u32) -> TempoChange {
        TempoChange {
            tick,
            seconds: 0.0,
            microseconds_per_beat: usec,
        }
    }

    /// S1 — single tempo, 480 ticks/beat, 500000 µs/beat (120 BPM).
    #[test]
    fn s1_tempo_map_basic() {
        let map = TempoMap::new(480, &[tempo(0, 500_000)]);
        assert!((map.tick_to_seconds(480) - 0.5).abs() < 1e-9);
        assert!((map.tick_to_seconds(960) - 1.0).abs() < 1e-9);
    }

    /// S2 — tempo change at tick 960 from 120 BPM to 240 BPM.
    #[test]
    fn s2_tempo_change() {
        let map = TempoMap::new(480, &[tempo(0, 500_000), tempo(960, 250_000)]);
        assert!((map.tick_to_seconds(1440) - 1.25).abs() < 1e-9);
    }

    #[test]
    fn bpm_at_tick_matches_segment() {
        let map = TempoMap::new(480, &[tempo(0, 500_000), tempo(960, 250_000)]);
        assert!((map.bpm_at_tick(0) - 120.0).abs() < 1e-9);
        assert!((map.bpm_at_tick(1440) - 240.0).abs() < 1e-9);
    }

    #[test]
    fn seconds_to_tick_round_trips() {
        let map = TempoMap::new(480, &[tempo(0, 500_000), tempo(960, 250_000)]);
        for t in [0u32, 100, 480, 960, 1000, 1440, 2000] {
            let s = map.tick_to_seconds(t);
            let back = map.seconds_to_tick(s);
            assert_eq!(back, t as i64, "tick {t} -> seconds {s} -> tick {back}");
        }
    }

    #[test]
    fn consecutive_segment_gap_matches_formula() {
        let changes = [tempo(0, 500_000), tempo(960, 250_000), tempo(1920, 600_000)];
        let map = TempoMap::new(480, &changes);
        let expected_gap =
            (changes[2].tick - changes[1].tick) as f64 * changes[1].microseconds_per_beat as f64
                / (480.0 * 1e6);
        let gap = map.tick_to_seconds(changes[2].tick) - map.tick_to_seconds(changes[1].tick);
        assert!((gap - expected_gap).abs() < 1e-12);
    }

    #[test]
    fn apply_times_to_events_matches_direct_conversion() {
        let map = TempoMap::new(480, &[tempo(0, 500_000), tempo(960, 250_000)]);
        let mut events: Vec<TimelineEvent> = [0u32, 480, 960, 1440, 2000]
            .iter()
            .map(|&tick| TimelineEvent {
                kind: crate::model::EventKind::NoteOn,
                tick,
                seconds: 0.0,
                channel: 0,
                track_index: 0,
                data1: 0,
                data2: 0,
            })
            .collect();
        map.apply_times_to_events(&mut events);
        for event in &events {
            assert!((event.seconds - map.tick_to_seconds(event.tick)).abs() < 1e-9);
        }
    }

    #[test]
    fn apply_times_to_notes_matches_direct_conversion() {
        let map = TempoMap::new(480, &[tempo(0, 500_000), tempo(960, 250_000)]);
        let mut notes = vec![
            Note::new(60, 100, 0, 0, 480),
            Note::new(62, 100, 0, 900, 1500),
        ];
        map.apply_times_to_notes(&mut notes);
        for note in &notes {
            assert!((note.start_seconds - map.tick_to_seconds(note.start_tick)).abs() < 1e-9);
            assert!((note.end_seconds - map.tick_to_seconds(note.end_tick)).abs() < 1e-9);
            assert!(note.end_seconds >= note.start_seconds);
        }
    }
}
