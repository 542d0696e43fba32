//! Compiled song: the output of [`crate::parser`] and the input to
//! [`crate::scheduler::Scheduler`].

use super::event::TimelineEvent;
use super::track::Track;

/// SMF format, carried through from the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmfFormat {
    /// Format 0: single track.
    Single = 0,
    /// Format 1: multiple simultaneous tracks.
    Multi = 1,
    /// Format 2: multiple independent tracks (sequentially played patterns).
    Sequential = 2,
}

/// A tempo change, tagged with both its tick and its precomputed
/// wall-clock second (see [`crate::tempo::TempoMap`]).
///
/// Invariant: within a song's `tempo_changes`, `tick` is strictly
/// increasing, and there is always at least one entry at `tick = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoChange {
    pub tick: u32,
    pub seconds: f64,
    pub microseconds_per_beat: u32,
}

/// A time-signature change, tagged with its tick and wall-clock second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSignatureChange {
    pub tick: u32,
    pub seconds: f64,
    pub numerator: u8,
    pub denominator: u8,
}

/// The fully-compiled, immutable-except-for-mixer-state representation of
/// an SMF file.
///
/// `timeline` is exactly the concatenation of all per-track events,
/// sorted by `(tick, kind-priority)`. `total_ticks` is the maximum tick
/// reached by any event; `total_seconds` is that tick converted through
/// the tempo map.
#[derive(Debug, Clone)]
pub struct Song {
    pub file_name: String,
    pub format: SmfFormat,
    pub ticks_per_beat: u16,
    pub tracks: Vec<Track>,
    pub timeline: Vec<TimelineEvent>,
    pub tempo_changes: Vec<TempoChange>,
    pub time_signature_changes: Vec<TimeSignatureChange>,
    pub total_ticks: u32,
    pub total_seconds: f64,
}

impl Song {
    /// Returns the track at `index`, if any.
    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    /// Returns a mutable reference to the track at `index`, if any.
    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }
}
