//! A logically grouped subset of a compiled song.

use super::event::TimelineEvent;
use super::note::Note;
use std::collections::HashMap;

/// One logical SMF track: its own notes, events, channel set, and the
/// mixer-ish state (`is_muted`, `volume`) the scheduler reads from.
///
/// A track owns its notes and events; the same events also appear by
/// value in the song's global sorted timeline (small structs, copy
/// semantics — see spec.md §3).
#[derive(Debug, Clone)]
pub struct Track {
    /// Index of this track within the song (matches `TimelineEvent::track_index`).
    pub index: usize,
    /// Track name, taken from the first `TrackName` meta event, if any.
    pub name: String,
    /// MIDI channels this track emits events on.
    pub channels: Vec<u8>,
    /// Program (instrument) currently selected per channel.
    pub program_by_channel: HashMap<u8, u8>,
    /// Notes belonging to this track, sorted by `start_tick`.
    pub notes: Vec<Note>,
    /// Events belonging to this track, sorted by `(tick, kind-priority)`.
    pub events: Vec<TimelineEvent>,
    /// Whether this track is muted for playback.
    pub is_muted: bool,
    /// Track volume multiplier in `[0, 1]`, applied to note-on velocity.
    pub volume: f32,
}

impl Track {
    /// Creates an empty track at the given index.
    pub fn new(index: usize) -> Self {
        Self {
            index,
            name: String::new(),
            channels: Vec::new(),
            program_by_channel: HashMap::new(),
            notes: Vec::new(),
            events: Vec::new(),
            is_muted: false,
            volume: 1.0,
        }
    }

    /// Registers a channel as used by this track, if not already present.
    pub fn register_channel(&mut self, channel: u8) {
        if !self.channels.contains(&channel) {
            self.channels.push(channel);
        }
    }

    /// Sets the track name if it hasn't been set yet ("first occurrence wins").
    pub fn set_name_if_unset(&mut self, name: String) {
        if self.name.is_empty() {
            self.name = name;
        }
    }

    /// Sorts `notes` by `start_tick` and `events` by `(tick, kind-priority)`,
    /// as spec.md §4.2 requires after the per-track walk.
    pub fn sort(&mut self) {
        self.notes.sort_by_key(|n| n.start_tick);
        super::event::sort_events(&mut self.events);
    }
}
