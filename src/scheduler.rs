//! Playback scheduler: transport state machine and timeline dispatch
//! (spec.md §4.4).
//!
//! Grounded on `audio/engine.rs`'s `AudioEngine` transport (`PlaybackState`,
//! `set_playing`/`stop`/`position_ticks`), generalized from ad-hoc
//! play/pause/position fields into the full state machine spec.md mandates:
//! ticker-driven timeline dispatch, `seek` with program-change replay, and
//! track-index (not channel) indexed mute/volume.

use std::time::Instant;

use crate::model::{EventKind, Song};
use crate::synth::Synth;
use crate::tempo::TempoMap;

/// Transport state (spec.md §4.4's state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Playing,
    Paused,
}

/// Drives a loaded [`Song`] against a [`Synth`], advancing a wall-clock
/// cursor and dispatching timeline events in order.
///
/// The scheduling model is single-threaded cooperative (spec.md §5): every
/// method here takes `&mut self`, so the caller is responsible for the
/// serialization the spec requires (a mutex, a single-threaded runtime, or
/// a command channel feeding a single owner). `tick()` is the only method
/// that advances time; it must never be called concurrently with itself
/// or with any other method on the same instance.
pub struct Scheduler<S: Synth> {
    synth: S,
    song: Option<Song>,
    tempo_map: Option<TempoMap>,
    state: SchedulerState,
    current_seconds: f64,
    cursor: usize,
    speed: f64,
    last_tick_wall: Option<Instant>,
}

const MIN_SPEED: f64 = 0.25;
const MAX_SPEED: f64 = 4.0;

impl<S: Synth> Scheduler<S> {
    /// Creates a scheduler with no song loaded, wrapping `synth`.
    pub fn new(synth: S) -> Self {
        Self {
            synth,
            song: None,
            tempo_map: None,
            state: SchedulerState::Stopped,
            current_seconds: 0.0,
            cursor: 0,
            speed: 1.0,
            last_tick_wall: None,
        }
    }

    /// Loads `song`, resetting transport to `Stopped` at position 0.
    pub fn load_song(&mut self, song: Song) {
        self.tempo_map = Some(TempoMap::new(song.ticks_per_beat, &song.tempo_changes));
        self.song = Some(song);
        self.state = SchedulerState::Stopped;
        self.current_seconds = 0.0;
        self.cursor = 0;
        self.last_tick_wall = None;
    }

    /// Delegates soundfont loading (from a path) to the wrapped [`Synth`].
    pub fn load_soundfont(&mut self, path: &std::path::Path) -> Result<(), crate::error::SynthError> {
        self.synth.load_soundfont(crate::synth::SoundfontSource::Path(path))
    }

    /// Delegates soundfont loading (from in-memory bytes) to the wrapped
    /// [`Synth`] (spec.md §4.3: `load_soundfont` accepts a path *or* bytes).
    pub fn load_soundfont_bytes(&mut self, bytes: &[u8]) -> Result<(), crate::error::SynthError> {
        self.synth.load_soundfont(crate::synth::SoundfontSource::Bytes(bytes))
    }

    /// Starts or resumes playback. Silently rejected if no song is loaded,
    /// the synth is not ready, or already `Playing` (spec.md §4.4).
    pub fn play(&mut self) {
        if self.state == SchedulerState::Playing {
            return;
        }
        if self.song.is_none() || !self.synth.is_ready() {
            tracing::debug!("play() rejected: no song loaded or synth not ready");
            return;
        }
        self.state = SchedulerState::Playing;
        self.last_tick_wall = Some(Instant::now());
    }

    /// Pauses playback, silencing all notes. No-op if not `Playing`.
    pub fn pause(&mut self) {
        if self.state != SchedulerState::Playing {
            return;
        }
        self.state = SchedulerState::Paused;
        self.synth.all_notes_off();
    }

    /// Stops playback and rewinds to the start, silencing all notes.
    pub fn stop(&mut self) {
        self.state = SchedulerState::Stopped;
        self.current_seconds = 0.0;
        self.cursor = 0;
        self.synth.all_notes_off();
    }

    /// Releases the underlying synth's native resources. After this call
    /// the scheduler is still usable (it will simply drive a non-ready
    /// synth) but audio output is gone for good.
    pub fn shutdown(&mut self) {
        self.synth.shutdown();
    }

    /// Clamps and applies a new playback speed; it takes effect on the
    /// next `tick()`.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
    }

    /// Seeks to `seconds`, clamped to `[0, total_seconds]`, replaying
    /// every program change up to the new cursor so instrument state
    /// stays correct (spec.md §4.4's "Seek" algorithm, step 5 — mandatory).
    pub fn seek(&mut self, seconds: f64) {
        let Some(song) = &self.song else { return };
        let was_playing = self.state == SchedulerState::Playing;
        if was_playing {
            self.state = SchedulerState::Paused;
        }

        self.current_seconds = seconds.clamp(0.0, song.total_seconds);
        self.synth.all_notes_off();

        self.cursor = song
            .timeline
            .partition_point(|e| e.seconds <= self.current_seconds);

        let mut latest_program: std::collections::HashMap<u8, u8> = std::collections::HashMap::new();
        for event in &song.timeline[..self.cursor] {
            if event.kind == EventKind::ProgramChange {
                latest_program.insert(event.channel as u8, event.data1);
            }
        }
        for (channel, program) in latest_program {
            self.synth.set_instrument(channel, 0, program);
        }

        if was_playing {
            self.state = SchedulerState::Playing;
            self.last_tick_wall = Some(Instant::now());
        }
    }

    /// Toggles mute on `track_index`, if it exists.
    pub fn toggle_track_mute(&mut self, track_index: usize) {
        if let Some(song) = &mut self.song {
            if let Some(track) = song.track_mut(track_index) {
                track.is_muted = !track.is_muted;
            }
        }
    }

    /// Sets the volume multiplier (clamped to `[0, 1]`) on `track_index`.
    pub fn set_track_volume(&mut self, track_index: usize, volume: f32) {
        if let Some(song) = &mut self.song {
            if let Some(track) = song.track_mut(track_index) {
                track.volume = volume.clamp(0.0, 1.0);
            }
        }
    }

    /// Current playhead position, in seconds.
    pub fn current_seconds(&self) -> f64 {
        self.current_seconds
    }

    /// Playhead position as a fraction of total duration, in `[0, 1]`.
    /// `0.0` if no song is loaded or the song has zero duration.
    pub fn progress(&self) -> f64 {
        match &self.song {
            Some(song) if song.total_seconds > 0.0 => {
                (self.current_seconds / song.total_seconds).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }

    /// Current tempo in BPM at the playhead (spec.md §4.4's "Current BPM").
    pub fn current_bpm(&self) -> f64 {
        match &self.tempo_map {
            Some(map) => map.bpm_at_tick(map.seconds_to_tick(self.current_seconds).max(0) as u32),
            None => 0.0,
        }
    }

    /// Current transport state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// The loaded song, if any. Exposed the same way the teacher's
    /// `AudioEngine::synth()` exposes its inner synthesizer: a read-only
    /// escape hatch for callers (and tests) that need more than the
    /// summary accessors above.
    pub fn song(&self) -> Option<&Song> {
        self.song.as_ref()
    }

    /// Index of the next undispatched timeline event.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Read-only access to the wrapped synth, e.g. to inspect a test
    /// double's recorded calls.
    pub fn synth(&self) -> &S {
        &self.synth
    }

    /// Advances the playhead by the wall-clock time elapsed since the
    /// previous `tick()`, dispatching every timeline event the playhead
    /// has now passed. A no-op unless `state() == Playing`.
    ///
    /// Callers invoke this from a periodic timer at the nominal 5 ms
    /// cadence spec.md §4.4 describes; the cadence itself is a concern
    /// for the caller (the scheduler only needs `delta_wall`).
    pub fn tick(&mut self) {
        if self.state != SchedulerState::Playing {
            return;
        }
        let now = Instant::now();
        let last = self.last_tick_wall.unwrap_or(now);
        let delta_wall = now.duration_since(last).as_secs_f64();
        self.last_tick_wall = Some(now);
        self.advance(delta_wall);
    }

    /// Advances the playhead by exactly `delta_seconds` of wall-clock time
    /// (scaled by `speed`) and dispatches every timeline event the
    /// playhead now passes. `tick()` is a thin wrapper over this that
    /// derives `delta_seconds` from real elapsed time; this method exists
    /// directly so callers (and tests) can drive the scheduler
    /// deterministically without depending on wall-clock jitter. A no-op
    /// unless `state() == Playing`.
    pub fn advance(&mut self, delta_seconds: f64) {
        if self.state != SchedulerState::Playing {
            return;
        }
        self.current_seconds += delta_seconds * self.speed;

        let Some(song) = &self.song else { return };
        if self.current_seconds >= song.total_seconds {
            self.stop();
            return;
        }

        let current_seconds = self.current_seconds;
        let mut cursor = self.cursor;
        while cursor < song.timeline.len() && song.timeline[cursor].seconds <= current_seconds {
            dispatch_event(&song.timeline[cursor], song, &self.synth);
            cursor += 1;
        }
        self.cursor = cursor;
    }
}

/// Applies one timeline event's effect on `synth`, per spec.md §4.4's
/// "Event dispatch" table.
fn dispatch_event(event: &crate::model::TimelineEvent, song: &Song, synth: &impl Synth) {
    let Some(track) = song.track(event.track_index) else {
        return;
    };
    match event.kind {
        EventKind::NoteOn => {
            if track.is_muted {
                return;
            }
            let scaled = (event.data2 as f32 * track.volume).round();
            let effective_velocity = scaled.clamp(0.0, 127.0) as u8;
            if effective_velocity == 0 {
                return;
            }
            synth.note_on(event.channel as u8, event.data1, effective_velocity);
        }
        EventKind::NoteOff => {
            synth.note_off(event.channel as u8, event.data1);
        }
        EventKind::ProgramChange => {
            synth.set_instrument(event.channel as u8, 0, event.data1);
        }
        EventKind::ControlChange
        | EventKind::PitchBend
        | EventKind::Tempo
        | EventKind::TimeSignature
        | EventKind::EndOfTrack => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventKind, SmfFormat, TempoChange, TimelineEvent, Track};
    use crate::synth::RecordingSynth;

    fn program_then_note_song() -> Song {
        let mut track = Track::new(0);
        track.register_channel(0);
        track.events.push(TimelineEvent {
            kind: EventKind::ProgramChange,
            tick: 0,
            seconds: 0.0,
            channel: 0,
            track_index: 0,
            data1: 41,
            data2: 0,
        });
        track.events.push(TimelineEvent {
            kind: EventKind::NoteOn,
            tick: 4800,
            seconds: 5.0,
            channel: 0,
            track_index: 0,
            data1: 60,
            data2: 100,
        });
        track.events.push(TimelineEvent {
            kind: EventKind::NoteOff,
            tick: 5280,
            seconds: 5.5,
            channel: 0,
            track_index: 0,
            data1: 60,
            data2: 0,
        });
        let timeline = track.events.clone();
        Song {
            file_name: "s5.mid".into(),
            format: SmfFormat::Single,
            ticks_per_beat: 480,
            tracks: vec![track],
            timeline,
            tempo_changes: vec![TempoChange { tick: 0, seconds: 0.0, microseconds_per_beat: 500_000 }],
            time_signature_changes: vec![],
            total_ticks: 6000,
            total_seconds: 6.25,
        }
    }

    /// S5 — seek reapplies program: seeking past tick 4800 before playback
    /// starts must call `set_instrument(0, 0, 41)` exactly once before
    /// `note_on` is dispatched.
    #[test]
    fn s5_seek_reapplies_program() {
        let mut scheduler = Scheduler::new(RecordingSynth::default());
        scheduler.load_song(program_then_note_song());
        scheduler.synth.load_soundfont(crate::synth::SoundfontSource::Path(std::path::Path::new("x"))).unwrap();
        scheduler.seek(5.2);

        let instrument_calls = scheduler.synth.instrument_calls.lock().unwrap().clone();
        assert_eq!(instrument_calls, vec![(0, 0, 41)]);
    }

    #[test]
    fn play_rejected_without_loaded_song() {
        let mut scheduler = Scheduler::new(RecordingSynth::default());
        scheduler.synth.load_soundfont(crate::synth::SoundfontSource::Path(std::path::Path::new("x"))).unwrap();
        scheduler.play();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn play_rejected_when_synth_not_ready() {
        let mut scheduler = Scheduler::new(RecordingSynth::default());
        scheduler.load_song(program_then_note_song());
        scheduler.play();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn muted_track_drops_note_on_but_not_note_off() {
        let mut song = program_then_note_song();
        song.tracks[0].is_muted = true;
        let mut scheduler = Scheduler::new(RecordingSynth::default());
        scheduler.load_song(song);
        scheduler.synth.load_soundfont(crate::synth::SoundfontSource::Path(std::path::Path::new("x"))).unwrap();
        scheduler.play();
        scheduler.advance(5.6); // passes both the note-on (5.0s) and note-off (5.5s)

        assert!(scheduler.synth.note_on_calls.lock().unwrap().is_empty());
        assert_eq!(*scheduler.synth.note_off_calls.lock().unwrap(), vec![(0, 60)]);
    }

    #[test]
    fn volume_scales_velocity_and_can_drop_to_zero() {
        let mut song = program_then_note_song();
        song.tracks[0].volume = 0.0;
        let mut scheduler = Scheduler::new(RecordingSynth::default());
        scheduler.load_song(song);
        scheduler.synth.load_soundfont(crate::synth::SoundfontSource::Path(std::path::Path::new("x"))).unwrap();
        scheduler.play();
        scheduler.advance(5.6);
        assert!(scheduler.synth.note_on_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn stop_resets_position_and_cursor() {
        let mut scheduler = Scheduler::new(RecordingSynth::default());
        scheduler.load_song(program_then_note_song());
        scheduler.synth.load_soundfont(crate::synth::SoundfontSource::Path(std::path::Path::new("x"))).unwrap();
        scheduler.seek(5.2);
        scheduler.stop();
        assert_eq!(scheduler.current_seconds(), 0.0);
        assert_eq!(scheduler.cursor, 0);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn set_speed_clamps_to_bounds() {
        let mut scheduler = Scheduler::new(RecordingSynth::default());
        scheduler.set_speed(100.0);
        assert_eq!(scheduler.speed, MAX_SPEED);
        scheduler.set_speed(-5.0);
        assert_eq!(scheduler.speed, MIN_SPEED);
    }

    #[test]
    fn progress_is_fraction_of_total_seconds() {
        let mut scheduler = Scheduler::new(RecordingSynth::default());
        scheduler.load_song(program_then_note_song());
        scheduler.synth.load_soundfont(crate::synth::SoundfontSource::Path(std::path::Path::new("x"))).unwrap();
        scheduler.seek(3.125);
        assert!((scheduler.progress() - 0.5).abs() < 1e-9);
    }
}
