//! Framewise onset detection over a pitch-sample stream (spec.md §4.5).
//!
//! No teacher or pack file implements anything like this (none of the
//! example repos do live pitch tracking); the state machine here is built
//! directly from the spec's per-frame logic table, kept in the surrounding
//! modules' idiom: a plain struct with `Default`-backed configuration and
//! inline `#[cfg(test)]` coverage, same as `tempo.rs`/`model/*.rs`. The
//! subscribe/cancel capability follows spec.md §9's design note ("the
//! producer exposes `subscribe(handler) -> Subscription`"), the same shape
//! `FollowController` uses for its own outbound callbacks.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use super::{OnsetEvent, PitchSample};

/// Tunable thresholds for [`OnsetDetector`], defaulted per spec.md §4.5's
/// configuration table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnsetDetectorConfig {
    /// Minimum linear volume for a frame to count as valid.
    pub volume_threshold: f64,
    /// Minimum detector precision for a frame to count as valid.
    pub precision_threshold: f64,
    /// Suppresses same-note retriggers within this window.
    pub debounce_ms: f64,
    /// Lower MIDI note clamp (A0).
    pub min_midi_note: u8,
    /// Upper MIDI note clamp (C8).
    pub max_midi_note: u8,
}

impl Default for OnsetDetectorConfig {
    fn default() -> Self {
        Self {
            volume_threshold: 0.05,
            precision_threshold: 0.5,
            debounce_ms: 80.0,
            min_midi_note: 21,
            max_midi_note: 108,
        }
    }
}

/// Number of consecutive invalid frames that clears `is_note_active`.
const SILENCE_FRAMES_TO_CLEAR: u32 = 3;

/// Pull-mode upstream producer of [`PitchSample`]s (spec.md §4.5: "a lazy
/// stream of `PitchSample`, pull or push; restartable"). `attach` takes
/// ownership of one of these; `OnsetDetector::pump` drives it.
pub trait PitchSource: Send {
    /// Returns the next available frame, or `None` if the source currently
    /// has nothing buffered (not necessarily exhausted for good).
    fn next_sample(&mut self) -> Option<PitchSample>;
}

type Handler = Box<dyn FnMut(OnsetEvent) + Send>;

/// A live registration returned by [`OnsetDetector::subscribe`].
/// `cancel()` synchronously removes the handler (spec.md §5's
/// cancellation model: "`detach()` cancels the onset subscription").
pub struct Subscription {
    id: u64,
    handlers: Weak<Mutex<Vec<(u64, Handler)>>>,
}

impl Subscription {
    /// Removes the associated handler. A no-op if the detector that issued
    /// this subscription has already been dropped.
    pub fn cancel(self) {
        if let Some(handlers) = self.handlers.upgrade() {
            if let Ok(mut list) = handlers.lock() {
                list.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Converts a stream of [`PitchSample`]s into a stream of [`OnsetEvent`]s
/// via hysteresis and debounce.
///
/// The detector is pure and has no notion of wall-clock scheduling of its
/// own: callers drive it one frame at a time with [`Self::process_sample`],
/// push a whole batch through [`Self::process_stream`], or `attach` a
/// [`PitchSource`] and let [`Self::pump`] pull from it. Every onset
/// produced by any of these is both returned to the caller and forwarded
/// to every handler registered via [`Self::subscribe`].
pub struct OnsetDetector {
    config: OnsetDetectorConfig,
    last_onset_note: i16,
    last_onset_time: f64,
    is_note_active: bool,
    silence_frames: u32,
    source: Option<Box<dyn PitchSource>>,
    handlers: Arc<Mutex<Vec<(u64, Handler)>>>,
    next_subscriber_id: u64,
}

impl OnsetDetector {
    /// Creates a detector with the given configuration, in reset state.
    pub fn new(config: OnsetDetectorConfig) -> Self {
        Self {
            config,
            last_onset_note: -1,
            last_onset_time: 0.0,
            is_note_active: false,
            silence_frames: 0,
            source: None,
            handlers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber_id: 0,
        }
    }

    /// Clears all state: as if no samples had ever been seen. Subscribed
    /// handlers and the attached source are unaffected.
    pub fn reset(&mut self) {
        self.last_onset_note = -1;
        self.last_onset_time = 0.0;
        self.is_note_active = false;
        self.silence_frames = 0;
    }

    /// Replaces the detector's configuration and resets its state.
    pub fn reconfigure(&mut self, config: OnsetDetectorConfig) {
        self.config = config;
        self.reset();
    }

    /// Attaches an upstream pitch-sample source, replacing any prior one
    /// and resetting all detector state (spec.md §4.5: "`attach(stream)`
    /// replaces any prior source and resets").
    pub fn attach(&mut self, source: impl PitchSource + 'static) {
        self.source = Some(Box::new(source));
        self.reset();
    }

    /// Detaches the current upstream source, if any (spec.md §5:
    /// "`detach()` cancels the onset subscription").
    pub fn detach(&mut self) {
        self.source = None;
    }

    /// Registers `handler` to be invoked, in arrival order, with every
    /// onset this detector produces from here on (spec.md §9: "the
    /// producer... exposes `subscribe(handler) -> Subscription`").
    pub fn subscribe(&mut self, handler: impl FnMut(OnsetEvent) + Send + 'static) -> Subscription {
        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        if let Ok(mut list) = self.handlers.lock() {
            list.push((id, Box::new(handler)));
        }
        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Pulls every frame currently available from the attached source
    /// (via repeated [`PitchSource::next_sample`] calls until it returns
    /// `None`), feeding each through the detector. Returns every onset
    /// produced, in order. A no-op (returns an empty vec) if nothing is
    /// attached.
    pub fn pump(&mut self) -> Vec<OnsetEvent> {
        let Some(mut source) = self.source.take() else {
            return Vec::new();
        };
        let mut onsets = Vec::new();
        while let Some(sample) = source.next_sample() {
            if let Some(onset) = self.process_sample(sample) {
                onsets.push(onset);
            }
        }
        self.source = Some(source);
        onsets
    }

    fn is_valid(&self, sample: &PitchSample) -> bool {
        (self.config.min_midi_note as i16..=self.config.max_midi_note as i16)
            .contains(&sample.midi_note)
            && sample.volume_linear >= self.config.volume_threshold
            && sample.precision >= self.config.precision_threshold
            && sample.frequency_hz > 0.0
    }

    fn debounced(&self, candidate_note: u8, timestamp: f64) -> bool {
        candidate_note as i16 == self.last_onset_note
            && (timestamp - self.last_onset_time) * 1000.0 < self.config.debounce_ms
    }

    fn notify(&mut self, onset: OnsetEvent) {
        if let Ok(mut handlers) = self.handlers.lock() {
            for (_, handler) in handlers.iter_mut() {
                handler(onset);
            }
        }
    }

    /// Feeds one frame through the detector, returning an onset if this
    /// frame produced one (and notifying every subscriber either way).
    pub fn process_sample(&mut self, sample: PitchSample) -> Option<OnsetEvent> {
        if !self.is_valid(&sample) {
            self.silence_frames += 1;
            if self.silence_frames >= SILENCE_FRAMES_TO_CLEAR {
                self.is_note_active = false;
            }
            return None;
        }

        self.silence_frames = 0;
        let should_emit = if !self.is_note_active {
            self.is_note_active = true;
            true
        } else {
            sample.midi_note != self.last_onset_note
        };

        if !should_emit {
            return None;
        }
        let note = sample.midi_note as u8;
        if self.debounced(note, sample.timestamp) {
            return None;
        }

        self.last_onset_note = sample.midi_note;
        self.last_onset_time = sample.timestamp;
        let onset = OnsetEvent {
            midi_note: note,
            frequency_hz: sample.frequency_hz,
            volume: sample.volume_linear,
            timestamp: sample.timestamp,
        };
        self.notify(onset);
        Some(onset)
    }

    /// Feeds an entire batch of frames through the detector in order,
    /// collecting every onset produced.
    pub fn process_stream<I: IntoIterator<Item = PitchSample>>(&mut self, samples: I) -> Vec<OnsetEvent> {
        samples
            .into_iter()
            .filter_map(|sample| self.process_sample(sample))
            .collect()
    }
}

impl fmt::Debug for OnsetDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnsetDetector")
            .field("config", &self.config)
            .field("last_onset_note", &self.last_onset_note)
            .field("last_onset_time", &self.last_onset_time)
            .field("is_note_active", &self.is_note_active)
            .field("silence_frames", &self.silence_frames)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl Default for OnsetDetector {
    fn default() -> Self {
        Self::new(OnsetDetectorConfig::default())
    }
}
