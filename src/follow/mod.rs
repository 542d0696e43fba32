//! Adaptive follow mode: onset detection and score-following (spec.md §4.5,
//! §4.6).

mod controller;
mod onset;

pub use controller::{FollowConfig, FollowController, FollowState};
pub use onset::{OnsetDetector, OnsetDetectorConfig, PitchSource, Subscription};

/// One frame of pitch-tracking input from an upstream microphone analyzer
/// (spec.md §3, §6 "Pitch-sample interface"). The engine treats the
/// producer as an external collaborator; it never reads audio itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchSample {
    /// Detected fundamental frequency in Hz. `<= 0.0` means unvoiced/silent.
    pub frequency_hz: f64,
    /// Nearest MIDI note number for `frequency_hz`, or `-1` if no pitch was
    /// detected this frame.
    pub midi_note: i16,
    /// Linear volume estimate in `[0, 1]`.
    pub volume_linear: f64,
    /// Volume estimate in dBFS.
    pub volume_dbfs: f64,
    /// Detector confidence in `[0, 1]`.
    pub precision: f64,
    /// Wall-clock timestamp in seconds, monotonic within a stream.
    pub timestamp: f64,
}

/// A detected note onset, emitted by [`OnsetDetector`] and consumed by
/// [`FollowController`] (spec.md §3: `{midi_note, frequency_hz, volume,
/// timestamp}`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnsetEvent {
    pub midi_note: u8,
    /// Fundamental frequency of the triggering frame, carried through from
    /// its [`PitchSample`].
    pub frequency_hz: f64,
    /// Linear volume of the triggering frame.
    pub volume: f64,
    pub timestamp: f64,
}
