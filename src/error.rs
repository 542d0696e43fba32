//! Error types surfaced to callers of the public API (spec.md §7).
//!
//! Errors with a user-actionable cause (parse failure, soundfont failure,
//! starting follow mode with no score) are surfaced here. Transient
//! realtime errors — a dropped note-on, a synth call that failed — are
//! swallowed and logged via `tracing`, never propagated, so playback never
//! aborts mid-song.

use thiserror::Error;

/// Errors returned from [`crate::parser::parse`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// The SMF header chunk was missing or malformed.
    #[error("malformed or missing MIDI header")]
    Header,
    /// The byte stream ended before a track's events were fully decoded.
    #[error("unexpected end of MIDI stream")]
    Truncated,
    /// The file uses a timing format this engine cannot schedule against
    /// (currently: SMPTE timecode timing).
    #[error("unsupported MIDI format: {0}")]
    UnsupportedFormat(String),
}

/// Errors returned from [`crate::synth::Synth::load_soundfont`].
#[derive(Debug, Error)]
pub enum SynthError {
    /// The soundfont file or bytes could not be read.
    #[error("failed to read soundfont: {0}")]
    Io(String),
    /// The soundfont bytes were read but failed to parse.
    #[error("invalid soundfont data: {0}")]
    InvalidData(String),
    /// The audio output device could not be opened.
    #[error("failed to open audio output: {0}")]
    Output(String),
}

/// Errors returned from [`crate::follow::FollowController::start`].
#[derive(Debug, Error)]
pub enum FollowError {
    /// `start()` was called with an empty score.
    #[error("cannot start follow mode with an empty score")]
    NoScore,
}
