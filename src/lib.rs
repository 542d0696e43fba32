//! Core playback and adaptive-follow engine for a MIDI accompaniment
//! application.
//!
//! This crate owns MIDI file parsing and normalization, tempo mapping,
//! playback scheduling, and score-following. It deliberately does not own
//! a GUI, microphone pitch extraction, or audio synthesis itself — those
//! are external collaborators reached through the [`synth::Synth`] trait
//! and the [`follow::PitchSample`]/[`follow::OnsetEvent`] types.

pub mod error;
pub mod follow;
pub mod model;
pub mod parser;
pub mod scheduler;
pub mod synth;
pub mod tempo;

pub use error::{FollowError, ParseError, SynthError};
pub use follow::{
    FollowConfig, FollowController, FollowState, OnsetDetector, OnsetDetectorConfig, OnsetEvent,
    PitchSample, PitchSource, Subscription,
};
pub use model::{EventKind, Note, SmfFormat, Song, TempoChange, TimeSignatureChange, TimelineEvent, Track};
pub use scheduler::{Scheduler, SchedulerState};
pub use synth::{RustySynthBackend, Synth};
pub use tempo::TempoMap;
