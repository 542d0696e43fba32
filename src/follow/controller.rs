//! Adaptive score-following: matches live onsets against a melody track
//! and adjusts a playback speed factor (spec.md §4.6).
//!
//! Like `onset.rs`, this has no direct teacher or pack analogue; it is
//! built from the spec's state machine, following the surrounding crate's
//! conventions (plain struct, `Default`-backed config, synchronous
//! callbacks stored as boxed closures — the same shape `tracing`
//! subscribers or `rodio` sinks use for callback registration).

use std::sync::mpsc::{self, Receiver};

use crate::error::FollowError;
use crate::model::Note;
use super::onset::{OnsetDetector, Subscription};
use super::OnsetEvent;

/// Tunable thresholds for [`FollowController`], defaulted per spec.md
/// §4.6's configuration table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowConfig {
    /// EMA smoothing factor applied to each new speed estimate.
    pub ema_alpha: f64,
    /// Lower clamp on `speed_factor`.
    pub min_speed: f64,
    /// Upper clamp on `speed_factor`.
    pub max_speed: f64,
    /// Max semitone distance for an onset to match a score note.
    pub note_match_tolerance: i16,
    /// Gap (end of one note to start of the next) that counts as a rest.
    pub rest_threshold_seconds: f64,
    /// Consecutive unmatched onsets before applying a speed decay.
    pub unmatched_threshold: u32,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.3,
            min_speed: 0.25,
            max_speed: 4.0,
            note_match_tolerance: 2,
            rest_threshold_seconds: 1.0,
            unmatched_threshold: 3,
        }
    }
}

/// Follow-mode state (spec.md §4.6's state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowState {
    /// Not started; no subscription.
    Idle,
    /// Actively matching onsets; speed is being adjusted.
    Following,
    /// Just crossed a rest; speed updates are paused until the next onset.
    WaitingForOnset,
}

/// How many score positions ahead of `expected_index` a look-ahead match
/// may advance to (spec.md §4.6: "the next 3 score positions").
const LOOKAHEAD: usize = 3;
/// Decay factor applied to the speed target after sustained mismatches.
const UNMATCHED_DECAY: f64 = 0.9;

/// Drives `speed_factor` from a melody track's expected note timing and a
/// live onset stream.
pub struct FollowController {
    config: FollowConfig,
    score_notes: Vec<Note>,
    expected_index: usize,
    speed_factor: f64,
    last_onset_time: Option<f64>,
    unmatched_count: u32,
    state: FollowState,
    on_speed_changed: Option<Box<dyn FnMut(f64) + Send>>,
    on_state_changed: Option<Box<dyn FnMut(FollowState) + Send>>,
    subscription: Option<Subscription>,
    pending_onsets: Option<Receiver<OnsetEvent>>,
}

impl FollowController {
    /// Creates a controller in `Idle` state with no score loaded.
    pub fn new(config: FollowConfig) -> Self {
        Self {
            config,
            score_notes: Vec::new(),
            expected_index: 0,
            speed_factor: 1.0,
            last_onset_time: None,
            unmatched_count: 0,
            state: FollowState::Idle,
            on_speed_changed: None,
            on_state_changed: None,
            subscription: None,
            pending_onsets: None,
        }
    }

    /// Registers the callback invoked synchronously whenever `speed_factor`
    /// changes.
    pub fn set_on_speed_changed(&mut self, callback: impl FnMut(f64) + Send + 'static) {
        self.on_speed_changed = Some(Box::new(callback));
    }

    /// Registers the callback invoked synchronously on every state
    /// transition.
    pub fn set_on_state_changed(&mut self, callback: impl FnMut(FollowState) + Send + 'static) {
        self.on_state_changed = Some(Box::new(callback));
    }

    /// Stores a sorted copy of the melody track's notes.
    pub fn load_score(&mut self, notes: &[Note]) {
        let mut sorted = notes.to_vec();
        sorted.sort_by(|a, b| a.start_seconds.partial_cmp(&b.start_seconds).unwrap());
        self.score_notes = sorted;
    }

    /// Resets counters, sets `Following`, and subscribes to `detector`'s
    /// onset stream so every onset it produces from now on is queued for
    /// [`Self::pump`]. Fails if no score (or an empty score) has been
    /// loaded, in which case no subscription is created.
    pub fn start(&mut self, detector: &mut OnsetDetector) -> Result<(), FollowError> {
        if self.score_notes.is_empty() {
            return Err(FollowError::NoScore);
        }
        self.expected_index = 0;
        self.speed_factor = 1.0;
        self.last_onset_time = None;
        self.unmatched_count = 0;
        self.set_state(FollowState::Following);

        let (sender, receiver) = mpsc::channel();
        self.subscription = Some(detector.subscribe(move |onset| {
            let _ = sender.send(onset);
        }));
        self.pending_onsets = Some(receiver);
        Ok(())
    }

    /// Drains every onset queued by the subscription [`Self::start`]
    /// established and feeds each through [`Self::on_onset`], in arrival
    /// order. A no-op if `start()` was never called, or `stop()` already
    /// ran.
    pub fn pump(&mut self) {
        let Some(receiver) = &self.pending_onsets else { return };
        let onsets: Vec<OnsetEvent> = receiver.try_iter().collect();
        for onset in onsets {
            self.on_onset(onset);
        }
    }

    /// Cancels the onset subscription, restores `speed_factor` to 1.0, and
    /// transitions to `Idle`.
    pub fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.pending_onsets = None;
        self.speed_factor = 1.0;
        self.emit_speed();
        self.set_state(FollowState::Idle);
    }

    /// Repositions `expected_index`, e.g. after the transport seeks to a
    /// new point in the song.
    pub fn resume_from_index(&mut self, index: usize) {
        self.expected_index = index.min(self.score_notes.len());
    }

    /// Current speed factor.
    pub fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    /// Current follow state.
    pub fn state(&self) -> FollowState {
        self.state
    }

    fn set_state(&mut self, state: FollowState) {
        if self.state == state {
            return;
        }
        self.state = state;
        if let Some(callback) = &mut self.on_state_changed {
            callback(state);
        }
    }

    fn emit_speed(&mut self) {
        if let Some(callback) = &mut self.on_speed_changed {
            callback(self.speed_factor);
        }
    }

    fn matches(&self, onset_note: u8, score_index: usize) -> bool {
        let expected = self.score_notes[score_index].note_number as i16;
        (onset_note as i16 - expected).abs() <= self.config.note_match_tolerance
    }

    fn update_speed_from_interval(&mut self, onset: &OnsetEvent, matched_index: usize) {
        if let Some(last) = self.last_onset_time {
            if matched_index > 0 {
                let actual_interval = onset.timestamp - last;
                let expected_interval = self.score_notes[matched_index].start_seconds
                    - self.score_notes[matched_index - 1].start_seconds;
                if actual_interval > 0.01 && expected_interval > 0.01 {
                    let raw_factor = expected_interval / actual_interval;
                    let clamped = raw_factor.clamp(self.config.min_speed, self.config.max_speed);
                    self.speed_factor =
                        self.config.ema_alpha * clamped + (1.0 - self.config.ema_alpha) * self.speed_factor;
                    self.emit_speed();
                }
            }
        }
    }

    fn rest_check(&mut self) {
        if self.expected_index < self.score_notes.len() && self.expected_index > 0 {
            let gap = self.score_notes[self.expected_index].start_seconds
                - self.score_notes[self.expected_index - 1].end_seconds;
            if gap >= self.config.rest_threshold_seconds {
                self.set_state(FollowState::WaitingForOnset);
            }
        }
    }

    fn advance_on_match(&mut self, onset: &OnsetEvent, matched_index: usize) {
        self.unmatched_count = 0;
        if self.state == FollowState::WaitingForOnset {
            self.set_state(FollowState::Following);
        }
        self.update_speed_from_interval(onset, matched_index);
        self.last_onset_time = Some(onset.timestamp);
        self.expected_index = matched_index + 1;
        self.rest_check();
    }

    fn decay_speed(&mut self) {
        let target = self.speed_factor * UNMATCHED_DECAY;
        self.speed_factor = self.config.ema_alpha * target + (1.0 - self.config.ema_alpha) * self.speed_factor;
        self.emit_speed();
    }

    /// Processes one live onset, per spec.md §4.6's "On onset" algorithm.
    /// A no-op if the controller is not `Following`/`WaitingForOnset`
    /// (i.e. `start()` was never called).
    pub fn on_onset(&mut self, onset: OnsetEvent) {
        if self.state == FollowState::Idle {
            return;
        }
        if self.expected_index >= self.score_notes.len() {
            self.stop();
            return;
        }

        if self.matches(onset.midi_note, self.expected_index) {
            let index = self.expected_index;
            self.advance_on_match(&onset, index);
            return;
        }

        let upper = (self.expected_index + LOOKAHEAD + 1).min(self.score_notes.len());
        for candidate in (self.expected_index + 1)..upper {
            if self.matches(onset.midi_note, candidate) {
                self.advance_on_match(&onset, candidate);
                return;
            }
        }

        self.unmatched_count += 1;
        if self.unmatched_count >= self.config.unmatched_threshold {
            self.decay_speed();
        }
    }
}

impl Default for FollowController {
    fn default() -> Self {
        Self::new(FollowConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(number: u8, start: f64, end: f64) -> Note {
        let mut n = Note::new(number, 100, 0, 0, 0);
        n.start_seconds = start;
        n.end_seconds = end;
        n
    }

    fn score() -> Vec<Note> {
        vec![
            note(60, 0.0, 0.4),
            note(62, 0.5, 0.9),
            note(64, 1.0, 1.4),
            note(65, 1.5, 1.9),
        ]
    }

    fn onset(midi_note: u8, timestamp: f64) -> OnsetEvent {
        OnsetEvent { midi_note, frequency_hz: 440.0, volume: 0.5, timestamp }
    }

    #[test]
    fn start_fails_without_score() {
        let mut controller = FollowController::default();
        let mut detector = OnsetDetector::default();
        assert!(matches!(controller.start(&mut detector), Err(FollowError::NoScore)));
    }

    #[test]
    fn start_requires_nonempty_score() {
        let mut controller = FollowController::default();
        let mut detector = OnsetDetector::default();
        controller.load_score(&[]);
        assert!(matches!(controller.start(&mut detector), Err(FollowError::NoScore)));
    }

    #[test]
    fn matching_onsets_advance_expected_index() {
        let mut controller = FollowController::default();
        let mut detector = OnsetDetector::default();
        controller.load_score(&score());
        controller.start(&mut detector).unwrap();
        controller.on_onset(onset(60, 0.0));
        assert_eq!(controller.expected_index, 1);
        controller.on_onset(onset(62, 0.5));
        assert_eq!(controller.expected_index, 2);
    }

    #[test]
    fn lookahead_match_skips_a_missed_note() {
        // Index 1 (90) is far outside tolerance of any plausible onset, so
        // matching index 2 (64) instead can only happen via look-ahead.
        let notes = vec![
            note(60, 0.0, 0.4),
            note(90, 0.5, 0.9),
            note(64, 1.0, 1.4),
            note(65, 1.5, 1.9),
        ];
        let mut controller = FollowController::default();
        let mut detector = OnsetDetector::default();
        controller.load_score(&notes);
        controller.start(&mut detector).unwrap();
        controller.on_onset(onset(60, 0.0));
        controller.on_onset(onset(64, 1.0));
        assert_eq!(controller.expected_index, 3);
    }

    #[test]
    fn sustained_mismatch_decays_speed() {
        let mut controller = FollowController::default();
        let mut detector = OnsetDetector::default();
        controller.load_score(&score());
        controller.start(&mut detector).unwrap();
        let initial = controller.speed_factor();
        // Notes far outside tolerance and lookahead window: never match.
        for i in 0..3 {
            controller.on_onset(onset(127, i as f64));
        }
        assert!(controller.speed_factor() < initial);
    }

    #[test]
    fn exhausting_the_score_stops_the_controller() {
        let mut controller = FollowController::default();
        let mut detector = OnsetDetector::default();
        controller.load_score(&score());
        controller.start(&mut detector).unwrap();
        for (i, n) in score().iter().enumerate() {
            controller.on_onset(onset(n.note_number, i as f64 * 0.5));
        }
        // expected_index now == len; one more onset triggers stop().
        controller.on_onset(onset(60, 10.0));
        assert_eq!(controller.state(), FollowState::Idle);
    }

    #[test]
    fn rest_gap_transitions_to_waiting_for_onset() {
        let notes = vec![
            note(60, 0.0, 0.4),
            note(62, 2.0, 2.4), // gap of 1.6s >= rest_threshold_seconds
        ];
        let mut controller = FollowController::default();
        let mut detector = OnsetDetector::default();
        controller.load_score(&notes);
        controller.start(&mut detector).unwrap();
        controller.on_onset(onset(60, 0.0));
        assert_eq!(controller.state(), FollowState::WaitingForOnset);
    }

    /// S7 — speed convergence: five C4 notes at 0.0/0.5/1.0/1.5/2.0s,
    /// performer onsets (all midi=60) at 0.0/0.25/0.50/0.75/1.00s (2x
    /// tempo). After the fourth matched interval, `speed_factor` must be
    /// strictly > 1.0, strictly <= 2.0, and within 0.01 of
    /// `1 + 0.3*(2-1)*(1 + 0.7 + 0.49 + 0.343) ~= 1.756`.
    #[test]
    fn s7_speed_converges_toward_expected_value() {
        let notes = vec![
            note(60, 0.0, 0.4),
            note(60, 0.5, 0.9),
            note(60, 1.0, 1.4),
            note(60, 1.5, 1.9),
            note(60, 2.0, 2.4),
        ];
        let mut controller = FollowController::default();
        let mut detector = OnsetDetector::default();
        controller.load_score(&notes);
        controller.start(&mut detector).unwrap();
        for timestamp in [0.0, 0.25, 0.50, 0.75, 1.00] {
            controller.on_onset(onset(60, timestamp));
        }
        let speed = controller.speed_factor();
        assert!(speed > 1.0 && speed <= 2.0, "speed_factor = {speed}");
        assert!((speed - 1.756).abs() < 0.01, "speed_factor = {speed}");
    }

    #[test]
    fn resume_from_index_repositions_expected_index() {
        let mut controller = FollowController::default();
        let mut detector = OnsetDetector::default();
        controller.load_score(&score());
        controller.start(&mut detector).unwrap();
        controller.resume_from_index(2);
        assert_eq!(controller.expected_index, 2);
    }

    #[test]
    fn stop_resets_speed_and_state() {
        let mut controller = FollowController::default();
        let mut detector = OnsetDetector::default();
        controller.load_score(&score());
        controller.start(&mut detector).unwrap();
        controller.on_onset(onset(127, 0.0));
        controller.stop();
        assert_eq!(controller.speed_factor(), 1.0);
        assert_eq!(controller.state(), FollowState::Idle);
    }

    #[test]
    fn stop_cancels_the_subscription_so_the_detector_stops_feeding_it() {
        let mut controller = FollowController::default();
        let mut detector = OnsetDetector::default();
        controller.load_score(&score());
        controller.start(&mut detector).unwrap();
        controller.stop();

        detector.process_sample(crate::follow::PitchSample {
            frequency_hz: 440.0,
            midi_note: 60,
            volume_linear: 0.5,
            volume_dbfs: -6.0,
            precision: 0.9,
            timestamp: 0.0,
        });
        controller.pump();
        // stop() tore down the subscription and the pending-onset queue;
        // pump() has nothing to drain and expected_index never moves.
        assert_eq!(controller.expected_index, 0);
    }

    #[test]
    fn real_subscription_feeds_onsets_through_to_on_onset() {
        let mut controller = FollowController::default();
        let mut detector = OnsetDetector::default();
        controller.load_score(&score());
        controller.start(&mut detector).unwrap();

        detector.process_sample(crate::follow::PitchSample {
            frequency_hz: 440.0,
            midi_note: 60,
            volume_linear: 0.5,
            volume_dbfs: -6.0,
            precision: 0.9,
            timestamp: 0.0,
        });
        controller.pump();
        assert_eq!(controller.expected_index, 1);
    }
}
