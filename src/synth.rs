//! Abstract sink for realtime MIDI commands and concrete backends
//! (spec.md §4.3).
//!
//! Grounded on `audio/engine.rs`'s `AudioEngine`: same soundfont-load /
//! `Synthesizer` / rodio `Source` shape, generalized behind a trait so the
//! scheduler can run against either [`RustySynthBackend`] or a test double.
//! Unlike the teacher, the lifecycle here is fallible-but-non-fatal per
//! spec.md §4.3: a failed `load_soundfont` leaves `is_ready() == false`
//! rather than aborting engine construction, and `note_on`/`note_off`/
//! `all_notes_off` never return an error — failures are logged and dropped
//! so the playhead keeps advancing.

use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;
use std::sync::{Arc, Mutex};

use rodio::{OutputStream, OutputStreamHandle, Source};
use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};

use crate::error::SynthError;

const SAMPLE_RATE: i32 = 44_100;
const RENDER_BUFFER_LEN: usize = 256;

/// Where to load a soundfont from: a filesystem path or an in-memory byte
/// buffer (spec.md §4.3: `load_soundfont(path_or_bytes) → Result`).
pub enum SoundfontSource<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

impl<'a> From<&'a Path> for SoundfontSource<'a> {
    fn from(path: &'a Path) -> Self {
        SoundfontSource::Path(path)
    }
}

/// Abstract sink for MIDI commands, with soundfont lifecycle management.
///
/// Implementations are expected to be non-blocking for `note_on`,
/// `note_off`, and `all_notes_off` (spec.md §4.3); only `load_soundfont`
/// may block or fail.
pub trait Synth: Send {
    /// Loads a soundfont from a path or from in-memory bytes. On failure,
    /// `is_ready` must return `false` afterwards but the engine must
    /// remain usable.
    fn load_soundfont(&mut self, source: SoundfontSource<'_>) -> Result<(), SynthError>;

    /// Selects `program` on `bank` for `channel`. A no-op if no soundfont
    /// is loaded.
    fn set_instrument(&self, channel: u8, bank: u8, program: u8);

    /// Starts a note. A no-op if no soundfont is loaded.
    fn note_on(&self, channel: u8, note: u8, velocity: u8);

    /// Stops a note. A no-op if no soundfont is loaded.
    fn note_off(&self, channel: u8, note: u8);

    /// Silences every sounding note on every channel.
    fn all_notes_off(&self);

    /// Whether a soundfont has been loaded successfully.
    fn is_ready(&self) -> bool;

    /// Releases native audio resources: silences all notes, unloads the
    /// soundfont, and leaves the instance in a not-ready state. Scheduler
    /// callers run this on every exit path (spec.md §7, "Resource policy").
    fn shutdown(&mut self);
}

/// Audio source that pulls rendered samples from the shared [`Synthesizer`].
///
/// Identical shape to the teacher's `SynthSource`: renders a stereo block
/// into two buffers and interleaves them one sample at a time for rodio.
struct SynthSource {
    synth: Arc<Mutex<Synthesizer>>,
    left_buf: Vec<f32>,
    right_buf: Vec<f32>,
    buf_pos: usize,
    channel: usize,
}

impl SynthSource {
    fn new(synth: Arc<Mutex<Synthesizer>>) -> Self {
        Self {
            synth,
            left_buf: vec![0.0; RENDER_BUFFER_LEN],
            right_buf: vec![0.0; RENDER_BUFFER_LEN],
            buf_pos: RENDER_BUFFER_LEN,
            channel: 0,
        }
    }
}

impl Iterator for SynthSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.buf_pos >= RENDER_BUFFER_LEN {
            if let Ok(mut synth) = self.synth.lock() {
                synth.render(&mut self.left_buf, &mut self.right_buf);
            } else {
                self.left_buf.fill(0.0);
                self.right_buf.fill(0.0);
            }
            self.buf_pos = 0;
        }
        let sample = if self.channel == 0 {
            self.left_buf[self.buf_pos]
        } else {
            self.right_buf[self.buf_pos]
        };
        self.channel = 1 - self.channel;
        if self.channel == 0 {
            self.buf_pos += 1;
        }
        Some(sample)
    }
}

impl Source for SynthSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE as u32
    }

    fn total_duration(&self) -> Option<std::time::Duration> {
        None
    }
}

/// `rustysynth` + `rodio`-backed [`Synth`] implementation: the production
/// backend for playback.
pub struct RustySynthBackend {
    synth: Option<Arc<Mutex<Synthesizer>>>,
    // Kept alive for the lifetime of the backend; dropping either silences
    // output.
    _stream: Option<OutputStream>,
    _stream_handle: Option<OutputStreamHandle>,
}

impl RustySynthBackend {
    /// Opens the default audio output device without loading a soundfont.
    /// `is_ready()` is `false` until [`Synth::load_soundfont`] succeeds.
    pub fn new() -> Result<Self, SynthError> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| SynthError::Output(e.to_string()))?;
        Ok(Self {
            synth: None,
            _stream: Some(stream),
            _stream_handle: Some(stream_handle),
        })
    }

    fn with_synth<F: FnOnce(&mut Synthesizer)>(&self, f: F) {
        if let Some(synth) = &self.synth {
            match synth.lock() {
                Ok(mut guard) => f(&mut guard),
                Err(_) => tracing::warn!("synth mutex poisoned, dropping command"),
            }
        }
    }
}

impl Synth for RustySynthBackend {
    fn load_soundfont(&mut self, source: SoundfontSource<'_>) -> Result<(), SynthError> {
        let soundfont = match source {
            SoundfontSource::Path(path) => {
                let mut file = BufReader::new(
                    File::open(path).map_err(|e| SynthError::Io(e.to_string()))?,
                );
                SoundFont::new(&mut file).map_err(|e| SynthError::InvalidData(format!("{e:?}")))?
            }
            SoundfontSource::Bytes(bytes) => SoundFont::new(&mut Cursor::new(bytes))
                .map_err(|e| SynthError::InvalidData(format!("{e:?}")))?,
        };
        let settings = SynthesizerSettings::new(SAMPLE_RATE);
        let synthesizer = Synthesizer::new(&soundfont, &settings)
            .map_err(|e| SynthError::InvalidData(format!("{e:?}")))?;
        let synth = Arc::new(Mutex::new(synthesizer));

        if let Some(handle) = &self._stream_handle {
            let source = SynthSource::new(Arc::clone(&synth));
            handle
                .play_raw(source)
                .map_err(|e| SynthError::Output(e.to_string()))?;
        }

        self.synth = Some(synth);
        Ok(())
    }

    fn set_instrument(&self, channel: u8, bank: u8, program: u8) {
        self.with_synth(|synth| {
            synth.process_midi_message(channel as i32, 0xC0, program as i32, 0);
            if bank != 0 {
                synth.process_midi_message(channel as i32, 0xB0, 0x00, bank as i32);
            }
        });
    }

    fn note_on(&self, channel: u8, note: u8, velocity: u8) {
        self.with_synth(|synth| synth.note_on(channel as i32, note as i32, velocity as i32));
    }

    fn note_off(&self, channel: u8, note: u8) {
        self.with_synth(|synth| synth.note_off(channel as i32, note as i32));
    }

    fn all_notes_off(&self) {
        self.with_synth(|synth| synth.note_off_all(false));
    }

    fn is_ready(&self) -> bool {
        self.synth.is_some()
    }

    fn shutdown(&mut self) {
        self.all_notes_off();
        self.synth = None;
        self._stream_handle = None;
        self._stream = None;
    }
}

/// Records every call for assertions in scheduler/follow tests, in place
/// of a real audio backend. Never touches the filesystem or an audio
/// device, so `load_soundfont` always succeeds. Exposed (not
/// `#[cfg(test)]`-gated) so integration tests in `tests/` can use it too.
///
/// `Synth`'s realtime methods take `&self`, so the recorded call logs are
/// behind a `Mutex` rather than plain fields.
#[derive(Debug, Default)]
pub struct RecordingSynth {
    ready: Mutex<bool>,
    pub instrument_calls: Mutex<Vec<(u8, u8, u8)>>,
    pub note_on_calls: Mutex<Vec<(u8, u8, u8)>>,
    pub note_off_calls: Mutex<Vec<(u8, u8)>>,
    pub all_notes_off_calls: Mutex<u32>,
    pub shutdown_calls: Mutex<u32>,
}

impl Synth for RecordingSynth {
    fn load_soundfont(&mut self, _source: SoundfontSource<'_>) -> Result<(), SynthError> {
        *self.ready.lock().unwrap() = true;
        Ok(())
    }

    fn set_instrument(&self, channel: u8, bank: u8, program: u8) {
        self.instrument_calls.lock().unwrap().push((channel, bank, program));
    }

    fn note_on(&self, channel: u8, note: u8, velocity: u8) {
        self.note_on_calls.lock().unwrap().push((channel, note, velocity));
    }

    fn note_off(&self, channel: u8, note: u8) {
        self.note_off_calls.lock().unwrap().push((channel, note));
    }

    fn all_notes_off(&self) {
        *self.all_notes_off_calls.lock().unwrap() += 1;
    }

    fn is_ready(&self) -> bool {
        *self.ready.lock().unwrap()
    }

    fn shutdown(&mut self) {
        *self.shutdown_calls.lock().unwrap() += 1;
        *self.ready.lock().unwrap() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_synth_not_ready_until_soundfont_loaded() {
        let synth = RecordingSynth::default();
        assert!(!synth.is_ready());
    }

    #[test]
    fn recording_synth_records_note_on_and_off() {
        let synth = RecordingSynth::default();
        synth.note_on(0, 60, 100);
        synth.note_off(0, 60);
        assert_eq!(*synth.note_on_calls.lock().unwrap(), vec![(0, 60, 100)]);
        assert_eq!(*synth.note_off_calls.lock().unwrap(), vec![(0, 60)]);
    }

    #[test]
    fn recording_synth_shutdown_clears_ready() {
        let mut synth = RecordingSynth::default();
        let _ = synth.load_soundfont(SoundfontSource::Path(Path::new("fake.sf2")));
        assert!(synth.is_ready());
        synth.shutdown();
        assert!(!synth.is_ready());
    }
}
