//! accord-cli - a manual smoke-test harness for the accompaniment engine.
//!
//! Loads a MIDI file and a soundfont, plays it from the terminal, and
//! prints a progress readout. Not a GUI: the real control surface for this
//! engine is the library's public API (`accord_engine::Scheduler` et al.),
//! which a graphical client is expected to drive directly.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use accord_engine::{RustySynthBackend, Scheduler, SchedulerState, Synth};

/// Command-line options for the smoke-test CLI.
struct CliOptions {
    midi_path: PathBuf,
    soundfont_path: PathBuf,
}

impl CliOptions {
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        if args.len() != 3 {
            anyhow::bail!(
                "usage: {} <midi-file> <soundfont-file>",
                args.first().map(String::as_str).unwrap_or("accord-cli")
            );
        }
        Ok(Self {
            midi_path: PathBuf::from(&args[1]),
            soundfont_path: PathBuf::from(&args[2]),
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    run()
}

fn run() -> Result<()> {
    let cli = CliOptions::parse()?;

    let bytes = std::fs::read(&cli.midi_path)
        .with_context(|| format!("failed to read {}", cli.midi_path.display()))?;
    let file_name = cli
        .midi_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let song = accord_engine::parser::parse(&bytes, &file_name)
        .with_context(|| format!("failed to parse {}", cli.midi_path.display()))?;

    let synth = RustySynthBackend::new().context("failed to open audio output")?;
    let mut scheduler = Scheduler::new(synth);

    if let Err(e) = scheduler.load_soundfont(&cli.soundfont_path) {
        eprintln!("warning: soundfont failed to load ({e}); playing silently");
    }

    println!(
        "loaded {} ({} tracks, {:.1}s)",
        file_name,
        song.tracks.len(),
        song.total_seconds
    );

    scheduler.load_song(song);
    scheduler.play();

    while scheduler.state() != SchedulerState::Stopped {
        scheduler.tick();
        print!(
            "\r{:5.1}s  {:5.1}%  {:6.1} bpm   ",
            scheduler.current_seconds(),
            scheduler.progress() * 100.0,
            scheduler.current_bpm()
        );
        use std::io::Write;
        let _ = std::io::stdout().flush();
        thread::sleep(Duration::from_millis(5));
    }
    println!();

    scheduler.shutdown();
    Ok(())
}
