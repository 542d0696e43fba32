//! In-memory song model: notes, timeline events, tracks, tempo/time
//! signature changes, and the song container itself.
//!
//! These types are immutable once compiled by [`crate::parser`], with the
//! sole exceptions of `Track::is_muted`, `Track::volume` (mutated from the
//! scheduler's transport-control path), and the `seconds` fields on
//! `Note`/`TimelineEvent`/`TempoChange`/`TimeSignatureChange` (written
//! exactly once, during compilation, after the tempo map is built).

mod event;
mod note;
mod song;
mod track;

pub use event::{sort_events, EventKind, TimelineEvent};
pub use note::Note;
pub use song::{SmfFormat, Song, TempoChange, TimeSignatureChange};
pub use track::Track;
