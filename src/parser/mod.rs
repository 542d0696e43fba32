//! Standard MIDI File parsing and normalization (spec.md §4.2).
//!
//! `parse` is the only entry point: given raw SMF bytes, it returns a
//! fully time-stamped [`crate::model::Song`] or a [`crate::error::ParseError`].

mod compiler;

pub use compiler::parse;
