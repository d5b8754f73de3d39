//! Track compositor for the tonearm pipeline engine
//!
//! This crate turns a set of positioned clips into a pipeline source: a
//! [`Track`] composes its clips on a timeline (silence in the gaps, last
//! added wins on overlap) and streams the result as fixed-size chunks
//! through a `tonearm_pipe` pipe. Chunk size and content can be changed
//! mid-stream with deferred parameter updates.

pub mod track;

pub use track::{EntrySnapshot, Track, TrackSnapshot, TrackState};
