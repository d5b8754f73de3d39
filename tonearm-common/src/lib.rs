//! # Tonearm Common Library
//!
//! Shared types for the tonearm pipeline crates:
//! - Sample buffers and clip views
//! - Deferred parameter updates (Params)
//! - Pipeline messages and completion barriers
//! - Stream configuration (Pulse)
//! - Configuration loading
//! - Common error types

pub mod buffer;
pub mod config;
pub mod error;
pub mod message;
pub mod params;
pub mod pulse;

pub use buffer::{Buffer, Clip};
pub use error::{Error, Result};
pub use message::{Barrier, Message};
pub use params::{Param, Params, StageId};
pub use pulse::Pulse;
