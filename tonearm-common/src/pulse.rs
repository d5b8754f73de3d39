//! Shared stream configuration
//!
//! A [`Pulse`] fixes the three quantities every stage of a running pipeline
//! must agree on: sample rate, chunk size, and channel count. The engine
//! hands the pulse to each stage exactly once, at bind time. After that it
//! never changes behind a stage's back; runtime reconfiguration travels
//! through the params mechanism instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stream configuration shared by all stages of one pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pulse {
    /// Frames per second.
    pub sample_rate: u32,
    /// Frames per produced chunk.
    pub chunk_size: usize,
    /// Channels per frame.
    pub num_channels: usize,
}

impl Pulse {
    pub fn new(sample_rate: u32, chunk_size: usize, num_channels: usize) -> Self {
        Self {
            sample_rate,
            chunk_size,
            num_channels,
        }
    }

    /// Reject pulses no stage could operate under.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidPulse("sample rate must be non-zero".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidPulse("chunk size must be non-zero".into()));
        }
        if self.num_channels == 0 {
            return Err(Error::InvalidPulse("channel count must be non-zero".into()));
        }
        Ok(())
    }

    /// Wall-clock duration of one chunk at this sample rate.
    pub fn chunk_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.chunk_size as f64 / self.sample_rate as f64)
    }
}

impl fmt::Display for Pulse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz, {} frames/chunk, {}ch",
            self.sample_rate, self.chunk_size, self.num_channels
        )
    }
}
