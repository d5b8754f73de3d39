//! Common error types for tonearm

use thiserror::Error;

/// Common result type for tonearm operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared across tonearm crates
#[derive(Error, Debug)]
pub enum Error {
    /// Channel count of an input does not match what the consumer was built for
    #[error("Channel count mismatch: expected {expected}, got {actual}")]
    ChannelCountMismatch { expected: usize, actual: usize },

    /// Buffer channels have unequal sample counts
    #[error("Channel length mismatch: channel {channel} has {actual} frames, expected {expected}")]
    ChannelLengthMismatch {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    /// Clip range falls outside its source buffer
    #[error("Clip out of bounds: start {start} + {frames} frames exceeds buffer of {available} frames")]
    ClipBounds {
        start: usize,
        frames: usize,
        available: usize,
    },

    /// Invalid stream parameter (zero chunk size, zero channels, zero sample rate)
    #[error("Invalid pulse: {0}")]
    InvalidPulse(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
