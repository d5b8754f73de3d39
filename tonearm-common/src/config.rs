//! Configuration loading
//!
//! TOML-backed settings with built-in defaults. Every field is optional in
//! the file; missing values fall back to the defaults defined here, so an
//! empty file (or no file at all, via `Config::default()`) is a complete
//! configuration.

use crate::pulse::Pulse;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration for a tonearm pipeline host.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Stream configuration defaults
    #[serde(default)]
    pub pulse: PulseConfig,

    /// Engine tuning
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Default stream configuration (`[pulse]` section).
#[derive(Debug, Clone, Deserialize)]
pub struct PulseConfig {
    /// Frames per second
    ///
    /// Default: 44100 Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Frames per produced chunk
    ///
    /// Default: 512 frames
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Channels per frame
    ///
    /// Default: 2 (stereo)
    #[serde(default = "default_num_channels")]
    pub num_channels: usize,
}

/// Engine tuning (`[engine]` section).
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// In-flight messages per channel edge between two stages
    ///
    /// Default: 8. Bounds the memory a fast producer can pin ahead of a
    /// slow consumer; backpressure starts once an edge is full.
    #[serde(default = "default_message_capacity")]
    pub message_capacity: usize,
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_chunk_size() -> usize {
    512
}

fn default_num_channels() -> usize {
    2
}

fn default_message_capacity() -> usize {
    8
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            chunk_size: default_chunk_size(),
            num_channels: default_num_channels(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            message_capacity: default_message_capacity(),
        }
    }
}

impl PulseConfig {
    /// The configured stream parameters as a [`Pulse`].
    pub fn to_pulse(&self) -> Pulse {
        Pulse::new(self.sample_rate, self.chunk_size, self.num_channels)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }
}
