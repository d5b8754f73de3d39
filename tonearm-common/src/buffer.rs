//! Multi-channel sample storage and clip views
//!
//! `Buffer` is the unit of sample exchange between pipeline stages:
//! - Channels stored separately (not interleaved), all equal length
//! - Samples are `f32` in nominal [-1.0, 1.0] range
//! - Immutable once constructed; cloning shares the underlying storage
//!
//! `Clip` is a bounded, non-owning view into a `Buffer`. A clip keeps its
//! source buffer alive and never copies or mutates it, so many clips can
//! reference overlapping regions of the same recording.

use crate::{Error, Result};
use std::sync::Arc;

/// Immutable multi-channel sample buffer.
///
/// Cloning is cheap: clones share the channel data. Frame indices address
/// positions across all channels simultaneously.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    data: Arc<BufferData>,
}

#[derive(Debug, PartialEq)]
struct BufferData {
    channels: Vec<Vec<f32>>,
    frames: usize,
}

impl Buffer {
    /// Build a buffer from per-channel sample vectors.
    ///
    /// All channels must have the same length. An empty vector produces a
    /// zero-channel, zero-frame buffer.
    pub fn from_channels(channels: Vec<Vec<f32>>) -> Result<Self> {
        let frames = channels.first().map(|c| c.len()).unwrap_or(0);
        for (channel, samples) in channels.iter().enumerate() {
            if samples.len() != frames {
                return Err(Error::ChannelLengthMismatch {
                    channel,
                    expected: frames,
                    actual: samples.len(),
                });
            }
        }
        Ok(Self {
            data: Arc::new(BufferData { channels, frames }),
        })
    }

    /// Single-channel buffer from one sample vector.
    pub fn mono(samples: Vec<f32>) -> Self {
        let frames = samples.len();
        Self {
            data: Arc::new(BufferData {
                channels: vec![samples],
                frames,
            }),
        }
    }

    /// Zero-filled buffer of the given shape.
    pub fn silence(num_channels: usize, frames: usize) -> Self {
        Self {
            data: Arc::new(BufferData {
                channels: vec![vec![0.0; frames]; num_channels],
                frames,
            }),
        }
    }

    /// Number of channels.
    pub fn num_channels(&self) -> usize {
        self.data.channels.len()
    }

    /// Number of frames (samples per channel).
    pub fn num_frames(&self) -> usize {
        self.data.frames
    }

    /// True when the buffer holds no frames.
    pub fn is_empty(&self) -> bool {
        self.data.frames == 0
    }

    /// Samples of one channel, or `None` for an out-of-range index.
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.data.channels.get(index).map(|c| c.as_slice())
    }

    /// Iterate channels in order.
    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        self.data.channels.iter().map(|c| c.as_slice())
    }

    /// Bounded view of `frames` frames starting at `start`.
    ///
    /// Fails with [`Error::ClipBounds`] when the range extends past the end
    /// of the buffer; a range whose end overflows `usize` is rejected the
    /// same way. Zero-length clips are legal.
    pub fn clip(&self, start: usize, frames: usize) -> Result<Clip> {
        // Overflow of the range end counts as out of bounds
        let out_of_bounds = start
            .checked_add(frames)
            .map_or(true, |end| end > self.data.frames);
        if out_of_bounds {
            return Err(Error::ClipBounds {
                start,
                frames,
                available: self.data.frames,
            });
        }
        Ok(Clip {
            buffer: self.clone(),
            start,
            frames,
        })
    }
}

/// Bounded view into a [`Buffer`].
///
/// Holds a clone of the source buffer (shared storage), so the referenced
/// samples stay alive for the lifetime of the clip. Range validity is
/// established at construction by [`Buffer::clip`].
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    buffer: Buffer,
    start: usize,
    frames: usize,
}

impl Clip {
    /// Number of channels of the source buffer.
    pub fn num_channels(&self) -> usize {
        self.buffer.num_channels()
    }

    /// Length of the view in frames.
    pub fn num_frames(&self) -> usize {
        self.frames
    }

    /// Offset of the view inside the source buffer.
    pub fn start(&self) -> usize {
        self.start
    }

    /// The viewed slice of one channel, or `None` for an out-of-range index.
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.buffer
            .channel(index)
            .map(|c| &c[self.start..self.start + self.frames])
    }

    /// The source buffer.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }
}
