//! In-memory capture sink
//!
//! `Asset` records everything that reaches it, growing one buffer per
//! channel for the lifetime of the capture. It is the bridge from a
//! finished run back into the data model: capture a pipe's output, take a
//! [`Buffer`] snapshot, cut [`Clip`]s from it, feed those to the next pipe.
//!
//! Cloning an `Asset` shares the captured storage. Hand one clone to the
//! pipe as its sink and keep another to read the result after the run
//! completes.

use crate::stage::{Sink, Stage};
use anyhow::bail;
use std::any::Any;
use std::sync::{Arc, Mutex};
use tonearm_common::{Buffer, Clip, Message, Pulse, Result, StageId};

/// Capture sink accumulating received samples in memory.
#[derive(Debug, Clone)]
pub struct Asset {
    id: StageId,
    channels: Arc<Mutex<Vec<Vec<f32>>>>,
}

impl Asset {
    pub fn new() -> Self {
        Self {
            id: StageId::new(),
            channels: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Channels captured so far; zero before the first bind.
    pub fn num_channels(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    /// Frames captured so far.
    pub fn num_frames(&self) -> usize {
        let channels = self.channels.lock().unwrap();
        channels.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Snapshot of everything captured so far.
    pub fn buffer(&self) -> Buffer {
        let channels = self.channels.lock().unwrap().clone();
        match Buffer::from_channels(channels) {
            Ok(buffer) => buffer,
            // Appends are whole messages, so channel lengths stay equal.
            Err(_) => Buffer::silence(0, 0),
        }
    }

    /// Cut a clip from the captured samples.
    pub fn clip(&self, start: usize, frames: usize) -> Result<Clip> {
        self.buffer().clip(start, frames)
    }

    /// Discard captured samples and the pinned channel count.
    pub fn clear(&self) {
        self.channels.lock().unwrap().clear();
    }
}

impl Default for Asset {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Asset {
    fn id(&self) -> StageId {
        self.id
    }

    fn name(&self) -> &str {
        "asset"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Sink for Asset {
    fn bind(&mut self, pulse: &Pulse) -> anyhow::Result<()> {
        let mut channels = self.channels.lock().unwrap();
        if channels.is_empty() {
            *channels = vec![Vec::new(); pulse.num_channels];
        } else if channels.len() != pulse.num_channels {
            bail!(
                "asset holds {} channels, pulse has {}",
                channels.len(),
                pulse.num_channels
            );
        }
        Ok(())
    }

    fn sink(&mut self, message: &Message) -> anyhow::Result<()> {
        let samples = message.samples();
        let mut channels = self.channels.lock().unwrap();
        if samples.num_channels() != channels.len() {
            bail!(
                "message has {} channels, asset captures {}",
                samples.num_channels(),
                channels.len()
            );
        }
        for (stored, incoming) in channels.iter_mut().zip(samples.channels()) {
            stored.extend_from_slice(incoming);
        }
        Ok(())
    }
}
