//! Timeline composition of clips into a renderable stream
//!
//! A [`Track`] places [`Clip`]s at frame positions on a shared timeline and
//! renders the composition chunk by chunk, which makes it a [`Pump`] for a
//! pipe. Rendering rules:
//! - Regions covered by no clip render as silence
//! - Where clips overlap, the clip added last wins
//! - Every rendered chunk is exactly `chunk_size` frames; the final chunk is
//!   zero-padded past the end of the furthest entry
//! - The stream ends once the cursor reaches the end of the furthest entry
//!
//! Chunk size can change between chunks, including mid-stream through a
//! deferred parameter update; the rendered content is invariant under the
//! choice of chunk size.

use serde::Serialize;
use std::any::Any;
use tonearm_common::{Buffer, Clip, Error, Message, Param, Pulse, Result, StageId};
use tonearm_pipe::{Pump, Stage};
use tracing::{debug, trace, warn};

/// Lifecycle of a track's stream position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackState {
    /// Nothing rendered yet.
    Idle,
    /// At least one chunk rendered; rendering continues from the cursor.
    Streaming,
    /// The cursor has reached the end of every entry. Adding a clip that
    /// extends past the cursor resumes streaming.
    Exhausted,
}

#[derive(Debug, Clone)]
struct Entry {
    position: u64,
    clip: Clip,
}

/// Compositor placing clips on a timeline and rendering fixed-size chunks.
///
/// Entries are kept in the order they were added; that order decides
/// overlaps (last added wins) and is never re-sorted. The render cursor only
/// moves forward; clips added behind it contribute nothing to frames
/// already emitted.
#[derive(Debug)]
pub struct Track {
    id: StageId,
    chunk_size: usize,
    num_channels: usize,
    cursor: u64,
    entries: Vec<Entry>,
    state: TrackState,
}

impl Track {
    /// Empty track rendering `chunk_size`-frame chunks of `num_channels`
    /// channels.
    ///
    /// The configuration is validated when the track binds to a pipe.
    pub fn new(chunk_size: usize, num_channels: usize) -> Self {
        Self {
            id: StageId::new(),
            chunk_size,
            num_channels,
            cursor: 0,
            entries: Vec::new(),
            state: TrackState::Idle,
        }
    }

    /// Place a clip so that its first frame renders at frame `position` of
    /// the timeline.
    ///
    /// The clip's channel count must match the track's. Entries may be added
    /// while streaming (frames already emitted are unaffected) and after
    /// exhaustion, which resumes the stream if the clip extends past the
    /// cursor.
    pub fn add_clip(&mut self, position: u64, clip: Clip) -> Result<()> {
        if clip.num_channels() != self.num_channels {
            return Err(Error::ChannelCountMismatch {
                expected: self.num_channels,
                actual: clip.num_channels(),
            });
        }
        debug!(position, frames = clip.num_frames(), "clip added");
        self.entries.push(Entry { position, clip });
        self.refresh_state();
        Ok(())
    }

    /// Remove every entry and rewind the cursor. The track returns to
    /// [`TrackState::Idle`] as if freshly constructed.
    pub fn reset(&mut self) {
        debug!(entries = self.entries.len(), "track reset");
        self.entries.clear();
        self.cursor = 0;
        self.state = TrackState::Idle;
    }

    /// Change the number of frames per rendered chunk, effective from the
    /// next chunk. Zero is rejected.
    pub fn set_chunk_size(&mut self, chunk_size: usize) -> Result<()> {
        if chunk_size == 0 {
            return Err(Error::InvalidPulse("chunk size must be non-zero".into()));
        }
        debug!(chunk_size, "chunk size changed");
        self.chunk_size = chunk_size;
        Ok(())
    }

    /// Frames per rendered chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Channels per rendered chunk.
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Next frame to render.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TrackState {
        self.state
    }

    /// Number of placed entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are placed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One past the last frame covered by any entry; zero for an empty
    /// track. The stream ends when the cursor reaches this.
    pub fn max_extent(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.position + e.clip.num_frames() as u64)
            .max()
            .unwrap_or(0)
    }

    /// Render the chunk at the cursor and advance past it.
    ///
    /// Returns `Ok(None)` once the cursor has reached [`Track::max_extent`],
    /// which also holds for an empty track.
    pub fn render_chunk(&mut self) -> Result<Option<Buffer>> {
        if self.chunk_size == 0 {
            return Ok(None);
        }
        let extent = self.max_extent();
        if self.cursor >= extent {
            if self.state != TrackState::Exhausted {
                debug!(cursor = self.cursor, extent, "track exhausted");
                self.state = TrackState::Exhausted;
            }
            return Ok(None);
        }

        let start = self.cursor;
        let end = start + self.chunk_size as u64;
        let mut channels = vec![vec![0.0f32; self.chunk_size]; self.num_channels];
        for entry in &self.entries {
            let clip_start = entry.position;
            let clip_end = entry.position + entry.clip.num_frames() as u64;
            if clip_end <= start || clip_start >= end {
                continue;
            }
            let from = clip_start.max(start);
            let to = clip_end.min(end);
            let dst = (from - start) as usize;
            let src = (from - clip_start) as usize;
            let len = (to - from) as usize;
            for (index, out) in channels.iter_mut().enumerate() {
                // Channel count was checked in add_clip
                if let Some(samples) = entry.clip.channel(index) {
                    out[dst..dst + len].copy_from_slice(&samples[src..src + len]);
                }
            }
        }

        trace!(start, frames = self.chunk_size, "chunk rendered");
        self.cursor = end;
        if self.cursor < extent {
            self.state = TrackState::Streaming;
        } else {
            debug!(cursor = self.cursor, extent, "track exhausted");
            self.state = TrackState::Exhausted;
        }
        Ok(Some(Buffer::from_channels(channels)?))
    }

    /// Deferred update changing the chunk size, routable through a live
    /// pipe. An invalid size is dropped with a warning when the update
    /// applies; deferred actions have no error path back to the caller.
    pub fn chunk_size_param(&self, chunk_size: usize) -> Param {
        Param::for_stage::<Track, _>(self.id, move |track| {
            if let Err(e) = track.set_chunk_size(chunk_size) {
                warn!(error = %e, "chunk size update dropped");
            }
        })
    }

    /// Deferred update placing a clip at `position`. A rejected clip (wrong
    /// channel count) is dropped with a warning when the update applies.
    pub fn add_clip_param(&self, position: u64, clip: Clip) -> Param {
        Param::for_stage::<Track, _>(self.id, move |track| {
            if let Err(e) = track.add_clip(position, clip.clone()) {
                warn!(error = %e, "deferred clip dropped");
            }
        })
    }

    /// Deferred update clearing the track. Applied mid-stream it ends the
    /// stream at the next chunk boundary.
    pub fn reset_param(&self) -> Param {
        Param::for_stage::<Track, _>(self.id, |track| track.reset())
    }

    /// Point-in-time view for diagnostics and status reporting.
    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            chunk_size: self.chunk_size,
            num_channels: self.num_channels,
            cursor: self.cursor,
            max_extent: self.max_extent(),
            state: self.state,
            entries: self
                .entries
                .iter()
                .map(|e| EntrySnapshot {
                    position: e.position,
                    frames: e.clip.num_frames(),
                })
                .collect(),
        }
    }

    fn refresh_state(&mut self) {
        self.state = if self.cursor == 0 {
            TrackState::Idle
        } else if self.cursor < self.max_extent() {
            TrackState::Streaming
        } else {
            TrackState::Exhausted
        };
    }
}

/// Serializable view of a [`Track`].
#[derive(Debug, Clone, Serialize)]
pub struct TrackSnapshot {
    pub chunk_size: usize,
    pub num_channels: usize,
    pub cursor: u64,
    pub max_extent: u64,
    pub state: TrackState,
    pub entries: Vec<EntrySnapshot>,
}

/// One placed clip inside a [`TrackSnapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub position: u64,
    pub frames: usize,
}

impl Stage for Track {
    fn id(&self) -> StageId {
        self.id
    }

    fn name(&self) -> &str {
        "track"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Pump for Track {
    fn bind(&mut self, sample_rate: u32) -> anyhow::Result<Pulse> {
        Ok(Pulse::new(sample_rate, self.chunk_size, self.num_channels))
    }

    fn pump(&mut self) -> anyhow::Result<Option<Message>> {
        Ok(self.render_chunk()?.map(Message::new))
    }
}
