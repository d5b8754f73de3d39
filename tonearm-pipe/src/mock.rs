//! Deterministic stages for exercising pipelines
//!
//! Small pump/processor/sink implementations with predictable output,
//! observable counters, injectable failures and panics, and a sink-side
//! hold point for pinning a run open mid-stream. Used by this crate's own
//! tests and benches, and useful to downstream crates testing stages of
//! their own, so they ship in the library rather than under `tests/`.
//!
//! Every mock is `Clone` with shared counters: hand one clone to the pipe,
//! keep another to inspect after the run.

use crate::stage::{Processor, Pump, Sink, Stage};
use anyhow::bail;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use tonearm_common::{Barrier, Buffer, Message, Param, Params, Pulse, StageId};

/// Pump emitting a fixed number of constant-valued chunks.
#[derive(Debug, Clone)]
pub struct MockPump {
    id: StageId,
    chunk_size: usize,
    num_channels: usize,
    limit: usize,
    value: f32,
    step: f32,
    fail_after: Option<usize>,
    panic_after: Option<usize>,
    barrier_acks: Option<usize>,
    emitted: Arc<AtomicUsize>,
    barriers: Arc<Mutex<Vec<Barrier>>>,
}

impl MockPump {
    /// Pump producing `limit` chunks of `chunk_size` frames across
    /// `num_channels` channels, all samples `1.0`.
    pub fn new(chunk_size: usize, num_channels: usize, limit: usize) -> Self {
        Self {
            id: StageId::new(),
            chunk_size,
            num_channels,
            limit,
            value: 1.0,
            step: 0.0,
            fail_after: None,
            panic_after: None,
            barrier_acks: None,
            emitted: Arc::new(AtomicUsize::new(0)),
            barriers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sample value of the first chunk.
    pub fn value(mut self, value: f32) -> Self {
        self.value = value;
        self
    }

    /// Increment applied to the sample value after each chunk, making the
    /// emitted stream identify chunk order.
    pub fn step(mut self, step: f32) -> Self {
        self.step = step;
        self
    }

    /// Fail with an injected error after successfully emitting `chunks`.
    pub fn fail_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    /// Panic after successfully emitting `chunks`, simulating a stage task
    /// that crashes instead of returning an error.
    pub fn panic_after(mut self, chunks: usize) -> Self {
        self.panic_after = Some(chunks);
        self
    }

    /// Attach a fresh [`Barrier`] expecting `acks` acknowledgements to every
    /// emitted message. The barriers are retained for inspection via
    /// [`MockPump::barriers`].
    pub fn with_barriers(mut self, acks: usize) -> Self {
        self.barrier_acks = Some(acks);
        self
    }

    /// Chunks emitted so far.
    pub fn chunks_emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }

    /// Barriers attached so far, in emission order.
    pub fn barriers(&self) -> Vec<Barrier> {
        self.barriers.lock().unwrap().clone()
    }
}

impl Stage for MockPump {
    fn id(&self) -> StageId {
        self.id
    }

    fn name(&self) -> &str {
        "mock-pump"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Pump for MockPump {
    fn bind(&mut self, sample_rate: u32) -> anyhow::Result<Pulse> {
        Ok(Pulse::new(sample_rate, self.chunk_size, self.num_channels))
    }

    fn pump(&mut self) -> anyhow::Result<Option<Message>> {
        let emitted = self.emitted.load(Ordering::SeqCst);
        if let Some(fail_after) = self.fail_after {
            if emitted >= fail_after {
                bail!("injected pump failure after {} chunks", fail_after);
            }
        }
        if let Some(panic_after) = self.panic_after {
            if emitted >= panic_after {
                panic!("injected pump panic after {} chunks", panic_after);
            }
        }
        if emitted >= self.limit {
            return Ok(None);
        }

        let value = self.value + self.step * emitted as f32;
        let samples = Buffer::from_channels(vec![vec![value; self.chunk_size]; self.num_channels])?;
        let mut message = Message::new(samples);
        if let Some(acks) = self.barrier_acks {
            let barrier = Barrier::new(acks);
            self.barriers.lock().unwrap().push(barrier.clone());
            message = message.with_barrier(barrier);
        }
        self.emitted.fetch_add(1, Ordering::SeqCst);
        Ok(Some(message))
    }
}

/// Pass-through processor with a runtime-adjustable gain.
#[derive(Debug, Clone)]
pub struct MockProcessor {
    id: StageId,
    gain: f32,
    fail_after: Option<usize>,
    processed: Arc<AtomicUsize>,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self {
            id: StageId::new(),
            gain: 1.0,
            fail_after: None,
            processed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail with an injected error after successfully processing `chunks`.
    pub fn fail_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    /// Deferred update setting the gain, routable through a live pipe.
    pub fn gain_param(&self, gain: f32) -> Param {
        Param::for_stage::<MockProcessor, _>(self.id, move |p| p.gain = gain)
    }

    /// Messages processed so far.
    pub fn messages_processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }
}

impl Default for MockProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for MockProcessor {
    fn id(&self) -> StageId {
        self.id
    }

    fn name(&self) -> &str {
        "mock-processor"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Processor for MockProcessor {
    fn bind(&mut self, pulse: &Pulse) -> anyhow::Result<()> {
        pulse.validate()?;
        Ok(())
    }

    fn process(&mut self, samples: Buffer) -> anyhow::Result<Buffer> {
        let processed = self.processed.load(Ordering::SeqCst);
        if let Some(fail_after) = self.fail_after {
            if processed >= fail_after {
                bail!("injected processor failure after {} chunks", fail_after);
            }
        }
        self.processed.fetch_add(1, Ordering::SeqCst);

        if self.gain == 1.0 {
            return Ok(samples);
        }
        let scaled = samples
            .channels()
            .map(|channel| channel.iter().map(|s| s * self.gain).collect())
            .collect();
        Ok(Buffer::from_channels(scaled)?)
    }
}

/// Sink recording everything it receives.
#[derive(Debug, Clone)]
pub struct MockSink {
    id: StageId,
    fail_after: Option<usize>,
    hold_at: Option<usize>,
    received: Arc<AtomicUsize>,
    flushes: Arc<AtomicUsize>,
    channels: Arc<Mutex<Vec<Vec<f32>>>>,
    frames_seen: Arc<Mutex<Vec<usize>>>,
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            id: StageId::new(),
            fail_after: None,
            hold_at: None,
            received: Arc::new(AtomicUsize::new(0)),
            flushes: Arc::new(AtomicUsize::new(0)),
            channels: Arc::new(Mutex::new(Vec::new())),
            frames_seen: Arc::new(Mutex::new(Vec::new())),
            gate: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Fail with an injected error after successfully consuming `chunks`.
    pub fn fail_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    /// Block inside [`Sink::sink`] once `chunks` messages have been
    /// recorded, until [`MockSink::release`]. Pins a live run open so a
    /// test can act mid-stream. The block is a real thread block, so runs
    /// holding one need a multi-thread runtime.
    pub fn hold_at(mut self, chunks: usize) -> Self {
        self.hold_at = Some(chunks);
        self
    }

    /// Open the hold installed by [`MockSink::hold_at`]. Releasing before
    /// the hold point is reached disarms it.
    pub fn release(&self) {
        let (released, condvar) = &*self.gate;
        *released.lock().unwrap() = true;
        condvar.notify_all();
    }

    /// Messages consumed so far.
    pub fn messages_received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    /// Frame count of each consumed message, in arrival order.
    pub fn message_frames(&self) -> Vec<usize> {
        self.frames_seen.lock().unwrap().clone()
    }

    /// End-of-stream flushes observed so far.
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Snapshot of everything recorded so far.
    pub fn recorded(&self) -> Buffer {
        let channels = self.channels.lock().unwrap().clone();
        match Buffer::from_channels(channels) {
            Ok(buffer) => buffer,
            // Appends are whole messages, so channel lengths stay equal.
            Err(_) => Buffer::silence(0, 0),
        }
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for MockSink {
    fn id(&self) -> StageId {
        self.id
    }

    fn name(&self) -> &str {
        "mock-sink"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Sink for MockSink {
    fn bind(&mut self, pulse: &Pulse) -> anyhow::Result<()> {
        pulse.validate()?;
        let mut channels = self.channels.lock().unwrap();
        if channels.is_empty() {
            *channels = vec![Vec::new(); pulse.num_channels];
        } else if channels.len() != pulse.num_channels {
            bail!(
                "sink recorded {} channels, pulse has {}",
                channels.len(),
                pulse.num_channels
            );
        }
        Ok(())
    }

    fn sink(&mut self, message: &Message) -> anyhow::Result<()> {
        let received = self.received.load(Ordering::SeqCst);
        if let Some(fail_after) = self.fail_after {
            if received >= fail_after {
                bail!("injected sink failure after {} chunks", fail_after);
            }
        }

        let samples = message.samples();
        {
            let mut channels = self.channels.lock().unwrap();
            if samples.num_channels() != channels.len() {
                bail!(
                    "message has {} channels, sink records {}",
                    samples.num_channels(),
                    channels.len()
                );
            }
            for (stored, incoming) in channels.iter_mut().zip(samples.channels()) {
                stored.extend_from_slice(incoming);
            }
        }
        self.frames_seen.lock().unwrap().push(samples.num_frames());
        self.received.fetch_add(1, Ordering::SeqCst);

        // Counters update before the hold, so observers see the message
        // that is parked here
        if self.hold_at == Some(received + 1) {
            let (released, condvar) = &*self.gate;
            let mut released = released.lock().unwrap();
            while !*released {
                released = condvar.wait(released).unwrap();
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Batch of params targeting a single mock processor's gain. Convenience
/// for tests pushing one update.
pub fn gain_params(processor: &MockProcessor, gain: f32) -> Params {
    let mut params = Params::new();
    params.add(processor.gain_param(gain));
    params
}
