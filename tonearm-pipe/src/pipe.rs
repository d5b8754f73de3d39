//! Pipeline wiring and run supervision
//!
//! A [`Pipe`] is built once, bound once, and run once. Construction wires
//! pump → processors → sinks and negotiates the shared [`Pulse`];
//! [`Pipe::run`] turns the wiring into tokio tasks (one per stage, plus a
//! fan-out task when there are several sinks) connected by bounded message
//! channels, and returns a [`PipeHandle`] for the caller to push parameter
//! updates, cancel, and await the outcome.
//!
//! # Determinism
//!
//! Every stage loop is a biased `select!` over (cancellation, queued
//! parameter updates, work). Queued updates therefore apply between chunks,
//! never mid-call, and before the next chunk the stage produces or
//! consumes. Updates pushed before `run` are seeded into the stage queues
//! ahead of task startup, so they are guaranteed to apply before the first
//! chunk.
//!
//! # Failure
//!
//! Stage tasks report errors to a supervisor over a shared channel. The
//! first error cancels every other stage; all tasks unwind by closing their
//! outbound channels, so downstream stages always observe clean
//! termination. [`PipeHandle::wait`] returns that first error. A stage
//! task that panics instead of returning an error is reported as
//! [`PipeError::Internal`].

use crate::error::{PipeError, Result};
use crate::stage::{Processor, Pump, Sink};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonearm_common::config::Config;
use tonearm_common::{Message, Params, Pulse, StageId};
use tracing::{debug, error, info, warn};

const DEFAULT_MESSAGE_CAPACITY: usize = 8;

/// Builder for a [`Pipe`].
pub struct PipeBuilder {
    sample_rate: u32,
    pump: Option<Box<dyn Pump>>,
    processors: Vec<Box<dyn Processor>>,
    sinks: Vec<Box<dyn Sink>>,
    message_capacity: usize,
}

impl PipeBuilder {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            pump: None,
            processors: Vec::new(),
            sinks: Vec::new(),
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
        }
    }

    /// Set the pump. A later call replaces an earlier one.
    pub fn pump(mut self, pump: impl Pump + 'static) -> Self {
        self.pump = Some(Box::new(pump));
        self
    }

    /// Append a processor. Processors run in the order added.
    pub fn processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// Append already-boxed processors in order.
    pub fn processors(mut self, processors: impl IntoIterator<Item = Box<dyn Processor>>) -> Self {
        self.processors.extend(processors);
        self
    }

    /// Append a sink. All sinks receive every message.
    pub fn sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Append already-boxed sinks.
    pub fn sinks(mut self, sinks: impl IntoIterator<Item = Box<dyn Sink>>) -> Self {
        self.sinks.extend(sinks);
        self
    }

    /// In-flight messages per channel edge. Values below 1 are clamped.
    pub fn message_capacity(mut self, capacity: usize) -> Self {
        self.message_capacity = capacity.max(1);
        self
    }

    /// Apply engine settings from a loaded [`Config`].
    pub fn config(self, config: &Config) -> Self {
        self.message_capacity(config.engine.message_capacity)
    }

    /// Bind all stages and produce a runnable [`Pipe`].
    ///
    /// Fails fast: a missing pump or sink, or any stage rejecting the
    /// negotiated pulse, aborts construction before anything is spawned.
    pub fn build(self) -> Result<Pipe> {
        let PipeBuilder {
            sample_rate,
            pump,
            mut processors,
            mut sinks,
            message_capacity,
        } = self;

        let mut pump = pump.ok_or(PipeError::MissingPump)?;
        if sinks.is_empty() {
            return Err(PipeError::MissingSink);
        }

        let pulse = pump.bind(sample_rate).map_err(|e| PipeError::PulseRejected {
            stage: pump.name().to_string(),
            reason: e.to_string(),
        })?;
        pulse.validate().map_err(|e| PipeError::PulseRejected {
            stage: pump.name().to_string(),
            reason: e.to_string(),
        })?;

        for processor in processors.iter_mut() {
            processor.bind(&pulse).map_err(|e| PipeError::PulseRejected {
                stage: processor.name().to_string(),
                reason: e.to_string(),
            })?;
        }
        for sink in sinks.iter_mut() {
            sink.bind(&pulse).map_err(|e| PipeError::PulseRejected {
                stage: sink.name().to_string(),
                reason: e.to_string(),
            })?;
        }

        debug!(pulse = %pulse, processors = processors.len(), sinks = sinks.len(), "pipe bound");
        Ok(Pipe {
            pulse,
            pump,
            processors,
            sinks,
            pending: Vec::new(),
            message_capacity,
        })
    }
}

/// A bound, not-yet-running pipeline.
pub struct Pipe {
    pulse: Pulse,
    pump: Box<dyn Pump>,
    processors: Vec<Box<dyn Processor>>,
    sinks: Vec<Box<dyn Sink>>,
    pending: Vec<(StageId, Params)>,
    message_capacity: usize,
}

impl Pipe {
    /// Start building a pipe that runs at `sample_rate`.
    pub fn builder(sample_rate: u32) -> PipeBuilder {
        PipeBuilder::new(sample_rate)
    }

    /// The stream configuration negotiated at build time.
    pub fn pulse(&self) -> Pulse {
        self.pulse
    }

    /// Queue parameter updates to apply before the first chunk.
    ///
    /// Updates queued here are loaded into the stage update queues before
    /// any task starts, so they take effect ahead of all production.
    /// Consumers matching no stage fail with
    /// [`PipeError::UnknownConsumer`]; sub-batches for known consumers are
    /// still queued.
    pub fn push(&mut self, params: Params) -> Result<()> {
        let mut params = params;
        let known: Vec<StageId> = self.stage_ids();
        let mut unknown = None;
        for consumer in params.consumers().collect::<Vec<_>>() {
            if known.contains(&consumer) {
                if let Some(batch) = params.take(consumer) {
                    self.pending.push((consumer, batch));
                }
            } else {
                warn!(consumer = %consumer, "pre-run push addressed unknown consumer");
                unknown.get_or_insert(consumer);
            }
        }
        match unknown {
            Some(id) => Err(PipeError::UnknownConsumer(id)),
            None => Ok(()),
        }
    }

    fn stage_ids(&self) -> Vec<StageId> {
        let mut ids = vec![self.pump.id()];
        ids.extend(self.processors.iter().map(|p| p.id()));
        ids.extend(self.sinks.iter().map(|s| s.id()));
        ids
    }

    /// Spawn the stage tasks and start the run.
    pub fn run(mut self) -> PipeHandle {
        let pulse = self.pulse;
        let capacity = self.message_capacity.max(1);
        let stage_count = 1 + self.processors.len() + self.sinks.len();
        let cancel = CancellationToken::new();
        let (error_tx, error_rx) = mpsc::channel::<PipeError>(stage_count);
        let (done_tx, done_rx) = watch::channel(false);

        info!(
            pulse = %pulse,
            processors = self.processors.len(),
            sinks = self.sinks.len(),
            capacity,
            "pipe run starting"
        );

        // One unbounded update queue per stage, created up front so pre-run
        // pushes can be seeded before any task observes its queue.
        let mut updates: HashMap<StageId, mpsc::UnboundedSender<Params>> = HashMap::new();
        let (pump_update_tx, pump_update_rx) = mpsc::unbounded_channel();
        updates.insert(self.pump.id(), pump_update_tx);
        let mut processor_updates = Vec::with_capacity(self.processors.len());
        for processor in &self.processors {
            let (tx, rx) = mpsc::unbounded_channel();
            updates.insert(processor.id(), tx);
            processor_updates.push(rx);
        }
        let mut sink_updates = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            let (tx, rx) = mpsc::unbounded_channel();
            updates.insert(sink.id(), tx);
            sink_updates.push(rx);
        }

        for (consumer, batch) in self.pending.drain(..) {
            if let Some(tx) = updates.get(&consumer) {
                // Receivers are all alive at this point
                let _ = tx.send(batch);
            }
        }

        let mut stages: Vec<JoinHandle<()>> = Vec::with_capacity(stage_count + 1);

        // Pump feeds the head of the chain
        let (head_tx, mut chain_rx) = mpsc::channel::<Message>(capacity);
        stages.push(tokio::spawn(pump_task(
            self.pump,
            head_tx,
            pump_update_rx,
            cancel.clone(),
            error_tx.clone(),
        )));

        for (processor, update_rx) in self.processors.into_iter().zip(processor_updates) {
            let (tx, rx) = mpsc::channel::<Message>(capacity);
            stages.push(tokio::spawn(processor_task(
                processor,
                chain_rx,
                tx,
                update_rx,
                cancel.clone(),
                error_tx.clone(),
            )));
            chain_rx = rx;
        }

        if self.sinks.len() == 1 {
            let sink = self.sinks.remove(0);
            let update_rx = sink_updates.remove(0);
            stages.push(tokio::spawn(sink_task(
                sink,
                chain_rx,
                update_rx,
                cancel.clone(),
                error_tx.clone(),
            )));
        } else {
            let mut fanout_txs = Vec::with_capacity(self.sinks.len());
            for (sink, update_rx) in self.sinks.into_iter().zip(sink_updates) {
                let (tx, rx) = mpsc::channel::<Message>(capacity);
                fanout_txs.push(tx);
                stages.push(tokio::spawn(sink_task(
                    sink,
                    rx,
                    update_rx,
                    cancel.clone(),
                    error_tx.clone(),
                )));
            }
            stages.push(tokio::spawn(fanout_task(
                chain_rx,
                fanout_txs,
                cancel.clone(),
            )));
        }

        // The supervisor detects all-stages-exited by this sender count
        // reaching zero, so the construction-time clone must go.
        drop(error_tx);

        let supervisor = tokio::spawn(supervise(stages, error_rx, cancel.clone(), done_tx));

        PipeHandle {
            pulse,
            updates,
            cancel_token: cancel,
            user_cancelled: AtomicBool::new(false),
            done: done_rx,
            supervisor,
        }
    }
}

/// Handle to a running pipeline.
pub struct PipeHandle {
    pulse: Pulse,
    updates: HashMap<StageId, mpsc::UnboundedSender<Params>>,
    cancel_token: CancellationToken,
    user_cancelled: AtomicBool,
    done: watch::Receiver<bool>,
    supervisor: JoinHandle<Option<PipeError>>,
}

impl PipeHandle {
    /// The stream configuration of this run.
    pub fn pulse(&self) -> Pulse {
        self.pulse
    }

    /// Route parameter updates to their consumer stages.
    ///
    /// Each stage applies its sub-batch at the next deterministic point of
    /// its loop: before the next chunk it produces or consumes, never
    /// mid-chunk. Consumers matching no stage fail with
    /// [`PipeError::UnknownConsumer`]; sub-batches for known consumers are
    /// still delivered.
    pub fn push(&self, params: Params) -> Result<()> {
        let mut params = params;
        let mut unknown = None;
        for consumer in params.consumers().collect::<Vec<_>>() {
            match self.updates.get(&consumer) {
                Some(tx) => {
                    if let Some(batch) = params.take(consumer) {
                        if tx.send(batch).is_err() {
                            warn!(consumer = %consumer, "update dropped: stage has exited");
                        }
                    }
                }
                None => {
                    warn!(consumer = %consumer, "push addressed unknown consumer");
                    unknown.get_or_insert(consumer);
                }
            }
        }
        match unknown {
            Some(id) => Err(PipeError::UnknownConsumer(id)),
            None => Ok(()),
        }
    }

    /// Request cancellation of the run.
    ///
    /// Every stage observes the request at its next suspension point and
    /// exits; [`PipeHandle::wait`] then returns [`PipeError::Cancelled`]
    /// (unless a stage error was recorded first).
    pub fn cancel(&self) {
        self.user_cancelled.store(true, Ordering::SeqCst);
        self.cancel_token.cancel();
    }

    /// True once cancellation has been requested (by the caller or by the
    /// fail-fast supervisor).
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Observable that flips to `true` when every stage task has exited.
    pub fn completion(&self) -> watch::Receiver<bool> {
        self.done.clone()
    }

    /// Wait for the run to finish.
    ///
    /// Returns the first stage error, [`PipeError::Cancelled`] when the
    /// caller cancelled a run that produced no stage error, and `Ok(())` on
    /// a normal end of stream.
    pub async fn wait(self) -> Result<()> {
        let PipeHandle {
            updates,
            user_cancelled,
            supervisor,
            ..
        } = self;
        // Keep stage update queues open until the run ends
        let _updates = updates;

        match supervisor.await {
            Ok(Some(err)) => Err(err),
            Ok(None) => {
                if user_cancelled.load(Ordering::SeqCst) {
                    Err(PipeError::Cancelled)
                } else {
                    Ok(())
                }
            }
            Err(e) => Err(PipeError::Internal(format!("supervisor task failed: {e}"))),
        }
    }
}

async fn pump_task(
    mut pump: Box<dyn Pump>,
    out: mpsc::Sender<Message>,
    mut updates: mpsc::UnboundedReceiver<Params>,
    cancel: CancellationToken,
    errors: mpsc::Sender<PipeError>,
) {
    let id = pump.id();
    debug!(stage = pump.name(), %id, "pump task started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(stage = pump.name(), "pump cancelled");
                break;
            }
            Some(params) = updates.recv() => {
                let applied = params.apply_to(id, pump.as_any_mut());
                debug!(stage = pump.name(), applied, "applied parameter updates");
            }
            permit = out.reserve() => {
                let permit = match permit {
                    Ok(permit) => permit,
                    // Downstream gone; nothing left to feed
                    Err(_) => break,
                };
                // Updates that arrived while waiting for capacity apply
                // before this chunk renders
                while let Ok(params) = updates.try_recv() {
                    params.apply_to(id, pump.as_any_mut());
                }
                match pump.pump() {
                    Ok(Some(message)) => permit.send(message),
                    Ok(None) => {
                        debug!(stage = pump.name(), "pump exhausted");
                        break;
                    }
                    Err(e) => {
                        error!(stage = pump.name(), error = %e, "pump failed");
                        let _ = errors
                            .send(PipeError::Pump {
                                stage: pump.name().to_string(),
                                source: e,
                            })
                            .await;
                        break;
                    }
                }
            }
        }
    }
    // Dropping `out` closes the stream for downstream stages
}

async fn processor_task(
    mut processor: Box<dyn Processor>,
    mut input: mpsc::Receiver<Message>,
    out: mpsc::Sender<Message>,
    mut updates: mpsc::UnboundedReceiver<Params>,
    cancel: CancellationToken,
    errors: mpsc::Sender<PipeError>,
) {
    let id = processor.id();
    debug!(stage = processor.name(), %id, "processor task started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(stage = processor.name(), "processor cancelled");
                break;
            }
            Some(params) = updates.recv() => {
                let applied = params.apply_to(id, processor.as_any_mut());
                debug!(stage = processor.name(), applied, "applied parameter updates");
            }
            received = input.recv() => {
                let message = match received {
                    Some(message) => message,
                    None => {
                        debug!(stage = processor.name(), "input closed");
                        break;
                    }
                };
                while let Ok(params) = updates.try_recv() {
                    params.apply_to(id, processor.as_any_mut());
                }
                message.apply_params(id, processor.as_any_mut());
                match processor.process(message.samples().clone()) {
                    Ok(samples) => {
                        let forwarded = message.with_samples(samples);
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            sent = out.send(forwarded) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!(stage = processor.name(), error = %e, "processor failed");
                        let _ = errors
                            .send(PipeError::Processor {
                                stage: processor.name().to_string(),
                                source: e,
                            })
                            .await;
                        break;
                    }
                }
            }
        }
    }
}

async fn sink_task(
    mut sink: Box<dyn Sink>,
    mut input: mpsc::Receiver<Message>,
    mut updates: mpsc::UnboundedReceiver<Params>,
    cancel: CancellationToken,
    errors: mpsc::Sender<PipeError>,
) {
    let id = sink.id();
    debug!(stage = sink.name(), %id, "sink task started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(stage = sink.name(), "sink cancelled");
                break;
            }
            Some(params) = updates.recv() => {
                let applied = params.apply_to(id, sink.as_any_mut());
                debug!(stage = sink.name(), applied, "applied parameter updates");
            }
            received = input.recv() => {
                let message = match received {
                    Some(message) => message,
                    None => {
                        // Normal end of stream
                        if let Err(e) = sink.flush() {
                            error!(stage = sink.name(), error = %e, "sink flush failed");
                            let _ = errors
                                .send(PipeError::Sink {
                                    stage: sink.name().to_string(),
                                    source: e,
                                })
                                .await;
                        } else {
                            debug!(stage = sink.name(), "sink flushed");
                        }
                        break;
                    }
                };
                while let Ok(params) = updates.try_recv() {
                    params.apply_to(id, sink.as_any_mut());
                }
                message.apply_params(id, sink.as_any_mut());
                match sink.sink(&message) {
                    Ok(()) => message.ack(),
                    Err(e) => {
                        error!(stage = sink.name(), error = %e, "sink failed");
                        let _ = errors
                            .send(PipeError::Sink {
                                stage: sink.name().to_string(),
                                source: e,
                            })
                            .await;
                        break;
                    }
                }
            }
        }
    }
}

/// Clones every message to every sink edge. Per-edge FIFO order is
/// preserved; there is no ordering guarantee across edges.
async fn fanout_task(
    mut input: mpsc::Receiver<Message>,
    outputs: Vec<mpsc::Sender<Message>>,
    cancel: CancellationToken,
) {
    debug!(sinks = outputs.len(), "fan-out task started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = input.recv() => {
                let message = match received {
                    Some(message) => message,
                    None => break,
                };
                for out in &outputs {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        sent = out.send(message.clone()) => {
                            // A closed edge means that sink exited; the
                            // supervisor is already tearing the run down
                            if sent.is_err() {
                                debug!("fan-out edge closed");
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Collects stage errors, cancels the run on the first one, and joins all
/// stage tasks. Returns the first error, if any; a stage task that
/// panicked surfaces as [`PipeError::Internal`].
async fn supervise(
    stages: Vec<JoinHandle<()>>,
    mut errors: mpsc::Receiver<PipeError>,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
) -> Option<PipeError> {
    let mut first_error: Option<PipeError> = None;
    // All stage tasks hold a sender clone; recv yields None once every
    // stage has exited
    while let Some(err) = errors.recv().await {
        if first_error.is_none() {
            warn!(error = %err, "stage failed, cancelling run");
            cancel.cancel();
            first_error = Some(err);
        } else {
            debug!(error = %err, "additional stage error after cancellation");
        }
    }
    for handle in stages {
        if let Err(e) = handle.await {
            if e.is_panic() {
                error!(error = %e, "stage task panicked, cancelling run");
                cancel.cancel();
                if first_error.is_none() {
                    first_error = Some(PipeError::Internal(format!("stage task panicked: {e}")));
                }
            }
        }
    }
    match &first_error {
        Some(err) => info!(error = %err, "pipe run finished with error"),
        None => info!("pipe run finished"),
    }
    let _ = done.send(true);
    first_error
}
