//! Pipeline messages and completion barriers
//!
//! A [`Message`] is the unit of flow between pipeline stages: a sample
//! buffer plus optional in-band [`Params`] for downstream consumers and an
//! optional [`Barrier`] the producer can wait on. Cloning a message (for
//! fan-out to several sinks) shares all three parts.
//!
//! The barrier gives two stages a synchronous rendezvous without every
//! stage pair having to support one: the producer attaches a barrier with
//! the number of acknowledgements it expects, consumers call
//! [`Message::ack`] after fully processing the message, and the producer's
//! [`Barrier::wait`] resolves once all acknowledgements arrive.

use crate::buffer::Buffer;
use crate::params::{Params, StageId};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Completion counter shared between one producer and its consumers.
///
/// Created with the expected number of acknowledgements; clones share the
/// counter. Extra acknowledgements beyond the expected count are ignored.
#[derive(Clone)]
pub struct Barrier {
    counter: Arc<watch::Sender<usize>>,
}

impl Barrier {
    /// Barrier expecting `expected` acknowledgements.
    ///
    /// With `expected == 0` the barrier starts satisfied and `wait` resolves
    /// immediately.
    pub fn new(expected: usize) -> Self {
        let (tx, _rx) = watch::channel(expected);
        Self {
            counter: Arc::new(tx),
        }
    }

    /// Record one acknowledgement. Saturates at zero.
    pub fn acknowledge(&self) {
        self.counter.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Outstanding acknowledgements.
    pub fn remaining(&self) -> usize {
        *self.counter.borrow()
    }

    /// Resolve once every expected acknowledgement has arrived.
    pub async fn wait(&self) {
        let mut rx = self.counter.subscribe();
        // The sender lives inside self, so wait_for cannot observe a closed
        // channel here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// One unit of pipeline flow: samples plus optional control freight.
#[derive(Debug, Clone)]
pub struct Message {
    samples: Buffer,
    params: Option<Arc<Params>>,
    barrier: Option<Barrier>,
}

impl Message {
    /// Message carrying only samples.
    pub fn new(samples: Buffer) -> Self {
        Self {
            samples,
            params: None,
            barrier: None,
        }
    }

    /// Attach in-band parameter updates for downstream stages. An empty
    /// batch is normalized away.
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = if params.is_empty() {
            None
        } else {
            Some(Arc::new(params))
        };
        self
    }

    /// Attach a completion barrier.
    pub fn with_barrier(mut self, barrier: Barrier) -> Self {
        self.barrier = Some(barrier);
        self
    }

    /// Replace the samples, keeping params and barrier. Used by the engine
    /// to forward a processed message downstream.
    pub fn with_samples(mut self, samples: Buffer) -> Self {
        self.samples = samples;
        self
    }

    /// The carried sample buffer.
    pub fn samples(&self) -> &Buffer {
        &self.samples
    }

    /// In-band parameter updates, if any.
    pub fn params(&self) -> Option<&Params> {
        self.params.as_deref()
    }

    /// The attached barrier, if any.
    pub fn barrier(&self) -> Option<&Barrier> {
        self.barrier.as_ref()
    }

    /// Run any in-band actions addressed to `consumer` against `target`.
    /// Returns the number of actions executed.
    pub fn apply_params(&self, consumer: StageId, target: &mut dyn Any) -> usize {
        match &self.params {
            Some(params) => params.apply_to(consumer, target),
            None => 0,
        }
    }

    /// Acknowledge the barrier, if one is attached. No-op otherwise.
    pub fn ack(&self) {
        if let Some(barrier) = &self.barrier {
            barrier.acknowledge();
        }
    }
}
