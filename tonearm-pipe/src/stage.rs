//! Stage contracts
//!
//! A pipe is one pump, zero or more processors, and one or more sinks. The
//! engine owns the stages and drives each one from its own task; stage
//! implementations stay synchronous and single-threaded. External
//! collaborators (decoders, encoders, device output) live behind these
//! traits, outside this crate.
//!
//! **Binding:** before a run starts every stage is bound exactly once. The
//! pump completes the [`Pulse`] (the engine supplies the sample rate, the
//! pump supplies chunk size and channel count); processors and sinks
//! validate the pulse and may reject it, which fails construction.
//!
//! **Parameter updates:** stages expose a type-erased `&mut dyn Any` through
//! [`Stage::as_any_mut`]. The engine applies queued [`Params`] actions
//! against it at deterministic points of the stage loop: between chunks,
//! never mid-call.
//!
//! [`Params`]: tonearm_common::Params

use std::any::Any;
use tonearm_common::{Buffer, Message, Pulse, StageId};

/// Behavior common to every pipeline stage.
pub trait Stage: Send {
    /// Stable identity parameter updates are addressed to.
    fn id(&self) -> StageId;

    /// Short stage name for logs and error messages.
    fn name(&self) -> &str;

    /// Type-erased mutable access for parameter application.
    ///
    /// Implementations return `self`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Source stage: produces the stream chunk by chunk.
pub trait Pump: Stage {
    /// Bind to a run, completing the stream configuration.
    fn bind(&mut self, sample_rate: u32) -> anyhow::Result<Pulse>;

    /// Produce the next message. `Ok(None)` signals end of stream; once
    /// returned, the engine never calls `pump` again for this run.
    fn pump(&mut self) -> anyhow::Result<Option<Message>>;
}

/// Transform stage: consumes chunks and yields transformed chunks 1:1.
pub trait Processor: Stage {
    /// Validate the stream configuration for this run.
    fn bind(&mut self, pulse: &Pulse) -> anyhow::Result<()>;

    /// Transform one chunk. Control freight (params, barrier) on the
    /// carrying message is forwarded by the engine untouched.
    fn process(&mut self, samples: Buffer) -> anyhow::Result<Buffer>;
}

/// Terminal stage: consumes chunks.
pub trait Sink: Stage {
    /// Validate the stream configuration for this run.
    fn bind(&mut self, pulse: &Pulse) -> anyhow::Result<()>;

    /// Consume one message. The engine acknowledges the message's barrier
    /// after this returns successfully.
    fn sink(&mut self, message: &Message) -> anyhow::Result<()>;

    /// Called once when the stream ends normally. Encoder-style sinks
    /// finalize their output here.
    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
