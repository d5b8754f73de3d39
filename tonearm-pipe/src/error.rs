//! Error types for the pipeline engine
//!
//! Two families, handled differently:
//! - **Construction errors** (missing stages, pulse rejection) are returned
//!   synchronously from [`crate::PipeBuilder::build`] and are fatal to
//!   wiring; nothing has been spawned yet.
//! - **Runtime errors** (a stage failing mid-run) are fatal to the whole
//!   run: the first one cancels every other stage and is returned from
//!   [`crate::PipeHandle::wait`]. The engine never retries, skips, or
//!   degrades; recovery policy belongs inside individual stage
//!   implementations.

use thiserror::Error;
use tonearm_common::StageId;

/// Main error type for pipeline construction and runs
#[derive(Error, Debug)]
pub enum PipeError {
    /// Pipe was built without a pump stage
    #[error("Pipe has no pump stage")]
    MissingPump,

    /// Pipe was built without any sink stage
    #[error("Pipe has no sink stage")]
    MissingSink,

    /// A stage rejected the stream configuration at bind time
    #[error("Stage '{stage}' rejected pulse: {reason}")]
    PulseRejected { stage: String, reason: String },

    /// The pump stage failed while producing
    #[error("Pump stage '{stage}' failed: {source}")]
    Pump {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    /// A processor stage failed while transforming
    #[error("Processor stage '{stage}' failed: {source}")]
    Processor {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    /// A sink stage failed while consuming
    #[error("Sink stage '{stage}' failed: {source}")]
    Sink {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    /// A pushed parameter batch addressed a stage not in this pipe
    #[error("No stage registered for consumer {0}")]
    UnknownConsumer(StageId),

    /// The run was cancelled before completing
    #[error("Run cancelled")]
    Cancelled,

    /// Engine-internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using PipeError
pub type Result<T> = std::result::Result<T, PipeError>;
