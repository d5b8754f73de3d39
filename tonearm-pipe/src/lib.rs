//! # Tonearm Pipeline Engine
//!
//! Asynchronous execution of audio pipelines:
//! - Stage contracts (Pump, Processor, Sink)
//! - Pipe wiring, pulse negotiation, and run supervision
//! - Parameter update routing and cancellation
//! - In-memory capture sink (asset)
//! - Deterministic mock stages for tests and benches

pub mod asset;
pub mod error;
pub mod mock;
pub mod pipe;
pub mod stage;

pub use asset::Asset;
pub use error::{PipeError, Result};
pub use pipe::{Pipe, PipeBuilder, PipeHandle};
pub use stage::{Processor, Pump, Sink, Stage};
