//! Structured trace stream.
//!
//! Every observable thing the runtime does — steps opening and closing,
//! snapshots, actions, verification outcomes, errors — flows through one
//! [`Tracer`] into a [`TraceSink`]. Events are append-only and emitted in
//! program order; a sink never reorders them.

pub mod event;
pub mod sink;
pub mod tracer;

pub use event::{TraceEvent, TraceEventKind, VerificationEvent};
pub use sink::{HttpSink, JsonlSink, MemorySink, NoopSink, TraceSink};
pub use tracer::Tracer;

use thiserror::Error;

/// Failures raised by sinks. The runtime treats these as fatal for the
/// trace channel, not for the run.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("trace i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace upload failed: {0}")]
    Upload(String),

    #[error("sink already closed")]
    Closed,
}
