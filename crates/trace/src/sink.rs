//! Sink implementations.
//!
//! A sink must tolerate high-frequency writes and be safe for concurrent
//! `emit` when shared across runtimes. Backpressure is the sink's
//! responsibility; the runtime never drops events.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::event::TraceEvent;
use crate::TraceError;

/// Write-only port the tracer emits into.
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn emit(&self, event: &TraceEvent) -> Result<(), TraceError>;

    /// Flush and release resources. Emitting after close is an error.
    async fn close(&self) -> Result<(), TraceError>;
}

/// Discards everything.
#[derive(Default)]
pub struct NoopSink;

#[async_trait]
impl TraceSink for NoopSink {
    async fn emit(&self, _event: &TraceEvent) -> Result<(), TraceError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Collects events in memory; the assertion surface for tests.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl TraceSink for MemorySink {
    async fn emit(&self, event: &TraceEvent) -> Result<(), TraceError> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Newline-delimited JSON file sink with per-event flush, so a crashed
/// run still leaves a replayable transcript.
pub struct JsonlSink {
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonlSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }
}

#[async_trait]
impl TraceSink for JsonlSink {
    async fn emit(&self, event: &TraceEvent) -> Result<(), TraceError> {
        let line = serde_json::to_string(event)?;
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(TraceError::Closed)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TraceError> {
        if let Some(mut writer) = self.writer.lock().take() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Buffered network uploader. Events batch in memory and POST to the
/// collector endpoint; a failed upload keeps the batch for the next
/// attempt so the transcript survives flaky collectors.
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
    batch_size: usize,
    buffer: Mutex<Vec<TraceEvent>>,
}

impl HttpSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            batch_size: 64,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn take_batch(&self) -> Vec<TraceEvent> {
        std::mem::take(&mut *self.buffer.lock())
    }

    fn restore_batch(&self, mut batch: Vec<TraceEvent>) {
        let mut guard = self.buffer.lock();
        batch.extend(guard.drain(..));
        *guard = batch;
    }

    async fn upload(&self, batch: &[TraceEvent]) -> Result<(), TraceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(batch)
            .send()
            .await
            .map_err(|err| TraceError::Upload(err.to_string()))?;
        if !response.status().is_success() {
            return Err(TraceError::Upload(format!(
                "collector returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TraceSink for HttpSink {
    async fn emit(&self, event: &TraceEvent) -> Result<(), TraceError> {
        let should_flush = {
            let mut buffer = self.buffer.lock();
            buffer.push(event.clone());
            buffer.len() >= self.batch_size
        };
        if should_flush {
            let batch = self.take_batch();
            if let Err(err) = self.upload(&batch).await {
                warn!(target: "stepgate-trace", %err, "trace upload failed, retaining batch");
                self.restore_batch(batch);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TraceError> {
        let batch = self.take_batch();
        if batch.is_empty() {
            return Ok(());
        }
        self.upload(&batch).await
    }
}
