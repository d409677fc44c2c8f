//! The emitter — the runtime's only channel to the outside world for
//! observability.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::warn;

use stepgate_core_types::{RunId, StepId};

use crate::event::{TraceEvent, TraceEventKind, VerificationEvent};
use crate::sink::TraceSink;

/// Owns a run id and a sink; all component events flow through here in
/// program order.
#[derive(Clone)]
pub struct Tracer {
    run_id: RunId,
    sink: Arc<dyn TraceSink>,
}

impl Tracer {
    pub fn new(run_id: RunId, sink: Arc<dyn TraceSink>) -> Self {
        Self { run_id, sink }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Emit one event. Sink failures are logged, never propagated — a
    /// broken collector must not fail the run itself.
    pub async fn emit(&self, kind: TraceEventKind, step_id: Option<&StepId>, data: Value) {
        let event = TraceEvent::new(kind, self.run_id.clone(), step_id.cloned(), data);
        if let Err(err) = self.sink.emit(&event).await {
            warn!(target: "stepgate-trace", %err, ?kind, "trace emit failed");
        }
    }

    pub async fn step_start(&self, step_id: &StepId, goal: &str, step_index: Option<u32>) {
        self.emit(
            TraceEventKind::StepStart,
            Some(step_id),
            json!({ "goal": goal, "step_index": step_index }),
        )
        .await;
    }

    pub async fn step_end(&self, step_id: &StepId, data: Value) {
        self.emit(TraceEventKind::StepEnd, Some(step_id), data).await;
    }

    pub async fn snapshot(&self, step_id: Option<&StepId>, url: &str, element_count: usize) {
        self.emit(
            TraceEventKind::Snapshot,
            step_id,
            json!({ "url": url, "element_count": element_count }),
        )
        .await;
    }

    pub async fn action(&self, step_id: Option<&StepId>, action: Value) {
        self.emit(TraceEventKind::Action, step_id, action).await;
    }

    pub async fn verification(&self, step_id: Option<&StepId>, record: &VerificationEvent) {
        let data = serde_json::to_value(record).unwrap_or(Value::Null);
        self.emit(TraceEventKind::Verification, step_id, data).await;
    }

    pub async fn error(&self, step_id: Option<&StepId>, name: &str, message: &str, data: Value) {
        self.emit(
            TraceEventKind::Error,
            step_id,
            json!({ "name": name, "message": message, "data": data }),
        )
        .await;
    }

    pub async fn close(&self) {
        if let Err(err) = self.sink.close().await {
            warn!(target: "stepgate-trace", %err, "trace sink close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    #[tokio::test]
    async fn events_flow_in_program_order() {
        let sink = Arc::new(MemorySink::new());
        let tracer = Tracer::new(RunId("run".into()), sink.clone());
        let step = StepId("s1".into());

        tracer.step_start(&step, "open page", Some(0)).await;
        tracer.snapshot(Some(&step), "https://example.com", 12).await;
        tracer
            .verification(
                Some(&step),
                &VerificationEvent {
                    label: "heading".into(),
                    required: true,
                    passed: true,
                    reason: "matched".into(),
                    kind: "assert".into(),
                    attempts: 1,
                    details: Value::Null,
                },
            )
            .await;
        tracer.step_end(&step, json!({"ok": true})).await;

        let events = sink.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].kind, TraceEventKind::StepStart);
        assert_eq!(events[3].kind, TraceEventKind::StepEnd);
        assert!(events.iter().all(|e| e.run_id.0 == "run"));
        assert_eq!(events[2].data["attempts"], 1);
    }
}
