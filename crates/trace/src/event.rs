//! Trace event model — one JSON object per line on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use stepgate_core_types::{timestamp_now, RunId, StepId};

/// Event discriminator, snake_case on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventKind {
    StepStart,
    StepEnd,
    Snapshot,
    Action,
    Verification,
    Error,
}

/// One trace line: `{type, run_id, step_id?, ts, ...payload}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceEvent {
    #[serde(rename = "type")]
    pub kind: TraceEventKind,
    pub run_id: RunId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    pub ts: u64,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl TraceEvent {
    pub fn new(kind: TraceEventKind, run_id: RunId, step_id: Option<StepId>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            kind,
            run_id,
            step_id,
            ts: timestamp_now(),
            data,
        }
    }
}

/// Payload carried by `verification` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerificationEvent {
    pub label: String,
    pub required: bool,
    pub passed: bool,
    pub reason: String,
    pub kind: String,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_is_flat() {
        let event = TraceEvent::new(
            TraceEventKind::Verification,
            RunId("run-1".into()),
            Some(StepId("step-1".into())),
            json!({"label": "url", "passed": true}),
        );
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["type"], "verification");
        assert_eq!(wire["run_id"], "run-1");
        assert_eq!(wire["step_id"], "step-1");
        assert_eq!(wire["label"], "url");
        assert_eq!(wire["passed"], true);
        assert!(wire["ts"].as_u64().unwrap() > 0);
    }

    #[test]
    fn missing_step_id_is_omitted() {
        let event = TraceEvent::new(
            TraceEventKind::Error,
            RunId("run-1".into()),
            None,
            json!({"message": "boom"}),
        );
        let wire = serde_json::to_value(&event).unwrap();
        assert!(wire.get("step_id").is_none());
    }
}
