//! Assertion context and outcome values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use stepgate_core_types::{DownloadEntry, Snapshot, StepId};

/// Everything a predicate may look at. A value, rebuilt per evaluation;
/// predicates never reach past it.
#[derive(Clone, Debug, Default)]
pub struct AssertContext {
    pub snapshot: Option<Snapshot>,
    pub url: Option<String>,
    pub step_id: Option<StepId>,
    pub downloads: Vec<DownloadEntry>,
}

impl AssertContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.url = Some(snapshot.url.clone());
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_downloads(mut self, downloads: Vec<DownloadEntry>) -> Self {
        self.downloads = downloads;
        self
    }

    pub fn with_step_id(mut self, step_id: StepId) -> Self {
        self.step_id = Some(step_id);
        self
    }
}

/// Result of one predicate evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssertOutcome {
    pub passed: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl AssertOutcome {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
            details: Value::Null,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}
