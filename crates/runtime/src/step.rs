//! Step state and verification records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use stepgate_core_types::StepId;

/// How a verification was produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    Assert,
    AssertDone,
    Scroll,
    Captcha,
    Custom,
}

impl VerificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationKind::Assert => "assert",
            VerificationKind::AssertDone => "assert_done",
            VerificationKind::Scroll => "scroll",
            VerificationKind::Captcha => "captcha",
            VerificationKind::Custom => "custom",
        }
    }
}

/// One recorded verification outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerificationResult {
    pub label: String,
    pub required: bool,
    pub passed: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
    pub attempts: u32,
    pub kind: VerificationKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepStatus {
    Open,
    Ended,
}

/// One bounded unit of agent work. Ends exactly once.
#[derive(Clone, Debug)]
pub struct Step {
    pub step_id: StepId,
    pub goal: String,
    pub began_at: u64,
    pub status: StepStatus,
    pub verifications: Vec<VerificationResult>,
    /// Set when a required verification failed.
    pub failed: bool,
    /// True for synthetic `verify:<label>` steps opened by assertions.
    pub auto: bool,
    pub step_index: Option<u32>,
}

impl Step {
    pub fn new(goal: impl Into<String>, step_index: Option<u32>, auto: bool) -> Self {
        Self {
            step_id: StepId::new(),
            goal: goal.into(),
            began_at: stepgate_core_types::timestamp_now(),
            status: StepStatus::Open,
            verifications: Vec::new(),
            failed: false,
            auto,
            step_index,
        }
    }

    /// A step is ok when every required verification passed, judging each
    /// label by its latest outcome so a successful re-verification (e.g.
    /// after a vision rescue) redeems an earlier failure.
    pub fn is_ok(&self) -> bool {
        let mut last: std::collections::HashMap<&str, bool> = std::collections::HashMap::new();
        for v in &self.verifications {
            if v.required {
                last.insert(v.label.as_str(), v.passed);
            }
        }
        last.values().all(|passed| *passed)
    }

    pub fn record(&mut self, result: VerificationResult) {
        if result.required && !result.passed {
            self.failed = true;
        }
        self.verifications.push(result);
    }
}
