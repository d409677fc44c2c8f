//! Token-usage accounting.
//!
//! A purely additive hook: the step loop reports what each LLM call
//! consumed, keyed by role and model. Missing fields count as zero.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Which port made the call.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageRole {
    Executor,
    VisionExecutor,
    VisionVerifier,
}

impl UsageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageRole::Executor => "executor",
            UsageRole::VisionExecutor => "vision_executor",
            UsageRole::VisionVerifier => "vision_verifier",
        }
    }
}

/// Token counts for one call or one aggregate bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Default)]
struct UsageBuckets {
    by_role: HashMap<UsageRole, TokenUsage>,
    by_model: HashMap<String, TokenUsage>,
    total: TokenUsage,
}

/// Aggregates usage across a run. Shareable; recording is lock-guarded.
#[derive(Default)]
pub struct UsageRecorder {
    buckets: Mutex<UsageBuckets>,
}

impl UsageRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, role: UsageRole, model: &str, usage: TokenUsage) {
        let mut buckets = self.buckets.lock();
        buckets.by_role.entry(role).or_default().add(&usage);
        buckets
            .by_model
            .entry(model.to_string())
            .or_default()
            .add(&usage);
        buckets.total.add(&usage);
    }

    pub fn total(&self) -> TokenUsage {
        self.buckets.lock().total
    }

    pub fn for_role(&self, role: UsageRole) -> TokenUsage {
        self.buckets
            .lock()
            .by_role
            .get(&role)
            .copied()
            .unwrap_or_default()
    }

    pub fn for_model(&self, model: &str) -> TokenUsage {
        self.buckets
            .lock()
            .by_model
            .get(model)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_by_role_and_model() {
        let recorder = UsageRecorder::new();
        recorder.record(UsageRole::Executor, "gpt-x", TokenUsage::new(100, 20));
        recorder.record(UsageRole::Executor, "gpt-x", TokenUsage::new(50, 10));
        recorder.record(UsageRole::VisionExecutor, "pix-y", TokenUsage::new(30, 5));

        assert_eq!(recorder.for_role(UsageRole::Executor).prompt_tokens, 150);
        assert_eq!(recorder.for_role(UsageRole::Executor).total_tokens, 180);
        assert_eq!(recorder.for_model("pix-y").completion_tokens, 5);
        assert_eq!(recorder.total().total_tokens, 215);
        assert_eq!(
            recorder.for_role(UsageRole::VisionVerifier),
            TokenUsage::default()
        );
    }
}
