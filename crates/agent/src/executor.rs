//! Executor ports.
//!
//! Concrete LLM providers live outside the core; the step loop only
//! needs "text in, action string out" plus optional usage numbers for
//! the accounting hook.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use stepgate_runtime::TokenUsage;

use crate::errors::AgentError;

/// One executor response.
#[derive(Clone, Debug, Default)]
pub struct ExecutorReply {
    /// Raw action string to parse against the grammar.
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
}

impl ExecutorReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            model: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage, model: impl Into<String>) -> Self {
        self.usage = Some(usage);
        self.model = Some(model.into());
        self
    }
}

/// Text executor deciding the next action from the compact prompt.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn decide(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ExecutorReply, AgentError>;
}

/// Vision executor deciding a coordinate action from a screenshot.
#[async_trait]
pub trait VisionExecutor: Send + Sync {
    async fn decide(
        &self,
        goal: &str,
        screenshot_b64: &str,
    ) -> Result<ExecutorReply, AgentError>;
}

/// Deterministic executor for tests and offline development: replays a
/// queue of replies and records the prompts it saw.
#[derive(Default)]
pub struct ScriptedExecutor {
    replies: Mutex<VecDeque<ExecutorReply>>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: ExecutorReply) {
        self.replies.lock().push_back(reply);
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push(ExecutorReply::text(text));
    }

    /// Prompts seen so far, in order.
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn decide(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ExecutorReply, AgentError> {
        self.prompts
            .lock()
            .push((system_prompt.to_string(), user_prompt.to_string()));
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| AgentError::Executor("scripted executor exhausted".to_string()))
    }
}

#[async_trait]
impl VisionExecutor for ScriptedExecutor {
    async fn decide(
        &self,
        goal: &str,
        _screenshot_b64: &str,
    ) -> Result<ExecutorReply, AgentError> {
        self.prompts
            .lock()
            .push(("vision".to_string(), goal.to_string()));
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| AgentError::Executor("scripted executor exhausted".to_string()))
    }
}
