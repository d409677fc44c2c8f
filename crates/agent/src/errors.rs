//! Agent-layer errors.

use thiserror::Error;

use stepgate_runtime::RuntimeError;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Executor output did not match the action grammar.
    #[error("unparseable action '{input}': {reason}")]
    ActionParse { input: String, reason: String },

    /// An action referenced an id absent from the current snapshot.
    #[error("element {id} not found in current snapshot")]
    ElementNotFound { id: u64 },

    /// The executor port itself failed.
    #[error("executor failed: {0}")]
    Executor(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl AgentError {
    pub fn parse(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ActionParse {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Stable wire name for the error surface.
    pub fn name(&self) -> &'static str {
        match self {
            AgentError::ActionParse { .. } => "ActionParseError",
            AgentError::ElementNotFound { .. } => "ElementNotFound",
            AgentError::Executor(_) => "ExecutorError",
            AgentError::Runtime(err) => err.name(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Runtime(err) if err.is_cancelled())
    }

    pub fn is_policy(&self) -> bool {
        matches!(self, AgentError::Runtime(err) if err.is_policy())
    }
}
