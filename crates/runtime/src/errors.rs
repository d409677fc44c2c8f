//! Runtime error taxonomy.

use thiserror::Error;

use stepgate_backend::BackendError;
use stepgate_snapshot::SnapshotError;

/// Errors surfaced by the agent runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// An interactive captcha was detected and the policy is abort.
    #[error("interactive captcha detected (confidence {confidence:.2})")]
    CaptchaAbort {
        confidence: f64,
        provider_hint: Option<String>,
    },

    /// Assertion issued while no step is open and auto-stepping is off.
    #[error("no open step for assertion '{label}'")]
    NoOpenStep { label: String },

    /// `begin_step` while a non-auto step is still open.
    #[error("step '{current}' is still open")]
    StepAlreadyOpen { current: String },

    #[error("runtime operation cancelled")]
    Cancelled,
}

impl RuntimeError {
    /// Stable wire name for the error surface.
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeError::Backend(_) => "BackendError",
            RuntimeError::Snapshot(err) => err.name(),
            RuntimeError::CaptchaAbort { .. } => "CaptchaAbort",
            RuntimeError::NoOpenStep { .. } => "NoOpenStep",
            RuntimeError::StepAlreadyOpen { .. } => "StepAlreadyOpen",
            RuntimeError::Cancelled => "Cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            RuntimeError::Cancelled => true,
            RuntimeError::Backend(err) => err.is_cancelled(),
            RuntimeError::Snapshot(err) => err.is_cancelled(),
            _ => false,
        }
    }

    /// Policy errors are terminal for the step and escape the loop's
    /// error-to-outcome conversion.
    pub fn is_policy(&self) -> bool {
        matches!(self, RuntimeError::CaptchaAbort { .. })
    }
}
