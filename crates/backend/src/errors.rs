//! Backend error taxonomy.
//!
//! Every failure crossing the port carries a stable `reason_code` so the
//! trace stays machine-readable regardless of which driver produced it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// High-level failure categories surfaced by any backend driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// The transport to the browser process failed or is gone.
    #[error("transport failure")]
    Transport,
    /// Page JavaScript threw while evaluating an expression.
    #[error("evaluation raised exception")]
    Eval,
    /// A bounded wait expired.
    #[error("operation timed out")]
    Timeout,
    /// The backend has no rendering surface yet (e.g. before first paint).
    #[error("no rendering surface")]
    NoSurface,
    /// The driver does not implement the requested capability.
    #[error("capability not supported")]
    Unsupported,
    /// An external abort signal fired.
    #[error("operation cancelled")]
    Cancelled,
    #[error("internal error")]
    Internal,
}

impl BackendErrorKind {
    /// Stable wire identifier for this kind.
    pub fn reason_code(&self) -> &'static str {
        match self {
            BackendErrorKind::Transport => "transport",
            BackendErrorKind::Eval => "eval_exception",
            BackendErrorKind::Timeout => "timeout",
            BackendErrorKind::NoSurface => "no_surface",
            BackendErrorKind::Unsupported => "unsupported",
            BackendErrorKind::Cancelled => "cancelled",
            BackendErrorKind::Internal => "internal",
        }
    }
}

/// Enriched error passed back to the runtime layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
    pub data: Option<Value>,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for BackendError {}

impl BackendError {
    pub fn new(kind: BackendErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
            data: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn reason_code(&self) -> &'static str {
        self.kind.reason_code()
    }

    /// Page exception while evaluating.
    pub fn eval(text: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Eval).with_hint(text)
    }

    /// Bounded wait expired.
    pub fn timeout(what: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Timeout)
            .with_hint(what)
            .retriable(true)
    }

    pub fn transport(hint: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Transport)
            .with_hint(hint)
            .retriable(true)
    }

    pub fn cancelled() -> Self {
        Self::new(BackendErrorKind::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, BackendErrorKind::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(BackendError::timeout("x").reason_code(), "timeout");
        assert_eq!(BackendError::eval("boom").reason_code(), "eval_exception");
        assert_eq!(
            BackendError::new(BackendErrorKind::NoSurface).reason_code(),
            "no_surface"
        );
    }

    #[test]
    fn display_includes_hint() {
        let err = BackendError::transport("socket closed");
        assert_eq!(err.to_string(), "transport failure: socket closed");
        assert!(err.retriable);
    }
}
