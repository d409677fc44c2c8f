//! Snapshot-layer errors.

use std::collections::BTreeMap;

use thiserror::Error;

use stepgate_backend::BackendError;

/// Failures in snapshot acquisition.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The extension never injected its capture function. Carries the
    /// probe diagnostics so the trace explains *why* (wrong page, no
    /// extension, injection raced navigation).
    #[error("extension not loaded: {}", format_diagnostics(.diagnostics))]
    ExtensionNotLoaded {
        diagnostics: BTreeMap<String, String>,
    },

    /// The extension returned null for the capture.
    #[error("snapshot capture returned nothing{}", .url.as_deref().map(|u| format!(" at {u}")).unwrap_or_default())]
    Empty { url: Option<String> },

    /// The payload did not parse into the snapshot model.
    #[error("malformed snapshot: {0}")]
    Malformed(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("snapshot acquisition cancelled")]
    Cancelled,
}

impl SnapshotError {
    /// Stable wire name for the error surface.
    pub fn name(&self) -> &'static str {
        match self {
            SnapshotError::ExtensionNotLoaded { .. } => "ExtensionNotLoadedError",
            SnapshotError::Empty { .. } => "SnapshotError",
            SnapshotError::Malformed(_) => "SnapshotError",
            SnapshotError::Backend(_) => "BackendError",
            SnapshotError::Cancelled => "Cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SnapshotError::Cancelled)
            || matches!(self, SnapshotError::Backend(err) if err.is_cancelled())
    }
}

fn format_diagnostics(diagnostics: &BTreeMap<String, String>) -> String {
    let mut parts: Vec<String> = diagnostics
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    parts.sort();
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_error_formats_diagnostics() {
        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("defined".to_string(), "false".to_string());
        diagnostics.insert("url".to_string(), "about:blank".to_string());
        let err = SnapshotError::ExtensionNotLoaded { diagnostics };
        let text = err.to_string();
        assert!(text.contains("defined=false"));
        assert!(text.contains("url=about:blank"));
        assert_eq!(err.name(), "ExtensionNotLoadedError");
    }
}
