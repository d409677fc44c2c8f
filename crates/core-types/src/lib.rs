//! Shared identifiers and the semantic page model consumed by every
//! stepgate layer.
//!
//! The types here are values: a [`Snapshot`] is produced atomically by one
//! extension call and never mutated afterwards, element ids are unique
//! only within the snapshot that produced them, and nothing in this crate
//! performs I/O.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod download;
pub mod snapshot;

pub use download::{DownloadEntry, DownloadStatus};
pub use snapshot::{
    BBox, CaptchaDiagnostics, CaptchaEvidence, Element, Snapshot, SnapshotDiagnostics,
    SnapshotStatus, SnapshotViewport, ViewportInfo, VisualCues,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one runtime instance / trace stream.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for one step within a run. Opaque to everything except the
/// trace reader.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Epoch milliseconds, the single timestamp representation used on the
/// trace wire.
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
        assert_ne!(StepId::new(), StepId::new());
    }

    #[test]
    fn timestamps_are_monotonic_enough() {
        let a = timestamp_now();
        let b = timestamp_now();
        assert!(b >= a);
    }
}
