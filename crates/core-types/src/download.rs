//! Download state as observed by the host driver.

use serde::{Deserialize, Serialize};

/// Lifecycle of one tracked download.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

/// One entry in the download list fed into assertion contexts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadEntry {
    pub status: DownloadStatus,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

impl DownloadEntry {
    pub fn completed(filename: impl Into<String>) -> Self {
        Self {
            status: DownloadStatus::Completed,
            filename: filename.into(),
            bytes: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, DownloadStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        let entry = DownloadEntry::completed("report.csv");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["filename"], "report.csv");
    }
}
