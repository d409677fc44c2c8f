//! Capture options passed through to the extension.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Extension-side pre-filters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clickable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_viewport: Option<bool>,
}

impl SnapshotFilter {
    fn is_empty(&self) -> bool {
        self.clickable.is_none() && self.visible.is_none() && self.in_viewport.is_none()
    }
}

/// Screenshot attachment request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScreenshotRequest {
    Enabled(bool),
    Configured { format: String, quality: u8 },
}

/// Options accepted by the snapshot service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotOptions {
    /// Max elements returned in the semantic snapshot.
    pub limit: u32,
    #[serde(default)]
    pub filter: SnapshotFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotRequest>,
    /// Render element boxes in-page (debug).
    #[serde(default)]
    pub show_overlay: bool,
    /// Render detected grid overlay (debug).
    #[serde(default)]
    pub show_grid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_id: Option<u32>,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            filter: SnapshotFilter::default(),
            screenshot: None,
            show_overlay: false,
            show_grid: false,
            grid_id: None,
        }
    }
}

impl SnapshotOptions {
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_screenshot(mut self) -> Self {
        self.screenshot = Some(ScreenshotRequest::Enabled(true));
        self
    }

    /// Compacted argument object for the extension call — only the keys
    /// the extension needs to see, defaults omitted.
    pub fn to_extension_args(&self) -> Value {
        let mut map = Map::new();
        map.insert("limit".to_string(), json!(self.limit));
        if !self.filter.is_empty() {
            map.insert(
                "filter".to_string(),
                serde_json::to_value(self.filter).unwrap_or(Value::Null),
            );
        }
        if let Some(screenshot) = &self.screenshot {
            map.insert(
                "screenshot".to_string(),
                serde_json::to_value(screenshot).unwrap_or(Value::Null),
            );
        }
        Value::Object(map)
    }
}
