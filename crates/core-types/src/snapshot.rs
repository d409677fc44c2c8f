//! The semantic snapshot model.
//!
//! A snapshot is a filtered, ranked view of the page produced by the
//! in-page extension: interactive elements with geometry, grouping and
//! visual metadata, plus diagnostics the runtime gates on. It is not the
//! DOM; element ids are stable only within the snapshot that minted them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome reported by the extension for one capture.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Success,
    Error,
}

impl Default for SnapshotStatus {
    fn default() -> Self {
        SnapshotStatus::Error
    }
}

/// Viewport-coordinate bounding box in CSS pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BBox {
    /// Geometric center, the point used for id-addressed clicks.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Visual hints the extension extracts per element.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualCues {
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color_name: Option<String>,
    #[serde(default)]
    pub is_clickable: bool,
}

/// One ranked interactive element.
///
/// `id` is unique within its snapshot and never assumed stable across
/// snapshots. `group_index` is monotonic in document order within the
/// element's group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: u64,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub text: String,
    /// 0-100+ actionability score, higher means more likely to matter.
    #[serde(default)]
    pub importance: i64,
    #[serde(default)]
    pub bbox: BBox,
    #[serde(default)]
    pub visual_cues: VisualCues,
    #[serde(default)]
    pub in_viewport: bool,
    #[serde(default)]
    pub is_occluded: bool,
    #[serde(default)]
    pub z_index: i64,
    /// Page-absolute y, present when the extension could compute it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    /// 0-based position within the group, in document order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_dominant_group: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Element {
    /// Sort key for in-group ranking: top of document first, then left to
    /// right, then most important.
    pub fn rank_key(&self) -> (i64, i64, i64, i64) {
        let doc_y = self.doc_y.unwrap_or(f64::MAX).round() as i64;
        (
            doc_y,
            self.bbox.y.round() as i64,
            self.bbox.x.round() as i64,
            -self.importance,
        )
    }
}

/// Evidence counters backing a captcha verdict.
///
/// Iframe hits on their own are passive (an invisible badge does not block
/// the user); text and selector hits mean an interactive challenge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptchaEvidence {
    #[serde(default)]
    pub iframe_src_hits: Vec<String>,
    #[serde(default)]
    pub selector_hits: Vec<String>,
    #[serde(default)]
    pub text_hits: Vec<String>,
    #[serde(default)]
    pub url_hits: Vec<String>,
}

impl CaptchaEvidence {
    /// True when only the passive iframe channel fired.
    pub fn is_passive_only(&self) -> bool {
        !self.iframe_src_hits.is_empty()
            && self.selector_hits.is_empty()
            && self.text_hits.is_empty()
            && self.url_hits.is_empty()
    }

    /// True when any channel that can actually block the user fired.
    pub fn has_interactive_hits(&self) -> bool {
        !self.selector_hits.is_empty() || !self.text_hits.is_empty() || !self.url_hits.is_empty()
    }
}

/// Captcha verdict attached to a snapshot by the extension.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptchaDiagnostics {
    #[serde(default)]
    pub detected: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_hint: Option<String>,
    #[serde(default)]
    pub evidence: CaptchaEvidence,
}

/// Per-snapshot diagnostics bag.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDiagnostics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha: Option<CaptchaDiagnostics>,
}

/// Viewport geometry derived from JS evaluation, cached per step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewportInfo {
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub scroll_x: f64,
    #[serde(default)]
    pub scroll_y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_height: Option<f64>,
}

/// Point-in-time structured view of the page.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub status: SnapshotStatus,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub viewport: SnapshotViewport,
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_group_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<SnapshotDiagnostics>,
    /// Base64 screenshot, present when the capture asked for one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

/// Viewport dimensions as reported inside the snapshot payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotViewport {
    pub width: f64,
    pub height: f64,
}

impl Snapshot {
    pub fn is_success(&self) -> bool {
        matches!(self.status, SnapshotStatus::Success)
    }

    /// Look up an element by its snapshot-local id.
    pub fn element(&self, id: u64) -> Option<&Element> {
        self.elements.iter().find(|el| el.id == id)
    }

    /// Members of the dominant group, unsorted.
    pub fn dominant_group_members(&self) -> Vec<&Element> {
        let Some(key) = self.dominant_group_key.as_deref() else {
            return Vec::new();
        };
        self.elements
            .iter()
            .filter(|el| el.group_key.as_deref() == Some(key))
            .collect()
    }

    /// Captcha diagnostics, if the extension attached any.
    pub fn captcha(&self) -> Option<&CaptchaDiagnostics> {
        self.diagnostics.as_ref().and_then(|d| d.captcha.as_ref())
    }

    /// Parse the raw extension payload. Missing optional fields default;
    /// a payload that is not an object is an error string.
    pub fn from_raw(raw: Value) -> Result<Self, String> {
        serde_json::from_value(raw).map_err(|err| format!("malformed snapshot payload: {err}"))
    }
}
