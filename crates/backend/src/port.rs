//! The `Backend` capability trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use stepgate_core_types::ViewportInfo;

use crate::errors::BackendError;

/// Mouse button for click dispatch.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Middle => "middle",
            MouseButton::Right => "right",
        }
    }
}

/// Document ready states the port can wait for.
///
/// `Interactive` is satisfied by either `interactive` or `complete`;
/// `Complete` only by `complete`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Interactive,
    Complete,
}

impl ReadyState {
    pub fn accepts(&self, observed: &str) -> bool {
        match self {
            ReadyState::Interactive => matches!(observed, "interactive" | "complete"),
            ReadyState::Complete => observed == "complete",
        }
    }
}

/// Viewport origin, content size and device pixel ratio as reported by
/// the rendering engine. Used for screenshot-region math and scroll
/// bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutMetrics {
    pub viewport_x: f64,
    pub viewport_y: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub content_width: f64,
    pub content_height: f64,
    pub device_pixel_ratio: f64,
}

/// Minimal browser-control surface the runtime consumes.
///
/// Each operation may fail; failures translate to [`BackendError`] with a
/// stable reason code. Implementations must be safe to share behind an
/// `Arc` — the runtime holds no exclusive claim on the backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Cheap, idempotent viewport probe. Implementations cache the result
    /// internally; the cache feeds default-centered wheel events.
    async fn refresh_page_info(&self) -> Result<ViewportInfo, BackendError>;

    /// Evaluate a JS expression in the page's main frame, awaiting any
    /// promise. `undefined` normalizes to `Value::Null`.
    async fn eval(&self, expression: &str) -> Result<Value, BackendError>;

    /// Invoke a function expression with arguments passed by value,
    /// avoiding string-concat injection. Implementations without an
    /// object handle fall back to [`Backend::eval`] with JSON-encoded
    /// arguments.
    async fn call(&self, function_declaration: &str, args: &[Value])
        -> Result<Value, BackendError>;

    async fn layout_metrics(&self) -> Result<LayoutMetrics, BackendError>;

    /// Viewport-only PNG capture, base64-encoded. Fails with `NoSurface`
    /// when the backend has nothing rendered yet.
    async fn screenshot_png(&self) -> Result<String, BackendError>;

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), BackendError>;

    /// Press + release with a 50 ms gap between them.
    async fn mouse_click(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: u32,
    ) -> Result<(), BackendError>;

    /// Wheel dispatch in viewport coordinates; `x`/`y` default to the
    /// viewport center from the cached page info.
    async fn wheel(&self, delta_y: f64, x: Option<f64>, y: Option<f64>)
        -> Result<(), BackendError>;

    /// Per-character keyDown/char/keyUp dispatch with a small
    /// inter-character delay. Non-ASCII passes through the `text` field.
    async fn type_text(&self, text: &str) -> Result<(), BackendError>;

    /// Single named-key press (Enter, Escape, Tab, single characters).
    async fn press_key(&self, key: &str) -> Result<(), BackendError>;

    /// Poll `document.readyState` until the accepted set is reached or
    /// `timeout_ms` expires. Honors `cancel`.
    async fn wait_ready_state(
        &self,
        state: ReadyState,
        timeout_ms: u64,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError>;

    /// Current `window.location.href`.
    async fn url(&self) -> Result<String, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_state_acceptance_sets() {
        assert!(ReadyState::Interactive.accepts("interactive"));
        assert!(ReadyState::Interactive.accepts("complete"));
        assert!(!ReadyState::Interactive.accepts("loading"));
        assert!(ReadyState::Complete.accepts("complete"));
        assert!(!ReadyState::Complete.accepts("interactive"));
    }
}
