//! Scripted in-memory backend for tests.
//!
//! Emulates just enough of a page to exercise the runtime: a scrollable
//! document, a location, an injected-extension flag, and queues for
//! scripted eval/call results. Every port operation is recorded so tests
//! can assert on the exact dispatch sequence.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use stepgate_core_types::ViewportInfo;

use crate::errors::{BackendError, BackendErrorKind};
use crate::port::{Backend, LayoutMetrics, MouseButton, ReadyState};

/// One recorded port operation.
#[derive(Clone, Debug, PartialEq)]
pub enum MockCall {
    RefreshPageInfo,
    Eval(String),
    Call(String),
    MouseMove { x: f64, y: f64 },
    MouseClick { x: f64, y: f64, button: MouseButton, click_count: u32 },
    Wheel { delta_y: f64, x: Option<f64>, y: Option<f64> },
    TypeText(String),
    PressKey(String),
    Screenshot,
    WaitReadyState(ReadyState),
    Url,
}

struct MockState {
    url: String,
    width: f64,
    height: f64,
    content_height: f64,
    scroll_y: f64,
    wheel_effective: bool,
    extension_ready: bool,
    ready_state: String,
    screenshot_b64: Option<String>,
    eval_queue: VecDeque<Result<Value, BackendError>>,
    call_queue: VecDeque<Result<Value, BackendError>>,
    calls: Vec<MockCall>,
}

/// Deterministic backend double.
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                url: "https://example.com/".to_string(),
                width: 1280.0,
                height: 800.0,
                content_height: 2400.0,
                scroll_y: 0.0,
                wheel_effective: true,
                extension_ready: true,
                ready_state: "complete".to_string(),
                screenshot_b64: Some("iVBORw0KGgo=".to_string()),
                eval_queue: VecDeque::new(),
                call_queue: VecDeque::new(),
                calls: Vec::new(),
            }),
        }
    }

    pub fn with_url(self, url: impl Into<String>) -> Self {
        self.state.lock().url = url.into();
        self
    }

    pub fn with_content_height(self, height: f64) -> Self {
        self.state.lock().content_height = height;
        self
    }

    /// Make the page absorb wheel events without scrolling, like an
    /// overlay or nested scroller would.
    pub fn dropping_wheel(self) -> Self {
        self.state.lock().wheel_effective = false;
        self
    }

    pub fn with_extension_ready(self, ready: bool) -> Self {
        self.state.lock().extension_ready = ready;
        self
    }

    pub fn set_url(&self, url: impl Into<String>) {
        self.state.lock().url = url.into();
    }

    pub fn set_extension_ready(&self, ready: bool) {
        self.state.lock().extension_ready = ready;
    }

    pub fn set_ready_state(&self, state: impl Into<String>) {
        self.state.lock().ready_state = state.into();
    }

    pub fn clear_screenshot(&self) {
        self.state.lock().screenshot_b64 = None;
    }

    /// Queue an override for the next `eval`.
    pub fn push_eval(&self, value: Value) {
        self.state.lock().eval_queue.push_back(Ok(value));
    }

    pub fn push_eval_err(&self, err: BackendError) {
        self.state.lock().eval_queue.push_back(Err(err));
    }

    /// Queue the result of the next `call` (what the extension returns).
    pub fn push_call_result(&self, value: Value) {
        self.state.lock().call_queue.push_back(Ok(value));
    }

    pub fn push_call_err(&self, err: BackendError) {
        self.state.lock().call_queue.push_back(Err(err));
    }

    pub fn scroll_y(&self) -> f64 {
        self.state.lock().scroll_y
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_of<F: Fn(&MockCall) -> bool>(&self, pred: F) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn clamp_scroll(state: &MockState, candidate: f64) -> f64 {
        let max = (state.content_height - state.height).max(0.0);
        candidate.clamp(0.0, max)
    }

    /// Built-in page emulation for common expressions.
    fn builtin_eval(state: &mut MockState, expression: &str) -> Value {
        if let Some(rest) = expression
            .find("scrollBy(")
            .map(|idx| &expression[idx + "scrollBy(".len()..])
        {
            // Accepts scrollBy(0, <delta>) from the JS scroll fallback.
            if let Some(args) = rest.split(')').next() {
                let delta = args
                    .split(',')
                    .nth(1)
                    .and_then(|raw| raw.trim().parse::<f64>().ok())
                    .unwrap_or(0.0);
                let next = Self::clamp_scroll(state, state.scroll_y + delta);
                state.scroll_y = next;
            }
            return Value::Null;
        }
        if expression.contains("location.href") {
            return json!(state.url);
        }
        if expression.contains("readyState") {
            return json!(state.ready_state);
        }
        if expression.contains("innerWidth") {
            return json!({
                "width": state.width,
                "height": state.height,
                "scroll_x": 0.0,
                "scroll_y": state.scroll_y,
                "content_width": state.width,
                "content_height": state.content_height,
            });
        }
        if expression.contains("scrollY") || expression.contains("scrollTop") {
            return json!(state.scroll_y);
        }
        if expression.contains("__stepgate") {
            return json!(state.extension_ready);
        }
        Value::Null
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn refresh_page_info(&self) -> Result<ViewportInfo, BackendError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::RefreshPageInfo);
        Ok(ViewportInfo {
            width: state.width,
            height: state.height,
            scroll_x: 0.0,
            scroll_y: state.scroll_y,
            content_width: Some(state.width),
            content_height: Some(state.content_height),
        })
    }

    async fn eval(&self, expression: &str) -> Result<Value, BackendError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Eval(expression.to_string()));
        if let Some(queued) = state.eval_queue.pop_front() {
            return queued;
        }
        Ok(Self::builtin_eval(&mut state, expression))
    }

    async fn call(
        &self,
        function_declaration: &str,
        _args: &[Value],
    ) -> Result<Value, BackendError> {
        let mut state = self.state.lock();
        state
            .calls
            .push(MockCall::Call(function_declaration.to_string()));
        state.call_queue.pop_front().unwrap_or(Ok(Value::Null))
    }

    async fn layout_metrics(&self) -> Result<LayoutMetrics, BackendError> {
        let state = self.state.lock();
        Ok(LayoutMetrics {
            viewport_x: 0.0,
            viewport_y: state.scroll_y,
            viewport_width: state.width,
            viewport_height: state.height,
            content_width: state.width,
            content_height: state.content_height,
            device_pixel_ratio: 1.0,
        })
    }

    async fn screenshot_png(&self) -> Result<String, BackendError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Screenshot);
        state.screenshot_b64.clone().ok_or_else(|| {
            BackendError::new(BackendErrorKind::NoSurface).with_hint("no frame rendered")
        })
    }

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), BackendError> {
        self.state.lock().calls.push(MockCall::MouseMove { x, y });
        Ok(())
    }

    async fn mouse_click(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: u32,
    ) -> Result<(), BackendError> {
        self.state.lock().calls.push(MockCall::MouseClick {
            x,
            y,
            button,
            click_count,
        });
        Ok(())
    }

    async fn wheel(
        &self,
        delta_y: f64,
        x: Option<f64>,
        y: Option<f64>,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Wheel { delta_y, x, y });
        if state.wheel_effective {
            let next = Self::clamp_scroll(&state, state.scroll_y + delta_y);
            state.scroll_y = next;
        }
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), BackendError> {
        self.state
            .lock()
            .calls
            .push(MockCall::TypeText(text.to_string()));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), BackendError> {
        self.state
            .lock()
            .calls
            .push(MockCall::PressKey(key.to_string()));
        Ok(())
    }

    async fn wait_ready_state(
        &self,
        state: ReadyState,
        _timeout_ms: u64,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::cancelled());
        }
        let mut guard = self.state.lock();
        guard.calls.push(MockCall::WaitReadyState(state));
        if state.accepts(&guard.ready_state) {
            Ok(())
        } else {
            Err(BackendError::timeout("mock page never became ready"))
        }
    }

    async fn url(&self) -> Result<String, BackendError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Url);
        Ok(state.url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wheel_moves_scroll_until_clamped() {
        let mock = MockBackend::new().with_content_height(1000.0);
        mock.wheel(150.0, None, None).await.unwrap();
        assert_eq!(mock.scroll_y(), 150.0);
        mock.wheel(10_000.0, None, None).await.unwrap();
        assert_eq!(mock.scroll_y(), 200.0); // 1000 content - 800 viewport
    }

    #[tokio::test]
    async fn dropped_wheel_leaves_scroll_untouched() {
        let mock = MockBackend::new().dropping_wheel();
        mock.wheel(400.0, None, None).await.unwrap();
        assert_eq!(mock.scroll_y(), 0.0);
    }

    #[tokio::test]
    async fn scroll_by_fallback_applies_delta() {
        let mock = MockBackend::new();
        mock.eval("window.scrollBy(0, 300); window.scrollY")
            .await
            .unwrap();
        assert_eq!(mock.scroll_y(), 300.0);
    }

    #[tokio::test]
    async fn queued_eval_takes_priority() {
        let mock = MockBackend::new();
        mock.push_eval(json!("override"));
        assert_eq!(mock.eval("anything").await.unwrap(), json!("override"));
        assert_eq!(
            mock.eval("window.location.href").await.unwrap(),
            json!("https://example.com/")
        );
    }
}
