//! CDP-mapped implementation of the backend port.
//!
//! The websocket layer stays behind [`CdpTransport`] so the same driver
//! runs against a live browser connection, a recording test double, or
//! nothing at all. Method mapping is bit-exact with the DevTools
//! protocol: `Runtime.evaluate` (`returnByValue`, `awaitPromise`),
//! `Runtime.callFunctionOn`, `Page.getLayoutMetrics`,
//! `Page.captureScreenshot`, `Input.dispatchMouseEvent`,
//! `Input.dispatchKeyEvent`.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use stepgate_core_types::ViewportInfo;

use crate::errors::{BackendError, BackendErrorKind};
use crate::keys::{char_descriptor, key_descriptor, KeyDescriptor};
use crate::port::{Backend, LayoutMetrics, MouseButton, ReadyState};

const CLICK_GAP: Duration = Duration::from_millis(50);
const TYPE_DELAY: Duration = Duration::from_millis(10);
const READY_POLL: Duration = Duration::from_millis(100);

/// Command channel into the browser process.
///
/// Implementations own session routing; the backend only speaks methods
/// and JSON params.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn send_command(&self, method: &str, params: Value) -> Result<Value, BackendError>;
}

/// Transport that refuses everything, for wiring tests and dry runs.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn send_command(&self, method: &str, _params: Value) -> Result<Value, BackendError> {
        Err(BackendError::transport(format!(
            "transport not available for method {method}"
        )))
    }
}

/// The CDP driver.
pub struct CdpBackend {
    transport: std::sync::Arc<dyn CdpTransport>,
    page_info: Mutex<Option<ViewportInfo>>,
    window_handle: Mutex<Option<String>>,
}

impl CdpBackend {
    pub fn new(transport: std::sync::Arc<dyn CdpTransport>) -> Self {
        Self {
            transport,
            page_info: Mutex::new(None),
            window_handle: Mutex::new(None),
        }
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, BackendError> {
        self.transport.send_command(method, params).await
    }

    /// Unwrap a `Runtime.evaluate` / `Runtime.callFunctionOn` response,
    /// translating page exceptions into `Eval` errors and `undefined`
    /// into `Value::Null`.
    fn unwrap_remote_value(response: Value) -> Result<Value, BackendError> {
        if let Some(details) = response.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|ex| ex.get("description"))
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("page exception")
                .to_string();
            return Err(BackendError::eval(text).with_data(details.clone()));
        }
        Ok(response
            .get("result")
            .and_then(|res| res.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Object handle on `window`, fetched lazily and cached for
    /// `Runtime.callFunctionOn`.
    async fn window_handle(&self) -> Result<Option<String>, BackendError> {
        if let Some(handle) = self.window_handle.lock().clone() {
            return Ok(Some(handle));
        }
        let response = self
            .send(
                "Runtime.evaluate",
                json!({ "expression": "window", "returnByValue": false }),
            )
            .await?;
        let handle = response
            .get("result")
            .and_then(|res| res.get("objectId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(handle) = handle.clone() {
            *self.window_handle.lock() = Some(handle);
        }
        Ok(handle)
    }

    fn drop_window_handle(&self) {
        *self.window_handle.lock() = None;
    }

    async fn dispatch_key(&self, desc: &KeyDescriptor) -> Result<(), BackendError> {
        let mut down = json!({
            "type": "keyDown",
            "key": desc.key,
            "code": desc.code,
            "windowsVirtualKeyCode": desc.windows_virtual_key_code,
            "nativeVirtualKeyCode": desc.windows_virtual_key_code,
        });
        if let Some(text) = &desc.text {
            down["text"] = json!(text);
            down["unmodifiedText"] = json!(text);
        }
        self.send("Input.dispatchKeyEvent", down).await?;

        if let Some(text) = &desc.text {
            self.send(
                "Input.dispatchKeyEvent",
                json!({
                    "type": "char",
                    "key": desc.key,
                    "code": desc.code,
                    "text": text,
                    "unmodifiedText": text,
                }),
            )
            .await?;
        }

        self.send(
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "key": desc.key,
                "code": desc.code,
                "windowsVirtualKeyCode": desc.windows_virtual_key_code,
                "nativeVirtualKeyCode": desc.windows_virtual_key_code,
            }),
        )
        .await?;
        Ok(())
    }

    fn cached_center(&self) -> Option<(f64, f64)> {
        self.page_info
            .lock()
            .as_ref()
            .map(|info| (info.width / 2.0, info.height / 2.0))
    }
}

const PAGE_INFO_EXPR: &str = r#"({
    width: window.innerWidth,
    height: window.innerHeight,
    scroll_x: window.scrollX,
    scroll_y: window.scrollY,
    content_width: document.documentElement ? document.documentElement.scrollWidth : null,
    content_height: document.documentElement ? document.documentElement.scrollHeight : null
})"#;

#[async_trait]
impl Backend for CdpBackend {
    async fn refresh_page_info(&self) -> Result<ViewportInfo, BackendError> {
        let value = self.eval(PAGE_INFO_EXPR).await?;
        let info: ViewportInfo = serde_json::from_value(value).map_err(|err| {
            BackendError::new(BackendErrorKind::Internal)
                .with_hint(format!("malformed page info: {err}"))
        })?;
        *self.page_info.lock() = Some(info);
        Ok(info)
    }

    async fn eval(&self, expression: &str) -> Result<Value, BackendError> {
        let response = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        Self::unwrap_remote_value(response)
    }

    async fn call(
        &self,
        function_declaration: &str,
        args: &[Value],
    ) -> Result<Value, BackendError> {
        if let Some(object_id) = self.window_handle().await? {
            let arguments: Vec<Value> = args.iter().map(|v| json!({ "value": v })).collect();
            let result = self
                .send(
                    "Runtime.callFunctionOn",
                    json!({
                        "objectId": object_id,
                        "functionDeclaration": function_declaration,
                        "arguments": arguments,
                        "returnByValue": true,
                        "awaitPromise": true,
                    }),
                )
                .await;
            match result {
                Ok(response) => return Self::unwrap_remote_value(response),
                Err(err) if err.kind == BackendErrorKind::Eval => return Err(err),
                Err(err) => {
                    // Stale handle after navigation; retry through eval.
                    debug!(?err, "callFunctionOn failed, falling back to eval");
                    self.drop_window_handle();
                }
            }
        }

        let args_json = serde_json::to_string(args).map_err(|err| {
            BackendError::new(BackendErrorKind::Internal).with_hint(err.to_string())
        })?;
        self.eval(&format!(
            "({function_declaration}).apply(null, {args_json})"
        ))
        .await
    }

    async fn layout_metrics(&self) -> Result<LayoutMetrics, BackendError> {
        let response = self.send("Page.getLayoutMetrics", json!({})).await?;
        let viewport = response
            .get("cssVisualViewport")
            .or_else(|| response.get("visualViewport"))
            .cloned()
            .unwrap_or(Value::Null);
        let content = response
            .get("cssContentSize")
            .or_else(|| response.get("contentSize"))
            .cloned()
            .unwrap_or(Value::Null);
        let f = |v: &Value, key: &str| v.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        Ok(LayoutMetrics {
            viewport_x: f(&viewport, "pageX"),
            viewport_y: f(&viewport, "pageY"),
            viewport_width: f(&viewport, "clientWidth"),
            viewport_height: f(&viewport, "clientHeight"),
            content_width: f(&content, "width"),
            content_height: f(&content, "height"),
            device_pixel_ratio: viewport
                .get("scale")
                .and_then(Value::as_f64)
                .unwrap_or(1.0),
        })
    }

    async fn screenshot_png(&self) -> Result<String, BackendError> {
        let response = self
            .send(
                "Page.captureScreenshot",
                json!({ "format": "png", "captureBeyondViewport": false }),
            )
            .await?;
        response
            .get("data")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                BackendError::new(BackendErrorKind::NoSurface)
                    .with_hint("screenshot returned no data")
            })
    }

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), BackendError> {
        self.send(
            "Input.dispatchMouseEvent",
            json!({
                "type": "mouseMoved",
                "x": x,
                "y": y,
                "button": "none",
                "pointerType": "mouse",
            }),
        )
        .await
        .map(|_| ())
    }

    async fn mouse_click(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: u32,
    ) -> Result<(), BackendError> {
        let buttons = match button {
            MouseButton::Left => 1,
            MouseButton::Right => 2,
            MouseButton::Middle => 4,
        };
        self.send(
            "Input.dispatchMouseEvent",
            json!({
                "type": "mousePressed",
                "x": x,
                "y": y,
                "button": button.as_str(),
                "buttons": buttons,
                "clickCount": click_count,
                "pointerType": "mouse",
            }),
        )
        .await?;
        sleep(CLICK_GAP).await;
        self.send(
            "Input.dispatchMouseEvent",
            json!({
                "type": "mouseReleased",
                "x": x,
                "y": y,
                "button": button.as_str(),
                "buttons": buttons,
                "clickCount": click_count,
                "pointerType": "mouse",
            }),
        )
        .await
        .map(|_| ())
    }

    async fn wheel(
        &self,
        delta_y: f64,
        x: Option<f64>,
        y: Option<f64>,
    ) -> Result<(), BackendError> {
        let (cx, cy) = match (x, y) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                let center = match self.cached_center() {
                    Some(center) => center,
                    None => {
                        let info = self.refresh_page_info().await?;
                        (info.width / 2.0, info.height / 2.0)
                    }
                };
                (x.unwrap_or(center.0), y.unwrap_or(center.1))
            }
        };
        self.send(
            "Input.dispatchMouseEvent",
            json!({
                "type": "mouseWheel",
                "x": cx,
                "y": cy,
                "deltaX": 0.0,
                "deltaY": delta_y,
                "pointerType": "mouse",
            }),
        )
        .await
        .map(|_| ())
    }

    async fn type_text(&self, text: &str) -> Result<(), BackendError> {
        for ch in text.chars() {
            let desc = char_descriptor(&ch.to_string());
            self.dispatch_key(&desc).await?;
            sleep(TYPE_DELAY).await;
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), BackendError> {
        self.dispatch_key(&key_descriptor(key)).await
    }

    async fn wait_ready_state(
        &self,
        state: ReadyState,
        timeout_ms: u64,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if cancel.is_cancelled() {
                return Err(BackendError::cancelled());
            }
            let observed = self.eval("document.readyState").await?;
            if observed.as_str().map(|s| state.accepts(s)).unwrap_or(false) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(target: "stepgate-backend", ?state, "ready-state wait expired");
                return Err(BackendError::timeout(format!(
                    "readyState did not reach {state:?} within {timeout_ms}ms"
                )));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(BackendError::cancelled()),
                _ = sleep(READY_POLL) => {}
            }
        }
    }

    async fn url(&self) -> Result<String, BackendError> {
        let value = self.eval("window.location.href").await?;
        value.as_str().map(str::to_string).ok_or_else(|| {
            BackendError::new(BackendErrorKind::Internal).with_hint("location.href was not a string")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Transport double that queues responses and records commands.
    #[derive(Default)]
    struct RecordingTransport {
        responses: Mutex<VecDeque<Result<Value, BackendError>>>,
        commands: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingTransport {
        fn push(&self, response: Value) {
            self.responses.lock().push_back(Ok(response));
        }

        fn push_err(&self, err: BackendError) {
            self.responses.lock().push_back(Err(err));
        }

        fn commands(&self) -> Vec<(String, Value)> {
            self.commands.lock().clone()
        }
    }

    #[async_trait]
    impl CdpTransport for RecordingTransport {
        async fn send_command(&self, method: &str, params: Value) -> Result<Value, BackendError> {
            self.commands.lock().push((method.to_string(), params));
            self.responses
                .lock()
                .pop_front()
                .unwrap_or(Ok(Value::Null))
        }
    }

    fn backend() -> (CdpBackend, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        (
            CdpBackend::new(transport.clone() as Arc<dyn CdpTransport>),
            transport,
        )
    }

    #[tokio::test]
    async fn eval_unwraps_value_and_normalizes_undefined() {
        let (cdp, transport) = backend();
        transport.push(json!({"result": {"value": 42}}));
        assert_eq!(cdp.eval("6*7").await.unwrap(), json!(42));

        transport.push(json!({"result": {"type": "undefined"}}));
        assert_eq!(cdp.eval("void 0").await.unwrap(), Value::Null);

        let (method, params) = transport.commands().into_iter().next().unwrap();
        assert_eq!(method, "Runtime.evaluate");
        assert_eq!(params["returnByValue"], json!(true));
        assert_eq!(params["awaitPromise"], json!(true));
    }

    #[tokio::test]
    async fn eval_exception_maps_to_eval_error() {
        let (cdp, transport) = backend();
        transport.push(json!({
            "exceptionDetails": {"text": "Uncaught", "exception": {"description": "ReferenceError: nope"}}
        }));
        let err = cdp.eval("nope()").await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Eval);
        assert!(err.hint.unwrap().contains("ReferenceError"));
    }

    #[tokio::test]
    async fn click_decomposes_into_press_and_release() {
        let (cdp, transport) = backend();
        cdp.mouse_click(10.0, 20.0, MouseButton::Left, 1)
            .await
            .unwrap();
        let commands = transport.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].1["type"], "mousePressed");
        assert_eq!(commands[1].1["type"], "mouseReleased");
        assert_eq!(commands[0].1["clickCount"], json!(1));
    }

    #[tokio::test]
    async fn type_text_emits_key_down_char_key_up_per_character() {
        let (cdp, transport) = backend();
        cdp.type_text("ab").await.unwrap();
        let kinds: Vec<String> = transport
            .commands()
            .iter()
            .map(|(_, params)| params["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            kinds,
            vec!["keyDown", "char", "keyUp", "keyDown", "char", "keyUp"]
        );
    }

    #[tokio::test]
    async fn wheel_defaults_to_viewport_center() {
        let (cdp, transport) = backend();
        // refresh_page_info response for the implicit center lookup
        transport.push(json!({"result": {"value": {
            "width": 1280.0, "height": 800.0, "scroll_x": 0.0, "scroll_y": 0.0,
            "content_width": 1280.0, "content_height": 4000.0
        }}}));
        cdp.wheel(200.0, None, None).await.unwrap();
        let commands = transport.commands();
        let wheel = &commands.last().unwrap().1;
        assert_eq!(wheel["type"], "mouseWheel");
        assert_eq!(wheel["x"], json!(640.0));
        assert_eq!(wheel["y"], json!(400.0));
        assert_eq!(wheel["deltaY"], json!(200.0));
    }

    #[tokio::test]
    async fn call_falls_back_to_eval_without_object_handle() {
        let (cdp, transport) = backend();
        // window handle lookup yields no objectId
        transport.push(json!({"result": {}}));
        // eval fallback response
        transport.push(json!({"result": {"value": "ok"}}));
        let out = cdp
            .call("function(a) { return a; }", &[json!("ok")])
            .await
            .unwrap();
        assert_eq!(out, json!("ok"));
        let commands = transport.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].0, "Runtime.evaluate");
        assert!(commands[1].1["expression"]
            .as_str()
            .unwrap()
            .contains(".apply(null, [\"ok\"])"));
    }

    #[tokio::test]
    async fn wait_ready_state_times_out() {
        let (cdp, transport) = backend();
        for _ in 0..10 {
            transport.push(json!({"result": {"value": "loading"}}));
        }
        let cancel = CancellationToken::new();
        let err = cdp
            .wait_ready_state(ReadyState::Complete, 150, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Timeout);
    }

    #[tokio::test]
    async fn screenshot_without_data_is_no_surface() {
        let (cdp, transport) = backend();
        transport.push(json!({}));
        let err = cdp.screenshot_png().await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::NoSurface);
        transport.push_err(BackendError::transport("gone"));
        assert_eq!(
            cdp.screenshot_png().await.unwrap_err().kind,
            BackendErrorKind::Transport
        );
    }
}
