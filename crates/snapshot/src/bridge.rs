//! Extension bridge — readiness poll, probe diagnostics, capture.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use stepgate_backend::Backend;
use stepgate_core_types::Snapshot;

use crate::errors::SnapshotError;
use crate::options::SnapshotOptions;

const READY_POLL: Duration = Duration::from_millis(100);
const DEFAULT_READY_TIMEOUT_MS: u64 = 5_000;

/// Expression that is true once the extension injected its capture entry
/// point into the page.
const READY_EXPR: &str =
    "typeof window.__stepgate !== 'undefined' && typeof window.__stepgate.snapshot === 'function'";

/// Probe harvesting why the extension is (not) available.
const PROBE_EXPR: &str = r#"({
    defined: typeof window.__stepgate !== 'undefined',
    snapshot_available: typeof window.__stepgate !== 'undefined'
        && typeof window.__stepgate.snapshot === 'function',
    url: window.location.href,
    extension_id: (typeof window.__stepgate !== 'undefined' && window.__stepgate.extensionId) || null
})"#;

const CAPTURE_FN: &str = "function(opts) { return window.__stepgate.snapshot(opts); }";
const OVERLAY_FN: &str = "function(enabled) { return window.__stepgate.showOverlay(enabled); }";
const GRID_FN: &str = "function(gridId) { return window.__stepgate.showGrid(gridId); }";

/// Decoded probe result.
#[derive(Clone, Debug, Default)]
pub struct ExtensionProbe {
    pub defined: bool,
    pub snapshot_available: bool,
    pub url: Option<String>,
    pub extension_id: Option<String>,
}

impl ExtensionProbe {
    fn from_value(value: &Value) -> Self {
        Self {
            defined: value.get("defined").and_then(Value::as_bool).unwrap_or(false),
            snapshot_available: value
                .get("snapshot_available")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            url: value
                .get("url")
                .and_then(Value::as_str)
                .map(str::to_string),
            extension_id: value
                .get("extension_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    fn to_diagnostics(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("defined".to_string(), self.defined.to_string());
        map.insert(
            "snapshot_available".to_string(),
            self.snapshot_available.to_string(),
        );
        map.insert(
            "url".to_string(),
            self.url.clone().unwrap_or_else(|| "unknown".to_string()),
        );
        map.insert(
            "extension_id".to_string(),
            self.extension_id
                .clone()
                .unwrap_or_else(|| "none".to_string()),
        );
        map
    }
}

/// Talks to the in-page extension through the backend's JS ports.
pub struct ExtensionBridge {
    backend: Arc<dyn Backend>,
    ready_timeout_ms: u64,
}

impl ExtensionBridge {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
        }
    }

    pub fn with_ready_timeout(mut self, timeout_ms: u64) -> Self {
        self.ready_timeout_ms = timeout_ms;
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Poll until the capture function exists, every 100 ms up to the
    /// configured timeout.
    pub async fn wait_ready(&self, cancel: &CancellationToken) -> Result<(), SnapshotError> {
        let deadline = Instant::now() + Duration::from_millis(self.ready_timeout_ms);
        loop {
            if cancel.is_cancelled() {
                return Err(SnapshotError::Cancelled);
            }
            let ready = self
                .backend
                .eval(READY_EXPR)
                .await
                .map(|v| v.as_bool().unwrap_or(false))
                .unwrap_or(false);
            if ready {
                return Ok(());
            }
            if Instant::now() >= deadline {
                let probe = self.probe().await.unwrap_or_default();
                warn!(target: "stepgate-snapshot", ?probe, "extension never became ready");
                return Err(SnapshotError::ExtensionNotLoaded {
                    diagnostics: probe.to_diagnostics(),
                });
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(SnapshotError::Cancelled),
                _ = sleep(READY_POLL) => {}
            }
        }
    }

    /// One-shot diagnostics probe; best effort.
    pub async fn probe(&self) -> Result<ExtensionProbe, SnapshotError> {
        let value = self.backend.eval(PROBE_EXPR).await?;
        Ok(ExtensionProbe::from_value(&value))
    }

    /// Acquire one snapshot. The capture is a single extension call, so
    /// the result is atomic with respect to the page.
    pub async fn fetch(
        &self,
        options: &SnapshotOptions,
        cancel: &CancellationToken,
    ) -> Result<Snapshot, SnapshotError> {
        self.wait_ready(cancel).await?;

        let raw = self
            .backend
            .call(CAPTURE_FN, &[options.to_extension_args()])
            .await?;

        if raw.is_null() {
            let url = self.backend.url().await.ok();
            return Err(SnapshotError::Empty { url });
        }

        let snapshot = Snapshot::from_raw(raw).map_err(SnapshotError::Malformed)?;
        debug!(
            target: "stepgate-snapshot",
            url = %snapshot.url,
            elements = snapshot.elements.len(),
            "snapshot acquired"
        );

        if options.show_overlay {
            self.show_overlay(true).await;
        }
        if options.show_grid {
            self.show_grid(options.grid_id).await;
        }

        Ok(snapshot)
    }

    /// Visual debug helper; failures only warn.
    pub async fn show_overlay(&self, enabled: bool) {
        if let Err(err) = self
            .backend
            .call(OVERLAY_FN, &[Value::Bool(enabled)])
            .await
        {
            warn!(target: "stepgate-snapshot", %err, "overlay helper failed");
        }
    }

    /// Grid debug helper; failures only warn.
    pub async fn show_grid(&self, grid_id: Option<u32>) {
        let arg = grid_id.map(|id| Value::from(id)).unwrap_or(Value::Null);
        if let Err(err) = self.backend.call(GRID_FN, &[arg]).await {
            warn!(target: "stepgate-snapshot", %err, "grid helper failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepgate_backend::MockBackend;

    fn bridge(mock: MockBackend) -> ExtensionBridge {
        ExtensionBridge::new(Arc::new(mock))
    }

    fn snapshot_payload() -> Value {
        json!({
            "status": "success",
            "url": "https://example.com/",
            "timestamp": 1u64,
            "viewport": {"width": 1280.0, "height": 800.0},
            "elements": [{"id": 7, "role": "button", "text": "Go"}]
        })
    }

    #[tokio::test]
    async fn fetch_returns_parsed_snapshot() {
        let mock = MockBackend::new();
        mock.push_call_result(snapshot_payload());
        let bridge = bridge(mock);
        let snap = bridge
            .fetch(&SnapshotOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(snap.is_success());
        assert_eq!(snap.elements[0].id, 7);
    }

    #[tokio::test]
    async fn null_capture_is_snapshot_error_with_url() {
        let mock = MockBackend::new().with_url("https://example.com/page");
        mock.push_call_result(Value::Null);
        let bridge = bridge(mock);
        let err = bridge
            .fetch(&SnapshotOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            SnapshotError::Empty { url } => {
                assert_eq!(url.as_deref(), Some("https://example.com/page"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_extension_times_out_with_diagnostics() {
        let mock = MockBackend::new().with_extension_ready(false);
        let bridge = bridge(mock).with_ready_timeout(250);
        let err = bridge
            .fetch(&SnapshotOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            SnapshotError::ExtensionNotLoaded { diagnostics } => {
                assert_eq!(diagnostics.get("defined").map(String::as_str), Some("false"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_escapes_the_ready_poll() {
        let mock = MockBackend::new().with_extension_ready(false);
        let bridge = bridge(mock).with_ready_timeout(10_000);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = bridge
            .fetch(&SnapshotOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
