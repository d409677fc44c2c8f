//! Fetch-with-cache discipline.
//!
//! One cache per runtime instance. Any mutating action invalidates it;
//! verification refreshes bypass it explicitly.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use stepgate_core_types::Snapshot;

use crate::bridge::ExtensionBridge;
use crate::errors::SnapshotError;
use crate::options::SnapshotOptions;

#[derive(Default)]
struct CacheState {
    cached: Option<Snapshot>,
    /// Epoch ms of the cached capture; 0 iff `cached` is `None`.
    cached_at: u64,
    cached_url: Option<String>,
}

/// Snapshot cache wrapping the extension bridge with a staleness budget.
pub struct CachedSnapshot {
    bridge: ExtensionBridge,
    max_age_ms: u64,
    state: Mutex<CacheState>,
}

impl CachedSnapshot {
    pub fn new(bridge: ExtensionBridge, max_age_ms: u64) -> Self {
        Self {
            bridge,
            max_age_ms,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn bridge(&self) -> &ExtensionBridge {
        &self.bridge
    }

    /// Age of the cached snapshot in milliseconds; `u64::MAX` when empty.
    pub fn age_ms(&self) -> u64 {
        let state = self.state.lock();
        if state.cached.is_none() {
            return u64::MAX;
        }
        now_ms().saturating_sub(state.cached_at)
    }

    /// Cached URL, when a snapshot is held.
    pub fn cached_url(&self) -> Option<String> {
        self.state.lock().cached_url.clone()
    }

    /// The cached snapshot regardless of age, without fetching.
    pub fn cached(&self) -> Option<Snapshot> {
        self.state.lock().cached.clone()
    }

    /// Drop the cached snapshot. Idempotent.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.cached = None;
        state.cached_at = 0;
        state.cached_url = None;
    }

    /// Return the cached snapshot while fresh, otherwise fetch.
    ///
    /// The returned flag is true when this call hit the network (a fresh
    /// capture), so callers can emit snapshot trace events only for real
    /// fetches.
    pub async fn get(
        &self,
        options: &SnapshotOptions,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<(Snapshot, bool), SnapshotError> {
        if !force_refresh {
            let state = self.state.lock();
            if let Some(snapshot) = state.cached.as_ref() {
                let age = now_ms().saturating_sub(state.cached_at);
                if age <= self.max_age_ms {
                    debug!(target: "stepgate-snapshot", age_ms = age, "snapshot cache hit");
                    return Ok((snapshot.clone(), false));
                }
            }
        }

        let snapshot = self.bridge.fetch(options, cancel).await?;
        let mut state = self.state.lock();
        state.cached = Some(snapshot.clone());
        state.cached_at = now_ms();
        state.cached_url = Some(snapshot.url.clone());
        Ok((snapshot, true))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use stepgate_backend::{MockBackend, MockCall};

    fn payload(url: &str) -> serde_json::Value {
        json!({
            "status": "success",
            "url": url,
            "timestamp": 1u64,
            "viewport": {"width": 1280.0, "height": 800.0},
            "elements": []
        })
    }

    fn cache_with(mock: Arc<MockBackend>, max_age_ms: u64) -> CachedSnapshot {
        let bridge = ExtensionBridge::new(mock as Arc<dyn stepgate_backend::Backend>);
        CachedSnapshot::new(bridge, max_age_ms)
    }

    #[tokio::test]
    async fn fresh_cache_serves_without_fetching() {
        let mock = Arc::new(MockBackend::new());
        mock.push_call_result(payload("https://a.example/"));
        let cache = cache_with(mock.clone(), 60_000);
        let cancel = CancellationToken::new();

        let (_, fetched) = cache
            .get(&SnapshotOptions::default(), false, &cancel)
            .await
            .unwrap();
        assert!(fetched);

        let (snap, fetched) = cache
            .get(&SnapshotOptions::default(), false, &cancel)
            .await
            .unwrap();
        assert!(!fetched);
        assert_eq!(snap.url, "https://a.example/");
        assert_eq!(
            mock.calls_of(|c| matches!(c, MockCall::Call(f) if f.contains("snapshot"))),
            1
        );
    }

    #[tokio::test]
    async fn force_refresh_always_fetches() {
        let mock = Arc::new(MockBackend::new());
        mock.push_call_result(payload("https://a.example/"));
        mock.push_call_result(payload("https://b.example/"));
        let cache = cache_with(mock, 60_000);
        let cancel = CancellationToken::new();

        cache
            .get(&SnapshotOptions::default(), false, &cancel)
            .await
            .unwrap();
        let (snap, fetched) = cache
            .get(&SnapshotOptions::default(), true, &cancel)
            .await
            .unwrap();
        assert!(fetched);
        assert_eq!(snap.url, "https://b.example/");
        assert_eq!(cache.cached_url().as_deref(), Some("https://b.example/"));
    }

    #[tokio::test]
    async fn invalidate_is_idempotent_and_resets_age() {
        let mock = Arc::new(MockBackend::new());
        mock.push_call_result(payload("https://a.example/"));
        let cache = cache_with(mock, 60_000);
        let cancel = CancellationToken::new();

        assert_eq!(cache.age_ms(), u64::MAX);
        cache
            .get(&SnapshotOptions::default(), false, &cancel)
            .await
            .unwrap();
        assert!(cache.age_ms() < 60_000);

        cache.invalidate();
        cache.invalidate();
        assert_eq!(cache.age_ms(), u64::MAX);
        assert!(cache.cached_url().is_none());
    }

    #[tokio::test]
    async fn stale_cache_refetches() {
        let mock = Arc::new(MockBackend::new());
        mock.push_call_result(payload("https://a.example/"));
        mock.push_call_result(payload("https://b.example/"));
        let cache = cache_with(mock, 0);
        let cancel = CancellationToken::new();

        cache
            .get(&SnapshotOptions::default(), false, &cancel)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let (snap, fetched) = cache
            .get(&SnapshotOptions::default(), false, &cancel)
            .await
            .unwrap();
        assert!(fetched);
        assert_eq!(snap.url, "https://b.example/");
    }
}
