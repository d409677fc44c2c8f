//! Runtime configuration.

use crate::captcha::CaptchaOptions;

/// Knobs for one runtime instance.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Open a synthetic `verify:<label>` step when an assertion arrives
    /// with no step open; when off, such assertions are programmer
    /// errors.
    pub auto_step: bool,
    /// Staleness budget for the snapshot cache.
    pub snapshot_max_age_ms: u64,
    pub captcha: CaptchaOptions,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            auto_step: true,
            snapshot_max_age_ms: 800,
            captcha: CaptchaOptions::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_auto_step(mut self, auto_step: bool) -> Self {
        self.auto_step = auto_step;
        self
    }

    pub fn with_snapshot_max_age(mut self, max_age_ms: u64) -> Self {
        self.snapshot_max_age_ms = max_age_ms;
        self
    }

    pub fn with_captcha(mut self, captcha: CaptchaOptions) -> Self {
        self.captcha = captcha;
        self
    }
}

/// Scroll-with-verification knobs.
///
/// Overlays and nested scrollers silently absorb wheel events, so scroll
/// progress is proven by observing `scrollY`, not assumed from dispatch.
#[derive(Clone, Debug)]
pub struct ScrollOptions {
    pub verify: bool,
    /// Minimum observed |Δ scrollY| that counts as progress.
    pub min_delta_px: f64,
    pub timeout_ms: u64,
    pub poll_ms: u64,
    /// On wheel failure, try `window.scrollBy` and re-verify.
    pub js_fallback: bool,
    pub label: String,
    pub required: bool,
}

impl Default for ScrollOptions {
    fn default() -> Self {
        Self {
            verify: true,
            min_delta_px: 50.0,
            timeout_ms: 5_000,
            poll_ms: 100,
            js_fallback: true,
            label: "scroll".to_string(),
            required: false,
        }
    }
}

impl ScrollOptions {
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_min_delta(mut self, min_delta_px: f64) -> Self {
        self.min_delta_px = min_delta_px;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_js_fallback(mut self, js_fallback: bool) -> Self {
        self.js_fallback = js_fallback;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}
