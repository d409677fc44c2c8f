//! The agent runtime proper.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stepgate_backend::Backend;
use stepgate_core_types::{timestamp_now, DownloadEntry, Snapshot, StepId};
use stepgate_snapshot::{CachedSnapshot, ExtensionBridge, SnapshotOptions};
use stepgate_trace::{Tracer, VerificationEvent};
use stepgate_verify::{
    eventually, AssertContext, EventuallyConfig, Predicate, RefreshFn, VerifyError,
};

use crate::captcha::CaptchaPolicy;
use crate::errors::RuntimeError;
use crate::options::{RuntimeConfig, ScrollOptions};
use crate::step::{Step, StepStatus, VerificationKind, VerificationResult};
use crate::usage::UsageRecorder;

const SCROLL_Y_EXPR: &str =
    "window.scrollY || (document.documentElement ? document.documentElement.scrollTop : 0)";

/// Summary handed to [`AgentRuntime::emit_step_end`].
#[derive(Clone, Debug, Default)]
pub struct StepEndSummary {
    pub action: Option<Value>,
    pub error: Option<String>,
}

impl StepEndSummary {
    pub fn with_action(mut self, action: Value) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Observer invoked at step boundaries with the step id and goal.
pub type StepHook = Arc<dyn Fn(&StepId, &str) + Send + Sync>;

#[derive(Default)]
struct StepHooks {
    on_step_start: Option<StepHook>,
    on_step_end: Option<StepHook>,
}

#[derive(Default)]
struct RuntimeState {
    current: Option<Step>,
    downloads: Vec<DownloadEntry>,
    task_done: bool,
}

/// Owns the step lifecycle, the snapshot cache and the trace channel.
///
/// The backend may be shared with an external orchestrator; the runtime
/// takes no persistent locks on it. The runtime itself is single-owner:
/// one step open at a time, strict snapshot → action → snapshot
/// sequencing.
pub struct AgentRuntime {
    backend: Arc<dyn Backend>,
    tracer: Tracer,
    cache: CachedSnapshot,
    config: RuntimeConfig,
    cancel: CancellationToken,
    usage: UsageRecorder,
    hooks: Mutex<StepHooks>,
    state: Mutex<RuntimeState>,
}

impl AgentRuntime {
    pub fn new(backend: Arc<dyn Backend>, tracer: Tracer, config: RuntimeConfig) -> Self {
        let bridge = ExtensionBridge::new(Arc::clone(&backend));
        let cache = CachedSnapshot::new(bridge, config.snapshot_max_age_ms);
        Self {
            backend,
            tracer,
            cache,
            config,
            cancel: CancellationToken::new(),
            usage: UsageRecorder::new(),
            hooks: Mutex::new(StepHooks::default()),
            state: Mutex::new(RuntimeState::default()),
        }
    }

    pub fn on_step_start(&self, hook: StepHook) {
        self.hooks.lock().on_step_start = Some(hook);
    }

    pub fn on_step_end(&self, hook: StepHook) {
        self.hooks.lock().on_step_end = Some(hook);
    }

    fn fire_step_start(&self, step_id: &StepId, goal: &str) {
        if let Some(hook) = self.hooks.lock().on_step_start.clone() {
            hook(step_id, goal);
        }
    }

    fn fire_step_end(&self, step_id: &StepId, goal: &str) {
        if let Some(hook) = self.hooks.lock().on_step_end.clone() {
            hook(step_id, goal);
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn usage(&self) -> &UsageRecorder {
        &self.usage
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Set when an `assert_done` predicate passed.
    pub fn is_task_done(&self) -> bool {
        self.state.lock().task_done
    }

    pub fn current_step_id(&self) -> Option<StepId> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|s| s.step_id.clone())
    }

    /// Downloads as reported by the host driver; they feed assertion
    /// contexts.
    pub fn set_downloads(&self, downloads: Vec<DownloadEntry>) {
        self.state.lock().downloads = downloads;
    }

    pub fn push_download(&self, entry: DownloadEntry) {
        self.state.lock().downloads.push(entry);
    }

    // ---- step lifecycle ----------------------------------------------

    /// Open a new step. An auto-opened verify step is ended first; a
    /// regular open step is a programmer error.
    pub async fn begin_step(
        &self,
        goal: &str,
        step_index: Option<u32>,
    ) -> Result<StepId, RuntimeError> {
        let auto_open = {
            let state = self.state.lock();
            match &state.current {
                Some(step) if step.auto => true,
                Some(step) => {
                    return Err(RuntimeError::StepAlreadyOpen {
                        current: step.step_id.to_string(),
                    })
                }
                None => false,
            }
        };
        if auto_open {
            self.emit_step_end(StepEndSummary::default()).await;
        }

        let step = Step::new(goal, step_index, false);
        let step_id = step.step_id.clone();
        self.state.lock().current = Some(step);
        info!(target: "stepgate-runtime", step = %step_id, goal, "step opened");
        self.fire_step_start(&step_id, goal);
        self.tracer.step_start(&step_id, goal, step_index).await;
        Ok(step_id)
    }

    /// Close the current step and emit `step_end`. Idempotent: without an
    /// open step this is a no-op returning `None`.
    pub async fn emit_step_end(&self, summary: StepEndSummary) -> Option<Step> {
        let mut step = self.state.lock().current.take()?;
        step.status = StepStatus::Ended;
        let ok = step.is_ok() && summary.error.is_none();
        let data = json!({
            "goal": step.goal,
            "ok": ok,
            "auto": step.auto,
            "duration_ms": timestamp_now().saturating_sub(step.began_at),
            "verifications": step.verifications,
            "action": summary.action,
            "error": summary.error,
        });
        info!(target: "stepgate-runtime", step = %step.step_id, ok, "step ended");
        self.fire_step_end(&step.step_id, &step.goal);
        self.tracer.step_end(&step.step_id, data).await;
        Some(step)
    }

    // ---- snapshots ---------------------------------------------------

    /// Snapshot through the cache. A real fetch emits a `snapshot` trace
    /// event; cache hits stay silent.
    pub async fn snapshot(&self, options: &SnapshotOptions) -> Result<Snapshot, RuntimeError> {
        self.snapshot_inner(options, false).await
    }

    /// Snapshot bypassing the cache.
    pub async fn snapshot_fresh(
        &self,
        options: &SnapshotOptions,
    ) -> Result<Snapshot, RuntimeError> {
        self.snapshot_inner(options, true).await
    }

    async fn snapshot_inner(
        &self,
        options: &SnapshotOptions,
        force_refresh: bool,
    ) -> Result<Snapshot, RuntimeError> {
        let (snapshot, fetched) = self.cache.get(options, force_refresh, &self.cancel).await?;
        if fetched {
            self.tracer
                .snapshot(
                    self.current_step_id().as_ref(),
                    &snapshot.url,
                    snapshot.elements.len(),
                )
                .await;
        }
        Ok(snapshot)
    }

    /// Fresh snapshot after a mutating action, run through the captcha
    /// gate.
    pub async fn post_action_snapshot(
        &self,
        options: &SnapshotOptions,
    ) -> Result<Snapshot, RuntimeError> {
        let snapshot = self.snapshot_fresh(options).await?;
        self.gate_captcha(&snapshot).await?;
        Ok(snapshot)
    }

    pub fn invalidate_snapshot(&self) {
        self.cache.invalidate();
    }

    // ---- assertions --------------------------------------------------

    /// Evaluate a predicate against the current context and put the
    /// outcome on the trace. A required failure marks the step failed
    /// but does not raise; the step loop decides policy.
    pub async fn assert(
        &self,
        predicate: &Predicate,
        label: &str,
        required: bool,
    ) -> Result<VerificationResult, RuntimeError> {
        self.assert_kind(predicate, label, required, VerificationKind::Assert)
            .await
    }

    /// Required assertion that flags terminal task success on pass.
    pub async fn assert_done(
        &self,
        predicate: &Predicate,
        label: &str,
    ) -> Result<VerificationResult, RuntimeError> {
        let result = self
            .assert_kind(predicate, label, true, VerificationKind::AssertDone)
            .await?;
        if result.passed {
            self.state.lock().task_done = true;
        }
        Ok(result)
    }

    /// Deferred assertion handle for one-shot or retried evaluation.
    pub fn check(
        &self,
        predicate: Predicate,
        label: impl Into<String>,
        required: bool,
    ) -> AssertionHandle<'_> {
        AssertionHandle {
            runtime: self,
            predicate,
            label: label.into(),
            required,
            snapshot_options: SnapshotOptions::default(),
        }
    }

    async fn assert_kind(
        &self,
        predicate: &Predicate,
        label: &str,
        required: bool,
        kind: VerificationKind,
    ) -> Result<VerificationResult, RuntimeError> {
        let ctx = self.current_context();
        let outcome = predicate.eval(&ctx);
        let result = VerificationResult {
            label: label.to_string(),
            required,
            passed: outcome.passed,
            reason: outcome.reason,
            details: outcome.details,
            attempts: 1,
            kind,
        };
        self.record_verification(result).await
    }

    /// Context assembled from what the runtime already holds; assertions
    /// never fetch.
    fn current_context(&self) -> AssertContext {
        let mut ctx = AssertContext::new();
        if let Some(snapshot) = self.cache.cached() {
            ctx = ctx.with_snapshot(snapshot);
        } else if let Some(url) = self.cache.cached_url() {
            ctx = ctx.with_url(url);
        }
        let state = self.state.lock();
        ctx.downloads = state.downloads.clone();
        ctx.step_id = state.current.as_ref().map(|s| s.step_id.clone());
        ctx
    }

    /// Step to attach a verification to, honoring `auto_step`.
    async fn ensure_step_for(&self, label: &str) -> Result<StepId, RuntimeError> {
        if let Some(step_id) = self.current_step_id() {
            return Ok(step_id);
        }
        if !self.config.auto_step {
            return Err(RuntimeError::NoOpenStep {
                label: label.to_string(),
            });
        }
        let goal = format!("verify:{label}");
        let step = Step::new(goal.clone(), None, true);
        let step_id = step.step_id.clone();
        self.state.lock().current = Some(step);
        debug!(target: "stepgate-runtime", step = %step_id, "auto-opened verify step");
        self.fire_step_start(&step_id, &goal);
        self.tracer.step_start(&step_id, &goal, None).await;
        Ok(step_id)
    }

    async fn record_verification(
        &self,
        result: VerificationResult,
    ) -> Result<VerificationResult, RuntimeError> {
        let step_id = self.ensure_step_for(&result.label).await?;
        {
            let mut state = self.state.lock();
            if let Some(step) = state.current.as_mut() {
                step.record(result.clone());
            }
        }
        self.tracer
            .verification(Some(&step_id), &verification_event(&result))
            .await;
        Ok(result)
    }

    // ---- scroll-with-verification ------------------------------------

    /// Dispatch a wheel event and, when asked, prove that scrolling
    /// actually happened by watching `scrollY`.
    pub async fn scroll_by(
        &self,
        delta_y: f64,
        options: ScrollOptions,
    ) -> Result<bool, RuntimeError> {
        let before = self.read_scroll_y().await?;
        self.backend.wheel(delta_y, None, None).await?;
        self.cache.invalidate();

        if !options.verify {
            return Ok(true);
        }

        let mut passed = self.watch_scroll_delta(before, &options).await?;
        let mut used_fallback = false;
        if !passed && options.js_fallback {
            used_fallback = true;
            debug!(target: "stepgate-runtime", "wheel absorbed, trying scrollBy fallback");
            self.backend
                .eval(&format!("window.scrollBy(0, {delta_y}); null"))
                .await?;
            passed = self.watch_scroll_delta(before, &options).await?;
        }

        let after = self.read_scroll_y().await?;
        let observed = (after - before).abs();
        let reason = if passed {
            format!("scrolled {observed:.0}px (threshold {:.0}px)", options.min_delta_px)
        } else {
            format!(
                "scroll delta {observed:.0}px below threshold {:.0}px within {}ms",
                options.min_delta_px, options.timeout_ms
            )
        };
        let result = VerificationResult {
            label: options.label.clone(),
            required: options.required,
            passed,
            reason,
            details: json!({
                "before": before,
                "after": after,
                "delta": observed,
                "min_delta_px": options.min_delta_px,
                "used_fallback": used_fallback,
            }),
            attempts: 1,
            kind: VerificationKind::Scroll,
        };
        self.record_verification(result).await?;
        Ok(passed)
    }

    async fn watch_scroll_delta(
        &self,
        before: f64,
        options: &ScrollOptions,
    ) -> Result<bool, RuntimeError> {
        let deadline = Instant::now() + Duration::from_millis(options.timeout_ms);
        loop {
            if self.cancel.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            let now_y = self.read_scroll_y().await?;
            if (now_y - before).abs() >= options.min_delta_px {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(RuntimeError::Cancelled),
                _ = sleep(Duration::from_millis(options.poll_ms)) => {}
            }
        }
    }

    async fn read_scroll_y(&self) -> Result<f64, RuntimeError> {
        let value = self.backend.eval(SCROLL_Y_EXPR).await?;
        Ok(value.as_f64().unwrap_or(0.0))
    }

    // ---- captcha gate ------------------------------------------------

    /// Inspect a snapshot's captcha diagnostics and apply the configured
    /// policy. Passive evidence is suppressed regardless of confidence.
    pub async fn gate_captcha(&self, snapshot: &Snapshot) -> Result<(), RuntimeError> {
        let Some(diagnostics) = snapshot.captcha() else {
            return Ok(());
        };
        if !self.config.captcha.gates(diagnostics) {
            if diagnostics.detected {
                debug!(
                    target: "stepgate-runtime",
                    confidence = diagnostics.confidence,
                    "captcha evidence suppressed (passive or below floor)"
                );
            }
            return Ok(());
        }

        warn!(
            target: "stepgate-runtime",
            confidence = diagnostics.confidence,
            provider = ?diagnostics.provider_hint,
            "interactive captcha gating the step"
        );

        match self.config.captcha.policy.clone() {
            CaptchaPolicy::Abort => {
                let result = VerificationResult {
                    label: "captcha".to_string(),
                    required: true,
                    passed: false,
                    reason: format!(
                        "interactive captcha detected (confidence {:.2}), policy is abort",
                        diagnostics.confidence
                    ),
                    details: serde_json::to_value(diagnostics).unwrap_or(Value::Null),
                    attempts: 1,
                    kind: VerificationKind::Captcha,
                };
                self.record_verification(result).await?;
                Err(RuntimeError::CaptchaAbort {
                    confidence: diagnostics.confidence,
                    provider_hint: diagnostics.provider_hint.clone(),
                })
            }
            CaptchaPolicy::Callback(handler) => {
                let deadline =
                    Instant::now() + Duration::from_millis(self.config.captcha.timeout_ms);
                let mut current = diagnostics.clone();
                let mut attempts: u32 = 0;
                loop {
                    if self.cancel.is_cancelled() {
                        return Err(RuntimeError::Cancelled);
                    }
                    attempts += 1;
                    handler.attempt(&current).await;

                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(RuntimeError::Cancelled),
                        _ = sleep(Duration::from_millis(self.config.captcha.poll_ms)) => {}
                    }

                    let (fresh, _) = self
                        .cache
                        .get(&SnapshotOptions::default(), true, &self.cancel)
                        .await?;
                    let still_gated = fresh
                        .captcha()
                        .map(|d| self.config.captcha.gates(d))
                        .unwrap_or(false);
                    if !still_gated {
                        let result = VerificationResult {
                            label: "captcha".to_string(),
                            required: true,
                            passed: true,
                            reason: format!("captcha cleared after {attempts} handler attempt(s)"),
                            details: Value::Null,
                            attempts,
                            kind: VerificationKind::Captcha,
                        };
                        self.record_verification(result).await?;
                        return Ok(());
                    }
                    if let Some(d) = fresh.captcha() {
                        current = d.clone();
                    }
                    if Instant::now() >= deadline {
                        let result = VerificationResult {
                            label: "captcha".to_string(),
                            required: true,
                            passed: false,
                            reason: format!(
                                "captcha still present after {}ms",
                                self.config.captcha.timeout_ms
                            ),
                            details: serde_json::to_value(&current).unwrap_or(Value::Null),
                            attempts,
                            kind: VerificationKind::Captcha,
                        };
                        self.record_verification(result).await?;
                        return Err(RuntimeError::CaptchaAbort {
                            confidence: current.confidence,
                            provider_hint: current.provider_hint.clone(),
                        });
                    }
                }
            }
        }
    }

    // ---- trace passthrough -------------------------------------------

    pub async fn emit_action(&self, action: Value) {
        self.tracer
            .action(self.current_step_id().as_ref(), action)
            .await;
    }

    pub async fn emit_error(&self, name: &str, message: &str, data: Value) {
        self.tracer
            .error(self.current_step_id().as_ref(), name, message, data)
            .await;
    }
}

/// Deferred assertion returned by [`AgentRuntime::check`].
pub struct AssertionHandle<'rt> {
    runtime: &'rt AgentRuntime,
    predicate: Predicate,
    label: String,
    required: bool,
    snapshot_options: SnapshotOptions,
}

impl<'rt> AssertionHandle<'rt> {
    /// Snapshot options used by retry refreshes.
    pub fn with_snapshot_options(mut self, options: SnapshotOptions) -> Self {
        self.snapshot_options = options;
        self
    }

    /// Immediate one-shot evaluation.
    pub async fn once(self) -> Result<VerificationResult, RuntimeError> {
        self.runtime
            .assert_kind(
                &self.predicate,
                &self.label,
                self.required,
                VerificationKind::Assert,
            )
            .await
    }

    /// Retry with refresh: every attempt's outcome reaches the trace,
    /// the final one is recorded on the step.
    pub async fn eventually(
        self,
        config: EventuallyConfig,
    ) -> Result<VerificationResult, RuntimeError> {
        let step_id = self.runtime.ensure_step_for(&self.label).await?;
        let initial = self.runtime.current_context();

        let cache = &self.runtime.cache;
        let cancel = &self.runtime.cancel;
        let state = &self.runtime.state;
        let base_options = self.snapshot_options.clone();
        let refresh: RefreshFn<'_> = Box::new(move |limit| {
            let mut options = base_options.clone();
            if let Some(limit) = limit {
                options.limit = limit;
            }
            Box::pin(async move {
                match cache.get(&options, true, cancel).await {
                    Ok((snapshot, _)) => {
                        let downloads = state.lock().downloads.clone();
                        Ok(AssertContext::new()
                            .with_snapshot(snapshot)
                            .with_downloads(downloads))
                    }
                    Err(err) if err.is_cancelled() => Err(VerifyError::Cancelled),
                    Err(err) => Err(VerifyError::Refresh(err.to_string())),
                }
            })
        });

        let report = eventually(&self.predicate, initial, refresh, &config, cancel)
            .await
            .map_err(|err| match err {
                VerifyError::Cancelled => RuntimeError::Cancelled,
                VerifyError::Refresh(reason) => RuntimeError::Snapshot(
                    stepgate_snapshot::SnapshotError::Malformed(reason),
                ),
            })?;

        // Intermediate attempts go straight to the trace; the final
        // outcome becomes the step's verification record.
        for (idx, outcome) in report.history.iter().enumerate() {
            if idx + 1 == report.history.len() {
                break;
            }
            let event = VerificationEvent {
                label: self.label.clone(),
                required: self.required,
                passed: outcome.passed,
                reason: outcome.reason.clone(),
                kind: VerificationKind::Assert.as_str().to_string(),
                attempts: (idx + 1) as u32,
                details: outcome.details.clone(),
            };
            self.runtime
                .tracer
                .verification(Some(&step_id), &event)
                .await;
        }

        let result = VerificationResult {
            label: self.label,
            required: self.required,
            passed: report.outcome.passed,
            reason: report.outcome.reason,
            details: report.outcome.details,
            attempts: report.attempts,
            kind: VerificationKind::Assert,
        };
        self.runtime.record_verification(result).await
    }
}

fn verification_event(result: &VerificationResult) -> VerificationEvent {
    VerificationEvent {
        label: result.label.clone(),
        required: result.required,
        passed: result.passed,
        reason: result.reason.clone(),
        kind: result.kind.as_str().to_string(),
        attempts: result.attempts,
        details: result.details.clone(),
    }
}
