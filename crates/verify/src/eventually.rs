//! Retry-with-refresh evaluation.
//!
//! The driver owns the impure half of verification: it re-snapshots
//! between attempts (the predicate itself stays pure), bounds the loop
//! with a timeout, a retry cap and a poll interval, and can grow the
//! requested snapshot limit so virtualized pages eventually reveal
//! below-the-fold targets without paying max-limit captures up front.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::{AssertContext, AssertOutcome};
use crate::predicate::Predicate;
use crate::VerifyError;

/// When the limit growth applies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GrowthApply {
    /// First refresh keeps the start limit; growth kicks in after it
    /// also failed.
    OnlyOnFail,
    /// Every refresh grows, including the first.
    All,
}

/// Adaptive snapshot-limit growth policy.
#[derive(Clone, Copy, Debug)]
pub struct SnapshotLimitGrowth {
    pub start_limit: u32,
    pub step: u32,
    pub max_limit: u32,
    pub apply_on: GrowthApply,
}

impl SnapshotLimitGrowth {
    /// Limit to request for the given refresh (1-based).
    pub fn limit_for_refresh(&self, refresh: u32) -> u32 {
        let steps = match self.apply_on {
            GrowthApply::All => refresh,
            GrowthApply::OnlyOnFail => refresh.saturating_sub(1),
        };
        self.start_limit
            .saturating_add(self.step.saturating_mul(steps))
            .min(self.max_limit)
    }
}

/// Budget for one eventually run.
#[derive(Clone, Copy, Debug)]
pub struct EventuallyConfig {
    pub timeout_ms: u64,
    pub poll_ms: u64,
    pub max_retries: u32,
    pub growth: Option<SnapshotLimitGrowth>,
}

impl Default for EventuallyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            poll_ms: 500,
            max_retries: 20,
            growth: None,
        }
    }
}

impl EventuallyConfig {
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_poll(mut self, poll_ms: u64) -> Self {
        self.poll_ms = poll_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_growth(mut self, growth: SnapshotLimitGrowth) -> Self {
        self.growth = Some(growth);
        self
    }
}

/// Final outcome plus how many attempts it took.
///
/// `history` holds every attempt's raw outcome in order (the last entry
/// is the outcome that ended the run, before any termination prefix), so
/// callers can put each attempt on the trace.
#[derive(Clone, Debug)]
pub struct EventuallyOutcome {
    pub outcome: AssertOutcome,
    pub attempts: u32,
    pub history: Vec<AssertOutcome>,
}

/// Callback producing a fresh context for a retry; receives the snapshot
/// limit to request when a growth policy is set.
pub type RefreshFn<'a> =
    Box<dyn FnMut(Option<u32>) -> BoxFuture<'a, Result<AssertContext, VerifyError>> + Send + 'a>;

/// Evaluate `predicate` until it passes or the budget runs out.
///
/// Attempt 1 uses `initial`; each further attempt rebuilds the context
/// through `refresh`. Transient refresh failures become failing outcomes
/// and keep the loop alive; cancellation escapes immediately. The
/// returned outcome carries the termination cause as a reason prefix
/// when the budget expired.
pub async fn eventually(
    predicate: &Predicate,
    initial: AssertContext,
    mut refresh: RefreshFn<'_>,
    config: &EventuallyConfig,
    cancel: &CancellationToken,
) -> Result<EventuallyOutcome, VerifyError> {
    let started = Instant::now();
    let deadline = started + Duration::from_millis(config.timeout_ms);
    let mut attempts: u32 = 0;
    let mut refreshes: u32 = 0;
    // A failed refresh becomes the next attempt's outcome instead of a
    // predicate evaluation, so history stays 1:1 with attempts.
    let mut context: Result<AssertContext, String> = Ok(initial);
    let mut history: Vec<AssertOutcome> = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled);
        }

        attempts += 1;
        let outcome = match &context {
            Ok(ctx) => predicate.eval(ctx),
            Err(reason) => AssertOutcome::fail(format!("context refresh failed: {reason}")),
        };
        debug!(
            target: "stepgate-verify",
            label = predicate.label(),
            attempt = attempts,
            passed = outcome.passed,
            "eventually attempt"
        );
        history.push(outcome.clone());
        if outcome.passed {
            return Ok(EventuallyOutcome {
                outcome,
                attempts,
                history,
            });
        }

        if attempts > config.max_retries {
            let outcome = terminal(
                history.last().cloned(),
                format!("retries exhausted ({attempts})"),
            );
            return Ok(EventuallyOutcome {
                outcome,
                attempts,
                history,
            });
        }
        if Instant::now() >= deadline {
            let outcome = terminal(
                history.last().cloned(),
                format!("timeout after {}ms", config.timeout_ms),
            );
            return Ok(EventuallyOutcome {
                outcome,
                attempts,
                history,
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(VerifyError::Cancelled),
            _ = sleep(Duration::from_millis(config.poll_ms)) => {}
        }

        if Instant::now() >= deadline {
            let outcome = terminal(
                history.last().cloned(),
                format!("timeout after {}ms", config.timeout_ms),
            );
            return Ok(EventuallyOutcome {
                outcome,
                attempts,
                history,
            });
        }

        refreshes += 1;
        let limit = config.growth.map(|g| g.limit_for_refresh(refreshes));
        match refresh(limit).await {
            Ok(fresh) => context = Ok(fresh),
            Err(VerifyError::Cancelled) => return Err(VerifyError::Cancelled),
            Err(VerifyError::Refresh(reason)) => context = Err(reason),
        }
    }
}

fn terminal(last_outcome: Option<AssertOutcome>, cause: String) -> AssertOutcome {
    match last_outcome {
        Some(outcome) => {
            AssertOutcome::fail(format!("{cause}: {}", outcome.reason)).with_details(outcome.details)
        }
        None => AssertOutcome::fail(cause),
    }
}
