//! The predicate type and its combinators.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::json;

use crate::context::{AssertContext, AssertOutcome};

/// A named pure check over an assertion context.
#[derive(Clone)]
pub struct Predicate {
    label: String,
    eval: Arc<dyn Fn(&AssertContext) -> AssertOutcome + Send + Sync>,
}

impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predicate")
            .field("label", &self.label)
            .finish()
    }
}

impl Predicate {
    pub fn new<F>(label: impl Into<String>, eval: F) -> Self
    where
        F: Fn(&AssertContext) -> AssertOutcome + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            eval: Arc::new(eval),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn eval(&self, ctx: &AssertContext) -> AssertOutcome {
        (self.eval)(ctx)
    }
}

/// AND over all sub-predicates; failing reasons are collected.
pub fn all_of(predicates: Vec<Predicate>) -> Predicate {
    let label = format!(
        "all_of({})",
        predicates
            .iter()
            .map(Predicate::label)
            .collect::<Vec<_>>()
            .join(", ")
    );
    Predicate::new(label, move |ctx| {
        let outcomes: Vec<(String, AssertOutcome)> = predicates
            .iter()
            .map(|p| (p.label().to_string(), p.eval(ctx)))
            .collect();
        let failing: Vec<String> = outcomes
            .iter()
            .filter(|(_, o)| !o.passed)
            .map(|(label, o)| format!("{label}: {}", o.reason))
            .collect();
        let details = json!({
            "outcomes": outcomes
                .iter()
                .map(|(label, o)| json!({ "label": label, "passed": o.passed, "reason": o.reason }))
                .collect::<Vec<_>>()
        });
        if failing.is_empty() {
            AssertOutcome::pass(format!("all {} conditions met", outcomes.len())).with_details(details)
        } else {
            AssertOutcome::fail(failing.join("; ")).with_details(details)
        }
    })
}

/// OR: first pass wins; otherwise every failure reason is listed.
pub fn any_of(predicates: Vec<Predicate>) -> Predicate {
    let label = format!(
        "any_of({})",
        predicates
            .iter()
            .map(Predicate::label)
            .collect::<Vec<_>>()
            .join(", ")
    );
    Predicate::new(label, move |ctx| {
        let mut reasons = Vec::new();
        for p in &predicates {
            let outcome = p.eval(ctx);
            if outcome.passed {
                return AssertOutcome::pass(format!("{}: {}", p.label(), outcome.reason));
            }
            reasons.push(format!("{}: {}", p.label(), outcome.reason));
        }
        AssertOutcome::fail(format!("no alternative passed ({})", reasons.join("; ")))
    })
}

/// Invert a predicate, keeping the inner reason visible.
pub fn not(predicate: Predicate) -> Predicate {
    let label = format!("not({})", predicate.label());
    Predicate::new(label, move |ctx| {
        let outcome = predicate.eval(ctx);
        if outcome.passed {
            AssertOutcome::fail(format!(
                "expected failure of '{}' but it passed: {}",
                predicate.label(),
                outcome.reason
            ))
        } else {
            AssertOutcome::pass(format!(
                "'{}' failed as expected: {}",
                predicate.label(),
                outcome.reason
            ))
        }
    })
}

/// Wrap an arbitrary check; a panic inside becomes a failing outcome
/// instead of unwinding through the step loop.
pub fn custom<F>(label: impl Into<String>, check: F) -> Predicate
where
    F: Fn(&AssertContext) -> Result<bool, String> + Send + Sync + 'static,
{
    let label = label.into();
    let inner_label = label.clone();
    Predicate::new(label, move |ctx| {
        match catch_unwind(AssertUnwindSafe(|| check(ctx))) {
            Ok(Ok(true)) => AssertOutcome::pass(format!("custom check '{inner_label}' passed")),
            Ok(Ok(false)) => AssertOutcome::fail(format!("custom check '{inner_label}' failed")),
            Ok(Err(reason)) => AssertOutcome::fail(reason),
            Err(panic) => {
                let text = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                AssertOutcome::fail(format!("custom check '{inner_label}' panicked: {text}"))
            }
        }
    })
}
