//! Verification algebra.
//!
//! A predicate is a pure function from an assertion context (snapshot +
//! URL + downloads) to a pass/fail outcome with a reason. Purity is the
//! contract everything else leans on: refreshing state is the retry
//! driver's job, never the predicate's, so the same context always
//! produces the same outcome.

pub mod context;
pub mod eventually;
pub mod expect;
pub mod predicate;
pub mod primitives;
pub mod query;

pub use context::{AssertContext, AssertOutcome};
pub use eventually::{
    eventually, EventuallyConfig, EventuallyOutcome, GrowthApply, RefreshFn, SnapshotLimitGrowth,
};
pub use expect::{expect, no_text, text_present, ExpectBuilder};
pub use predicate::{all_of, any_of, custom, not, Predicate};
pub use primitives::{
    download_completed, element_count, exists, is_checked, is_collapsed, is_disabled, is_enabled,
    is_expanded, is_unchecked, not_exists, url_contains, url_matches, value_contains, value_equals,
};
pub use query::{parse_selector, ElementQuery};

use thiserror::Error;

/// Errors that escape the retry driver instead of becoming failing
/// outcomes.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("verification cancelled")]
    Cancelled,

    /// Context refresh failed in a way the caller wants surfaced rather
    /// than retried (the driver itself converts transient refresh
    /// failures into failing outcomes).
    #[error("context refresh failed: {0}")]
    Refresh(String),
}
