//! Primitive predicates over URL, elements and downloads.

use regex::Regex;
use serde_json::json;

use stepgate_core_types::Element;

use crate::context::AssertOutcome;
use crate::predicate::Predicate;
use crate::query::{parse_selector, ElementQuery};

/// URL matches the given regular expression.
pub fn url_matches(pattern: &str) -> Predicate {
    let label = format!("url_matches({pattern})");
    let compiled = Regex::new(pattern);
    let pattern = pattern.to_string();
    Predicate::new(label, move |ctx| {
        let regex = match &compiled {
            Ok(regex) => regex,
            Err(err) => return AssertOutcome::fail(format!("invalid pattern '{pattern}': {err}")),
        };
        match ctx.url.as_deref() {
            Some(url) if regex.is_match(url) => {
                AssertOutcome::pass(format!("url '{url}' matches /{pattern}/"))
            }
            Some(url) => AssertOutcome::fail(format!("url '{url}' does not match /{pattern}/")),
            None => AssertOutcome::fail("no url in context"),
        }
    })
}

/// URL contains the given substring.
pub fn url_contains(needle: &str) -> Predicate {
    let label = format!("url_contains({needle})");
    let needle = needle.to_string();
    Predicate::new(label, move |ctx| match ctx.url.as_deref() {
        Some(url) if url.contains(&needle) => {
            AssertOutcome::pass(format!("url '{url}' contains '{needle}'"))
        }
        Some(url) => AssertOutcome::fail(format!("url '{url}' does not contain '{needle}'")),
        None => AssertOutcome::fail("no url in context"),
    })
}

fn with_query<F>(selector: &str, label: String, check: F) -> Predicate
where
    F: Fn(&ElementQuery, &crate::context::AssertContext) -> AssertOutcome + Send + Sync + 'static,
{
    let parsed = parse_selector(selector);
    Predicate::new(label, move |ctx| match &parsed {
        Ok(query) => check(query, ctx),
        Err(err) => AssertOutcome::fail(format!("bad selector: {err}")),
    })
}

/// At least one element matches the selector.
pub fn exists(selector: &str) -> Predicate {
    with_query(selector, format!("exists({selector})"), |query, ctx| {
        let Some(snapshot) = ctx.snapshot.as_ref() else {
            return AssertOutcome::fail("no snapshot in context");
        };
        let found = query.find_all(snapshot);
        if found.is_empty() {
            AssertOutcome::fail(format!("no element matches {}", query.describe()))
        } else {
            AssertOutcome::pass(format!(
                "{} element(s) match {}",
                found.len(),
                query.describe()
            ))
            .with_details(json!({ "ids": found.iter().map(|el| el.id).collect::<Vec<_>>() }))
        }
    })
}

/// No element matches the selector.
pub fn not_exists(selector: &str) -> Predicate {
    with_query(selector, format!("not_exists({selector})"), |query, ctx| {
        let Some(snapshot) = ctx.snapshot.as_ref() else {
            return AssertOutcome::fail("no snapshot in context");
        };
        let found = query.find_all(snapshot);
        if found.is_empty() {
            AssertOutcome::pass(format!("nothing matches {}", query.describe()))
        } else {
            AssertOutcome::fail(format!(
                "{} element(s) unexpectedly match {}",
                found.len(),
                query.describe()
            ))
        }
    })
}

/// Match count falls inside `[min, max]` (either bound optional).
pub fn element_count(selector: &str, min: Option<usize>, max: Option<usize>) -> Predicate {
    let label = format!("element_count({selector}, min={min:?}, max={max:?})");
    with_query(selector, label, move |query, ctx| {
        let Some(snapshot) = ctx.snapshot.as_ref() else {
            return AssertOutcome::fail("no snapshot in context");
        };
        let count = query.find_all(snapshot).len();
        let lower_ok = min.map(|m| count >= m).unwrap_or(true);
        let upper_ok = max.map(|m| count <= m).unwrap_or(true);
        if lower_ok && upper_ok {
            AssertOutcome::pass(format!("{count} element(s) match {}", query.describe()))
        } else {
            AssertOutcome::fail(format!(
                "{count} element(s) match {} (wanted min={min:?} max={max:?})",
                query.describe()
            ))
        }
    })
}

fn state_predicate<F>(selector: &str, name: &str, check: F) -> Predicate
where
    F: Fn(&Element) -> Result<(), String> + Send + Sync + 'static,
{
    let label = format!("{name}({selector})");
    with_query(selector, label, move |query, ctx| {
        let Some(snapshot) = ctx.snapshot.as_ref() else {
            return AssertOutcome::fail("no snapshot in context");
        };
        let Some(el) = query.find_first(snapshot) else {
            return AssertOutcome::fail(format!("no element matches {}", query.describe()));
        };
        match check(el) {
            Ok(()) => AssertOutcome::pass(format!("element {} satisfies the state", el.id)),
            Err(reason) => AssertOutcome::fail(format!("element {}: {reason}", el.id)),
        }
    })
}

pub fn is_enabled(selector: &str) -> Predicate {
    state_predicate(selector, "is_enabled", |el| {
        if el.disabled.unwrap_or(false) {
            Err("element is disabled".to_string())
        } else {
            Ok(())
        }
    })
}

pub fn is_disabled(selector: &str) -> Predicate {
    state_predicate(selector, "is_disabled", |el| match el.disabled {
        Some(true) => Ok(()),
        Some(false) => Err("element is enabled".to_string()),
        None => Err("element reports no disabled state".to_string()),
    })
}

pub fn is_checked(selector: &str) -> Predicate {
    state_predicate(selector, "is_checked", |el| match el.checked {
        Some(true) => Ok(()),
        Some(false) => Err("element is unchecked".to_string()),
        None => Err("element reports no checked state".to_string()),
    })
}

pub fn is_unchecked(selector: &str) -> Predicate {
    state_predicate(selector, "is_unchecked", |el| match el.checked {
        Some(false) => Ok(()),
        Some(true) => Err("element is checked".to_string()),
        None => Err("element reports no checked state".to_string()),
    })
}

pub fn is_expanded(selector: &str) -> Predicate {
    state_predicate(selector, "is_expanded", |el| match el.expanded {
        Some(true) => Ok(()),
        Some(false) => Err("element is collapsed".to_string()),
        None => Err("element reports no expanded state".to_string()),
    })
}

pub fn is_collapsed(selector: &str) -> Predicate {
    state_predicate(selector, "is_collapsed", |el| match el.expanded {
        Some(false) => Ok(()),
        Some(true) => Err("element is expanded".to_string()),
        None => Err("element reports no expanded state".to_string()),
    })
}

pub fn value_equals(selector: &str, expected: &str) -> Predicate {
    let expected = expected.to_string();
    state_predicate(selector, "value_equals", move |el| match &el.value {
        Some(value) if value == &expected => Ok(()),
        Some(value) => Err(format!("value is '{value}', expected '{expected}'")),
        None => Err("element reports no value".to_string()),
    })
}

pub fn value_contains(selector: &str, needle: &str) -> Predicate {
    let needle = needle.to_string();
    state_predicate(selector, "value_contains", move |el| match &el.value {
        Some(value) if value.to_lowercase().contains(&needle.to_lowercase()) => Ok(()),
        Some(value) => Err(format!("value '{value}' does not contain '{needle}'")),
        None => Err("element reports no value".to_string()),
    })
}

/// A download completed, optionally with a filename containing the
/// substring.
pub fn download_completed(filename_substr: Option<&str>) -> Predicate {
    let label = match filename_substr {
        Some(substr) => format!("download_completed({substr})"),
        None => "download_completed".to_string(),
    };
    let needle = filename_substr.map(str::to_string);
    Predicate::new(label, move |ctx| {
        let hit = ctx.downloads.iter().find(|entry| {
            entry.is_completed()
                && needle
                    .as_deref()
                    .map(|n| entry.filename.contains(n))
                    .unwrap_or(true)
        });
        match hit {
            Some(entry) => {
                AssertOutcome::pass(format!("download '{}' completed", entry.filename))
            }
            None => match &needle {
                Some(n) => AssertOutcome::fail(format!(
                    "no completed download with filename containing '{n}' ({} tracked)",
                    ctx.downloads.len()
                )),
                None => AssertOutcome::fail(format!(
                    "no completed download ({} tracked)",
                    ctx.downloads.len()
                )),
            },
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AssertContext;
    use stepgate_core_types::{DownloadEntry, DownloadStatus, Snapshot, SnapshotStatus};

    fn ctx_with_elements(elements: Vec<Element>) -> AssertContext {
        AssertContext::new().with_snapshot(Snapshot {
            status: SnapshotStatus::Success,
            url: "https://example.com/search?q=1".into(),
            elements,
            ..Snapshot::default()
        })
    }

    #[test]
    fn url_predicates() {
        let ctx = ctx_with_elements(vec![]);
        assert!(url_contains("example.com").eval(&ctx).passed);
        assert!(!url_contains("iana.org").eval(&ctx).passed);
        assert!(url_matches(r"search\?q=\d").eval(&ctx).passed);
        assert!(!url_matches("[invalid").eval(&ctx).passed);
    }

    #[test]
    fn exists_and_count() {
        let ctx = ctx_with_elements(vec![
            Element {
                id: 1,
                role: "link".into(),
                text: "Alpha".into(),
                ..Element::default()
            },
            Element {
                id: 2,
                role: "link".into(),
                text: "Beta".into(),
                ..Element::default()
            },
        ]);
        assert!(exists("role=link").eval(&ctx).passed);
        assert!(not_exists("role=button").eval(&ctx).passed);
        assert!(element_count("role=link", Some(2), Some(2)).eval(&ctx).passed);
        assert!(!element_count("role=link", Some(3), None).eval(&ctx).passed);
        let bad = exists("nonsense").eval(&ctx);
        assert!(!bad.passed);
        assert!(bad.reason.contains("bad selector"));
    }

    #[test]
    fn state_predicates_need_the_field() {
        let ctx = ctx_with_elements(vec![Element {
            id: 1,
            role: "checkbox".into(),
            checked: Some(true),
            ..Element::default()
        }]);
        assert!(is_checked("role=checkbox").eval(&ctx).passed);
        assert!(!is_unchecked("role=checkbox").eval(&ctx).passed);
        assert!(!is_expanded("role=checkbox").eval(&ctx).passed);
        // missing disabled field means enabled
        assert!(is_enabled("role=checkbox").eval(&ctx).passed);
        assert!(!is_disabled("role=checkbox").eval(&ctx).passed);
    }

    #[test]
    fn value_predicates() {
        let ctx = ctx_with_elements(vec![Element {
            id: 1,
            role: "textbox".into(),
            value: Some("hello world".into()),
            ..Element::default()
        }]);
        assert!(value_equals("role=textbox", "hello world").eval(&ctx).passed);
        assert!(value_contains("role=textbox", "WORLD").eval(&ctx).passed);
        assert!(!value_equals("role=textbox", "other").eval(&ctx).passed);
    }

    #[test]
    fn download_gate() {
        let ctx = AssertContext::new().with_downloads(vec![
            DownloadEntry {
                status: DownloadStatus::InProgress,
                filename: "other.bin".into(),
                bytes: None,
            },
            DownloadEntry::completed("report.csv"),
        ]);
        assert!(download_completed(Some("report.csv")).eval(&ctx).passed);
        assert!(download_completed(None).eval(&ctx).passed);
        assert!(!download_completed(Some("other")).eval(&ctx).passed);
    }
}
