//! Fluent expectation layer compiling to plain predicates.

use serde_json::json;

use crate::context::AssertOutcome;
use crate::predicate::Predicate;
use crate::query::ElementQuery;

/// Entry point: `expect(query).to_exist()`.
pub fn expect(query: ElementQuery) -> ExpectBuilder {
    ExpectBuilder { query }
}

pub struct ExpectBuilder {
    query: ElementQuery,
}

impl ExpectBuilder {
    pub fn to_exist(self) -> Predicate {
        let query = self.query;
        let label = format!("expect({}).to_exist", query.describe());
        Predicate::new(label, move |ctx| {
            let Some(snapshot) = ctx.snapshot.as_ref() else {
                return AssertOutcome::fail("no snapshot in context");
            };
            match query.find_first(snapshot) {
                Some(el) => AssertOutcome::pass(format!("found element {}", el.id))
                    .with_details(json!({ "id": el.id })),
                None => AssertOutcome::fail(format!("nothing matches {}", query.describe())),
            }
        })
    }

    pub fn not_to_exist(self) -> Predicate {
        let query = self.query;
        let label = format!("expect({}).not_to_exist", query.describe());
        Predicate::new(label, move |ctx| {
            let Some(snapshot) = ctx.snapshot.as_ref() else {
                return AssertOutcome::fail("no snapshot in context");
            };
            match query.find_first(snapshot) {
                Some(el) => AssertOutcome::fail(format!(
                    "element {} unexpectedly matches {}",
                    el.id,
                    query.describe()
                )),
                None => AssertOutcome::pass(format!("nothing matches {}", query.describe())),
            }
        })
    }

    /// In the viewport and not occluded.
    pub fn to_be_visible(self) -> Predicate {
        let query = self.query;
        let label = format!("expect({}).to_be_visible", query.describe());
        Predicate::new(label, move |ctx| {
            let Some(snapshot) = ctx.snapshot.as_ref() else {
                return AssertOutcome::fail("no snapshot in context");
            };
            let Some(el) = query.find_first(snapshot) else {
                return AssertOutcome::fail(format!("nothing matches {}", query.describe()));
            };
            if !el.in_viewport {
                AssertOutcome::fail(format!("element {} is outside the viewport", el.id))
            } else if el.is_occluded {
                AssertOutcome::fail(format!("element {} is occluded", el.id))
            } else {
                AssertOutcome::pass(format!("element {} is visible", el.id))
            }
        })
    }

    pub fn to_have_text_contains(self, needle: impl Into<String>) -> Predicate {
        let query = self.query;
        let needle = needle.into();
        let label = format!(
            "expect({}).to_have_text_contains('{needle}')",
            query.describe()
        );
        Predicate::new(label, move |ctx| {
            let Some(snapshot) = ctx.snapshot.as_ref() else {
                return AssertOutcome::fail("no snapshot in context");
            };
            let Some(el) = query.find_first(snapshot) else {
                return AssertOutcome::fail(format!("nothing matches {}", query.describe()));
            };
            if el.text.to_lowercase().contains(&needle.to_lowercase()) {
                AssertOutcome::pass(format!("element {} text contains '{needle}'", el.id))
            } else {
                AssertOutcome::fail(format!(
                    "element {} text '{}' does not contain '{needle}'",
                    el.id, el.text
                ))
            }
        })
    }
}

/// Any element's text contains the needle, case-insensitively.
pub fn text_present(needle: impl Into<String>) -> Predicate {
    let needle = needle.into();
    let label = format!("text_present('{needle}')");
    Predicate::new(label, move |ctx| {
        let Some(snapshot) = ctx.snapshot.as_ref() else {
            return AssertOutcome::fail("no snapshot in context");
        };
        let lowered = needle.to_lowercase();
        match snapshot
            .elements
            .iter()
            .find(|el| el.text.to_lowercase().contains(&lowered))
        {
            Some(el) => AssertOutcome::pass(format!("element {} carries the text", el.id)),
            None => AssertOutcome::fail(format!(
                "no element text contains '{needle}' across {} elements",
                snapshot.elements.len()
            )),
        }
    })
}

/// No element's text contains the needle.
pub fn no_text(needle: impl Into<String>) -> Predicate {
    let needle = needle.into();
    let label = format!("no_text('{needle}')");
    Predicate::new(label, move |ctx| {
        let Some(snapshot) = ctx.snapshot.as_ref() else {
            return AssertOutcome::fail("no snapshot in context");
        };
        let lowered = needle.to_lowercase();
        match snapshot
            .elements
            .iter()
            .find(|el| el.text.to_lowercase().contains(&lowered))
        {
            Some(el) => AssertOutcome::fail(format!(
                "element {} unexpectedly carries '{needle}'",
                el.id
            )),
            None => AssertOutcome::pass(format!("no element text contains '{needle}'")),
        }
    })
}
