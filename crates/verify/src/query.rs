//! Element queries and the textual selector DSL.
//!
//! The DSL is a whitespace-joined conjunction of filters:
//! `role=link text~'More information' href~iana`. Text matching is
//! case-insensitive substring; quoted values may contain spaces.

use stepgate_core_types::{Element, Snapshot};

/// Structured element filter. All populated fields must match.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ElementQuery {
    pub role: Option<String>,
    /// Exact (case-insensitive) text match.
    pub name: Option<String>,
    /// Alias for `name`, kept for callers that think in DOM terms.
    pub text: Option<String>,
    pub text_contains: Option<String>,
    pub href_contains: Option<String>,
    pub in_viewport: Option<bool>,
    pub occluded: Option<bool>,
    pub group: Option<String>,
    pub in_dominant_group: Option<bool>,
    pub group_index: Option<u32>,
}

impl ElementQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn text_contains(mut self, text: impl Into<String>) -> Self {
        self.text_contains = Some(text.into());
        self
    }

    pub fn href_contains(mut self, href: impl Into<String>) -> Self {
        self.href_contains = Some(href.into());
        self
    }

    pub fn in_viewport(mut self, flag: bool) -> Self {
        self.in_viewport = Some(flag);
        self
    }

    pub fn occluded(mut self, flag: bool) -> Self {
        self.occluded = Some(flag);
        self
    }

    pub fn group(mut self, key: impl Into<String>) -> Self {
        self.group = Some(key.into());
        self
    }

    pub fn in_dominant_group(mut self, flag: bool) -> Self {
        self.in_dominant_group = Some(flag);
        self
    }

    pub fn group_index(mut self, index: u32) -> Self {
        self.group_index = Some(index);
        self
    }

    /// Pure match against one element.
    pub fn matches(&self, el: &Element, snapshot: &Snapshot) -> bool {
        if let Some(role) = &self.role {
            if !el.role.eq_ignore_ascii_case(role) {
                return false;
            }
        }
        for exact in [self.name.as_deref(), self.text.as_deref()].into_iter().flatten() {
            if !el.text.eq_ignore_ascii_case(exact) {
                return false;
            }
        }
        if let Some(needle) = &self.text_contains {
            if !contains_ci(&el.text, needle) {
                return false;
            }
        }
        if let Some(needle) = &self.href_contains {
            match &el.href {
                Some(href) if contains_ci(href, needle) => {}
                _ => return false,
            }
        }
        if let Some(expected) = self.in_viewport {
            if el.in_viewport != expected {
                return false;
            }
        }
        if let Some(expected) = self.occluded {
            if el.is_occluded != expected {
                return false;
            }
        }
        if let Some(key) = &self.group {
            if el.group_key.as_deref() != Some(key.as_str()) {
                return false;
            }
        }
        if let Some(expected) = self.in_dominant_group {
            let actual = el.in_dominant_group.unwrap_or_else(|| {
                match (&el.group_key, &snapshot.dominant_group_key) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            });
            if actual != expected {
                return false;
            }
        }
        if let Some(index) = self.group_index {
            if el.group_index != Some(index) {
                return false;
            }
        }
        true
    }

    /// All matches, sorted by `doc_y` ascending for stable first-match
    /// semantics.
    pub fn find_all<'a>(&self, snapshot: &'a Snapshot) -> Vec<&'a Element> {
        let mut matches: Vec<&Element> = snapshot
            .elements
            .iter()
            .filter(|el| self.matches(el, snapshot))
            .collect();
        matches.sort_by_key(|el| {
            (
                el.doc_y.unwrap_or(f64::MAX).round() as i64,
                el.bbox.y.round() as i64,
                el.id,
            )
        });
        matches
    }

    pub fn find_first<'a>(&self, snapshot: &'a Snapshot) -> Option<&'a Element> {
        self.find_all(snapshot).into_iter().next()
    }

    /// Human-readable form used in predicate labels and reasons.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(role) = &self.role {
            parts.push(format!("role={role}"));
        }
        if let Some(text) = self.name.as_deref().or(self.text.as_deref()) {
            parts.push(format!("text='{text}'"));
        }
        if let Some(needle) = &self.text_contains {
            parts.push(format!("text~'{needle}'"));
        }
        if let Some(needle) = &self.href_contains {
            parts.push(format!("href~{needle}"));
        }
        if let Some(flag) = self.in_viewport {
            parts.push(format!("in_viewport={flag}"));
        }
        if let Some(flag) = self.in_dominant_group {
            parts.push(format!("dominant={flag}"));
        }
        if parts.is_empty() {
            "any element".to_string()
        } else {
            parts.join(" ")
        }
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Parse the textual selector DSL into a query.
pub fn parse_selector(selector: &str) -> Result<ElementQuery, String> {
    let mut query = ElementQuery::new();
    for token in tokenize(selector)? {
        let (key, op, value) = split_token(&token)?;
        match (key.as_str(), op) {
            ("role", '=') => query.role = Some(value),
            ("text", '~') => query.text_contains = Some(value),
            ("text", '=') => query.text = Some(value),
            ("href", '~') => query.href_contains = Some(value),
            ("group", '=') => query.group = Some(value),
            _ => {
                return Err(format!("unsupported selector term '{token}'"));
            }
        }
    }
    Ok(query)
}

/// Split on whitespace, honoring single-quoted values.
fn tokenize(selector: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for ch in selector.chars() {
        match ch {
            '\'' => {
                in_quote = !in_quote;
                current.push(ch);
            }
            c if c.is_whitespace() && !in_quote => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quote {
        return Err(format!("unterminated quote in selector '{selector}'"));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    if tokens.is_empty() {
        return Err("empty selector".to_string());
    }
    Ok(tokens)
}

fn split_token(token: &str) -> Result<(String, char, String), String> {
    let split_at = token
        .char_indices()
        .find(|(_, c)| *c == '=' || *c == '~')
        .map(|(idx, c)| (idx, c));
    let Some((idx, op)) = split_at else {
        return Err(format!("selector term '{token}' is missing '=' or '~'"));
    };
    let key = token[..idx].to_string();
    let raw_value = &token[idx + 1..];
    let value = raw_value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(raw_value)
        .to_string();
    if key.is_empty() || value.is_empty() {
        return Err(format!("selector term '{token}' has an empty side"));
    }
    Ok((key, op, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepgate_core_types::SnapshotStatus;

    fn snapshot() -> Snapshot {
        Snapshot {
            status: SnapshotStatus::Success,
            url: "https://example.com/".into(),
            dominant_group_key: Some("results".into()),
            elements: vec![
                Element {
                    id: 1,
                    role: "link".into(),
                    text: "More information...".into(),
                    href: Some("https://www.iana.org/domains".into()),
                    doc_y: Some(300.0),
                    ..Element::default()
                },
                Element {
                    id: 2,
                    role: "link".into(),
                    text: "About".into(),
                    group_key: Some("results".into()),
                    group_index: Some(0),
                    doc_y: Some(100.0),
                    ..Element::default()
                },
                Element {
                    id: 3,
                    role: "button".into(),
                    text: "Search".into(),
                    doc_y: Some(50.0),
                    ..Element::default()
                },
            ],
            ..Snapshot::default()
        }
    }

    #[test]
    fn parses_conjunctions_with_quotes() {
        let query = parse_selector("role=link text~'More information' href~iana").unwrap();
        assert_eq!(query.role.as_deref(), Some("link"));
        assert_eq!(query.text_contains.as_deref(), Some("More information"));
        assert_eq!(query.href_contains.as_deref(), Some("iana"));
    }

    #[test]
    fn rejects_bad_tokens() {
        assert!(parse_selector("").is_err());
        assert!(parse_selector("role").is_err());
        assert!(parse_selector("color=red").is_err());
        assert!(parse_selector("text~'unterminated").is_err());
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        let snap = snapshot();
        let query = parse_selector("role=link text~'more INFO'").unwrap();
        let found = query.find_all(&snap);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 1);
    }

    #[test]
    fn results_sort_by_doc_y_for_stable_first_match() {
        let snap = snapshot();
        let query = parse_selector("role=link").unwrap();
        let ids: Vec<u64> = query.find_all(&snap).iter().map(|el| el.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(query.find_first(&snap).unwrap().id, 2);
    }

    #[test]
    fn dominant_group_membership_falls_back_to_keys() {
        let snap = snapshot();
        let query = ElementQuery::new().in_dominant_group(true);
        let found = query.find_all(&snap);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 2);
    }
}
