//! Compact-for-LLM rendering.
//!
//! One pipe-delimited line per selected element:
//! `id|role|text|importance|is_primary|docYq|ord|DG|href`. The selection
//! is a 3-way merge — by importance, by dominant-group order, by document
//! position — so the prompt keeps high-signal actions, ordinal access
//! ("click the 3rd result") and above-the-fold context at once. Ordinals
//! are ranks over the *full* dominant group population, so they stay
//! stable no matter how many elements the selection kept.

use std::collections::{HashMap, HashSet};

use url::Url;

use stepgate_core_types::{Element, Snapshot};

const TEXT_MAX: usize = 30;
const TEXT_TRUNCATED: usize = 27;
const HREF_MAX: usize = 10;
const DOC_Y_QUANTUM: f64 = 200.0;

/// Roles that can receive actions; everything else is context the
/// extension already filtered for other consumers.
const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "textbox",
    "searchbox",
    "combobox",
    "checkbox",
    "radio",
    "slider",
    "tab",
    "menuitem",
    "option",
    "switch",
    "cell",
    "a",
    "input",
    "select",
    "textarea",
];

pub fn is_interactive_role(role: &str) -> bool {
    let lowered = role.to_ascii_lowercase();
    INTERACTIVE_ROLES.contains(&lowered.as_str())
}

/// Selection cardinalities for the 3-way merge.
#[derive(Clone, Copy, Debug)]
pub struct CompactConfig {
    /// Top-N by importance, descending.
    pub by_importance: usize,
    /// Top-N from the dominant group, by `group_index`.
    pub from_dominant_group: usize,
    /// Top-N by position (`doc_y` ascending, importance tiebreak).
    pub by_position: usize,
}

impl Default for CompactConfig {
    fn default() -> Self {
        Self {
            by_importance: 60,
            from_dominant_group: 15,
            by_position: 10,
        }
    }
}

impl CompactConfig {
    pub fn new(by_importance: usize, from_dominant_group: usize, by_position: usize) -> Self {
        Self {
            by_importance,
            from_dominant_group,
            by_position,
        }
    }
}

/// Rank of every dominant-group member within the full group population,
/// ordered by `(doc_y, bbox.y, bbox.x, -importance)`.
pub fn dominant_rank_map(snapshot: &Snapshot) -> HashMap<u64, usize> {
    let mut members = snapshot.dominant_group_members();
    members.sort_by_key(|el| el.rank_key());
    members
        .iter()
        .enumerate()
        .map(|(rank, el)| (el.id, rank))
        .collect()
}

/// Render the compact lines for one snapshot.
pub fn compact_lines(snapshot: &Snapshot, config: &CompactConfig) -> Vec<String> {
    let ranks = dominant_rank_map(snapshot);
    select(snapshot, config)
        .into_iter()
        .map(|el| render_line(el, ranks.get(&el.id).copied()))
        .collect()
}

/// 3-way merge with de-duplication, in selection order.
fn select<'a>(snapshot: &'a Snapshot, config: &CompactConfig) -> Vec<&'a Element> {
    let interactive: Vec<&Element> = snapshot
        .elements
        .iter()
        .filter(|el| is_interactive_role(&el.role))
        .collect();

    let mut by_importance = interactive.clone();
    by_importance.sort_by_key(|el| (-el.importance, el.id));

    let dominant_key = snapshot.dominant_group_key.as_deref();
    let mut from_group: Vec<&Element> = interactive
        .iter()
        .copied()
        .filter(|el| dominant_key.is_some() && el.group_key.as_deref() == dominant_key)
        .collect();
    from_group.sort_by_key(|el| (el.group_index.unwrap_or(u32::MAX), el.id));

    let mut by_position = interactive.clone();
    by_position.sort_by_key(|el| {
        (
            el.doc_y.unwrap_or(f64::MAX).round() as i64,
            -el.importance,
            el.id,
        )
    });

    let mut seen: HashSet<u64> = HashSet::new();
    let mut selected = Vec::new();
    for source in [
        &by_importance[..by_importance.len().min(config.by_importance)],
        &from_group[..from_group.len().min(config.from_dominant_group)],
        &by_position[..by_position.len().min(config.by_position)],
    ] {
        for el in source {
            if seen.insert(el.id) {
                selected.push(*el);
            }
        }
    }
    selected
}

fn render_line(el: &Element, dominant_rank: Option<usize>) -> String {
    let text = normalize_text(&el.text);
    let doc_yq = el
        .doc_y
        .map(|y| ((y / DOC_Y_QUANTUM).round() as i64).to_string())
        .unwrap_or_else(|| "-".to_string());
    let in_group = el.in_dominant_group.unwrap_or(false) || dominant_rank.is_some();
    let ord = match (in_group, dominant_rank) {
        (true, Some(rank)) => rank.to_string(),
        _ => "-".to_string(),
    };
    let href = el
        .href
        .as_deref()
        .map(shorten_href)
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}",
        el.id,
        sanitize(&el.role),
        text,
        el.importance,
        if el.visual_cues.is_primary { 1 } else { 0 },
        doc_yq,
        ord,
        if in_group { 1 } else { 0 },
        sanitize(&href),
    )
}

/// Collapse whitespace, strip the field separator, truncate to 30 chars
/// (27 + `...`).
fn normalize_text(raw: &str) -> String {
    let joined = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "/");
    if joined.chars().count() <= TEXT_MAX {
        return joined;
    }
    let mut truncated: String = joined.chars().take(TEXT_TRUNCATED).collect();
    truncated.push_str("...");
    truncated
}

fn sanitize(raw: &str) -> String {
    raw.replace('|', "/")
}

/// Second-level domain for absolute links, last path segment otherwise,
/// truncated to 10 chars.
fn shorten_href(href: &str) -> String {
    let token = match Url::parse(href) {
        Ok(url) => url
            .host_str()
            .and_then(second_level_label)
            .or_else(|| last_path_segment(url.path()))
            .unwrap_or_default(),
        Err(_) => last_path_segment(href).unwrap_or_default(),
    };
    token.chars().take(HREF_MAX).collect()
}

fn second_level_label(host: &str) -> Option<String> {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    match labels.len() {
        0 => None,
        1 => Some(labels[0].to_string()),
        n => Some(labels[n - 2].to_string()),
    }
}

fn last_path_segment(path: &str) -> Option<String> {
    path.rsplit('/')
        .map(|seg| seg.split(['?', '#']).next().unwrap_or(seg))
        .find(|seg| !seg.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepgate_core_types::{BBox, SnapshotStatus, VisualCues};

    fn element(id: u64, role: &str, importance: i64) -> Element {
        Element {
            id,
            role: role.to_string(),
            text: format!("element {id}"),
            importance,
            ..Element::default()
        }
    }

    fn grouped(mut el: Element, key: &str, index: u32, doc_y: f64) -> Element {
        el.group_key = Some(key.to_string());
        el.group_index = Some(index);
        el.in_dominant_group = Some(true);
        el.doc_y = Some(doc_y);
        el
    }

    fn snapshot(elements: Vec<Element>, dominant: Option<&str>) -> Snapshot {
        Snapshot {
            status: SnapshotStatus::Success,
            url: "https://example.com/".into(),
            elements,
            dominant_group_key: dominant.map(str::to_string),
            ..Snapshot::default()
        }
    }

    #[test]
    fn lines_have_exactly_nine_fields() {
        let snap = snapshot(
            vec![
                element(1, "button", 100),
                grouped(element(2, "link", 50), "results", 0, 420.0),
            ],
            Some("results"),
        );
        for line in compact_lines(&snap, &CompactConfig::default()) {
            assert_eq!(line.matches('|').count(), 8, "line was: {line}");
        }
    }

    #[test]
    fn text_normalizes_whitespace_and_truncates() {
        let mut el = element(1, "button", 10);
        el.text = "  A   very\n\tlong   label that keeps going forever  ".into();
        let snap = snapshot(vec![el], None);
        let line = &compact_lines(&snap, &CompactConfig::default())[0];
        let text_field = line.split('|').nth(2).unwrap();
        assert!(text_field.chars().count() <= 30);
        assert!(text_field.ends_with("..."));
        assert!(text_field.starts_with("A very long label"));
    }

    #[test]
    fn three_way_merge_dedups_in_order() {
        // #3 and #4 sit in the dominant group; #1 wins by importance.
        let snap = snapshot(
            vec![
                element(1, "button", 100),
                element(2, "link", 80),
                grouped(element(3, "link", 40), "results", 0, 200.0),
                grouped(element(4, "link", 30), "results", 1, 400.0),
            ],
            Some("results"),
        );
        let config = CompactConfig::new(2, 2, 0);
        let lines = compact_lines(&snap, &config);
        assert_eq!(lines.len(), 4);
        let ids: Vec<&str> = lines.iter().map(|l| l.split('|').next().unwrap()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);

        // #1 is outside the group: DG=0, ord=-
        let fields: Vec<&str> = lines[0].split('|').collect();
        assert_eq!(fields[7], "0");
        assert_eq!(fields[6], "-");
        // #3 ranks first in the group: DG=1, ord=0
        let fields: Vec<&str> = lines[2].split('|').collect();
        assert_eq!(fields[7], "1");
        assert_eq!(fields[6], "0");
    }

    #[test]
    fn ordinals_rank_over_the_full_group() {
        // Selection keeps only one group member, but its ordinal still
        // reflects its place among all five.
        let mut elements = Vec::new();
        for i in 0..5u64 {
            elements.push(grouped(
                element(i + 10, "link", 50 - i as i64),
                "rows",
                i as u32,
                100.0 * (i + 1) as f64,
            ));
        }
        let snap = snapshot(elements, Some("rows"));
        let ranks = dominant_rank_map(&snap);
        assert_eq!(ranks.len(), 5);
        assert_eq!(ranks[&10], 0);
        assert_eq!(ranks[&14], 4);
    }

    #[test]
    fn non_interactive_roles_are_skipped() {
        let snap = snapshot(
            vec![element(1, "heading", 100), element(2, "button", 10)],
            None,
        );
        let lines = compact_lines(&snap, &CompactConfig::default());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("2|button|"));
    }

    #[test]
    fn href_shortens_to_domain_or_segment() {
        assert_eq!(shorten_href("https://www.iana.org/domains"), "iana");
        assert_eq!(shorten_href("/docs/getting-started"), "getting-st");
        assert_eq!(shorten_href("https://example.com/"), "example");
    }

    #[test]
    fn doc_y_quantizes_in_200px_buckets() {
        let mut el = element(1, "link", 10);
        el.doc_y = Some(437.0);
        el.bbox = BBox::default();
        el.visual_cues = VisualCues::default();
        let snap = snapshot(vec![el], None);
        let line = &compact_lines(&snap, &CompactConfig::default())[0];
        assert_eq!(line.split('|').nth(5).unwrap(), "2");
    }
}
