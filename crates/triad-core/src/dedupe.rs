//! Per-project dedupe index (§4.3): a short-TTL derived cache built from a
//! [`MappingStore`](crate::mapping_store::MappingStore) scan, consulted
//! before any upstream title search so a positive hit never costs a
//! network call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::Issue;

/// Bracketed tag prefixes stripped by [`normalize`]. Fixed and versioned per
/// §4.3 — extending this list is a breaking normalization change.
const STRIPPED_PREFIXES: &[&str] = &[
    "[P0]", "[P1]", "[P2]", "[P3]", "[P4]", "[TIER 0]", "[TIER 1]", "[TIER 2]", "[TIER 3]",
    "[TIER 4]", "[ACTION]", "[BUG]", "[FIXED]", "[EPIC]", "[WIP]",
];

/// Lowercase, trim, and strip one leading well-known bracketed tag (repeated
/// until none match, since titles sometimes stack tags: `[P0][BUG] ...`).
pub fn normalize(title: &str) -> String {
    let mut s = title.trim().to_string();
    loop {
        let lower = s.to_ascii_lowercase();
        let stripped = STRIPPED_PREFIXES.iter().find_map(|prefix| {
            lower.starts_with(&prefix.to_ascii_lowercase()).then(|| s[prefix.len()..].trim_start().to_string())
        });
        match stripped {
            Some(next) if next.len() != s.len() => s = next,
            _ => break,
        }
    }
    // `[PERF...]` is a prefix-pattern, not a fixed literal: strip any
    // `[PERF` ... `]` bracket group at the start.
    let lower = s.to_ascii_lowercase();
    if lower.starts_with("[perf") {
        if let Some(end) = s.find(']') {
            s = s[end + 1..].trim_start().to_string();
        }
    }
    s.trim().to_ascii_lowercase()
}

/// Per-project index of `(normalized title, cross-system ID) → canonical
/// Issue`, rebuilt from the mapping store on expiry.
pub struct DedupeIndex {
    by_b_id: HashMap<String, Issue>,
    by_h_identifier: HashMap<String, Issue>,
    by_normalized_title: HashMap<String, Issue>,
    built_at: Instant,
    ttl: Duration,
}

impl DedupeIndex {
    /// Build a fresh index from a project's current issue rows.
    pub fn build(issues: Vec<Issue>, ttl: Duration) -> Self {
        let mut by_b_id = HashMap::new();
        let mut by_h_identifier = HashMap::new();
        let mut by_normalized_title = HashMap::new();

        for issue in issues {
            if let Some(b_id) = &issue.cross_ids.b_issue_id {
                by_b_id.insert(b_id.clone(), issue.clone());
            }
            by_h_identifier.insert(issue.h_identifier.clone(), issue.clone());
            by_normalized_title.insert(normalize(&issue.title), issue.clone());
        }

        Self { by_b_id, by_h_identifier, by_normalized_title, built_at: Instant::now(), ttl }
    }

    /// Whether this index is still within its TTL window.
    pub fn is_fresh(&self) -> bool {
        self.built_at.elapsed() < self.ttl
    }

    pub fn by_b_id(&self, b_issue_id: &str) -> Option<&Issue> {
        self.by_b_id.get(b_issue_id)
    }

    pub fn by_h_identifier(&self, h_identifier: &str) -> Option<&Issue> {
        self.by_h_identifier.get(h_identifier)
    }

    /// Mapping-first title lookup: normalizes `title` before probing the
    /// index, so callers never need to call [`normalize`] themselves.
    pub fn by_title(&self, title: &str) -> Option<&Issue> {
        self.by_normalized_title.get(&normalize(title))
    }

    pub fn len(&self) -> usize {
        self.by_h_identifier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_h_identifier.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Project;

    fn issue(h_identifier: &str, title: &str) -> Issue {
        let project = Project::new("PROJ", "Project");
        let mut issue = Issue::new(project.project_identifier.clone(), h_identifier, title);
        issue.cross_ids.b_issue_id = Some(format!("bd-{h_identifier}"));
        issue
    }

    #[test]
    fn normalize_strips_priority_tags() {
        assert_eq!(normalize("[P0] Fix the outage"), "fix the outage");
        assert_eq!(normalize("[P4] Minor cleanup"), "minor cleanup");
    }

    #[test]
    fn normalize_strips_tier_and_named_tags() {
        assert_eq!(normalize("[TIER 2] Improve latency"), "improve latency");
        assert_eq!(normalize("[BUG] Crash on startup"), "crash on startup");
        assert_eq!(normalize("[EPIC] Billing rework"), "billing rework");
        assert_eq!(normalize("[WIP] Draft design"), "draft design");
        assert_eq!(normalize("[FIXED] Stale cache"), "stale cache");
        assert_eq!(normalize("[ACTION] Needs owner"), "needs owner");
    }

    #[test]
    fn normalize_strips_perf_prefix_pattern() {
        assert_eq!(normalize("[PERF: query planner] Speed up joins"), "speed up joins");
    }

    #[test]
    fn normalize_strips_stacked_tags() {
        assert_eq!(normalize("[P0][BUG] Data loss"), "data loss");
    }

    #[test]
    fn normalize_lowercases_and_trims() {
        assert_eq!(normalize("  Some Title  "), "some title");
    }

    #[test]
    fn normalize_leaves_unbracketed_titles_alone() {
        assert_eq!(normalize("Ordinary title"), "ordinary title");
    }

    #[test]
    fn build_indexes_by_all_three_keys() {
        let issues = vec![issue("PROJ-1", "[P0] Fix outage"), issue("PROJ-2", "Second issue")];
        let index = DedupeIndex::build(issues, Duration::from_secs(15));

        assert!(index.by_h_identifier("PROJ-1").is_some());
        assert!(index.by_b_id("bd-PROJ-1").is_some());
        assert_eq!(index.by_title("[P0] Fix outage").unwrap().h_identifier, "PROJ-1");
        assert_eq!(index.by_title("fix outage").unwrap().h_identifier, "PROJ-1");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn is_fresh_reports_ttl_expiry() {
        let index = DedupeIndex::build(vec![], Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!index.is_fresh());
    }

    #[test]
    fn empty_index_reports_empty() {
        let index = DedupeIndex::build(vec![], Duration::from_secs(15));
        assert!(index.is_empty());
    }
}
