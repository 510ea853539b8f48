//! Conflict resolution rules applied inside any `syncXToY` activity (§4.8).
//!
//! These are pure functions over [`Issue`] rows — no I/O, no mapping-store
//! access — so the orchestration activities (`activities.rs`) can unit test
//! the rules in isolation from the clients that apply them.

use chrono::{DateTime, Utc};
use triad_core::status_map::{b_status_forwardable, BStatus};
use triad_core::types::{Issue, IssueStatus};

/// The three systems a field value can originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSide {
    H,
    V,
    B,
}

/// Rule 1 — closed-wins precedence: if B's last-observed status is
/// `closed`, the effective status for every other side is `Closed`
/// regardless of a stale V or H observation this cycle. Prevents an
/// SSE-delivered "revert to in-progress" from flickering after a batch close.
pub fn effective_status(issue: &Issue) -> IssueStatus {
    if let Some(b_status) = issue.observations.status_b.as_deref() {
        if BStatus::parse(b_status) == Some(BStatus::Closed) {
            return IssueStatus::Closed;
        }
    }
    issue.status
}

/// Rule 2 — status domain restriction from B→H: only `in_progress`,
/// `closed`, `blocked`, `deferred` are forwarded; bare `open` is the
/// default and would force unnecessary churn on every tick.
pub fn b_status_forwardable_to_h(b_status: &str) -> bool {
    BStatus::parse(b_status).map(b_status_forwardable).unwrap_or(false)
}

/// Rule 3 — last-writer-wins by `modified_at` per side, H wins ties.
/// Returns which side's value should be taken for a field that both `left`
/// and `right` observed changing within the same cycle.
pub fn last_writer_wins(
    left: SyncSide,
    left_modified_at: DateTime<Utc>,
    right: SyncSide,
    right_modified_at: DateTime<Utc>,
) -> SyncSide {
    use std::cmp::Ordering;
    match left_modified_at.cmp(&right_modified_at) {
        Ordering::Greater => left,
        Ordering::Less => right,
        Ordering::Equal => {
            if left == SyncSide::H {
                left
            } else if right == SyncSide::H {
                right
            } else {
                left
            }
        }
    }
}

/// Rule 3 applied directly to an [`Issue`]'s stored observations, comparing
/// H against a given other side.
pub fn winning_side_vs_h(issue: &Issue, other: SyncSide) -> SyncSide {
    let h_ts = issue.observations.modified_at_h;
    let other_ts = match other {
        SyncSide::V => issue.observations.modified_at_v,
        SyncSide::B => issue.observations.modified_at_b,
        SyncSide::H => return SyncSide::H,
    };
    match (h_ts, other_ts) {
        (Some(h), Some(o)) => last_writer_wins(SyncSide::H, h, other, o),
        (Some(_), None) => SyncSide::H,
        (None, Some(_)) => other,
        (None, None) => SyncSide::H,
    }
}

/// Rule 4 — title changes propagate in the direction of the change source
/// without conflict resolution; titles are non-contested.
pub fn should_propagate_title(_issue: &Issue) -> bool {
    true
}

/// Rule 5 — a parent pointer is only propagated to a target system once the
/// parent issue itself already has a cross-ID on that side. Call this with
/// the *parent's* cross-ID on the target side (looked up via the dedupe
/// index before this issue is synced, honoring topological order).
pub fn parent_propagation_allowed(parent_cross_id_on_target: Option<&str>) -> bool {
    parent_cross_id_on_target.is_some()
}

/// Rule 6 — tombstones block creation on that side for the rest of the
/// cycle; they are cleared only when the row is re-observed on that source
/// (handled by the mapping store's merge, not here).
pub fn creation_blocked(issue: &Issue, target: SyncSide) -> bool {
    match target {
        SyncSide::V => issue.tombstones.deleted_from_v,
        SyncSide::B => issue.tombstones.deleted_from_b,
        SyncSide::H => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use triad_core::types::Project;

    fn base_issue() -> Issue {
        let project = Project::new("PROJ", "Project");
        Issue::new(project.project_identifier, "PROJ-1", "Some issue")
    }

    #[test]
    fn closed_wins_over_stale_other_sides() {
        let mut issue = base_issue();
        issue.status = IssueStatus::InProgress;
        issue.observations.status_b = Some("closed".into());
        assert_eq!(effective_status(&issue), IssueStatus::Closed);
    }

    #[test]
    fn non_closed_b_status_does_not_override() {
        let mut issue = base_issue();
        issue.status = IssueStatus::InProgress;
        issue.observations.status_b = Some("blocked".into());
        assert_eq!(effective_status(&issue), IssueStatus::InProgress);
    }

    #[test]
    fn bare_open_is_not_forwarded() {
        assert!(!b_status_forwardable_to_h("open"));
    }

    #[test]
    fn in_progress_closed_blocked_deferred_are_forwarded() {
        assert!(b_status_forwardable_to_h("in_progress"));
        assert!(b_status_forwardable_to_h("closed"));
        assert!(b_status_forwardable_to_h("blocked"));
        assert!(b_status_forwardable_to_h("deferred"));
    }

    #[test]
    fn unknown_status_is_not_forwarded() {
        assert!(!b_status_forwardable_to_h("not-a-real-status"));
    }

    #[test]
    fn last_writer_wins_picks_the_later_timestamp() {
        let now = Utc::now();
        let earlier = now - ChronoDuration::minutes(5);
        assert_eq!(last_writer_wins(SyncSide::H, earlier, SyncSide::B, now), SyncSide::B);
        assert_eq!(last_writer_wins(SyncSide::H, now, SyncSide::B, earlier), SyncSide::H);
    }

    #[test]
    fn last_writer_wins_ties_favor_h() {
        let now = Utc::now();
        assert_eq!(last_writer_wins(SyncSide::B, now, SyncSide::H, now), SyncSide::H);
        assert_eq!(last_writer_wins(SyncSide::H, now, SyncSide::V, now), SyncSide::H);
    }

    #[test]
    fn winning_side_vs_h_defaults_to_h_when_other_side_unobserved() {
        let mut issue = base_issue();
        issue.observations.modified_at_h = Some(Utc::now());
        assert_eq!(winning_side_vs_h(&issue, SyncSide::V), SyncSide::H);
    }

    #[test]
    fn winning_side_vs_h_picks_other_when_h_unobserved() {
        let mut issue = base_issue();
        issue.observations.modified_at_b = Some(Utc::now());
        assert_eq!(winning_side_vs_h(&issue, SyncSide::B), SyncSide::B);
    }

    #[test]
    fn title_changes_never_conflict() {
        assert!(should_propagate_title(&base_issue()));
    }

    #[test]
    fn parent_propagation_requires_mapped_target() {
        assert!(!parent_propagation_allowed(None));
        assert!(parent_propagation_allowed(Some("v-uuid-here")));
    }

    #[test]
    fn tombstones_block_creation_on_that_side_only() {
        let mut issue = base_issue();
        issue.tombstones.deleted_from_v = true;
        assert!(creation_blocked(&issue, SyncSide::V));
        assert!(!creation_blocked(&issue, SyncSide::B));
        assert!(!creation_blocked(&issue, SyncSide::H));
    }
}
