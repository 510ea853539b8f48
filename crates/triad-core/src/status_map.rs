//! Status/priority mapper (C2): bijective-ish translation tables between the
//! three systems' native vocabularies and the normalized [`IssueStatus`]/
//! [`Priority`] the mapping store persists.
//!
//! None of these mappings are perfectly bijective — H's `Done` and `Closed`
//! collapse to the same normalized status, for instance — so translating
//! `normalized → native` always picks the canonical representative for that
//! system rather than trying to invert history.

use crate::types::{IssueStatus, Priority};

/// Translate a System H status string (e.g. `"Done"`, `"In Progress"`) into
/// the normalized vocabulary. Unrecognized strings map to `Open` rather than
/// failing — an unknown status should never abort a sync cycle.
pub fn h_status_to_normalized(h_status: &str) -> IssueStatus {
    match h_status.to_ascii_lowercase().as_str() {
        "done" | "closed" => IssueStatus::Closed,
        "in progress" | "in_progress" | "started" => IssueStatus::InProgress,
        "blocked" => IssueStatus::Blocked,
        "deferred" | "backlog later" => IssueStatus::Deferred,
        "in review" | "review" => IssueStatus::Review,
        _ => IssueStatus::Open,
    }
}

/// Canonical H status string for a normalized status, used when writing.
pub fn normalized_to_h_status(status: IssueStatus) -> &'static str {
    match status {
        IssueStatus::Open => "Todo",
        IssueStatus::InProgress => "In Progress",
        IssueStatus::Blocked => "Blocked",
        IssueStatus::Deferred => "Backlog",
        IssueStatus::Review => "In Review",
        IssueStatus::Closed => "Done",
    }
}

/// Translate a System V kanban column/status into the normalized vocabulary.
pub fn v_status_to_normalized(v_status: &str) -> IssueStatus {
    match v_status.to_ascii_lowercase().as_str() {
        "done" | "inreview" | "in-review" => {
            if v_status.eq_ignore_ascii_case("done") {
                IssueStatus::Closed
            } else {
                IssueStatus::Review
            }
        }
        "inprogress" | "in-progress" => IssueStatus::InProgress,
        "todo" => IssueStatus::Open,
        _ => IssueStatus::Open,
    }
}

pub fn normalized_to_v_status(status: IssueStatus) -> &'static str {
    match status {
        IssueStatus::Open => "todo",
        IssueStatus::InProgress => "inprogress",
        IssueStatus::Blocked => "inprogress",
        IssueStatus::Deferred => "todo",
        IssueStatus::Review => "inreview",
        IssueStatus::Closed => "done",
    }
}

/// System B's status vocabulary (the bd CLI's own state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BStatus {
    Open,
    InProgress,
    Closed,
    Blocked,
    Deferred,
}

impl BStatus {
    pub fn parse(raw: &str) -> Option<BStatus> {
        match raw.to_ascii_lowercase().as_str() {
            "open" => Some(BStatus::Open),
            "in_progress" | "in-progress" => Some(BStatus::InProgress),
            "closed" => Some(BStatus::Closed),
            "blocked" => Some(BStatus::Blocked),
            "deferred" => Some(BStatus::Deferred),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BStatus::Open => "open",
            BStatus::InProgress => "in_progress",
            BStatus::Closed => "closed",
            BStatus::Blocked => "blocked",
            BStatus::Deferred => "deferred",
        }
    }
}

/// §4.8 rule 2: only these B statuses are forwarded to H. Bare `open` is the
/// default state and forwarding it would force unnecessary churn on every
/// cycle.
pub const FORWARD_STATUSES: [BStatus; 4] = [BStatus::InProgress, BStatus::Closed, BStatus::Blocked, BStatus::Deferred];

pub fn b_status_forwardable(status: BStatus) -> bool {
    FORWARD_STATUSES.contains(&status)
}

pub fn b_status_to_normalized(status: BStatus) -> IssueStatus {
    match status {
        BStatus::Open => IssueStatus::Open,
        BStatus::InProgress => IssueStatus::InProgress,
        BStatus::Closed => IssueStatus::Closed,
        BStatus::Blocked => IssueStatus::Blocked,
        BStatus::Deferred => IssueStatus::Deferred,
    }
}

pub fn normalized_to_b_status(status: IssueStatus) -> BStatus {
    match status {
        IssueStatus::Open => BStatus::Open,
        IssueStatus::InProgress => BStatus::InProgress,
        IssueStatus::Blocked => BStatus::Blocked,
        IssueStatus::Deferred => BStatus::Deferred,
        IssueStatus::Review => BStatus::InProgress,
        IssueStatus::Closed => BStatus::Closed,
    }
}

/// H priority strings, highest first.
pub fn h_priority_to_normalized(raw: &str) -> Priority {
    match raw.to_ascii_lowercase().as_str() {
        "urgent" => Priority::Urgent,
        "high" => Priority::High,
        "low" => Priority::Low,
        _ => Priority::Medium,
    }
}

pub fn normalized_to_h_priority(priority: Priority) -> &'static str {
    match priority {
        Priority::Urgent => "Urgent",
        Priority::High => "High",
        Priority::Medium => "Medium",
        Priority::Low => "Low",
    }
}
