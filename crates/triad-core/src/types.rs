//! Core data model: the entities the mapping store (C4) owns, plus the
//! transient event/state types the controller and orchestration layer pass
//! around in memory.
//!
//! Only `Project` and `Issue` are durable. Everything else here is ephemeral
//! and never reaches the database — see [`crate::cache`] for the persisted
//! shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status / priority vocabularies
// ---------------------------------------------------------------------------

/// Normalized status vocabulary used internally once a per-source status has
/// been mapped through [`crate::status_map`]. H, V, and B each have their own
/// native vocabulary; this is the lingua franca the mapping store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    InProgress,
    Blocked,
    Deferred,
    Review,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// A logical grouping of issues, keyed by `project_identifier` (a short
/// uppercase tag like `PROJ`). Upserted the first time System H reports it;
/// never deleted by the core (invariant: Project rows are append-only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_identifier: String,
    pub display_name: String,
    /// A git repo enabling System B sync, if one was parsed out of the H
    /// project description (see orchestration step 3a).
    pub filesystem_path: Option<String>,
    pub v_project_id: Option<Uuid>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub external_agent_id: Option<String>,
}

impl Project {
    pub fn new(project_identifier: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            project_identifier: project_identifier.into(),
            display_name: display_name.into(),
            filesystem_path: None,
            v_project_id: None,
            last_sync_at: None,
            external_agent_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Cross-IDs
// ---------------------------------------------------------------------------

/// The opaque identifiers a specific source system assigns to a logical
/// issue row. `h_id` is really the same string as `h_identifier` (the row
/// key) and is kept here only for symmetry with v/b.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossIds {
    pub h_id: Option<String>,
    pub v_task_id: Option<Uuid>,
    pub b_issue_id: Option<String>,
}

/// Parent pointers on each side. Populated only after the parent has a
/// cross-ID on that same side (§4.8 rule 5) — never pointing at an
/// unresolved row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParentIds {
    pub parent_h_id: Option<String>,
    pub parent_v_id: Option<Uuid>,
    pub parent_b_id: Option<String>,
}

/// Tombstone flags. Sticky: once set, the corresponding source will not be
/// recreated for this issue within the same orchestration cycle (invariant 4).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tombstones {
    pub deleted_from_v: bool,
    pub deleted_from_b: bool,
}

/// Per-source last-observed timestamps and statuses, used for the
/// last-writer-wins rule (§4.8 rule 3) and the monotonic clamp (invariant 3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceObservations {
    pub modified_at_h: Option<DateTime<Utc>>,
    pub modified_at_v: Option<DateTime<Utc>>,
    pub modified_at_b: Option<DateTime<Utc>>,
    pub status_h: Option<String>,
    pub status_v: Option<String>,
    pub status_b: Option<String>,
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

/// A logical issue, keyed by `project_identifier × h_identifier`. This is the
/// row the mapping store owns exclusively (§3 Ownership).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub project_identifier: String,
    pub h_identifier: String,
    pub title: String,
    pub description: String,
    pub status: IssueStatus,
    pub priority: Priority,
    pub cross_ids: CrossIds,
    pub parent_ids: ParentIds,
    pub observations: SourceObservations,
    pub sub_issue_count: u32,
    pub tombstones: Tombstones,
}

impl Issue {
    pub fn new(project_identifier: impl Into<String>, h_identifier: impl Into<String>, title: impl Into<String>) -> Self {
        let h_identifier = h_identifier.into();
        Self {
            project_identifier: project_identifier.into(),
            h_identifier: h_identifier.clone(),
            title: title.into(),
            description: String::new(),
            status: IssueStatus::Open,
            priority: Priority::default(),
            cross_ids: CrossIds {
                h_id: Some(h_identifier),
                ..Default::default()
            },
            parent_ids: ParentIds::default(),
            observations: SourceObservations::default(),
            sub_issue_count: 0,
            tombstones: Tombstones::default(),
        }
    }

    /// Whether this row is eligible for B-side creation this cycle (invariant 4:
    /// a sticky `deleted_from_b` tombstone blocks recreation).
    pub fn b_creation_allowed(&self) -> bool {
        self.cross_ids.b_issue_id.is_none() && !self.tombstones.deleted_from_b
    }

    /// Whether this row is eligible for V-side creation this cycle.
    pub fn v_creation_allowed(&self) -> bool {
        self.cross_ids.v_task_id.is_none() && !self.tombstones.deleted_from_v
    }
}

// ---------------------------------------------------------------------------
// SyncEvent — ephemeral
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Tick,
    Webhook,
    Sse,
    File,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

/// A unit of sync-triggering input. Never persisted — the controller
/// consumes these off a channel and turns them into workflow dispatches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub source: EventSource,
    pub project_identifier: Option<String>,
    pub issue_key: Option<String>,
    pub kind: EventKind,
    pub received_at: DateTime<Utc>,
    /// Carried through every log line and activity this event causes,
    /// so one cycle can be traced end to end.
    pub correlation_id: Uuid,
}

impl SyncEvent {
    pub fn new(source: EventSource, kind: EventKind) -> Self {
        Self {
            source,
            project_identifier: None,
            issue_key: None,
            kind,
            received_at: Utc::now(),
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn for_project(mut self, project_identifier: impl Into<String>) -> Self {
        self.project_identifier = Some(project_identifier.into());
        self
    }

    pub fn for_issue(mut self, issue_key: impl Into<String>) -> Self {
        self.issue_key = Some(issue_key.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Per-issue sync state machine (§4.9)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSyncState {
    Observed,
    Matched,
    Planned,
    Applied,
    Persisted,
    Done,
    Failed,
}

impl IssueSyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IssueSyncState::Done | IssueSyncState::Failed)
    }

    /// Sequential transitions only; `failed` is reachable from any
    /// non-terminal state and never blocks sibling issues.
    pub fn can_transition_to(&self, target: &IssueSyncState) -> bool {
        use IssueSyncState::*;
        if matches!(target, Failed) {
            return !self.is_terminal();
        }
        matches!(
            (self, target),
            (Observed, Matched)
                | (Matched, Planned)
                | (Planned, Applied)
                | (Applied, Persisted)
                | (Persisted, Done)
        )
    }
}

// ---------------------------------------------------------------------------
// Connection state machine (webhook/SSE, §4.9)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Stale,
}

impl ConnectionState {
    pub fn can_transition_to(&self, target: &ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, target),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Stale)
                | (Connected, Disconnected)
                | (Stale, Connecting)
                | (Stale, Disconnected)
        )
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecution — durable, owned by C7
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Orchestration,
    WebhookChange,
    VibeChange,
    BeadsChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Scheduled,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowSignal {
    Cancel,
    Pause,
    Resume,
    ReloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: Uuid,
    pub workflow_type: WorkflowType,
    pub state: WorkflowState,
    pub pending_signals: Vec<WorkflowSignal>,
    /// Approximate count of recorded history events; when this nears the
    /// engine's configured limit the workflow continues-as-new.
    pub history_len: u64,
    pub started_at: DateTime<Utc>,
}

impl WorkflowExecution {
    pub fn new(workflow_type: WorkflowType) -> Self {
        Self {
            workflow_id: Uuid::new_v4(),
            workflow_type,
            state: WorkflowState::Scheduled,
            pending_signals: Vec::new(),
            history_len: 0,
            started_at: Utc::now(),
        }
    }

    /// History-size guard: the `continue_as_new` pattern triggers once a
    /// workflow accumulates this much recorded history.
    pub const CONTINUE_AS_NEW_THRESHOLD: u64 = 10_000;

    pub fn needs_continue_as_new(&self) -> bool {
        self.history_len >= Self::CONTINUE_AS_NEW_THRESHOLD
    }
}

// ---------------------------------------------------------------------------
// ReviewRequest — ephemeral handoff to C10
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub project_identifier: String,
    pub h_identifier: String,
    pub title: String,
    pub entered_review_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_new_seeds_h_cross_id() {
        let issue = Issue::new("PROJ", "PROJ-1", "Implement X");
        assert_eq!(issue.cross_ids.h_id.as_deref(), Some("PROJ-1"));
        assert!(issue.b_creation_allowed());
        assert!(issue.v_creation_allowed());
    }

    #[test]
    fn tombstone_blocks_b_creation() {
        let mut issue = Issue::new("PROJ", "PROJ-1", "Implement X");
        issue.tombstones.deleted_from_b = true;
        assert!(!issue.b_creation_allowed());
    }

    #[test]
    fn issue_sync_state_sequential_transitions() {
        use IssueSyncState::*;
        assert!(Observed.can_transition_to(&Matched));
        assert!(Matched.can_transition_to(&Planned));
        assert!(!Observed.can_transition_to(&Planned));
        assert!(!Done.can_transition_to(&Matched));
    }

    #[test]
    fn issue_sync_state_failed_reachable_from_any_nonterminal() {
        use IssueSyncState::*;
        assert!(Observed.can_transition_to(&Failed));
        assert!(Planned.can_transition_to(&Failed));
        assert!(!Done.can_transition_to(&Failed));
    }

    #[test]
    fn connection_state_stale_then_reconnect() {
        use ConnectionState::*;
        assert!(Connected.can_transition_to(&Stale));
        assert!(Stale.can_transition_to(&Connecting));
        assert!(!Stale.can_transition_to(&Connected));
    }

    #[test]
    fn workflow_continue_as_new_threshold() {
        let mut wf = WorkflowExecution::new(WorkflowType::Orchestration);
        assert!(!wf.needs_continue_as_new());
        wf.history_len = WorkflowExecution::CONTINUE_AS_NEW_THRESHOLD;
        assert!(wf.needs_continue_as_new());
    }

    #[test]
    fn sync_event_builder() {
        let ev = SyncEvent::new(EventSource::Webhook, EventKind::Update)
            .for_project("PROJ")
            .for_issue("PROJ-1");
        assert_eq!(ev.project_identifier.as_deref(), Some("PROJ"));
        assert_eq!(ev.issue_key.as_deref(), Some("PROJ-1"));
    }
}
