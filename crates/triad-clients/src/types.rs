//! Cross-client wire types shared by the System H, V, and B clients.
//!
//! Each client speaks its own wire format internally (H/V are JSON REST, B is
//! JSONL-over-CLI) but hands back these common shapes so `triad-engine`'s
//! activities don't need to know which backend an [`ClientIssue`] came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A project as reported by an upstream client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProject {
    pub identifier: String,
    pub name: String,
    pub description: Option<String>,
}

/// An issue as reported by an upstream client, normalized to a common shape.
///
/// `key` is the client-native identifier: an `H_identifier` like `PROJ-123`
/// for System H, a UUID string for System V, a `bd-NNN` style ID for System B.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIssue {
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: Option<String>,
    pub labels: Vec<String>,
    pub parent_key: Option<String>,
    pub modified_at: DateTime<Utc>,
}

/// Payload for creating a new issue on any of the three systems.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub labels: Vec<String>,
    pub parent_key: Option<String>,
}

/// A sparse field-level patch. `None` means "leave unchanged" — this is why
/// it is not simply a partial [`ClientIssue`]; fields must be distinguishable
/// from "no value" vs "clear the value", which only matters for
/// `description`, so that one is double-`Option`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssuePatch {
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    pub status: Option<String>,
    pub priority: Option<String>,
}

impl IssuePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
    }
}

/// Bulk fetch request used by `fetch_bulk_issues` (§4.7 step 2).
#[derive(Debug, Clone, Default)]
pub struct BulkListRequest {
    pub projects: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// The inner record kind carried by a System V `EventPatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Task,
    TaskAttempt,
    ExecutionProcess,
    DeletedTask,
}

/// The JSON-Patch-style operation carried by a System V SSE event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// One event delivered over System V's SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPatch {
    pub op: PatchOp,
    pub path: String,
    #[serde(default)]
    pub value: serde_json::Value,
    pub record_type: RecordType,
}
