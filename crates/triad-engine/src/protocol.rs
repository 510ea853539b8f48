//! Messages re-broadcast over the admin surface's `/api/events` SSE endpoint
//! (§6) and carried on the internal [`event_bus`](crate::event_bus).
//!
//! Every [`SyncEvent`](triad_core::types::SyncEvent) that enters the
//! controller, and every notable outcome of an orchestration pass, is wrapped
//! in a [`BridgeMessage`] and published so connected admin UIs see sync
//! activity live.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum BridgeMessage {
    /// A sync orchestration pass started for a project (or all projects).
    SyncStarted {
        correlation_id: Uuid,
        project_identifier: Option<String>,
    },
    /// A sync orchestration pass finished.
    SyncFinished {
        correlation_id: Uuid,
        project_identifier: Option<String>,
        issues_synced: u64,
        errors: u64,
        duration_ms: u64,
    },
    /// A single issue was created, updated, or deleted on a target system.
    IssueChanged {
        project_identifier: String,
        h_identifier: String,
        target_system: String,
        kind: String,
    },
    /// An issue entered a "needs review" status and a [`ReviewRequest`]
    /// (§3) was handed off.
    ReviewRequested {
        project_identifier: String,
        h_identifier: String,
        status: String,
    },
    /// A recoverable error occurred during a sync pass; surfaced for
    /// observability, not a hard failure.
    SyncError {
        correlation_id: Uuid,
        project_identifier: Option<String>,
        message: String,
    },
    /// Config was reloaded via `PUT /api/config`.
    ConfigReloaded,
}
