//! The five intake paths that produce [`SyncEvent`]s (§4.4): scheduled tick,
//! System H webhook, System V SSE, System B file-watcher with burst
//! coalescing, and the admin manual trigger.
//!
//! The scheduled tick itself is owned by the workflow engine (`workflow.rs`)
//! once a durable runtime is driving the loop; this module covers the other
//! four paths plus the tick's fallback bare-interval form.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;

use triad_core::config::SyncConfig;
use triad_core::types::{EventKind, EventSource, SyncEvent};
use triad_clients::types::{EventPatch, PatchOp, RecordType};

// ---------------------------------------------------------------------------
// Webhook (System H)
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("malformed webhook payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Shape of an H webhook POST body (§4.4.2): a set of affected projects with
/// an optional prefetched issue identifier list.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    projects: Vec<String>,
    #[serde(default)]
    issues: Vec<String>,
}

/// Parse an H webhook body into one [`SyncEvent`] per named project. If
/// specific issue identifiers were prefetched, one event per issue is
/// emitted instead so the controller can route narrowly.
pub fn parse_webhook_payload(body: &[u8]) -> Result<Vec<SyncEvent>, WebhookError> {
    let payload: WebhookPayload = serde_json::from_slice(body)?;

    if payload.issues.is_empty() {
        Ok(payload
            .projects
            .into_iter()
            .map(|project| SyncEvent::new(EventSource::Webhook, EventKind::Update).for_project(project))
            .collect())
    } else {
        let mut events = Vec::with_capacity(payload.issues.len());
        for project in &payload.projects {
            for issue_key in &payload.issues {
                events.push(
                    SyncEvent::new(EventSource::Webhook, EventKind::Update)
                        .for_project(project.clone())
                        .for_issue(issue_key.clone()),
                );
            }
        }
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// SSE (System V)
// ---------------------------------------------------------------------------

/// Convert one System V SSE [`EventPatch`] into a [`SyncEvent`], filtering to
/// the record kinds the controller cares about (§4.4.3): `TASK`
/// add/replace becomes create/update, `DELETED_TASK` becomes a delete.
/// Other record types (`TASK_ATTEMPT`, `EXECUTION_PROCESS`) are ignored.
pub fn sse_patch_to_event(patch: &EventPatch) -> Option<SyncEvent> {
    let kind = match (patch.record_type, patch.op) {
        (RecordType::Task, PatchOp::Add) => EventKind::Create,
        (RecordType::Task, PatchOp::Replace) => EventKind::Update,
        (RecordType::DeletedTask, _) => EventKind::Delete,
        _ => return None,
    };

    let issue_key = patch
        .value
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| path_task_id(&patch.path));

    let mut event = SyncEvent::new(EventSource::Sse, kind);
    if let Some(key) = issue_key {
        event = event.for_issue(key);
    }
    Some(event)
}

/// System V SSE paths look like `/tasks/<uuid>` or `/tasks/<uuid>/status`;
/// fall back to extracting the id from the path when the value body doesn't
/// carry one directly (e.g. a `remove` op with only a path).
fn path_task_id(path: &str) -> Option<String> {
    path.split('/').find(|segment| uuid::Uuid::parse_str(segment).is_ok()).map(str::to_string)
}

// ---------------------------------------------------------------------------
// File watcher burst coalescing (System B)
// ---------------------------------------------------------------------------

/// Outcome of recording one file-change event against the coalescer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalesceDecision {
    /// Below burst threshold: process this change immediately.
    ProcessImmediately,
    /// In burst mode: suppress per-event processing, a flush will follow.
    Suppressed,
}

/// Tracks rapid file-change bursts per watched repo (§4.4.4): `threshold`
/// events within `window` enters burst mode (no per-event processing, a
/// single debounced flush instead); burst mode exits after `idle` with no
/// further events.
pub struct BurstCoalescer {
    threshold: u32,
    window: Duration,
    idle: Duration,
    recent: VecDeque<Instant>,
    in_burst: bool,
    last_event_at: Option<Instant>,
}

impl BurstCoalescer {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            threshold: config.burst_threshold,
            window: Duration::from_millis(config.burst_window_ms),
            idle: Duration::from_millis(config.burst_idle_ms),
            recent: VecDeque::new(),
            in_burst: false,
            last_event_at: None,
        }
    }

    /// Record one file-change event observed at `now`.
    pub fn record_event(&mut self, now: Instant) -> CoalesceDecision {
        self.recent.push_back(now);
        while let Some(&front) = self.recent.front() {
            if now.duration_since(front) > self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.last_event_at = Some(now);

        if self.recent.len() as u32 >= self.threshold {
            self.in_burst = true;
        }

        if self.in_burst {
            CoalesceDecision::Suppressed
        } else {
            CoalesceDecision::ProcessImmediately
        }
    }

    /// Whether burst mode is currently active.
    pub fn in_burst(&self) -> bool {
        self.in_burst
    }

    /// Poll for idle expiry; called on a timer independent of file events.
    /// Returns `true` exactly once, when the idle window elapses and burst
    /// mode should flush and exit.
    pub fn poll_idle(&mut self, now: Instant) -> bool {
        if !self.in_burst {
            return false;
        }
        match self.last_event_at {
            Some(last) if now.duration_since(last) >= self.idle => {
                self.in_burst = false;
                self.recent.clear();
                true
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Manual trigger
// ---------------------------------------------------------------------------

/// Build the event for an admin-initiated `/api/sync/trigger` call.
pub fn manual_trigger_event(project_identifier: Option<String>) -> SyncEvent {
    let event = SyncEvent::new(EventSource::Manual, EventKind::Update);
    match project_identifier {
        Some(p) => event.for_project(p),
        None => event,
    }
}
