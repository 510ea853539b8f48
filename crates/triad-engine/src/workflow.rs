//! Durable workflow engine contracts (C7, §4.6): scheduled orchestration
//! with skip-on-overlap and pause-on-consecutive-failure, `continue_as_new`
//! history truncation, signal handling, and the retryable/non-retryable
//! activity retry policy.
//!
//! This is a single-process task-queue-of-one implementation of the
//! contract — there is no external durable-execution server in scope (§1
//! lists the durable workflow runtime as something this core *implements*,
//! not something it calls out to) — but the state machine, signal set, and
//! continue-as-new threshold are exactly the ones [`WorkflowExecution`]
//! already models.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use triad_clients::error::ErrorKind;
use triad_core::types::{WorkflowExecution, WorkflowSignal, WorkflowState, WorkflowType};

/// A workflow pauses itself after this many consecutive failed runs,
/// requiring an explicit `resume` signal (§4.6 "paused on consecutive failure").
pub const PAUSE_AFTER_CONSECUTIVE_FAILURES: u32 = 3;

// ---------------------------------------------------------------------------
// Activity error taxonomy and retry policy
// ---------------------------------------------------------------------------

/// The two-variant failure classification every activity collapses its
/// underlying client error into (§4.6, §7).
#[derive(Debug, Clone, Error)]
pub enum ActivityError {
    #[error("retryable: {0}")]
    Retryable(String),
    #[error("non-retryable: {0}")]
    NonRetryable(String),
}

impl ActivityError {
    /// Classify a client [`ErrorKind`] into the activity boundary's
    /// two-variant taxonomy: validation/not-found/authn/forbidden are
    /// non-retryable, transient/conflict are retryable.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        if kind.is_retryable() {
            ActivityError::Retryable(message.into())
        } else {
            ActivityError::NonRetryable(message.into())
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ActivityError::Retryable(_))
    }
}

/// Per-activity retry policy: default max 5 attempts, exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_millis(200) }
    }
}

/// Run `f` under `policy`, retrying only `ActivityError::Retryable` failures
/// with exponential backoff. A `NonRetryable` failure returns immediately.
pub async fn execute_activity<F, Fut, T>(policy: &RetryPolicy, mut f: F) -> Result<T, ActivityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ActivityError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(ActivityError::NonRetryable(msg)) => return Err(ActivityError::NonRetryable(msg)),
            Err(ActivityError::Retryable(msg)) => {
                if attempt >= policy.max_attempts {
                    return Err(ActivityError::Retryable(msg));
                }
                let delay = policy.base_delay * 2u32.pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowHandle — lifecycle, signals, continue-as-new
// ---------------------------------------------------------------------------

/// Minimal state a workflow carries across a `continue_as_new` boundary
/// (§4.6: "carrying only the minimum state").
#[derive(Debug, Clone, Default)]
pub struct CarriedState {
    pub last_sync_cursor: Option<DateTime<Utc>>,
    pub config_version: u64,
}

/// A live, signalable workflow instance.
pub struct WorkflowHandle {
    execution: Arc<RwLock<WorkflowExecution>>,
    carried: Arc<RwLock<CarriedState>>,
    signal_tx: flume::Sender<WorkflowSignal>,
    signal_rx: flume::Receiver<WorkflowSignal>,
    consecutive_failures: Arc<AtomicU32>,
}

impl WorkflowHandle {
    pub fn new(workflow_type: WorkflowType) -> Self {
        let (signal_tx, signal_rx) = flume::unbounded();
        Self {
            execution: Arc::new(RwLock::new(WorkflowExecution::new(workflow_type))),
            carried: Arc::new(RwLock::new(CarriedState::default())),
            signal_tx,
            signal_rx,
            consecutive_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn workflow_id_sync(&self) -> Uuid {
        // Safe best-effort id for log lines; callers needing the
        // authoritative value should read `state()`.
        self.execution.try_read().map(|e| e.workflow_id).unwrap_or_default()
    }

    pub async fn state(&self) -> WorkflowState {
        self.execution.read().await.state
    }

    pub async fn set_state(&self, state: WorkflowState) {
        self.execution.write().await.state = state;
    }

    /// Enqueue a signal (§4.6). Delivery is async — the running workflow
    /// observes it the next time it calls [`drain_signals`].
    pub fn signal(&self, signal: WorkflowSignal) {
        let _ = self.signal_tx.send(signal);
    }

    /// Drain and apply all pending signals, returning them for logging.
    /// `cancel` and `pause`/`resume` transition state directly here;
    /// `reload_config` is returned for the caller to act on (it touches the
    /// controller's config, not the workflow's own state).
    pub async fn drain_signals(&self) -> Vec<WorkflowSignal> {
        let mut applied = Vec::new();
        while let Ok(signal) = self.signal_rx.try_recv() {
            match signal {
                WorkflowSignal::Cancel => self.set_state(WorkflowState::Cancelled).await,
                WorkflowSignal::Pause => self.set_state(WorkflowState::Paused).await,
                WorkflowSignal::Resume => {
                    if self.state().await == WorkflowState::Paused {
                        self.consecutive_failures.store(0, Ordering::SeqCst);
                        self.set_state(WorkflowState::Scheduled).await;
                    }
                }
                WorkflowSignal::ReloadConfig => {}
            }
            applied.push(signal);
        }
        applied
    }

    /// Record `n` history events against the running execution. Returns
    /// `true` if the history-size guard tripped and a `continue_as_new`
    /// was performed (new `workflow_id`, history reset, carried state kept).
    pub async fn record_history_events(&self, n: u64) -> bool {
        let mut exec = self.execution.write().await;
        exec.history_len += n;
        if exec.needs_continue_as_new() {
            info!(old_workflow_id = %exec.workflow_id, "continuing workflow as new execution");
            exec.workflow_id = Uuid::new_v4();
            exec.history_len = 0;
            true
        } else {
            false
        }
    }

    pub async fn carried_state(&self) -> CarriedState {
        self.carried.read().await.clone()
    }

    pub async fn set_carried_state(&self, state: CarriedState) {
        *self.carried.write().await = state;
    }

    /// Record a successful run, resetting the consecutive-failure counter.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Record a failed run. Returns `true` if this pushed the workflow into
    /// `Paused` (§4.6 "paused on consecutive failure").
    pub async fn record_failure(&self) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= PAUSE_AFTER_CONSECUTIVE_FAILURES {
            warn!(failures, "workflow paused after consecutive failures");
            self.set_state(WorkflowState::Paused).await;
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// ScheduledWorkflowRunner — overlap policy = skip
// ---------------------------------------------------------------------------

/// Drives one [`WorkflowHandle`] on a fixed interval. Overlap policy is
/// `skip`: if the previous run is still `Running` when the next tick
/// arrives, the tick is dropped rather than queued (§4.6).
pub struct ScheduledWorkflowRunner {
    pub handle: Arc<WorkflowHandle>,
    pub interval: Duration,
}

impl ScheduledWorkflowRunner {
    pub fn new(handle: Arc<WorkflowHandle>, interval: Duration) -> Self {
        Self { handle, interval }
    }

    /// Run one scheduled tick, invoking `run` only if not already running
    /// and not paused. `run` should itself call [`execute_activity`] for
    /// each underlying activity.
    pub async fn tick_once<F, Fut>(&self, run: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ActivityError>>,
    {
        self.handle.drain_signals().await;

        match self.handle.state().await {
            WorkflowState::Running => {
                warn!("previous orchestration still running, skipping this tick (overlap policy = skip)");
                return;
            }
            WorkflowState::Paused => {
                warn!("workflow paused after consecutive failures, skipping tick until resumed");
                return;
            }
            WorkflowState::Cancelled => return,
            _ => {}
        }

        self.handle.set_state(WorkflowState::Running).await;
        match run().await {
            Ok(()) => {
                self.handle.record_success();
                if self.handle.state().await == WorkflowState::Running {
                    self.handle.set_state(WorkflowState::Completed).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "orchestration run failed");
                let paused = self.handle.record_failure().await;
                if !paused && self.handle.state().await == WorkflowState::Running {
                    self.handle.set_state(WorkflowState::Failed).await;
                }
            }
        }
    }
}
