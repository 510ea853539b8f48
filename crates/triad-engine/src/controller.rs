//! Sync controller (C6): per-project mutex, debounce, timeout, dry-run, and
//! event-to-workflow-type routing (§4.5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock, Semaphore};
use tracing::debug;

use triad_core::config::Config;
use triad_core::types::{EventSource, SyncEvent, WorkflowType};

/// Routing table (§4.5): which workflow type an event dispatches, per its source.
pub fn route(event: &SyncEvent) -> WorkflowType {
    match event.source {
        EventSource::Tick | EventSource::Manual => WorkflowType::Orchestration,
        EventSource::Webhook => WorkflowType::WebhookChange,
        EventSource::Sse => WorkflowType::VibeChange,
        EventSource::File => WorkflowType::BeadsChange,
    }
}

/// One project's exclusive-access lock, held for the duration of an
/// orchestration pass so overlapping triggers for the same project serialize.
pub struct ProjectPermit {
    _project_guard: OwnedMutexGuard<()>,
    _worker_permit: tokio::sync::OwnedSemaphorePermit,
}

pub struct SyncController {
    config: Arc<RwLock<Config>>,
    project_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    worker_permits: Arc<Semaphore>,
    debounce_generations: DashMap<String, Arc<AtomicU64>>,
    dispatch_tx: flume::Sender<SyncEvent>,
}

impl SyncController {
    pub fn new(config: Config) -> (Self, flume::Receiver<SyncEvent>) {
        let max_workers = config.sync.max_workers.max(1) as usize;
        let (tx, rx) = flume::unbounded();
        let controller = Self {
            config: Arc::new(RwLock::new(config)),
            project_locks: DashMap::new(),
            worker_permits: Arc::new(Semaphore::new(max_workers)),
            debounce_generations: DashMap::new(),
            dispatch_tx: tx,
        };
        (controller, rx)
    }

    pub async fn is_dry_run(&self) -> bool {
        self.config.read().await.sync.dry_run
    }

    pub async fn debounce_duration(&self) -> Duration {
        Duration::from_millis(self.config.read().await.sync.debounce_ms)
    }

    /// Hard orchestration timeout per §4.5: default 2×T_tick.
    pub async fn orchestration_timeout(&self) -> Duration {
        Duration::from_millis(self.config.read().await.sync.sync_interval_ms * 2)
    }

    /// Atomically swap the active configuration between orchestrations
    /// (§4.5 "Config reload"). The worker semaphore's total permit count is
    /// intentionally left alone — resizing a live `Semaphore` is not
    /// supported, so a changed `max_workers` takes effect on next restart.
    pub async fn reload_config(&self, new_config: Config) {
        let mut guard = self.config.write().await;
        *guard = new_config;
    }

    pub async fn current_config(&self) -> Config {
        self.config.read().await.clone()
    }

    fn debounce_key(event: &SyncEvent) -> String {
        let project = event.project_identifier.as_deref().unwrap_or("*");
        format!("{project}:{:?}", route(event))
    }

    /// Accept an incoming event and debounce it: repeated events for the
    /// same `(project, workflow type)` arriving within the configured
    /// window collapse into a single dispatch of the *latest* event.
    pub async fn handle_event(self: &Arc<Self>, event: SyncEvent) {
        let key = Self::debounce_key(&event);
        let generation = self
            .debounce_generations
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone();
        let my_generation = generation.fetch_add(1, Ordering::SeqCst) + 1;

        let debounce = self.debounce_duration().await;
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if generation.load(Ordering::SeqCst) == my_generation {
                debug!(correlation_id = %event.correlation_id, key = %key, "debounce window elapsed, dispatching");
                let _ = controller.dispatch_tx.send(event);
            } else {
                debug!(key = %key, "superseded by a later event within the debounce window");
            }
        });
    }

    /// Acquire the per-project mutex plus a global worker slot. Held by the
    /// caller for the duration of one orchestration pass.
    pub async fn acquire_project(&self, project_identifier: &str) -> ProjectPermit {
        let lock = self
            .project_locks
            .entry(project_identifier.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let project_guard = lock.lock_owned().await;
        let worker_permit = Arc::clone(&self.worker_permits).acquire_owned().await.expect("worker semaphore never closes");
        ProjectPermit { _project_guard: project_guard, _worker_permit: worker_permit }
    }
}
