//! Builds and runs the daemon process: clients, mapping store, controller,
//! workflow handle, event sources, and the admin HTTP surface, all wired
//! together and driven to completion (or cooperative shutdown).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use triad_clients::beads::resolve_repo_path_from_description;
use triad_clients::huly::HulyClient;
use triad_clients::vibe::VibeClient;
use triad_core::config::Config;
use triad_core::dedupe::DedupeIndex;
use triad_core::file_watcher::{FileWatcher, FileWatcherConfig};
use triad_core::mapping_store::MappingStore;
use triad_core::types::{EventKind, EventSource, Project, SyncEvent, WorkflowType};
use triad_engine::activities::{self, CycleClients};
use triad_engine::admin::{self, AdminState};
use triad_engine::controller::SyncController;
use triad_engine::event_sources::{sse_patch_to_event, BurstCoalescer, CoalesceDecision};
use triad_engine::protocol::BridgeMessage;
use triad_engine::workflow::{execute_activity, ActivityError, RetryPolicy, ScheduledWorkflowRunner, WorkflowHandle};
use triad_engine::EventBus;
use triad_resilience::shutdown::ShutdownSignal;

/// Everything one running daemon process needs. Built once at startup by
/// [`build`], then handed to [`run`] to actually drive the service loops.
pub struct ServiceContext {
    pub config: Config,
    pub store: Arc<MappingStore>,
    pub clients: Arc<CycleClients>,
    pub controller: Arc<SyncController>,
    pub dispatch_rx: flume::Receiver<SyncEvent>,
    pub workflow: Arc<WorkflowHandle>,
    pub event_bus: EventBus,
    pub admin_state: Arc<AdminState>,
}

/// Construct every long-lived component from `config`, without starting any
/// background loops. Split from [`run`] so tests can build a context without
/// binding sockets or spawning tasks.
pub async fn build(config: Config) -> Result<ServiceContext> {
    let store = MappingStore::open(&config.mapping_store.db_path)
        .await
        .context("opening mapping store")?;
    let store = Arc::new(store);

    let h_token = std::env::var(&config.clients.h_api_token_env).unwrap_or_default();
    let huly = HulyClient::new(config.clients.h_api_url.clone(), h_token, config.sync.api_delay_ms)
        .context("constructing H client")?;

    let vibe = match &config.clients.v_api_url {
        Some(url) => {
            let v_token = std::env::var(&config.clients.v_api_token_env).unwrap_or_default();
            Some(VibeClient::new(url.clone(), v_token, config.sync.api_delay_ms).context("constructing V client")?)
        }
        None => None,
    };

    let bd_bin = std::env::var("BD_BIN").unwrap_or_else(|_| "bd".to_string());
    let clients = Arc::new(CycleClients { huly, vibe, bd_bin });

    let (controller, dispatch_rx) = SyncController::new(config.clone());
    let controller = Arc::new(controller);

    let workflow = Arc::new(WorkflowHandle::new(WorkflowType::Orchestration));
    let event_bus = EventBus::new();
    let admin_state = Arc::new(AdminState::new(
        Arc::clone(&controller),
        Arc::clone(&workflow),
        event_bus.clone(),
    ));

    Ok(ServiceContext {
        config,
        store,
        clients,
        controller,
        dispatch_rx,
        workflow,
        event_bus,
        admin_state,
    })
}

/// Run the service until `shutdown` fires. Spawns the admin HTTP server, the
/// scheduled orchestration ticker, the debounced-event dispatcher, and (when
/// configured) the System V SSE consumer and the System B file watcher.
pub async fn run(ctx: ServiceContext, shutdown: ShutdownSignal) -> Result<()> {
    let ServiceContext { config, store, clients, controller, dispatch_rx, workflow, event_bus, admin_state } = ctx;

    let bind_addr = config.admin.bind_addr.clone();
    let api_key = std::env::var("ADMIN_API_KEY").ok();
    let admin_router = admin::router(Arc::clone(&admin_state), api_key);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding admin surface on {bind_addr}"))?;
    info!(bind_addr = %bind_addr, "admin surface listening");

    let mut admin_shutdown = shutdown.subscribe();
    let admin_task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = admin_shutdown.recv().await;
        };
        if let Err(e) = axum::serve(listener, admin_router).with_graceful_shutdown(shutdown_signal).await {
            error!(error = %e, "admin surface exited with an error");
        }
    });

    let dispatch_task = spawn_dispatch_loop(
        Arc::clone(&store),
        Arc::clone(&clients),
        config.clone(),
        Arc::clone(&controller),
        Arc::clone(&workflow),
        event_bus.clone(),
        Arc::clone(&admin_state),
        dispatch_rx,
        shutdown.subscribe(),
    );

    let tick_task = spawn_tick_loop(
        Arc::clone(&store),
        Arc::clone(&clients),
        config.clone(),
        Arc::clone(&controller),
        Arc::clone(&workflow),
        event_bus.clone(),
        Arc::clone(&admin_state),
        shutdown.subscribe(),
    );

    let known_projects: Arc<RwLock<Vec<Project>>> = Arc::new(RwLock::new(Vec::new()));
    refresh_known_projects(&clients.huly, &known_projects).await;

    let sse_task = clients.vibe.is_some().then(|| {
        spawn_sse_loop(
            Arc::clone(&clients),
            Arc::clone(&store),
            Arc::clone(&controller),
            Arc::clone(&known_projects),
            config.sync.dedupe_cache_ttl_ms,
            event_bus.clone(),
            shutdown.subscribe(),
        )
    });

    let watcher_task = spawn_file_watch_loop(Arc::clone(&controller), Arc::clone(&known_projects), config.sync.clone(), shutdown.subscribe());

    let mut rx = shutdown.subscribe();
    let _ = rx.recv().await;
    info!("shutdown received, draining background tasks");

    let _ = admin_task.await;
    let _ = dispatch_task.await;
    let _ = tick_task.await;
    if let Some(task) = sse_task {
        let _ = task.await;
    }
    if let Some(task) = watcher_task {
        let _ = task.await;
    }

    Ok(())
}

/// Periodically re-fetch H's project list so the SSE and file-watch paths
/// know which projects exist without duplicating `fetch_projects_and_issues`.
async fn refresh_known_projects(huly: &HulyClient, known_projects: &Arc<RwLock<Vec<Project>>>) {
    match execute_activity(&RetryPolicy::default(), || async { huly.list_projects().await.map_err(|e| ActivityError::from_kind(e.kind(), e.to_string())) }).await {
        Ok(remote) => {
            let mut projects = Vec::with_capacity(remote.len());
            for r in remote {
                let mut p = Project::new(r.identifier.clone(), r.name.clone());
                if let Some(desc) = &r.description {
                    if let Some(path) = resolve_repo_path_from_description(desc) {
                        p.filesystem_path = Some(path.display().to_string());
                    }
                }
                projects.push(p);
            }
            *known_projects.write().await = projects;
        }
        Err(e) => warn!(error = %e, "failed to refresh known project list"),
    }
}

/// Drives the controller's debounced dispatch channel (§4.5): every event
/// that survives debounce triggers a full orchestration cycle, scoped to
/// whichever project it named.
fn spawn_dispatch_loop(
    store: Arc<MappingStore>,
    clients: Arc<CycleClients>,
    config: Config,
    controller: Arc<SyncController>,
    workflow: Arc<WorkflowHandle>,
    event_bus: EventBus,
    admin_state: Arc<AdminState>,
    dispatch_rx: flume::Receiver<SyncEvent>,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                e = dispatch_rx.recv_async() => match e {
                    Ok(e) => e,
                    Err(_) => break,
                },
            };

            debug!(correlation_id = %event.correlation_id, source = ?event.source, "dispatching debounced event");
            event_bus.publish(BridgeMessage::SyncStarted {
                correlation_id: event.correlation_id,
                project_identifier: event.project_identifier.clone(),
            });

            let started = Instant::now();
            workflow.set_state(triad_core::types::WorkflowState::Running).await;
            let report = activities::run_cycle(&clients, &store, &config, &controller).await;
            match report {
                Ok(report) => {
                    workflow.record_success();
                    workflow.set_state(triad_core::types::WorkflowState::Completed).await;
                    admin_state.record_sync_success().await;
                    event_bus.publish(BridgeMessage::SyncFinished {
                        correlation_id: event.correlation_id,
                        project_identifier: event.project_identifier.clone(),
                        issues_synced: report.issues_synced as u64,
                        errors: report.errors as u64,
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(e) => {
                    admin_state.record_sync_error();
                    let paused = workflow.record_failure().await;
                    warn!(error = %e, paused, "event-triggered sync cycle failed");
                    event_bus.publish(BridgeMessage::SyncError {
                        correlation_id: event.correlation_id,
                        project_identifier: event.project_identifier.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        info!("dispatch loop exiting");
    })
}

/// Drives the tick-triggered orchestration cycle on `sync.sync_interval_ms`,
/// with overlap policy `skip` (§4.6) via [`ScheduledWorkflowRunner`].
fn spawn_tick_loop(
    store: Arc<MappingStore>,
    clients: Arc<CycleClients>,
    config: Config,
    controller: Arc<SyncController>,
    workflow: Arc<WorkflowHandle>,
    event_bus: EventBus,
    admin_state: Arc<AdminState>,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_millis(config.sync.sync_interval_ms);
        let runner = ScheduledWorkflowRunner::new(workflow, interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {}
            }

            let correlation_id = uuid::Uuid::new_v4();
            event_bus.publish(BridgeMessage::SyncStarted { correlation_id, project_identifier: None });
            let started = Instant::now();

            let store = Arc::clone(&store);
            let clients = Arc::clone(&clients);
            let config = config.clone();
            let controller = Arc::clone(&controller);
            let report_cell: Arc<tokio::sync::Mutex<Option<Result<activities::CycleReport, ActivityError>>>> =
                Arc::new(tokio::sync::Mutex::new(None));
            let report_cell2 = Arc::clone(&report_cell);

            runner
                .tick_once(|| async move {
                    let result = activities::run_cycle(&clients, &store, &config, &controller).await;
                    let is_ok = result.is_ok();
                    *report_cell2.lock().await = Some(result);
                    if is_ok { Ok(()) } else { Err(ActivityError::NonRetryable("cycle reported errors".into())) }
                })
                .await;

            if let Some(result) = report_cell.lock().await.take() {
                match result {
                    Ok(report) => {
                        admin_state.record_sync_success().await;
                        event_bus.publish(BridgeMessage::SyncFinished {
                            correlation_id,
                            project_identifier: None,
                            issues_synced: report.issues_synced as u64,
                            errors: report.errors as u64,
                            duration_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    Err(e) => {
                        admin_state.record_sync_error();
                        event_bus.publish(BridgeMessage::SyncError { correlation_id, project_identifier: None, message: e.to_string() });
                    }
                }
            }
        }
        info!("tick loop exiting");
    })
}

/// Consumes System V's SSE stream, routing each relevant patch to its H
/// counterpart immediately (step 3f) while also feeding the debounced
/// controller pipeline for admin visibility.
fn spawn_sse_loop(
    clients: Arc<CycleClients>,
    store: Arc<MappingStore>,
    controller: Arc<SyncController>,
    known_projects: Arc<RwLock<Vec<Project>>>,
    dedupe_ttl_ms: u64,
    event_bus: EventBus,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        use futures_util::StreamExt;

        let vibe = clients.vibe.as_ref().expect("sse loop only spawned when a V client is configured");
        let mut index_cache: HashMap<String, DedupeIndex> = HashMap::new();

        loop {
            let stream = match vibe.event_stream().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "failed to open V event stream, retrying in 5s");
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(Duration::from_secs(5)) => continue,
                    }
                }
            };
            futures_util::pin_mut!(stream);

            loop {
                let patch = tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => return,
                    next = stream.next() => match next {
                        Some(p) => p,
                        None => break,
                    },
                };

                let Some(_event) = sse_patch_to_event(&patch) else { continue };

                let v_task_id = patch.value.get("id").and_then(|v| v.as_str()).map(str::to_string);
                let title = patch.value.get("title").and_then(|v| v.as_str()).map(str::to_string);
                let status = patch.value.get("status").and_then(|v| v.as_str()).map(str::to_string);
                let (Some(v_task_id), Some(title), Some(status)) = (v_task_id, title, status) else { continue };

                let projects = known_projects.read().await.clone();
                for project in &projects {
                    let _permit = controller.acquire_project(&project.project_identifier).await;

                    let stale = index_cache.get(&project.project_identifier).map(|idx| !idx.is_fresh()).unwrap_or(true);
                    if stale {
                        let issues = match store.get_project_issues(&project.project_identifier).await {
                            Ok(v) => v,
                            Err(_) => continue,
                        };
                        index_cache.insert(
                            project.project_identifier.clone(),
                            DedupeIndex::build(issues, Duration::from_millis(dedupe_ttl_ms)),
                        );
                    }
                    let index = index_cache.get(&project.project_identifier).expect("just inserted if stale");

                    let found = index.by_title(&title).or_else(|| index.by_b_id(&v_task_id)).map(|i| i.h_identifier.clone());
                    if let Some(h_identifier) = found {
                        match activities::sync_v_to_h_event(&clients.huly, index, &v_task_id, &title, &status).await {
                            Ok(()) => event_bus.publish(BridgeMessage::IssueChanged {
                                project_identifier: project.project_identifier.clone(),
                                h_identifier,
                                target_system: "h".into(),
                                kind: "update".into(),
                            }),
                            Err(e) => warn!(error = %e, v_task_id = %v_task_id, "sync_v_to_h_event failed"),
                        }
                        break;
                    }
                }
            }
            warn!("V event stream closed, reconnecting");
        }
        info!("sse loop exiting");
    })
}

/// Watches every known project's `.beads` directory and feeds burst-coalesced
/// change notifications into the controller (§4.4.4).
fn spawn_file_watch_loop(
    controller: Arc<SyncController>,
    known_projects: Arc<RwLock<Vec<Project>>>,
    sync_config: triad_core::config::SyncConfig,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) -> Option<tokio::task::JoinHandle<()>> {
    Some(tokio::spawn(async move {
        let mut watcher = match FileWatcher::new(FileWatcherConfig::default()) {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "failed to start file watcher, System B change detection disabled");
                return;
            }
        };

        let mut watched_project_for: HashMap<String, String> = HashMap::new();
        let mut coalescers: HashMap<String, BurstCoalescer> = HashMap::new();

        let projects = known_projects.read().await.clone();
        for project in &projects {
            let Some(path) = &project.filesystem_path else { continue };
            let beads_dir = format!("{path}/.beads");
            if watcher.add_watch(&beads_dir).is_ok() {
                watched_project_for.insert(beads_dir, project.project_identifier.clone());
                coalescers.insert(project.project_identifier.clone(), BurstCoalescer::new(&sync_config));
            }
        }

        let mut poll = tokio::time::interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = poll.tick() => {}
            }

            let now = Instant::now();
            for event in watcher.recv_events() {
                let Some(project_id) = watched_project_for
                    .iter()
                    .find(|(dir, _)| event.path.starts_with(dir.as_str()))
                    .map(|(_, id)| id.clone())
                else {
                    continue;
                };

                let decision = coalescers
                    .entry(project_id.clone())
                    .or_insert_with(|| BurstCoalescer::new(&sync_config))
                    .record_event(now);

                if matches!(decision, CoalesceDecision::ProcessImmediately) {
                    let sync_event = SyncEvent::new(EventSource::File, EventKind::Update).for_project(project_id);
                    controller.handle_event(sync_event).await;
                }
            }

            for (project_id, coalescer) in coalescers.iter_mut() {
                if coalescer.poll_idle(now) {
                    let sync_event = SyncEvent::new(EventSource::File, EventKind::Update).for_project(project_id.clone());
                    controller.handle_event(sync_event).await;
                }
            }
        }
        info!("file watch loop exiting");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_opens_an_in_memory_capable_store_from_a_temp_db() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.mapping_store.db_path = dir.path().join("mapping.db").to_string_lossy().to_string();
        config.clients.h_api_url = "https://h.example.com".into();

        let ctx = build(config).await.expect("service context builds");
        assert!(ctx.dispatch_rx.is_empty());
        assert_eq!(ctx.admin_state.controller.current_config().await.clients.h_api_url, "https://h.example.com");
    }
}
