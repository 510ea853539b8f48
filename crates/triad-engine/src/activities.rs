//! Orchestration activities (C8, §4.7): the per-cycle sequence that fetches
//! projects and issues, orders them topologically, and drives each
//! `syncXToY` direction through its counterpart-resolution and conflict
//! rules (§4.8, see `conflict.rs`).
//!
//! Every activity here is meant to run under
//! [`workflow::execute_activity`](crate::workflow::execute_activity) so its
//! failures classify into the shared retryable/non-retryable taxonomy.

use std::collections::HashMap;
use std::time::Duration;

use triad_core::config::Config;
use triad_core::dedupe::DedupeIndex;
use triad_core::mapping_store::MappingStore;
use triad_core::repo::RepoPath;
use triad_core::status_map::{
    h_priority_to_normalized, h_status_to_normalized, normalized_to_b_status, normalized_to_h_status,
    normalized_to_v_status, v_status_to_normalized,
};
use triad_core::types::{Issue, Project};
use triad_clients::beads::{resolve_repo_path_from_description, BeadsClient};
use triad_clients::huly::HulyClient;
use triad_clients::types::{BulkListRequest, ClientIssue, IssuePatch, NewIssue};
use triad_clients::vibe::VibeClient;

use crate::conflict;
use crate::controller::SyncController;
use crate::workflow::{execute_activity, ActivityError, RetryPolicy};

/// §4.7 step 3c — partition into parentless issues first, then children,
/// preserving input order within each group. A simple stable partition
/// (not a full DAG sort) is sufficient here because the data model only
/// has one level of nesting (§3's `parent_*_id` fields, no grandparents
/// tracked).
pub fn topological_partition(issues: Vec<Issue>) -> Vec<Issue> {
    let (parentless, children): (Vec<Issue>, Vec<Issue>) =
        issues.into_iter().partition(|issue| issue.parent_ids.parent_h_id.is_none());
    parentless.into_iter().chain(children).collect()
}

/// §4.7 step d/e — batch a sequence into fixed-size groups, preserving order.
pub fn batch_groups<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    if size == 0 {
        return vec![items];
    }
    items.chunks(size.max(1)).map(|chunk| chunk.to_vec()).collect()
}

/// §4.7 "append a stable backlink line to description" when creating on a
/// target system: `---\n<SourceSystem> <Key>: <id>`.
pub fn append_backlink(description: &str, source_system: &str, key: &str, id: &str) -> String {
    let footer = format!("---\n{source_system} {key}: {id}");
    if description.trim().is_empty() {
        footer
    } else {
        format!("{description}\n\n{footer}")
    }
}

/// §4.7 "add a label `<targetsystem>:<key>`" — used on B's side when B
/// receives a counterpart created from H or V.
pub fn backlink_label(target_system: &str, key: &str) -> String {
    format!("{target_system}:{key}")
}

/// Counterpart resolution order (§4.7): mapping-first, then label lookup,
/// then normalized-title search. Callers pass whichever of `cross_id` /
/// `label_hint` applies to the direction being synced; `title` always
/// participates as the last-resort key.
pub fn resolve_counterpart<'a>(
    index: &'a DedupeIndex,
    cross_id: Option<&str>,
    label_hint: Option<&str>,
    title: &str,
) -> Option<&'a Issue> {
    if let Some(id) = cross_id {
        if let Some(issue) = index.by_h_identifier(id).or_else(|| index.by_b_id(id)) {
            return Some(issue);
        }
    }
    if let Some(label) = label_hint {
        if let Some(issue) = index.by_h_identifier(label).or_else(|| index.by_b_id(label)) {
            return Some(issue);
        }
    }
    index.by_title(title)
}

/// Compute the minimal field-level patch to bring `current` (the target
/// system's view) in line with `desired_title`/`desired_status` — "apply
/// only changed fields" (§4.7). Status is passed already mapped to the
/// target system's own vocabulary string.
pub fn compute_patch(current: &ClientIssue, desired_title: &str, desired_status: &str) -> IssuePatch {
    let mut patch = IssuePatch::default();
    if current.title != desired_title {
        patch.title = Some(desired_title.to_string());
    }
    if current.status != desired_status {
        patch.status = Some(desired_status.to_string());
    }
    patch
}

/// Build the payload for creating H's counterpart on System V, applying the
/// backlink-on-create rule.
pub fn new_issue_for_v(issue: &Issue) -> NewIssue {
    NewIssue {
        title: issue.title.clone(),
        description: Some(append_backlink(&issue.description, "System H", &issue.h_identifier, &issue.h_identifier)),
        status: Some(v_status_to_normalized_status_str(issue)),
        priority: None,
        labels: Vec::new(),
        parent_key: None,
    }
}

/// Build the payload for creating H's counterpart on System B, applying the
/// backlink-on-create rule and the `h:<identifier>` label.
pub fn new_issue_for_b(issue: &Issue) -> NewIssue {
    NewIssue {
        title: issue.title.clone(),
        description: Some(append_backlink(&issue.description, "System H", &issue.h_identifier, &issue.h_identifier)),
        status: Some(b_status_str(normalized_to_b_status(issue.status))),
        priority: None,
        labels: vec![backlink_label("h", &issue.h_identifier)],
        parent_key: None,
    }
}

/// Build the payload for creating B's (or V's) counterpart on System H.
pub fn new_issue_for_h(source_system: &str, key: &str, title: &str, description: &str, status: &str, id: &str) -> NewIssue {
    NewIssue {
        title: title.to_string(),
        description: Some(append_backlink(description, source_system, key, id)),
        status: Some(status.to_string()),
        priority: None,
        labels: Vec::new(),
        parent_key: None,
    }
}

fn v_status_to_normalized_status_str(issue: &Issue) -> String {
    v_status_to_normalized_roundtrip(issue.status)
}

fn v_status_to_normalized_roundtrip(status: triad_core::types::IssueStatus) -> String {
    normalized_to_v_status(status).to_string()
}

fn b_status_str(status: triad_core::status_map::BStatus) -> String {
    status.as_str().to_string()
}

/// Translate an H-observed status into B's forwarded vocabulary, honoring
/// the B status domain restriction is the *reverse* direction's concern
/// (conflict.rs); this direction (H→B) always forwards H's effective
/// status since H has no restricted domain.
pub fn h_status_for_b(h_status: &str) -> triad_core::status_map::BStatus {
    normalized_to_b_status(h_status_to_normalized(h_status))
}

/// Translate a V-observed status string into H's vocabulary string.
pub fn v_status_for_h(v_status: &str) -> &'static str {
    normalized_to_h_status(v_status_to_normalized(v_status))
}

// ---------------------------------------------------------------------------
// Cycle driver (§4.7 steps 1-6)
// ---------------------------------------------------------------------------

/// The three system clients a cycle needs. `vibe` is `None` when no V
/// endpoint is configured (V is optional per §9's tri-directional-with-
/// optional-V decision); `bd_bin` is the `bd` CLI binary name or path used
/// to construct a fresh [`BeadsClient`] per project repo.
pub struct CycleClients {
    pub huly: HulyClient,
    pub vibe: Option<VibeClient>,
    pub bd_bin: String,
}

/// Counters returned from one orchestration cycle; folded into the
/// `sync_runs_total`/`projects_processed`/`issues_synced` metrics by the
/// caller.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub projects_processed: u32,
    pub issues_synced: u32,
    pub errors: u32,
}

fn activity_err<E: std::fmt::Display>(kind: triad_clients::error::ErrorKind, err: E) -> ActivityError {
    ActivityError::from_kind(kind, err.to_string())
}

fn store_err<E: std::fmt::Display>(err: E) -> ActivityError {
    ActivityError::NonRetryable(err.to_string())
}

/// Step 1+2: list H's projects, upsert them into the mapping store (parsing
/// a filesystem path out of the description when present), then bulk-fetch
/// every project's changed issues in one call.
async fn fetch_projects_and_issues(
    clients: &CycleClients,
    store: &MappingStore,
    policy: &RetryPolicy,
) -> Result<(Vec<Project>, HashMap<String, Vec<ClientIssue>>), ActivityError> {
    let remote_projects = execute_activity(policy, || async {
        clients.huly.list_projects().await.map_err(|e| activity_err(e.kind(), e))
    })
    .await?;

    let mut projects = Vec::with_capacity(remote_projects.len());
    for rp in &remote_projects {
        let mut project = store
            .get_project(&rp.identifier)
            .await
            .map_err(store_err)?
            .unwrap_or_else(|| Project::new(rp.identifier.clone(), rp.name.clone()));
        project.display_name = rp.name.clone();
        if let Some(desc) = &rp.description {
            if let Some(path) = resolve_repo_path_from_description(desc) {
                project.filesystem_path = Some(path.display().to_string());
            }
        }
        store.upsert_project(&project).await.map_err(store_err)?;
        projects.push(project);
    }

    if projects.is_empty() {
        return Ok((projects, HashMap::new()));
    }

    let identifiers: Vec<String> = projects.iter().map(|p| p.project_identifier.clone()).collect();
    let bulk_req = BulkListRequest { projects: identifiers, since: None, limit: None };
    let issues = execute_activity(policy, || {
        let req = bulk_req.clone();
        async move { clients.huly.bulk_list_issues(req).await.map_err(|e| activity_err(e.kind(), e)) }
    })
    .await?;

    let mut by_project: HashMap<String, Vec<ClientIssue>> = HashMap::new();
    for issue in issues {
        let project_id = issue.key.rsplit_once('-').map(|(p, _)| p.to_string()).unwrap_or_else(|| issue.key.clone());
        by_project.entry(project_id).or_default().push(issue);
    }
    Ok((projects, by_project))
}

/// Merge a freshly-fetched H-side view into the mapping store's canonical
/// row, applying the closed-wins rule (§4.8 rule 1) before anything is
/// synced outward.
fn merge_h_issue(project_identifier: &str, existing: Option<&Issue>, wire: &ClientIssue) -> Issue {
    let mut issue = existing
        .cloned()
        .unwrap_or_else(|| Issue::new(project_identifier.to_string(), wire.key.clone(), wire.title.clone()));
    issue.title = wire.title.clone();
    issue.description = wire.description.clone().unwrap_or_default();
    issue.observations.status_h = Some(wire.status.clone());
    issue.observations.modified_at_h = Some(wire.modified_at);
    if let Some(priority) = &wire.priority {
        issue.priority = h_priority_to_normalized(priority);
    }
    issue.parent_ids.parent_h_id = wire.parent_key.clone();
    issue.status = h_status_to_normalized(&wire.status);
    issue.status = conflict::effective_status(&issue);
    issue
}

/// Step 3d — sync one H issue's title/status into its B counterpart,
/// creating it (with a backlink) if none is mapped yet and creation isn't
/// tombstoned.
async fn sync_h_to_b(
    beads: &BeadsClient,
    issue: &mut Issue,
    index: &DedupeIndex,
    policy: &RetryPolicy,
) -> Result<(), ActivityError> {
    let b_status = normalized_to_b_status(issue.status);
    let label_hint = issue.cross_ids.b_issue_id.clone();
    let counterpart = resolve_counterpart(index, label_hint.as_deref(), None, &issue.title);

    match counterpart {
        Some(found) if found.cross_ids.b_issue_id.is_some() => {
            let b_key = found.cross_ids.b_issue_id.clone().unwrap();
            let current = execute_activity(policy, || async {
                beads.get_issue(&b_key).await.map_err(|e| activity_err(e.kind(), e))
            })
            .await?;
            if let Some(current) = current {
                let patch = compute_patch(&current, &issue.title, b_status.as_str());
                if !patch.is_empty() {
                    execute_activity(policy, || {
                        let patch = patch.clone();
                        async move { beads.patch_issue(&b_key, patch).await.map_err(|e| activity_err(e.kind(), e)) }
                    })
                    .await?;
                }
            }
            issue.cross_ids.b_issue_id = Some(b_key);
        }
        _ if issue.b_creation_allowed() => {
            let payload = new_issue_for_b(issue);
            let created = execute_activity(policy, || {
                let payload = payload.clone();
                async move { beads.create_issue(payload).await.map_err(|e| activity_err(e.kind(), e)) }
            })
            .await?;
            issue.cross_ids.b_issue_id = Some(created.key);
        }
        _ => {}
    }
    Ok(())
}

/// Step 3d — sync one H issue's title/status into its V counterpart.
async fn sync_h_to_v(
    vibe: &VibeClient,
    v_project_id: &str,
    issue: &mut Issue,
    index: &DedupeIndex,
    policy: &RetryPolicy,
) -> Result<(), ActivityError> {
    let v_status = normalized_to_v_status(issue.status);
    let cross_id = issue.cross_ids.v_task_id.map(|u| u.to_string());
    let counterpart = cross_id
        .as_deref()
        .and_then(|_| index.by_h_identifier(&issue.h_identifier))
        .filter(|c| c.cross_ids.v_task_id.is_some());

    match counterpart.or_else(|| index.by_title(&issue.title)).filter(|c| c.cross_ids.v_task_id.is_some()) {
        Some(found) => {
            let v_key = found.cross_ids.v_task_id.unwrap().to_string();
            let current = execute_activity(policy, || async {
                vibe.get_issue(&v_key).await.map_err(|e| activity_err(e.kind(), e))
            })
            .await?;
            if let Some(current) = current {
                let patch = compute_patch(&current, &issue.title, v_status);
                if !patch.is_empty() {
                    execute_activity(policy, || {
                        let patch = patch.clone();
                        async move { vibe.patch_issue(&v_key, patch).await.map_err(|e| activity_err(e.kind(), e)) }
                    })
                    .await?;
                }
            }
        }
        None if issue.v_creation_allowed() => {
            let payload = new_issue_for_v(issue);
            let created = execute_activity(policy, || {
                let payload = payload.clone();
                let v_project_id = v_project_id.to_string();
                async move { vibe.create_issue(&v_project_id, payload).await.map_err(|e| activity_err(e.kind(), e)) }
            })
            .await?;
            if let Ok(uuid) = created.key.parse() {
                issue.cross_ids.v_task_id = Some(uuid);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Step 3e — scan one project's live `.beads/issues.jsonl` for rows not yet
/// reflected on H (unlabeled, or labeled `h:<identifier>` but not yet
/// mapped) and forward them, honoring the B status domain restriction
/// (§4.8 rule 2).
async fn sync_b_to_h_project(
    huly: &HulyClient,
    beads: &BeadsClient,
    store: &MappingStore,
    project: &Project,
    policy: &RetryPolicy,
    dedupe_ttl: Duration,
) -> Result<u32, ActivityError> {
    let b_issues = execute_activity(policy, || async {
        beads.list_issues(None).await.map_err(|e| activity_err(e.kind(), e))
    })
    .await?;

    let mapped = store.get_issues_with_b_id(&project.project_identifier).await.map_err(store_err)?;
    let index = DedupeIndex::build(mapped, dedupe_ttl);
    let mut synced = 0u32;

    for b_issue in &b_issues {
        let h_label = execute_activity(policy, || async {
            beads.find_h_label(&b_issue.key).await.map_err(|e| activity_err(e.kind(), e))
        })
        .await?;

        let counterpart = resolve_counterpart(&index, h_label.as_deref(), None, &b_issue.title)
            .or_else(|| index.by_b_id(&b_issue.key));

        if !conflict::b_status_forwardable_to_h(&b_issue.status) {
            continue;
        }
        let normalized = triad_core::status_map::BStatus::parse(&b_issue.status)
            .map(triad_core::status_map::b_status_to_normalized)
            .unwrap_or(triad_core::types::IssueStatus::Open);
        let h_status_str = normalized_to_h_status(normalized);

        match counterpart {
            Some(found) => {
                let current = execute_activity(policy, || async {
                    huly.get_issue(&found.h_identifier).await.map_err(|e| activity_err(e.kind(), e))
                })
                .await?;
                if let Some(current) = current {
                    let patch = compute_patch(&current, &b_issue.title, h_status_str);
                    if !patch.is_empty() {
                        let key = found.h_identifier.clone();
                        execute_activity(policy, || {
                            let patch = patch.clone();
                            async move { huly.patch_issue(&key, patch).await.map_err(|e| activity_err(e.kind(), e)) }
                        })
                        .await?;
                        synced += 1;
                    }
                }
            }
            None => {
                let payload = new_issue_for_h(
                    "System B",
                    &b_issue.key,
                    &b_issue.title,
                    b_issue.description.as_deref().unwrap_or(""),
                    h_status_str,
                    &b_issue.key,
                );
                execute_activity(policy, || {
                    let payload = payload.clone();
                    let project_identifier = project.project_identifier.clone();
                    async move {
                        huly.create_issue(&project_identifier, payload).await.map_err(|e| activity_err(e.kind(), e))
                    }
                })
                .await?;
                synced += 1;
            }
        }
    }
    Ok(synced)
}

/// Step 3f — a single V-originated change, delivered over SSE, routed to
/// its H counterpart. Unlike the bulk H→B/H→V walk this runs per-event, off
/// the controller's dispatch, not as part of the bulk cycle.
pub async fn sync_v_to_h_event(
    huly: &HulyClient,
    index: &DedupeIndex,
    v_task_id: &str,
    title: &str,
    v_status: &str,
) -> Result<(), ActivityError> {
    let policy = RetryPolicy::default();
    let h_status_str = v_status_for_h(v_status);

    if let Some(found) = index.by_title(title).or_else(|| index.by_b_id(v_task_id)) {
        let current = execute_activity(&policy, || async {
            huly.get_issue(&found.h_identifier).await.map_err(|e| activity_err(e.kind(), e))
        })
        .await?;
        if let Some(current) = current {
            let patch = compute_patch(&current, title, h_status_str);
            if !patch.is_empty() {
                let key = found.h_identifier.clone();
                execute_activity(&policy, || {
                    let patch = patch.clone();
                    async move { huly.patch_issue(&key, patch).await.map_err(|e| activity_err(e.kind(), e)) }
                })
                .await?;
            }
        }
    }
    Ok(())
}

/// One project's slice of a cycle: merge H's view into the mapping store,
/// topologically order it (§4.7 step 3c), then drive `sync_h_to_b` and
/// `sync_h_to_v` batched in groups of `BATCH_SIZE` (§4.7 step 3d), followed
/// by the B→H sweep (step 3e).
async fn sync_project(
    clients: &CycleClients,
    store: &MappingStore,
    config: &Config,
    policy: &RetryPolicy,
    project: &Project,
    h_issues: &[ClientIssue],
) -> Result<u32, ActivityError> {
    let existing = store.get_project_issues(&project.project_identifier).await.map_err(store_err)?;
    let index = DedupeIndex::build(existing.clone(), Duration::from_millis(config.sync.dedupe_cache_ttl_ms));
    let existing_by_id: HashMap<&str, &Issue> = existing.iter().map(|i| (i.h_identifier.as_str(), i)).collect();

    let rows: Vec<Issue> = h_issues
        .iter()
        .map(|wire| merge_h_issue(&project.project_identifier, existing_by_id.get(wire.key.as_str()).copied(), wire))
        .collect();
    let rows = topological_partition(rows);

    let repo_path = project.filesystem_path.as_deref().and_then(|p| RepoPath::from_workdir(p).ok());
    let mut synced = 0u32;

    for batch in batch_groups(rows, config.sync.batch_size as usize) {
        for mut issue in batch {
            if let Some(repo_path) = &repo_path {
                let beads = BeadsClient::new(repo_path.clone(), clients.bd_bin.clone());
                sync_h_to_b(&beads, &mut issue, &index, policy).await?;
            }
            if let (Some(vibe), Some(v_project_id)) = (&clients.vibe, project.v_project_id) {
                sync_h_to_v(vibe, &v_project_id.to_string(), &mut issue, &index, policy).await?;
            }
            if !config.sync.dry_run {
                store.upsert_issue(&issue).await.map_err(store_err)?;
            }
            synced += 1;
        }
    }

    if let Some(repo_path) = &repo_path {
        let beads = BeadsClient::new(repo_path.clone(), clients.bd_bin.clone());
        synced += sync_b_to_h_project(
            &clients.huly,
            &beads,
            store,
            project,
            policy,
            Duration::from_millis(config.sync.dedupe_cache_ttl_ms),
        )
        .await?;
        if !config.sync.dry_run && synced > 0 {
            let _ = execute_activity(policy, || async {
                beads
                    .commit_changes("triad-sync: apply cross-system updates")
                    .await
                    .map_err(|e| activity_err(e.kind(), e))
            })
            .await;
        }
    }

    Ok(synced)
}

/// The full orchestration sequence (§4.7 steps 1-6): fetch projects, bulk
/// fetch changed issues, then sync each project in turn. Per-project
/// failures are counted but don't abort the remaining projects — a
/// non-retryable failure on one project must not starve its siblings
/// (§4.9: "failed does not block sibling issues").
///
/// Each project's sync (and its step-2 reconciliation sweep) runs under
/// `controller`'s per-project mutex (§4.5) so an overlapping tick-triggered,
/// debounce-triggered, or SSE-triggered pass over the same project can never
/// race against this one's `upsert_issue` calls.
pub async fn run_cycle(
    clients: &CycleClients,
    store: &MappingStore,
    config: &Config,
    controller: &SyncController,
) -> Result<CycleReport, ActivityError> {
    let policy = RetryPolicy { max_attempts: config.workflow.activity_max_retries.max(1), ..RetryPolicy::default() };
    let mut report = CycleReport::default();

    let (projects, by_project) = fetch_projects_and_issues(clients, store, &policy).await?;

    for project in &projects {
        let Some(h_issues) = by_project.get(&project.project_identifier) else { continue };
        let _permit = controller.acquire_project(&project.project_identifier).await;

        match sync_project(clients, store, config, &policy, project, h_issues).await {
            Ok(n) => {
                report.projects_processed += 1;
                report.issues_synced += n;
            }
            Err(e) => {
                report.errors += 1;
                if !e.is_retryable() {
                    tracing::warn!(project = %project.project_identifier, error = %e, "project sync failed, skipping");
                }
            }
        }

        if let Some(repo_path) = project.filesystem_path.as_deref().and_then(|p| RepoPath::from_workdir(p).ok()) {
            let beads = BeadsClient::new(repo_path, clients.bd_bin.clone());
            match reconcile_project(&beads, store, config, project).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(project = %project.project_identifier, reconciled = n, "reconciliation tombstoned stale B rows"),
                Err(e) => tracing::warn!(project = %project.project_identifier, error = %e, "reconciliation sweep failed, skipping"),
            }
        }
    }

    Ok(report)
}

/// §4.7 step 2's reconciliation pass: rows whose B counterpart vanished
/// from the live `.beads/issues.jsonl` scan (deleted outside a tracked
/// event) are tombstoned or hard-deleted per `RECONCILIATION_ACTION`.
pub async fn reconcile_project(
    beads: &BeadsClient,
    store: &MappingStore,
    config: &Config,
    project: &Project,
) -> Result<u32, ActivityError> {
    if config.reconciliation.dry_run {
        return Ok(0);
    }
    let live = execute_activity(&RetryPolicy::default(), || async {
        beads.list_issues(None).await.map_err(|e| activity_err(e.kind(), e))
    })
    .await?;
    let live_ids: std::collections::HashSet<&str> = live.iter().map(|i| i.key.as_str()).collect();

    let mapped = store.get_issues_with_b_id(&project.project_identifier).await.map_err(store_err)?;
    let mut reconciled = 0u32;
    for issue in mapped {
        let Some(b_id) = &issue.cross_ids.b_issue_id else { continue };
        if live_ids.contains(b_id.as_str()) {
            continue;
        }
        match config.reconciliation.action {
            triad_core::config::ReconciliationAction::MarkDeleted => {
                store.mark_deleted_from_b(&project.project_identifier, &issue.h_identifier).await.map_err(store_err)?;
            }
            triad_core::config::ReconciliationAction::HardDelete => {
                store.hard_delete_issue(&project.project_identifier, &issue.h_identifier).await.map_err(store_err)?;
            }
        }
        reconciled += 1;
    }
    Ok(reconciled)
}
