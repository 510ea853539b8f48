//! Client for System B — the per-repository, JSONL+SQLite CLI-backed tracker
//! that lives inside a project's git worktree (`.beads/issues.jsonl`).
//!
//! Reads go straight against `.beads/issues.jsonl` (§6 "Persisted state
//! layout"): cheap, no process spawn, and the file is the authoritative
//! on-disk snapshot the file-watcher (§4.4) is watching anyway. Writes shell
//! out to the `bd` CLI — the wrapper this spec treats as an external
//! collaborator (§1) — using the same [`AsyncGitJob`]-style spawn pattern
//! `triad_core::repo` uses for git commands, so a slow or hung `bd` process
//! can't block the orchestration activity indefinitely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use triad_core::repo::{AsyncGitOps, RepoPath};

use crate::error::ErrorKind;
use crate::types::{ClientIssue, IssuePatch, NewIssue};

#[derive(Debug, Error)]
pub enum BeadsClientError {
    #[error("io error reading {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("malformed jsonl line in {path}: {message}")]
    MalformedLine { path: String, message: String },
    #[error("`bd` CLI exited with status {code:?}: {stderr}")]
    CliFailed { code: Option<i32>, stderr: String },
    #[error("`bd` CLI invocation failed: {0}")]
    CliSpawn(std::io::Error),
    #[error("issue not found: {0}")]
    NotFound(String),
}

impl BeadsClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BeadsClientError::NotFound(_) => ErrorKind::NotFound,
            BeadsClientError::MalformedLine { .. } => ErrorKind::Validation,
            // Filesystem/CLI errors on B's side are policy-non-fatal (§7):
            // callers treat them as retryable so a transient fs hiccup
            // doesn't permanently tombstone an issue.
            BeadsClientError::Io { .. } | BeadsClientError::CliFailed { .. } | BeadsClientError::CliSpawn(_) => ErrorKind::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, BeadsClientError>;

/// One line of `.beads/issues.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BJsonlRecord {
    id: String,
    title: String,
    description: Option<String>,
    status: String,
    #[serde(default)]
    labels: Vec<String>,
    parent_id: Option<String>,
    updated_at: DateTime<Utc>,
}

impl From<BJsonlRecord> for ClientIssue {
    fn from(r: BJsonlRecord) -> Self {
        ClientIssue {
            key: r.id,
            title: r.title,
            description: r.description,
            status: r.status,
            priority: None,
            labels: r.labels,
            parent_key: r.parent_id,
            modified_at: r.updated_at,
        }
    }
}

pub struct BeadsClient {
    repo: RepoPath,
    bd_bin: String,
    cli_timeout: Duration,
}

impl BeadsClient {
    pub fn new(repo: RepoPath, bd_bin: impl Into<String>) -> Self {
        Self { repo, bd_bin: bd_bin.into(), cli_timeout: Duration::from_secs(30) }
    }

    fn jsonl_path(&self) -> PathBuf {
        self.repo.workdir().join(".beads").join("issues.jsonl")
    }

    /// Parse the current `.beads/issues.jsonl` snapshot. A missing file (a
    /// repo that has never run `bd init`) is treated as zero issues rather
    /// than an error.
    fn read_jsonl(&self) -> Result<Vec<ClientIssue>> {
        let path = self.jsonl_path();
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BeadsClientError::Io { path: path.display().to_string(), source: e }),
        };
        parse_jsonl(&text, &path.display().to_string())
    }

    pub async fn list_issues(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ClientIssue>> {
        let all = self.read_jsonl()?;
        Ok(match since {
            Some(s) => all.into_iter().filter(|i| i.modified_at >= s).collect(),
            None => all,
        })
    }

    pub async fn get_issue(&self, key: &str) -> Result<Option<ClientIssue>> {
        Ok(self.read_jsonl()?.into_iter().find(|i| i.key == key))
    }

    pub async fn find_by_title(&self, title: &str) -> Result<Option<ClientIssue>> {
        let normalized = title.trim().to_ascii_lowercase();
        Ok(self.read_jsonl()?.into_iter().find(|i| i.title.trim().to_ascii_lowercase() == normalized))
    }

    /// Labels beginning with `h:` are the backlink System B carries to its H
    /// counterpart (§4.7 "append... a label `<targetsystem>:<key>`").
    pub async fn find_h_label(&self, key: &str) -> Result<Option<String>> {
        let issue = self.get_issue(key).await?;
        Ok(issue.and_then(|i| i.labels.into_iter().find_map(|l| l.strip_prefix("h:").map(str::to_string))))
    }

    async fn run_bd(&self, args: &[&str]) -> Result<String> {
        let workdir = self.repo.workdir().to_path_buf();
        let bin = self.bd_bin.clone();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let fut = async move {
            let output = tokio::process::Command::new(&bin).args(&args).current_dir(&workdir).output().await?;
            Ok::<_, std::io::Error>(output)
        };
        let output = tokio::time::timeout(self.cli_timeout, fut)
            .await
            .map_err(|_| BeadsClientError::CliFailed { code: None, stderr: "bd CLI timed out".into() })?
            .map_err(BeadsClientError::CliSpawn)?;

        if !output.status.success() {
            return Err(BeadsClientError::CliFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub async fn create_issue(&self, payload: NewIssue) -> Result<ClientIssue> {
        let mut args = vec!["create".to_string(), payload.title.clone()];
        if let Some(desc) = &payload.description {
            args.push("--description".into());
            args.push(desc.clone());
        }
        for label in &payload.labels {
            args.push("--label".into());
            args.push(label.clone());
        }
        if let Some(parent) = &payload.parent_key {
            args.push("--parent".into());
            args.push(parent.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run_bd(&arg_refs).await?;
        let new_key = stdout.trim().to_string();
        self.get_issue(&new_key)
            .await?
            .ok_or_else(|| BeadsClientError::NotFound(new_key))
    }

    pub async fn patch_issue(&self, key: &str, fields: IssuePatch) -> Result<ClientIssue> {
        if !fields.is_empty() {
            if let Some(status) = &fields.status {
                self.run_bd(&["update", key, "--status", status]).await?;
            }
            if let Some(title) = &fields.title {
                self.run_bd(&["update", key, "--title", title]).await?;
            }
        }
        self.get_issue(key).await?.ok_or_else(|| BeadsClientError::NotFound(key.to_string()))
    }

    pub async fn delete_issue(&self, key: &str) -> Result<()> {
        self.run_bd(&["delete", key]).await?;
        Ok(())
    }

    pub async fn add_label(&self, key: &str, label: &str) -> Result<()> {
        self.run_bd(&["label", "add", key, label]).await?;
        Ok(())
    }

    pub async fn remove_label(&self, key: &str, label: &str) -> Result<()> {
        self.run_bd(&["label", "remove", key, label]).await?;
        Ok(())
    }

    pub async fn set_parent(&self, key: &str, parent_key: Option<&str>) -> Result<()> {
        match parent_key {
            Some(p) => self.run_bd(&["update", key, "--parent", p]).await?,
            None => self.run_bd(&["update", key, "--clear-parent"]).await?,
        };
        Ok(())
    }

    /// Commit any staged `.beads/` changes (§4.7 step 6). Non-fatal by
    /// policy (§7): a failed commit is logged and counted by the caller, not
    /// propagated as an activity failure.
    pub async fn commit_changes(&self, message: &str) -> Result<()> {
        let beads_dir = self.repo.workdir().join(".beads");
        let rel = ".beads".to_string();
        let _ = AsyncGitOps::add(&self.repo, vec![rel]).wait().await;
        let result = AsyncGitOps::commit(&self.repo, message)
            .wait()
            .await
            .map_err(|e| BeadsClientError::CliFailed { code: None, stderr: e.to_string() })?;
        let _ = beads_dir; // directory existence already implied by a successful `bd` write
        if !result.success() && !result.stdout.contains("nothing to commit") {
            return Err(BeadsClientError::CliFailed { code: result.exit_code, stderr: result.stderr });
        }
        Ok(())
    }
}

fn parse_jsonl(text: &str, path: &str) -> Result<Vec<ClientIssue>> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<BJsonlRecord>(line)
                .map(ClientIssue::from)
                .map_err(|e| BeadsClientError::MalformedLine { path: path.to_string(), message: e.to_string() })
        })
        .collect()
}

/// Resolve a git repo path from a System H project description, per §4.7
/// step 3a: parse `Filesystem:`/`Path:`/`Directory:`/`Location:` prefixes
/// and require the result to be an absolute, existing directory.
pub fn resolve_repo_path_from_description(description: &str) -> Option<PathBuf> {
    const PREFIXES: [&str; 4] = ["Filesystem:", "Path:", "Directory:", "Location:"];
    for line in description.lines() {
        let line = line.trim();
        for prefix in PREFIXES {
            if let Some(rest) = line.strip_prefix(prefix) {
                let candidate = rest.trim();
                let path = Path::new(candidate);
                if path.is_absolute() {
                    return Some(path.to_path_buf());
                }
            }
        }
    }
    None
}
