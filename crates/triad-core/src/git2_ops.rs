//! Native git read operations via libgit2 (git2 crate).
//!
//! Provides fast, in-process alternatives to shelling out to `git` for
//! read-only queries such as resolving System B's project worktree. Write
//! operations (commit) stay as shell-outs in [`crate::repo`] — libgit2 is
//! intentionally used only for reads.
//!
//! # Feature gated
//!
//! This module is only available with the `libgit2` feature flag (enabled
//! by default).

use std::path::Path;

use crate::repo::RepoError;

impl From<git2::Error> for RepoError {
    fn from(e: git2::Error) -> Self {
        RepoError::GitCommand(e.message().to_string())
    }
}

/// Native git read operations using libgit2.
///
/// Stateless — opens the repo fresh for each call. This avoids stale index
/// issues and is fine for reads (the repo open is <1ms for local repos).
pub struct Git2ReadOps;

impl Git2ReadOps {
    fn open(workdir: &Path) -> Result<git2::Repository, RepoError> {
        git2::Repository::discover(workdir).map_err(RepoError::from)
    }

    /// Discover the gitdir for a working directory (replaces `git rev-parse --git-dir`).
    pub fn discover_gitdir(workdir: &Path) -> Result<std::path::PathBuf, RepoError> {
        let repo = Self::open(workdir)?;
        Ok(repo.path().to_path_buf())
    }

    /// Get the current branch name (replaces `git rev-parse --abbrev-ref HEAD`).
    pub fn current_branch(workdir: &Path) -> Result<String, RepoError> {
        let repo = Self::open(workdir)?;
        let head = repo.head().map_err(RepoError::from)?;

        if head.is_branch() {
            Ok(head.shorthand().unwrap_or("HEAD").to_string())
        } else {
            let oid = head
                .target()
                .ok_or_else(|| RepoError::GitCommand("HEAD has no target".to_string()))?;
            Ok(format!("{:.7}", oid))
        }
    }

    /// Cheap existence check — is `workdir` inside a git working tree at all?
    ///
    /// Used by System B's project validation: the filesystem path recorded for
    /// a project must resolve to a real git repo before the bridge will trust
    /// any `.beads/` contents under it.
    pub fn is_repo(workdir: &Path) -> bool {
        git2::Repository::discover(workdir).is_ok()
    }

    /// True if the working tree has no staged or unstaged changes.
    ///
    /// Used before the bridge commits `.beads/` updates, to decide whether a
    /// commit is actually necessary.
    pub fn is_clean(workdir: &Path) -> Result<bool, RepoError> {
        let repo = Self::open(workdir)?;
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = repo.statuses(Some(&mut opts)).map_err(RepoError::from)?;
        Ok(statuses.is_empty())
    }
}
