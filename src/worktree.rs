//! Branch Worktree Manager.
//!
//! Maintains a secondary git worktree checked out to a configured sync
//! branch, so the Flush Pipeline can commit and push `.beads/issues.jsonl`
//! on that branch without disturbing the user's current working tree.
//!
//! Git is invoked as a subprocess with structured argv (never `sh -c`),
//! mirroring the way `sync::path` keeps all JSONL I/O inside an explicit
//! allowlist: this module is the one place in the crate allowed to shell
//! out to git, and it only ever touches `.git/beads-worktrees/<branch>/`,
//! a path that `sync::path::validate_sync_path` would reject outright.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

/// Errors raised while managing the sync branch's worktree.
#[derive(Debug, Error)]
pub enum WorktreeError {
    /// `git` is not on PATH or not runnable.
    #[error("git executable not found or not runnable")]
    NotAvailable,

    /// A git subprocess exited non-zero.
    #[error("git command failed: {0}")]
    CommandFailed(String),

    /// The repository has no remote configured for the branch; network
    /// operations are skipped rather than treated as an error.
    #[error("no remote configured for branch '{0}'")]
    NoRemote(String),
}

impl From<WorktreeError> for crate::error::BeadsError {
    fn from(err: WorktreeError) -> Self {
        crate::error::BeadsError::VCSError(err.to_string())
    }
}

/// Manages the git worktree backing the configured sync branch.
#[derive(Clone, Default)]
pub struct WorktreeManager;

impl WorktreeManager {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Default location for a branch's worktree, under the repo's git dir.
    #[must_use]
    pub fn default_worktree_path(repo_root: &Path, branch: &str) -> PathBuf {
        repo_root
            .join(".git")
            .join("beads-worktrees")
            .join(sanitize_branch_for_path(branch))
    }

    /// Ensure a worktree for `branch` exists at `path`, healthy and checked
    /// out to the right branch. Creates it if absent; if an existing
    /// worktree fails a health probe (missing HEAD, detached, wrong branch)
    /// it is removed and recreated. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if git itself is unavailable or any git invocation
    /// fails.
    pub fn ensure_worktree(
        &self,
        repo_root: &Path,
        branch: &str,
        path: &Path,
    ) -> Result<(), WorktreeError> {
        self.ensure_available()?;

        if path.join(".git").exists() {
            if self.worktree_is_healthy(path, branch) {
                tracing::debug!(branch, path = %path.display(), "worktree healthy");
                return Ok(());
            }
            tracing::warn!(branch, path = %path.display(), "worktree unhealthy, recreating");
            let _ = self.worktree_remove(repo_root, path, true);
            if path.exists() {
                fs::remove_dir_all(path).map_err(|e| WorktreeError::CommandFailed(e.to_string()))?;
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| WorktreeError::CommandFailed(e.to_string()))?;
        }

        let branch_exists = self.branch_exists(repo_root, branch);
        let mut args: Vec<OsString> = vec!["worktree".into(), "add".into()];
        if !branch_exists {
            args.push("-b".into());
            args.push(OsString::from(branch));
        }
        args.push(path.as_os_str().into());
        if branch_exists {
            args.push(OsString::from(branch));
        }
        self.git(repo_root, args)?;
        Ok(())
    }

    /// Copy the main repo's JSONL file into the worktree's `.beads/issues.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails.
    pub fn copy_jsonl_into(
        &self,
        main_jsonl: &Path,
        worktree_path: &Path,
    ) -> Result<(), WorktreeError> {
        let dest_dir = worktree_path.join(".beads");
        fs::create_dir_all(&dest_dir).map_err(|e| WorktreeError::CommandFailed(e.to_string()))?;
        fs::copy(main_jsonl, dest_dir.join("issues.jsonl"))
            .map_err(|e| WorktreeError::CommandFailed(e.to_string()))?;
        Ok(())
    }

    /// Stage only `.beads/issues.jsonl` in the worktree and commit with
    /// `message`. No-op (returns `Ok(false)`) if there are no changes.
    ///
    /// # Errors
    ///
    /// Returns an error if git itself fails.
    pub fn commit(&self, worktree_path: &Path, message: &str) -> Result<bool, WorktreeError> {
        self.git(worktree_path, ["add", ".beads/issues.jsonl"])?;

        let status = self.git(worktree_path, ["status", "--porcelain", "--", ".beads/issues.jsonl"])?;
        if status.trim().is_empty() {
            tracing::debug!(path = %worktree_path.display(), "no changes to commit");
            return Ok(false);
        }

        self.git(worktree_path, ["commit", "-m", message])?;
        Ok(true)
    }

    /// Push `branch` to its tracked remote (or `origin`), establishing
    /// upstream if absent. Reports success without touching the network
    /// if the repository has no remote.
    ///
    /// # Errors
    ///
    /// Returns an error if git itself fails (but not for a missing remote).
    pub fn push(&self, worktree_path: &Path, branch: &str) -> Result<(), WorktreeError> {
        let Some(remote) = self.tracked_remote(worktree_path, branch) else {
            tracing::info!(branch, "no remote configured, skipping push");
            return Ok(());
        };

        self.git(
            worktree_path,
            ["push", "--set-upstream", &remote, branch],
        )?;
        Ok(())
    }

    /// Pull `branch` from its tracked remote, then copy the worktree's
    /// JSONL back into `main_jsonl`. Reports success without touching the
    /// network if the repository has no remote.
    ///
    /// # Errors
    ///
    /// Returns an error if git itself fails or the copy-back fails.
    pub fn pull(
        &self,
        worktree_path: &Path,
        branch: &str,
        main_jsonl: &Path,
    ) -> Result<(), WorktreeError> {
        if let Some(remote) = self.tracked_remote(worktree_path, branch) {
            self.git(worktree_path, ["pull", &remote, branch])?;
        } else {
            tracing::info!(branch, "no remote configured, skipping pull");
        }

        let worktree_jsonl = worktree_path.join(".beads/issues.jsonl");
        if worktree_jsonl.exists() {
            fs::copy(&worktree_jsonl, main_jsonl)
                .map_err(|e| WorktreeError::CommandFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Run `git -C <repo> worktree remove <path>`.
    fn worktree_remove(
        &self,
        repo_root: &Path,
        path: &Path,
        force: bool,
    ) -> Result<(), WorktreeError> {
        let mut args: Vec<OsString> = vec!["worktree".into(), "remove".into()];
        if force {
            args.push("--force".into());
        }
        args.push(path.as_os_str().into());
        self.git(repo_root, args)?;
        let _ = self.git(repo_root, ["worktree", "prune"]);
        Ok(())
    }

    fn worktree_is_healthy(&self, worktree_path: &Path, branch: &str) -> bool {
        let Ok(head) = self.git(worktree_path, ["symbolic-ref", "--short", "HEAD"]) else {
            return false;
        };
        head.trim() == branch
    }

    fn branch_exists(&self, repo_root: &Path, branch: &str) -> bool {
        self.git(
            repo_root,
            ["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")],
        )
        .is_ok()
    }

    fn tracked_remote(&self, worktree_path: &Path, branch: &str) -> Option<String> {
        self.git(
            worktree_path,
            ["config", "--get", &format!("branch.{branch}.remote")],
        )
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            self.git(worktree_path, ["remote"])
                .ok()
                .and_then(|out| out.lines().next().map(str::to_string))
        })
    }

    fn ensure_available(&self) -> Result<(), WorktreeError> {
        let out = Command::new("git")
            .arg("--version")
            .output()
            .map_err(|_| WorktreeError::NotAvailable)?;
        if out.status.success() {
            Ok(())
        } else {
            Err(WorktreeError::NotAvailable)
        }
    }

    /// Run `git -C <repo_path> <args...>` and return stdout on success.
    fn git<I, S>(&self, repo_path: &Path, args: I) -> Result<String, WorktreeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(repo_path);
        for a in args {
            cmd.arg(a);
        }
        let out = cmd
            .output()
            .map_err(|e| WorktreeError::CommandFailed(e.to_string()))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            return Err(WorktreeError::CommandFailed(stderr));
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }
}

fn sanitize_branch_for_path(branch: &str) -> String {
    branch.replace('/', "-")
}
