/// Version-control synchronization for a board directory.
///
/// A status state machine over the external `git` executable: status is
/// re-derived from scratch on every check, never incrementally updated. Only
/// exit codes and minimal structured output are parsed: porcelain codes,
/// `rev-list --left-right --count` ahead/behind counts, and the branch name.
///
/// Safety rules, in order of importance: never auto-commit, never
/// auto-resolve a conflict, and only auto-pull when there is nothing local
/// to lose (clean tree, strictly behind). A failed stash aborts a pull
/// instead of risking uncommitted work.
///
/// Independent of the in-memory store: it only needs the directory path.
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Computed relationship between the local directory and its remote.
/// Ephemeral: recomputed on each check, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncStatus {
    NotARepo,
    NoRemote,
    Synced,
    Ahead { ahead: u32 },
    Behind { behind: u32 },
    Diverged { ahead: u32, behind: u32 },
    Uncommitted,
    Syncing,
    Conflict,
    Error { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("not a git repository")]
    NotARepo,

    #[error("detached HEAD: a checked-out branch is required")]
    DetachedHead,

    #[error("stash failed: {0}")]
    StashFailed(String),

    #[error("pull failed: {0}")]
    PullFailed(String),

    #[error("push failed: {0}")]
    PushFailed(String),

    #[error("nothing to commit")]
    NothingToCommit,

    #[error("nothing to push")]
    NothingToPush,

    #[error("commit message must not be empty")]
    EmptyCommitMessage,

    #[error("git command failed: {0}")]
    GitFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The bare git failure text, without our error-prefix wrapping.
fn git_message(e: &SyncError) -> String {
    match e {
        SyncError::GitFailed(m) => m.clone(),
        other => other.to_string(),
    }
}

pub struct GitSync {
    dir: PathBuf,
    /// Serializes git invocations for this directory; concurrent commands
    /// contend on the repository lock.
    git_lock: Mutex<()>,
    /// Set while a multi-command operation is in flight so the periodic
    /// timer can skip a tick instead of queueing behind it.
    busy: AtomicBool,
    status: Mutex<Option<SyncStatus>>,
    branch: Mutex<Option<String>>,
}

impl GitSync {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            git_lock: Mutex::new(()),
            busy: AtomicBool::new(false),
            status: Mutex::new(None),
            branch: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The most recently computed status; computes one if never checked.
    pub fn status(&self) -> SyncStatus {
        let cached = self.status.lock().unwrap().clone();
        match cached {
            Some(status) => status,
            None => self.check(),
        }
    }

    /// The checked-out branch as of the last check; None means detached.
    pub fn current_branch(&self) -> Option<String> {
        self.branch.lock().unwrap().clone()
    }

    /// Recompute status and current branch from scratch.
    pub fn check(&self) -> SyncStatus {
        let status = self.compute_status();
        self.set_status(status.clone());
        status
    }

    /// Update remote-tracking refs only, then recompute.
    pub fn fetch(&self) -> Result<SyncStatus, SyncError> {
        self.set_status(SyncStatus::Syncing);
        if let Err(e) = self.git(&["fetch", "--quiet"]) {
            self.set_status(SyncStatus::Error {
                message: git_message(&e),
            });
            return Err(e);
        }
        Ok(self.check())
    }

    /// The periodic auto-behavior. No-op without a repository or remote;
    /// uncommitted work is reported, never committed; a clean tree that is
    /// strictly behind is pulled; divergence is left for the user. Skips the
    /// whole tick when the previous one is still running.
    pub fn sync(&self) -> Result<SyncStatus, SyncError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            log::debug!("[tabula.sync.tick] Previous operation still running, skipping tick");
            return Ok(self.status());
        }
        let result = self.sync_inner();
        self.busy.store(false, Ordering::SeqCst);
        result
    }

    fn sync_inner(&self) -> Result<SyncStatus, SyncError> {
        let status = self.check();
        match status {
            SyncStatus::NotARepo | SyncStatus::NoRemote => return Ok(status),
            SyncStatus::Uncommitted | SyncStatus::Conflict => return Ok(status),
            _ => {}
        }

        self.set_status(SyncStatus::Syncing);
        if let Err(e) = self.git(&["fetch", "--quiet"]) {
            // A periodic tick failing to reach the network is a status, not
            // an abort.
            let status = SyncStatus::Error {
                message: git_message(&e),
            };
            self.set_status(status.clone());
            return Ok(status);
        }

        match self.check() {
            SyncStatus::Behind { .. } => self.pull_inner(),
            other => Ok(other),
        }
    }

    /// Stash-protected pull. Requires a checked-out branch. Uncommitted
    /// changes are stashed first and popped afterwards; a failed stash
    /// aborts the pull entirely.
    pub fn pull(&self) -> Result<SyncStatus, SyncError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(SyncError::GitFailed(
                "another sync operation is in flight".to_string(),
            ));
        }
        let result = self.pull_inner();
        self.busy.store(false, Ordering::SeqCst);
        result
    }

    fn pull_inner(&self) -> Result<SyncStatus, SyncError> {
        let branch = self
            .git(&["symbolic-ref", "--short", "-q", "HEAD"])
            .ok()
            .filter(|b| !b.is_empty());
        if branch.is_none() {
            return Err(SyncError::DetachedHead);
        }

        self.set_status(SyncStatus::Syncing);

        let dirty = match self.git(&["status", "--porcelain"]) {
            Ok(out) => !out.is_empty(),
            Err(e) => {
                self.check();
                return Err(e);
            }
        };
        if dirty {
            if let Err(e) = self.git(&["stash", "push", "--quiet"]) {
                self.check();
                return Err(SyncError::StashFailed(git_message(&e)));
            }
        }

        let pulled = self.git(&["pull", "--quiet"]);

        if dirty {
            if let Err(e) = self.git(&["stash", "pop", "--quiet"]) {
                log::error!(
                    "[tabula.sync.pull] Stash pop failed after pull: {}",
                    git_message(&e)
                );
                self.check();
                return Err(SyncError::StashFailed(git_message(&e)));
            }
        }

        match pulled {
            Ok(_) => Ok(self.check()),
            Err(e) => {
                self.check();
                Err(SyncError::PullFailed(git_message(&e)))
            }
        }
    }

    /// Stage everything and commit. Rejects an empty message and an empty
    /// change set; optionally chains into `push`.
    pub fn commit(&self, message: &str, and_push: bool) -> Result<SyncStatus, SyncError> {
        if message.trim().is_empty() {
            return Err(SyncError::EmptyCommitMessage);
        }
        let porcelain = self.git(&["status", "--porcelain"])?;
        if porcelain.is_empty() {
            return Err(SyncError::NothingToCommit);
        }

        self.set_status(SyncStatus::Syncing);
        self.git(&["add", "-A"])?;
        self.git(&["commit", "-m", message])?;

        if and_push {
            return self.push();
        }
        Ok(self.check())
    }

    /// Push local commits. Rejected unless the status is `ahead` or
    /// `diverged`, the only states with something to push.
    pub fn push(&self) -> Result<SyncStatus, SyncError> {
        let status = self.check();
        if !matches!(
            status,
            SyncStatus::Ahead { .. } | SyncStatus::Diverged { .. }
        ) {
            return Err(SyncError::NothingToPush);
        }

        self.set_status(SyncStatus::Syncing);
        match self.git(&["push", "--quiet"]) {
            Ok(_) => Ok(self.check()),
            Err(e) => {
                self.check();
                Err(SyncError::PushFailed(git_message(&e)))
            }
        }
    }

    fn compute_status(&self) -> SyncStatus {
        match self.git(&["rev-parse", "--is-inside-work-tree"]) {
            Ok(_) => {}
            Err(SyncError::Io(e)) => {
                return SyncStatus::Error {
                    message: e.to_string(),
                }
            }
            Err(_) => {
                self.set_branch(None);
                return SyncStatus::NotARepo;
            }
        }

        let branch = self
            .git(&["symbolic-ref", "--short", "-q", "HEAD"])
            .ok()
            .filter(|b| !b.is_empty());
        self.set_branch(branch);

        let porcelain = match self.git(&["status", "--porcelain"]) {
            Ok(out) => out,
            Err(e) => {
                return SyncStatus::Error {
                    message: git_message(&e),
                }
            }
        };
        if has_unmerged_entries(&porcelain) {
            return SyncStatus::Conflict;
        }
        if !porcelain.is_empty() {
            return SyncStatus::Uncommitted;
        }

        match self.git(&["remote"]) {
            Ok(remotes) if remotes.is_empty() => return SyncStatus::NoRemote,
            Ok(_) => {}
            Err(e) => {
                return SyncStatus::Error {
                    message: git_message(&e),
                }
            }
        }

        // No upstream tracking ref means there is nothing to compare against.
        let counts = match self.git(&["rev-list", "--left-right", "--count", "HEAD...@{upstream}"])
        {
            Ok(out) => out,
            Err(_) => return SyncStatus::NoRemote,
        };
        match parse_ahead_behind(&counts) {
            Some((0, 0)) => SyncStatus::Synced,
            Some((ahead, 0)) => SyncStatus::Ahead { ahead },
            Some((0, behind)) => SyncStatus::Behind { behind },
            Some((ahead, behind)) => SyncStatus::Diverged { ahead, behind },
            None => SyncStatus::Error {
                message: format!("unexpected rev-list output: {}", counts),
            },
        }
    }

    /// Run one git command against the board directory, serialized.
    fn git(&self, args: &[&str]) -> Result<String, SyncError> {
        let _guard = self.git_lock.lock().unwrap();
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(SyncError::GitFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    fn set_status(&self, status: SyncStatus) {
        *self.status.lock().unwrap() = Some(status);
    }

    fn set_branch(&self, branch: Option<String>) {
        *self.branch.lock().unwrap() = branch;
    }
}

/// Porcelain lines with an unmerged code: any `U` on either side, plus the
/// both-added / both-deleted pairs.
fn has_unmerged_entries(porcelain: &str) -> bool {
    porcelain.lines().any(|line| {
        let mut chars = line.chars();
        let x = chars.next().unwrap_or(' ');
        let y = chars.next().unwrap_or(' ');
        x == 'U' || y == 'U' || (x == 'A' && y == 'A') || (x == 'D' && y == 'D')
    })
}

/// `rev-list --left-right --count HEAD...@{upstream}` prints
/// "<ahead>\t<behind>".
fn parse_ahead_behind(counts: &str) -> Option<(u32, u32)> {
    let mut parts = counts.split_whitespace();
    let ahead = parts.next()?.parse().ok()?;
    let behind = parts.next()?.parse().ok()?;
    Some((ahead, behind))
}
