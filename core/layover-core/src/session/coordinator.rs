//! First-session election, joining, and last-session detection.
//!
//! The mutex is `create_dir(sessions/<hash>)`: exactly one process succeeds, and it
//! needs no cleanup if it is killed, because a crashed owner leaves behind a lock file
//! whose PID the next scan finds dead.
//!
//! ## First session
//!
//! 1. `create_dir(sessions/<hash>)` succeeds
//! 2. create `pids/` and write our PidLock
//! 3. write `backup.json` (atomic rename)
//!
//! ## Joiner
//!
//! `create_dir` fails with `AlreadyExists`. We write our PidLock, then wait up to
//! `join_wait_ms` for `backup.json`. If it never shows up and no other lock is live,
//! the directory is debris from a first session that died between steps 1 and 3: we
//! remove it and retry as first. If a restore is underway (live `restore.claim`), we
//! back off until the directory is gone and retry.
//!
//! ## Release
//!
//! Remove our PidLock, prune dead ones, and if nobody is left, claim the restore.
//! Only the claimant restores; `finalize` removes the session directory afterwards.

use std::io;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::config::LayoverConfig;
use crate::error::{io_err, LayoverError, Result};
use crate::fs_util::{path_age, read_json, remove_path, write_json_atomic};
use crate::identity::{new_session_id, ProjectHash};
use crate::process::{probe_pid, process_start_time};
use crate::storage::{ProjectPaths, StorageConfig};

use super::history;
use super::lock::{
    create_lock_dir, prune_dead_locks, read_claim, release_claim, remove_pid_lock, scan_locks,
    try_claim, write_pid_lock, ClaimResult,
};
use super::types::{
    AcquireOutcome, BackupHint, BackupRef, PidLock, ReleaseOutcome, SessionHistoryEntry,
    SessionSnapshot, SessionStatus,
};

const MAX_ACQUIRE_ATTEMPTS: usize = 5;
const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Upper bound on waiting for another process's restore to finish.
const RESTORE_WAIT: Duration = Duration::from_secs(30);

enum JoinResult {
    Joined(AcquireOutcome),
    Retry,
}

#[derive(Debug, Clone)]
pub struct SessionCoordinator {
    storage: StorageConfig,
    pid: u32,
    join_wait: Duration,
}

impl SessionCoordinator {
    pub fn new(storage: StorageConfig, config: &LayoverConfig) -> Self {
        Self {
            storage,
            pid: std::process::id(),
            join_wait: Duration::from_millis(config.join_wait_ms),
        }
    }

    /// Overrides the PID recorded in lock files and claims.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Acquire
    // ─────────────────────────────────────────────────────────────────────────────

    /// Registers this process with the project, electing it first if nobody else is.
    ///
    /// `hint` names the snapshot the caller will create if it turns out to be first;
    /// without one, a fresh session id is allocated.
    pub fn acquire(
        &self,
        hash: &ProjectHash,
        project_path: &str,
        target: &str,
        hint: Option<BackupHint>,
    ) -> Result<AcquireOutcome> {
        let paths = self.storage.project_paths(hash);
        fs_err::create_dir_all(self.storage.sessions_dir())
            .map_err(io_err("create sessions directory"))?;

        for attempt in 0..MAX_ACQUIRE_ATTEMPTS {
            match std::fs::create_dir(&paths.session_dir) {
                Ok(()) => {
                    return self
                        .become_first(hash, &paths, project_path, target, hint)
                        .inspect_err(|_| {
                            let _ = remove_path(&paths.session_dir);
                        });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    match self.join(&paths, project_path, target)? {
                        JoinResult::Joined(outcome) => {
                            tracing::debug!(
                                project = %hash,
                                pid = self.pid,
                                has_backup_ref = outcome.backup_ref.is_some(),
                                "Joined existing session"
                            );
                            return Ok(outcome);
                        }
                        JoinResult::Retry => {
                            tracing::debug!(project = %hash, attempt, "Retrying acquire");
                        }
                    }
                }
                Err(err) => {
                    return Err(io_err(format!("create {}", paths.session_dir.display()))(err));
                }
            }
        }

        Err(LayoverError::AcquireContention(hash.to_string()))
    }

    fn own_lock(&self, project_path: &str, target: &str) -> PidLock {
        PidLock {
            pid: self.pid,
            started_at: Utc::now(),
            proc_started: process_start_time(self.pid),
            target: target.to_string(),
            project_path: project_path.to_string(),
        }
    }

    fn become_first(
        &self,
        hash: &ProjectHash,
        paths: &ProjectPaths,
        project_path: &str,
        target: &str,
        hint: Option<BackupHint>,
    ) -> Result<AcquireOutcome> {
        create_lock_dir(&paths.lock_dir)?;
        write_pid_lock(&paths.lock_dir, &self.own_lock(project_path, target))?;

        let hint = hint.unwrap_or_else(|| {
            let session_id = new_session_id();
            BackupHint {
                backup_path: self.storage.snapshot_dir(hash, &session_id),
                session_id,
            }
        });
        let backup_ref = BackupRef {
            session_id: hint.session_id,
            backup_path: hint.backup_path,
            project_path: project_path.to_string(),
            target: target.to_string(),
            created_at: Utc::now(),
            created_by_pid: self.pid,
        };
        write_json_atomic(&paths.backup_ref_file, &backup_ref)?;

        tracing::info!(
            project = %hash,
            session_id = %backup_ref.session_id,
            pid = self.pid,
            "First session for project"
        );
        Ok(AcquireOutcome {
            is_first: true,
            backup_ref: Some(backup_ref),
        })
    }

    fn join(&self, paths: &ProjectPaths, project_path: &str, target: &str) -> Result<JoinResult> {
        let deadline = Instant::now() + self.join_wait;
        let mut lock_written = false;

        loop {
            if let Some(holder) = read_claim(&paths.restore_claim_file) {
                if holder != self.pid && probe_pid(holder).is_alive() {
                    if lock_written {
                        remove_pid_lock(&paths.lock_dir, self.pid)?;
                    }
                    tracing::debug!(holder, "Restore in progress; waiting for it to finish");
                    wait_for_removal(paths, RESTORE_WAIT);
                    return Ok(JoinResult::Retry);
                }
            }

            if !lock_written {
                match write_pid_lock(&paths.lock_dir, &self.own_lock(project_path, target)) {
                    Ok(()) => lock_written = true,
                    Err(err) if err.io_kind() == Some(io::ErrorKind::NotFound) => {
                        if !paths.session_dir.exists() {
                            return Ok(JoinResult::Retry);
                        }
                        // First session has not created pids/ yet.
                    }
                    Err(err) => return Err(err),
                }
            }

            if lock_written {
                if let Some(backup_ref) = read_json::<BackupRef>(&paths.backup_ref_file)? {
                    return Ok(JoinResult::Joined(AcquireOutcome {
                        is_first: false,
                        backup_ref: Some(backup_ref),
                    }));
                }
            }

            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        let (live, _) = prune_dead_locks(&paths.lock_dir);
        let others = live.iter().filter(|&&pid| pid != self.pid).count();
        if others == 0 {
            tracing::warn!(
                session_dir = %paths.session_dir.display(),
                "Session directory has no BackupRef and no live owner; removing"
            );
            remove_path(&paths.session_dir)?;
            return Ok(JoinResult::Retry);
        }

        Ok(JoinResult::Joined(AcquireOutcome {
            is_first: false,
            backup_ref: None,
        }))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Release
    // ─────────────────────────────────────────────────────────────────────────────

    /// Detaches this process. `should_restore` is true only for the last live process,
    /// and only after it has won the restore claim.
    pub fn release(&self, hash: &ProjectHash) -> Result<ReleaseOutcome> {
        let paths = self.storage.project_paths(hash);
        remove_pid_lock(&paths.lock_dir, self.pid)?;

        let (live, pruned) = prune_dead_locks(&paths.lock_dir);
        let live_pids: Vec<u32> = live.into_iter().filter(|&pid| pid != self.pid).collect();
        if !pruned.is_empty() {
            tracing::debug!(project = %hash, ?pruned, "Pruned dead session locks");
        }

        let backup_ref = read_json::<BackupRef>(&paths.backup_ref_file)?;
        let should_restore = live_pids.is_empty()
            && backup_ref.is_some()
            && self.claim_restore(hash)? == ClaimResult::Claimed;

        tracing::debug!(
            project = %hash,
            pid = self.pid,
            live = live_pids.len(),
            should_restore,
            "Released session"
        );
        Ok(ReleaseOutcome {
            should_restore,
            backup_ref,
            live_pids,
            pruned_pids: pruned,
        })
    }

    /// Claims the exclusive right to restore this project.
    pub fn claim_restore(&self, hash: &ProjectHash) -> Result<ClaimResult> {
        let paths = self.storage.project_paths(hash);
        try_claim(&paths.restore_claim_file, self.pid)
    }

    /// Gives up a claim after a restore failed, so a later process can retry.
    pub fn abandon_claim(&self, hash: &ProjectHash) -> Result<()> {
        let paths = self.storage.project_paths(hash);
        release_claim(&paths.restore_claim_file, self.pid)?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────────

    /// True iff a BackupRef exists and at least one lock belongs to a live PID.
    pub fn is_active(&self, hash: &ProjectHash) -> bool {
        let paths = self.storage.project_paths(hash);
        paths.backup_ref_file.exists()
            && scan_locks(&paths.lock_dir)
                .iter()
                .any(|l| l.liveness.is_alive())
    }

    pub fn read_backup_ref(&self, hash: &ProjectHash) -> Result<Option<BackupRef>> {
        read_json(&self.storage.project_paths(hash).backup_ref_file)
    }

    /// Live PIDs attached to the project, deleting lock files of dead ones.
    pub fn live_pids(&self, hash: &ProjectHash) -> Vec<u32> {
        prune_dead_locks(&self.storage.project_paths(hash).lock_dir).0
    }

    /// Read-only view of a project's session metadata.
    pub fn status(&self, hash: &ProjectHash) -> SessionSnapshot {
        let paths = self.storage.project_paths(hash);
        let backup_ref = read_json(&paths.backup_ref_file).unwrap_or_else(|err| {
            tracing::debug!(project = %hash, error = %err, "Unreadable BackupRef");
            None
        });
        SessionSnapshot {
            backup_ref,
            locks: scan_locks(&paths.lock_dir),
            restore_claimed_by: read_claim(&paths.restore_claim_file),
        }
    }

    /// Age of the session directory, used to spare first sessions mid-acquire.
    pub fn session_dir_age(&self, hash: &ProjectHash) -> Option<chrono::Duration> {
        path_age(&self.storage.project_paths(hash).session_dir)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────────────

    /// Archives the BackupRef with `status` and deletes the session directory.
    /// Call only after the restore has been dealt with.
    pub fn finalize(
        &self,
        hash: &ProjectHash,
        status: SessionStatus,
    ) -> Result<Option<SessionHistoryEntry>> {
        let paths = self.storage.project_paths(hash);
        let entry = match read_json::<BackupRef>(&paths.backup_ref_file)? {
            Some(backup_ref) => Some(history::archive(
                &paths.history_dir,
                backup_ref,
                status,
                self.pid,
            )?),
            None => None,
        };
        remove_path(&paths.session_dir)?;
        tracing::info!(project = %hash, ?status, "Session finalized");
        Ok(entry)
    }

    /// Removes a session directory that carries no BackupRef.
    pub fn remove_stale(&self, hash: &ProjectHash) -> Result<bool> {
        remove_path(&self.storage.project_paths(hash).session_dir)
    }

    pub fn list_history(&self, limit: Option<usize>) -> Vec<SessionHistoryEntry> {
        history::list_history(&self.storage.history_dir(), limit)
    }

    pub fn prune_history(&self, keep: usize) -> Result<usize> {
        history::prune_history(&self.storage.history_dir(), keep)
    }
}

fn wait_for_removal(paths: &ProjectPaths, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while paths.session_dir.exists() && Instant::now() < deadline {
        std::thread::sleep(POLL_INTERVAL);
    }
}
