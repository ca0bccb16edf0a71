//! Serialized session records.
//!
//! **Breaking changes are allowed** between versions; any process reading a record it
//! cannot parse treats it as corrupt and logs it.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::process::Liveness;

/// One file per live process attached to a project: `pids/<pid>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidLock {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    /// Process start time as reported by the OS (Unix seconds), when known.
    #[serde(default)]
    pub proc_started: Option<u64>,
    pub target: String,
    pub project_path: String,
}

/// The single record that a project's workspace is overlaid and must be restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRef {
    pub session_id: String,
    pub backup_path: PathBuf,
    pub project_path: String,
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub created_by_pid: u32,
}

/// Pre-allocated identity for the snapshot the first session will create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupHint {
    pub session_id: String,
    pub backup_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Restored by the last session to release.
    Completed,
    /// Restored by crash recovery after every owner died.
    Recovered,
    /// Could not be restored (snapshot missing).
    Failed,
}

/// Archived BackupRef, kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHistoryEntry {
    #[serde(flatten)]
    pub backup: BackupRef,
    pub status: SessionStatus,
    pub finished_at: DateTime<Utc>,
    pub finished_by_pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireOutcome {
    /// This process won the exclusive create and owns the snapshot.
    pub is_first: bool,
    /// `None` only for a joiner whose first session never published its BackupRef
    /// within the join wait.
    pub backup_ref: Option<BackupRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// This process is the last one and has claimed the restore.
    pub should_restore: bool,
    pub backup_ref: Option<BackupRef>,
    /// PIDs still attached after the scan.
    pub live_pids: Vec<u32>,
    /// Lock files removed because their PID was dead.
    pub pruned_pids: Vec<u32>,
}

/// A lock file as observed by a liveness scan.
#[derive(Debug, Clone, PartialEq)]
pub struct LockObservation {
    pub pid: u32,
    pub liveness: Liveness,
    /// `None` when the file could not be parsed.
    pub lock: Option<PidLock>,
}

/// Snapshot of one project's session metadata for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub backup_ref: Option<BackupRef>,
    pub locks: Vec<LockObservation>,
    pub restore_claimed_by: Option<u32>,
}

impl SessionSnapshot {
    pub fn live_pids(&self) -> Vec<u32> {
        self.locks
            .iter()
            .filter(|l| l.liveness.is_alive())
            .map(|l| l.pid)
            .collect()
    }
}
