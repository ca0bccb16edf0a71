//! PID lock files and restore claims.
//!
//! # Lock Directory Structure
//!
//! ```text
//! sessions/<hash>/
//! ├── backup.json      BackupRef (written once by the first session)
//! ├── restore.claim    PID of the process currently restoring (no-clobber publish)
//! ├── restore.claim.1  next generation, published when the holder above died
//! └── pids/
//!     ├── 4242.json    PidLock for PID 4242
//!     └── 4310.json
//! ```
//!
//! A lock file is named by its PID so liveness can be tested even when its JSON body
//! is unreadable.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs_err as fs;

use tempfile::NamedTempFile;

use crate::error::{io_err, json_err, LayoverError, Result};
use crate::fs_util::{path_age, read_json, remove_path};
use crate::process::{probe_pid, Liveness};

use super::types::{LockObservation, PidLock};

const LOCK_EXT: &str = "json";

pub fn lock_file_path(lock_dir: &Path, pid: u32) -> PathBuf {
    lock_dir.join(format!("{}.{}", pid, LOCK_EXT))
}

fn parse_lock_file_name(path: &Path) -> Option<u32> {
    if path.extension().and_then(|e| e.to_str()) != Some(LOCK_EXT) {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// Writes (or refreshes) a process's own lock file.
///
/// The lock directory is never created here: it belongs to whichever process won the
/// exclusive create, and recreating it after a restore removed it would resurrect a
/// session with nothing to restore. A missing directory surfaces as `NotFound`.
pub fn write_pid_lock(lock_dir: &Path, lock: &PidLock) -> Result<()> {
    let payload = serde_json::to_vec_pretty(lock).map_err(json_err("serialize lock"))?;
    let mut tmp = NamedTempFile::new_in(lock_dir)
        .map_err(io_err(format!("create lock in {}", lock_dir.display())))?;
    tmp.write_all(&payload).map_err(io_err("write lock"))?;
    let path = lock_file_path(lock_dir, lock.pid);
    tmp.persist(&path).map_err(|e| LayoverError::Io {
        context: format!("persist {}", path.display()),
        source: e.error,
    })?;
    Ok(())
}

/// Creates the lock directory inside a freshly created session directory.
pub fn create_lock_dir(lock_dir: &Path) -> Result<()> {
    match fs::create_dir(lock_dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(io_err("create lock directory")(err)),
    }
}

/// Deletes a process's lock file. Already gone is fine.
pub fn remove_pid_lock(lock_dir: &Path, pid: u32) -> Result<bool> {
    match fs::remove_file(lock_file_path(lock_dir, pid)) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err("remove lock file")(err)),
    }
}

/// Reads every lock file and probes its PID. Does not modify anything.
pub fn scan_locks(lock_dir: &Path) -> Vec<LockObservation> {
    let Ok(entries) = std::fs::read_dir(lock_dir) else {
        return Vec::new();
    };

    let mut observations: Vec<LockObservation> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let pid = parse_lock_file_name(&path)?;
            let lock = match read_json::<PidLock>(&path) {
                Ok(lock) => lock,
                Err(err) => {
                    tracing::debug!(pid, error = %err, "Unreadable lock file");
                    None
                }
            };
            Some(LockObservation {
                pid,
                liveness: probe_pid(pid),
                lock,
            })
        })
        .collect();
    observations.sort_by_key(|o| o.pid);
    observations
}

/// Scans the lock directory, deleting lock files whose PID is dead.
/// Returns `(live_pids, pruned_pids)`.
pub fn prune_dead_locks(lock_dir: &Path) -> (Vec<u32>, Vec<u32>) {
    let mut live = Vec::new();
    let mut pruned = Vec::new();
    for observation in scan_locks(lock_dir) {
        if observation.liveness.is_alive() {
            live.push(observation.pid);
            continue;
        }
        match remove_pid_lock(lock_dir, observation.pid) {
            Ok(_) => pruned.push(observation.pid),
            Err(err) => {
                tracing::warn!(pid = observation.pid, error = %err, "Failed to prune dead lock");
            }
        }
    }
    (live, pruned)
}

/// Result of trying to claim the right to restore a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    Claimed,
    /// Another live process holds the claim.
    HeldBy(u32),
    /// A claim exists but names no PID. Treated as held until it is old enough to
    /// be abandoned debris.
    Unreadable,
    /// The session directory is gone (someone else finished the restore).
    SessionGone,
}

const MAX_CLAIM_ATTEMPTS: usize = 5;

/// Age after which a claim that names no PID may be taken over.
pub const UNREADABLE_CLAIM_GRACE: Duration = Duration::from_secs(60);

enum Publish {
    Created,
    Exists,
    SessionGone,
}

/// One claim generation: `restore.claim` is generation 0, `restore.claim.<n>` the
/// n-th takeover. The highest generation present is the claim in force.
struct ClaimGeneration {
    generation: u64,
    path: PathBuf,
}

fn generation_path(claim_file: &Path, generation: u64) -> PathBuf {
    if generation == 0 {
        return claim_file.to_path_buf();
    }
    let mut name = claim_file.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{generation}"));
    claim_file.with_file_name(name)
}

fn current_generation(claim_file: &Path) -> Option<ClaimGeneration> {
    let base = claim_file.file_name()?.to_str()?;
    let entries = std::fs::read_dir(claim_file.parent()?).ok()?;
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            let generation = if name == base {
                0
            } else {
                name.strip_prefix(base)?.strip_prefix('.')?.parse().ok()?
            };
            Some(ClaimGeneration {
                generation,
                path: entry.path(),
            })
        })
        .max_by_key(|c| c.generation)
}

/// Claims the right to restore.
///
/// Claims are never overwritten or deleted by a competitor. Each one is published
/// complete (temp file, then no-clobber link) under a generation number, so it never
/// exists without a PID in it. Taking over from a dead holder means publishing the
/// next generation; of several processes racing for it, exactly one succeeds.
pub fn try_claim(claim_file: &Path, pid: u32) -> Result<ClaimResult> {
    for _ in 0..MAX_CLAIM_ATTEMPTS {
        let next = match current_generation(claim_file) {
            None => 0,
            Some(current) => {
                let raw = match std::fs::read_to_string(&current.path) {
                    Ok(raw) => raw,
                    // Abandoned by its holder between listing and reading.
                    Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                    Err(err) => return Err(io_err("read restore claim")(err)),
                };
                match parse_claim(&raw) {
                    Some(holder) if holder == pid => return Ok(ClaimResult::Claimed),
                    Some(holder) if probe_pid(holder) != Liveness::Dead => {
                        return Ok(ClaimResult::HeldBy(holder));
                    }
                    Some(holder) => {
                        tracing::debug!(holder, "Taking over restore claim from dead process");
                    }
                    None => {
                        let abandoned = path_age(&current.path).is_some_and(|age| {
                            age.to_std().is_ok_and(|age| age >= UNREADABLE_CLAIM_GRACE)
                        });
                        if !abandoned {
                            return Ok(ClaimResult::Unreadable);
                        }
                        tracing::debug!("Taking over unreadable restore claim");
                    }
                }
                current.generation + 1
            }
        };

        match publish_claim(&generation_path(claim_file, next), pid)? {
            Publish::Created => return Ok(ClaimResult::Claimed),
            Publish::SessionGone => return Ok(ClaimResult::SessionGone),
            Publish::Exists => {}
        }
    }

    Ok(match read_claim(claim_file) {
        Some(holder) if holder == pid => ClaimResult::Claimed,
        Some(holder) => ClaimResult::HeldBy(holder),
        None if claim_file.parent().is_some_and(Path::exists) => ClaimResult::Unreadable,
        None => ClaimResult::SessionGone,
    })
}

fn publish_claim(path: &Path, pid: u32) -> Result<Publish> {
    let Some(session_dir) = path.parent() else {
        return Ok(Publish::SessionGone);
    };
    let mut tmp = match NamedTempFile::new_in(session_dir) {
        Ok(tmp) => tmp,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Publish::SessionGone),
        Err(err) => return Err(io_err("create restore claim")(err)),
    };
    tmp.write_all(pid.to_string().as_bytes())
        .map_err(io_err("write restore claim"))?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(Publish::Created),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(Publish::Exists),
        Err(e) if e.error.kind() == io::ErrorKind::NotFound => Ok(Publish::SessionGone),
        Err(e) => Err(LayoverError::Io {
            context: format!("persist {}", path.display()),
            source: e.error,
        }),
    }
}

/// Withdraws `pid`'s claim if it is the one in force. Returns whether it was.
pub fn release_claim(claim_file: &Path, pid: u32) -> Result<bool> {
    let Some(current) = current_generation(claim_file) else {
        return Ok(false);
    };
    let holder = std::fs::read_to_string(&current.path)
        .ok()
        .and_then(|raw| parse_claim(&raw));
    if holder != Some(pid) {
        return Ok(false);
    }
    remove_path(&current.path)
}

fn parse_claim(raw: &str) -> Option<u32> {
    raw.trim().parse().ok()
}

/// PID named by the claim in force, if any.
pub fn read_claim(claim_file: &Path) -> Option<u32> {
    let current = current_generation(claim_file)?;
    std::fs::read_to_string(current.path)
        .ok()
        .and_then(|raw| parse_claim(&raw))
}
