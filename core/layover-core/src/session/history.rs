//! Archived session records (`sessions/history/<sessionId>.json`).
//!
//! History is diagnostic only; nothing reads it to decide what to restore.

use std::path::Path;

use chrono::Utc;

use crate::error::Result;
use crate::fs_util::{read_json, remove_path, write_json_atomic};
use crate::identity::is_session_id;

use super::types::{BackupRef, SessionHistoryEntry, SessionStatus};

/// Archives a BackupRef with its completion status.
pub fn archive(
    history_dir: &Path,
    backup: BackupRef,
    status: SessionStatus,
    finished_by_pid: u32,
) -> Result<SessionHistoryEntry> {
    let entry = SessionHistoryEntry {
        backup,
        status,
        finished_at: Utc::now(),
        finished_by_pid,
    };
    let path = history_dir.join(format!("{}.json", entry.backup.session_id));
    write_json_atomic(&path, &entry)?;
    Ok(entry)
}

/// Session ids with an archived record, newest first.
fn history_ids(history_dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(history_dir) else {
        return Vec::new();
    };
    let mut ids: Vec<String> = entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let id = name.strip_suffix(".json")?;
            is_session_id(id).then(|| id.to_string())
        })
        .collect();
    // ULID strings sort in creation order.
    ids.sort_unstable_by(|a, b| b.cmp(a));
    ids
}

/// Reads archived records, newest first. Unreadable records are skipped.
pub fn list_history(history_dir: &Path, limit: Option<usize>) -> Vec<SessionHistoryEntry> {
    history_ids(history_dir)
        .into_iter()
        .filter_map(|id| {
            let path = history_dir.join(format!("{id}.json"));
            match read_json::<SessionHistoryEntry>(&path) {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(session_id = %id, error = %err, "Skipping unreadable history record");
                    None
                }
            }
        })
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

/// Deletes all but the `keep` newest records. Returns how many were removed.
pub fn prune_history(history_dir: &Path, keep: usize) -> Result<usize> {
    let mut removed = 0;
    for id in history_ids(history_dir).into_iter().skip(keep) {
        if remove_path(&history_dir.join(format!("{id}.json")))? {
            removed += 1;
        }
    }
    Ok(removed)
}
