//! Snapshot storage: create, atomic restore, retention.
//!
//! # Snapshot Layout
//!
//! ```text
//! backups/<hash>/
//! ├── latest                   symlink -> <sessionId> (plain file fallback)
//! ├── .<sessionId>.partial/    snapshot under construction
//! └── <sessionId>/
//!     ├── manifest.json
//!     ├── tree/                copy of the config directory (absent if it didn't exist)
//!     └── config-file          copy of an out-of-tree config file (absent if it didn't exist)
//! ```
//!
//! A snapshot is assembled under a `.partial` name and renamed into place once
//! complete, so a `<sessionId>/` directory is always a whole snapshot.
//!
//! # Restore Transaction
//!
//! 1. copy `tree/` to `<config_dir>.layover-restore-<sessionId>-<nonce>` (a sibling)
//! 2. remove the live config directory
//! 3. rename the temp directory into place
//!
//! Dying between 2 and 3 strands the temp directory with the live one missing;
//! [`recover_interrupted_restores`] renames it into place on the next startup.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{io_err, LayoverError, Result};
use crate::fs_util::{
    copy_dir_recursive, read_json, remove_path, rename_or_copy, write_atomic, write_json_atomic,
    MoveKind,
};
use crate::identity::{is_session_id, new_session_id, normalize_project_path, session_id_time, ProjectHash};
use crate::storage::StorageConfig;
use crate::target::Target;

use super::manifest::BackupManifest;

const MANIFEST_FILE: &str = "manifest.json";
const TREE_DIR: &str = "tree";
const CONFIG_FILE_COPY: &str = "config-file";
const LATEST: &str = "latest";
const PARTIAL_SUFFIX: &str = ".partial";
const RESTORE_MARKER: &str = ".layover-restore-";

static RE_RESTORE_TEMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<base>.+)\.layover-restore-(?P<sid>[0-9A-HJKMNP-TV-Z]{26})-[0-9a-f]{8}$")
        .unwrap()
});

/// A freshly created snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupInfo {
    pub session_id: String,
    pub snapshot_dir: PathBuf,
    pub manifest: BackupManifest,
}

/// One entry of [`BackupStore::list`].
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSummary {
    pub session_id: String,
    pub snapshot_dir: PathBuf,
    pub created_at: Option<DateTime<Utc>>,
    pub has_config_tree: bool,
    /// `None` when the manifest is missing or unreadable.
    pub manifest: Option<BackupManifest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFileAction {
    /// The config file lives inside the tree; nothing separate to do.
    CoveredByTree,
    Restored,
    /// It did not exist before the overlay.
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestoreReport {
    pub session_id: String,
    pub config_dir: PathBuf,
    /// False when the snapshot had no tree and the live directory was removed instead.
    pub tree_restored: bool,
    pub move_kind: Option<MoveKind>,
    pub config_file: ConfigFileAction,
}

/// Outcome of scanning for stranded restore temp directories.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterruptedRestores {
    /// Temp directory renamed into the missing live directory's place.
    pub restored: Option<PathBuf>,
    /// Stale temp directories deleted.
    pub removed: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    storage: StorageConfig,
}

impl BackupStore {
    pub fn new(storage: StorageConfig) -> Self {
        Self { storage }
    }

    fn hash_dir(&self, hash: &ProjectHash) -> PathBuf {
        self.storage.backups_dir().join(hash.as_str())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Create
    // ─────────────────────────────────────────────────────────────────────────────

    /// Snapshots the target's config directory (and out-of-tree config file) under a
    /// newly allocated session id.
    pub fn create(&self, project: &Path, hash: &ProjectHash, target: &Target) -> Result<BackupInfo> {
        self.create_with_id(project, hash, target, &new_session_id())
    }

    /// Like [`create`](Self::create), with the session id already chosen (the one
    /// recorded in the BackupRef).
    pub fn create_with_id(
        &self,
        project: &Path,
        hash: &ProjectHash,
        target: &Target,
        session_id: &str,
    ) -> Result<BackupInfo> {
        let hash_dir = self.hash_dir(hash);
        let snapshot_dir = hash_dir.join(session_id);
        if snapshot_dir.exists() {
            return Err(LayoverError::Io {
                context: format!("snapshot {} already exists", snapshot_dir.display()),
                source: io::Error::from(io::ErrorKind::AlreadyExists),
            });
        }

        let partial = hash_dir.join(format!(".{session_id}{PARTIAL_SUFFIX}"));
        remove_path(&partial)?;
        fs::create_dir_all(&partial).map_err(io_err("create snapshot directory"))?;

        let project_path = normalize_project_path(project);
        let manifest = match populate_snapshot(&partial, &project_path, target, session_id)
            .and_then(|manifest| {
                fs::rename(&partial, &snapshot_dir).map_err(io_err("publish snapshot"))?;
                Ok(manifest)
            }) {
            Ok(manifest) => manifest,
            Err(err) => {
                let _ = remove_path(&partial);
                return Err(err);
            }
        };

        if let Err(err) = point_latest(&hash_dir, session_id) {
            tracing::warn!(project = %hash, error = %err, "Failed to update latest snapshot pointer");
        }

        tracing::info!(
            project = %hash,
            session_id,
            has_config_tree = manifest.has_config_tree,
            "Snapshot created"
        );
        Ok(BackupInfo {
            session_id: session_id.to_string(),
            snapshot_dir,
            manifest,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Restore
    // ─────────────────────────────────────────────────────────────────────────────

    /// Puts the project's config back exactly as it was when `session_id` was taken.
    ///
    /// An unknown session id fails with [`LayoverError::SnapshotNotFound`] before
    /// anything on disk is touched.
    pub fn restore(&self, hash: &ProjectHash, session_id: &str) -> Result<RestoreReport> {
        let snapshot_dir = self.hash_dir(hash).join(session_id);
        if !is_session_id(session_id) || !snapshot_dir.is_dir() {
            return Err(LayoverError::SnapshotNotFound {
                project: hash.to_string(),
                session_id: session_id.to_string(),
            });
        }
        let manifest = self.read_manifest(hash, session_id)?;
        if !Path::new(&manifest.project_path).is_dir() {
            return Err(LayoverError::InvalidProjectPath {
                path: manifest.project_path.clone(),
                reason: "project directory no longer exists".to_string(),
            });
        }

        let live = manifest.config_dir_path();
        let tree = snapshot_dir.join(TREE_DIR);
        let (tree_restored, move_kind) = if tree.is_dir() {
            (true, Some(swap_in_tree(&tree, &live, session_id)?))
        } else {
            remove_path(&live)?;
            (false, None)
        };

        let config_file = if manifest.config_file_in_dir() {
            ConfigFileAction::CoveredByTree
        } else {
            let saved = snapshot_dir.join(CONFIG_FILE_COPY);
            let live_file = manifest.config_file_path();
            if saved.is_file() {
                let data = fs::read(&saved).map_err(io_err("read saved config file"))?;
                write_atomic(&live_file, &data)?;
                ConfigFileAction::Restored
            } else {
                remove_path(&live_file)?;
                ConfigFileAction::Removed
            }
        };

        tracing::info!(project = %hash, session_id, tree_restored, "Snapshot restored");
        Ok(RestoreReport {
            session_id: session_id.to_string(),
            config_dir: live,
            tree_restored,
            move_kind,
            config_file,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Manifest
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn read_manifest(&self, hash: &ProjectHash, session_id: &str) -> Result<BackupManifest> {
        let path = self.hash_dir(hash).join(session_id).join(MANIFEST_FILE);
        match read_json::<BackupManifest>(&path) {
            Ok(Some(manifest)) => Ok(manifest),
            Ok(None) => Err(LayoverError::ManifestMissing(path)),
            Err(err) => {
                tracing::debug!(error = %err, "Corrupt manifest");
                Err(LayoverError::ManifestMissing(path))
            }
        }
    }

    pub fn write_manifest(&self, hash: &ProjectHash, manifest: &BackupManifest) -> Result<()> {
        let path = self
            .hash_dir(hash)
            .join(&manifest.session_id)
            .join(MANIFEST_FILE);
        write_json_atomic(&path, manifest)
    }

    /// Read-modify-write of a manifest.
    pub fn update_manifest(
        &self,
        hash: &ProjectHash,
        session_id: &str,
        update: impl FnOnce(&mut BackupManifest),
    ) -> Result<BackupManifest> {
        let mut manifest = self.read_manifest(hash, session_id)?;
        update(&mut manifest);
        self.write_manifest(hash, &manifest)?;
        Ok(manifest)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Listing & Retention
    // ─────────────────────────────────────────────────────────────────────────────

    /// Complete snapshot ids, newest first.
    pub fn session_ids(&self, hash: &ProjectHash) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.hash_dir(hash)) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| is_session_id(name))
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids
    }

    pub fn list(&self, hash: &ProjectHash) -> Vec<SnapshotSummary> {
        self.session_ids(hash)
            .into_iter()
            .map(|session_id| {
                let snapshot_dir = self.hash_dir(hash).join(&session_id);
                SnapshotSummary {
                    created_at: session_id_time(&session_id),
                    has_config_tree: snapshot_dir.join(TREE_DIR).is_dir(),
                    manifest: self.read_manifest(hash, &session_id).ok(),
                    snapshot_dir,
                    session_id,
                }
            })
            .collect()
    }

    /// Session id the `latest` pointer names, if any.
    pub fn latest(&self, hash: &ProjectHash) -> Option<String> {
        let pointer = self.hash_dir(hash).join(LATEST);
        let raw = match std::fs::read_link(&pointer) {
            Ok(target) => target.file_name()?.to_string_lossy().to_string(),
            Err(_) => std::fs::read_to_string(&pointer).ok()?.trim().to_string(),
        };
        is_session_id(&raw).then_some(raw)
    }

    /// Deletes all but the `keep_last` most recent snapshots. Returns the removed ids.
    pub fn prune(&self, hash: &ProjectHash, keep_last: usize) -> Result<Vec<String>> {
        let hash_dir = self.hash_dir(hash);
        let ids = self.session_ids(hash);
        let mut removed = Vec::new();
        for id in ids.iter().skip(keep_last) {
            remove_path(&hash_dir.join(id))?;
            removed.push(id.clone());
        }

        if !removed.is_empty() {
            let latest = self.latest(hash);
            if latest.as_ref().map_or(true, |l| removed.contains(l)) {
                match ids.iter().take(keep_last).next() {
                    Some(newest) => point_latest(&hash_dir, newest)?,
                    None => {
                        remove_path(&hash_dir.join(LATEST))?;
                    }
                }
            }
            tracing::debug!(project = %hash, removed = removed.len(), "Pruned snapshots");
        }
        Ok(removed)
    }

    /// Project path recorded by the newest readable manifest.
    pub fn recorded_project_path(&self, hash: &ProjectHash) -> Option<String> {
        self.session_ids(hash)
            .iter()
            .find_map(|id| self.read_manifest(hash, id).ok())
            .map(|m| m.project_path)
    }

    /// Deletes every snapshot of a project.
    pub fn remove_all(&self, hash: &ProjectHash) -> Result<bool> {
        remove_path(&self.hash_dir(hash))
    }
}

fn populate_snapshot(
    dir: &Path,
    project_path: &str,
    target: &Target,
    session_id: &str,
) -> Result<BackupManifest> {
    let project = Path::new(project_path);
    let mut manifest = BackupManifest::new(session_id, project_path, target);

    let config_dir = target.config_dir_path(project);
    if config_dir.is_dir() {
        copy_dir_recursive(&config_dir, &dir.join(TREE_DIR))?;
        manifest.has_config_tree = true;
    }

    let config_file = target.config_file_path(project);
    match fs::read(&config_file) {
        Ok(data) => {
            manifest.config_file_hash = Some(format!("{:x}", md5::compute(&data)));
            if !target.config_file_in_dir() {
                fs::write(dir.join(CONFIG_FILE_COPY), &data)
                    .map_err(io_err("save config file copy"))?;
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(io_err("read config file")(err)),
    }

    write_json_atomic(&dir.join(MANIFEST_FILE), &manifest)?;
    Ok(manifest)
}

/// Sibling temp path for restoring into `live`.
fn restore_temp_path(live: &Path, session_id: &str) -> PathBuf {
    let name = live
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    live.with_file_name(format!(
        "{name}{RESTORE_MARKER}{session_id}-{:08x}",
        rand::random::<u32>()
    ))
}

fn swap_in_tree(tree: &Path, live: &Path, session_id: &str) -> Result<MoveKind> {
    let temp = restore_temp_path(live, session_id);
    let result = copy_dir_recursive(tree, &temp)
        .and_then(|()| remove_path(live))
        .and_then(|_| rename_or_copy(&temp, live));
    if result.is_err() {
        if let Err(err) = remove_path(&temp) {
            tracing::warn!(temp = %temp.display(), error = %err, "Failed to clean up restore temp");
        }
    }
    result
}

/// Points `latest` at `session_id`: a relative symlink swapped in by rename, or a
/// plain file holding the id where symlinks are unavailable.
fn point_latest(hash_dir: &Path, session_id: &str) -> Result<()> {
    let pointer = hash_dir.join(LATEST);
    #[cfg(unix)]
    {
        let tmp = hash_dir.join(format!(".{LATEST}-{:08x}", rand::random::<u32>()));
        if std::os::unix::fs::symlink(session_id, &tmp).is_ok() {
            match std::fs::rename(&tmp, &pointer) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    let _ = std::fs::remove_file(&tmp);
                    tracing::debug!(error = %err, "Symlink swap failed; writing plain pointer");
                }
            }
        }
    }
    write_atomic(&pointer, session_id.as_bytes())
}

/// Resolves stranded restore temp directories next to `config_dir`.
///
/// If `config_dir` is missing, the newest temp directory is the interrupted restore's
/// content and is renamed into place. Every other temp directory is debris and is
/// deleted.
pub fn recover_interrupted_restores(config_dir: &Path) -> Result<InterruptedRestores> {
    let mut outcome = InterruptedRestores::default();
    let (Some(parent), Some(base)) = (
        config_dir.parent(),
        config_dir.file_name().map(|n| n.to_string_lossy().to_string()),
    ) else {
        return Ok(outcome);
    };
    let Ok(entries) = std::fs::read_dir(parent) else {
        return Ok(outcome);
    };

    let mut candidates: Vec<(String, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            let caps = RE_RESTORE_TEMP.captures(&name)?;
            (caps["base"] == *base).then(|| (caps["sid"].to_string(), entry.path()))
        })
        .collect();
    if candidates.is_empty() {
        return Ok(outcome);
    }
    candidates.sort_by(|a, b| b.cmp(a));

    let live_missing = std::fs::symlink_metadata(config_dir).is_err();
    let mut rest = candidates.into_iter();
    if live_missing {
        if let Some((session_id, temp)) = rest.next() {
            rename_or_copy(&temp, config_dir)?;
            tracing::info!(
                config_dir = %config_dir.display(),
                session_id = %session_id,
                "Recovered interrupted restore"
            );
            outcome.restored = Some(temp);
        }
    }
    for (_, temp) in rest {
        remove_path(&temp)?;
        tracing::debug!(temp = %temp.display(), "Removed stale restore temp");
        outcome.removed.push(temp);
    }
    Ok(outcome)
}


#[cfg(test)]
mod tests {
    use super::tests_helper::tree_contents;
    use super::*;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _temp: TempDir,
        project: PathBuf,
        store: BackupStore,
        hash: ProjectHash,
        target: Target,
    }

    fn fixture() -> Fixture {
        let temp = tempdir().unwrap();
        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        let store = BackupStore::new(StorageConfig::with_root(temp.path().join("root")));
        let hash = ProjectHash::of(&project);
        Fixture {
            _temp: temp,
            project,
            store,
            hash,
            target: Target::builtins().remove(0),
        }
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_create_without_config_dir() {
        let f = fixture();
        let info = f.store.create(&f.project, &f.hash, &f.target).unwrap();
        assert!(!info.manifest.has_config_tree);
        assert!(info.manifest.config_file_hash.is_none());
        assert!(info.snapshot_dir.join(MANIFEST_FILE).is_file());
        assert!(!info.snapshot_dir.join(TREE_DIR).exists());
        assert_eq!(f.store.latest(&f.hash), Some(info.session_id));
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let f = fixture();
        let config_dir = f.project.join(".claude");
        write(&config_dir.join("a.md"), "alpha");
        write(&config_dir.join("nested/b.json"), "{\"b\":1}");
        let before = tree_contents(&config_dir);

        let info = f.store.create(&f.project, &f.hash, &f.target).unwrap();

        write(&config_dir.join("a.md"), "changed");
        std::fs::remove_file(config_dir.join("nested/b.json")).unwrap();
        write(&config_dir.join("agents/new.md"), "added");

        let report = f.store.restore(&f.hash, &info.session_id).unwrap();
        assert!(report.tree_restored);
        assert_eq!(report.move_kind, Some(MoveKind::Renamed));
        assert_eq!(tree_contents(&config_dir), before);
    }

    #[test]
    fn test_restore_without_tree_removes_live_dir() {
        let f = fixture();
        let info = f.store.create(&f.project, &f.hash, &f.target).unwrap();
        write(&f.project.join(".claude/agents/x.md"), "overlay");

        let report = f.store.restore(&f.hash, &info.session_id).unwrap();
        assert!(!report.tree_restored);
        assert!(!f.project.join(".claude").exists());
    }

    #[test]
    fn test_restore_unknown_session_is_not_found_and_touches_nothing() {
        let f = fixture();
        let config_dir = f.project.join(".claude");
        write(&config_dir.join("keep.md"), "keep");
        let before = tree_contents(&f.project);

        let err = f
            .store
            .restore(&f.hash, "01HZZZZZZZZZZZZZZZZZZZZZZZ")
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(tree_contents(&f.project), before);
    }

    #[test]
    fn test_out_of_tree_config_file_restored() {
        let f = fixture();
        write(&f.project.join(".mcp.json"), "{\"mcpServers\":{}}");
        let info = f.store.create(&f.project, &f.hash, &f.target).unwrap();
        assert!(info.manifest.config_file_hash.is_some());

        write(&f.project.join(".mcp.json"), "{\"overlay\":true}");
        let report = f.store.restore(&f.hash, &info.session_id).unwrap();
        assert_eq!(report.config_file, ConfigFileAction::Restored);
        assert_eq!(
            std::fs::read_to_string(f.project.join(".mcp.json")).unwrap(),
            "{\"mcpServers\":{}}"
        );
    }

    #[test]
    fn test_out_of_tree_config_file_removed_when_absent_before() {
        let f = fixture();
        let info = f.store.create(&f.project, &f.hash, &f.target).unwrap();
        write(&f.project.join(".mcp.json"), "{}");

        let report = f.store.restore(&f.hash, &info.session_id).unwrap();
        assert_eq!(report.config_file, ConfigFileAction::Removed);
        assert!(!f.project.join(".mcp.json").exists());
    }

    #[test]
    fn test_in_tree_config_file_travels_with_tree() {
        let f = fixture();
        let cursor = Target::builtins().remove(1);
        write(&f.project.join(".cursor/mcp.json"), "{\"a\":1}");
        let info = f.store.create(&f.project, &f.hash, &cursor).unwrap();
        assert!(!info.snapshot_dir.join(CONFIG_FILE_COPY).exists());

        write(&f.project.join(".cursor/mcp.json"), "{\"a\":2}");
        let report = f.store.restore(&f.hash, &info.session_id).unwrap();
        assert_eq!(report.config_file, ConfigFileAction::CoveredByTree);
        assert_eq!(
            std::fs::read_to_string(f.project.join(".cursor/mcp.json")).unwrap(),
            "{\"a\":1}"
        );
    }

    #[test]
    fn test_prune_keeps_most_recent() {
        let f = fixture();
        let ids: Vec<String> = (0..5)
            .map(|_| f.store.create(&f.project, &f.hash, &f.target).unwrap().session_id)
            .collect();

        let removed = f.store.prune(&f.hash, 2).unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(f.store.session_ids(&f.hash), vec![ids[4].clone(), ids[3].clone()]);
        assert_eq!(f.store.latest(&f.hash), Some(ids[4].clone()));
    }

    #[test]
    fn test_prune_to_zero_drops_latest_pointer() {
        let f = fixture();
        f.store.create(&f.project, &f.hash, &f.target).unwrap();
        f.store.prune(&f.hash, 0).unwrap();
        assert!(f.store.session_ids(&f.hash).is_empty());
        assert_eq!(f.store.latest(&f.hash), None);
    }

    #[test]
    fn test_update_manifest_persists() {
        let f = fixture();
        let info = f.store.create(&f.project, &f.hash, &f.target).unwrap();
        f.store
            .update_manifest(&f.hash, &info.session_id, |m| {
                m.agents.record("reviewer.md", false);
                m.secrets_extracted = true;
            })
            .unwrap();
        let manifest = f.store.read_manifest(&f.hash, &info.session_id).unwrap();
        assert_eq!(manifest.agents.added, vec!["reviewer.md"]);
        assert!(manifest.secrets_extracted);
    }

    #[test]
    fn test_list_is_newest_first() {
        let f = fixture();
        let a = f.store.create(&f.project, &f.hash, &f.target).unwrap();
        let b = f.store.create(&f.project, &f.hash, &f.target).unwrap();
        let listed: Vec<String> = f.store.list(&f.hash).into_iter().map(|s| s.session_id).collect();
        assert_eq!(listed, vec![b.session_id, a.session_id]);
    }

    #[test]
    fn test_interrupted_restore_renamed_into_place() {
        let f = fixture();
        let config_dir = f.project.join(".claude");
        write(&config_dir.join("settings.json"), "{}");
        let before = tree_contents(&config_dir);
        let info = f.store.create(&f.project, &f.hash, &f.target).unwrap();

        // Died after removing the live dir, before the rename.
        let temp = restore_temp_path(&config_dir, &info.session_id);
        copy_dir_recursive(&info.snapshot_dir.join(TREE_DIR), &temp).unwrap();
        std::fs::remove_dir_all(&config_dir).unwrap();

        let outcome = recover_interrupted_restores(&config_dir).unwrap();
        assert_eq!(outcome.restored, Some(temp.clone()));
        assert!(!temp.exists());
        assert_eq!(tree_contents(&config_dir), before);
    }

    #[test]
    fn test_stale_restore_temp_deleted_when_live_present() {
        let f = fixture();
        let config_dir = f.project.join(".claude");
        write(&config_dir.join("settings.json"), "live");
        let temp = restore_temp_path(&config_dir, &new_session_id());
        write(&temp.join("settings.json"), "stale");
        // Unrelated sibling with a similar name is left alone.
        let other = f.project.join(".claudex.layover-restore-junk");
        std::fs::create_dir_all(&other).unwrap();

        let outcome = recover_interrupted_restores(&config_dir).unwrap();
        assert!(outcome.restored.is_none());
        assert_eq!(outcome.removed, vec![temp.clone()]);
        assert!(!temp.exists());
        assert!(other.exists());
        assert_eq!(
            std::fs::read_to_string(config_dir.join("settings.json")).unwrap(),
            "live"
        );
    }

    #[test]
    fn test_restore_temp_name_matches_recovery_pattern() {
        let temp = restore_temp_path(Path::new("/p/.claude"), &new_session_id());
        let name = temp.file_name().unwrap().to_string_lossy().to_string();
        let caps = RE_RESTORE_TEMP.captures(&name).unwrap();
        assert_eq!(&caps["base"], ".claude");
    }
}
