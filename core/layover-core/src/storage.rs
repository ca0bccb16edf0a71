//! Storage configuration and path management for layover.
//!
//! All coordination state lives under one root directory so that any process,
//! including one started long after a crash, can interpret it:
//!
//! ```text
//! <root>/
//! ├── config.toml
//! ├── .last-maintenance
//! ├── logs/
//! ├── sessions/
//! │   ├── <hash>/backup.json          BackupRef
//! │   ├── <hash>/restore.claim[.<n>]  PID of the process restoring (n-th takeover)
//! │   ├── <hash>/pids/<pid>.json      PidLock
//! │   └── history/<sessionId>.json    archived BackupRef + status
//! ├── backups/<hash>/<sessionId>/     manifest.json, tree/, config-file
//! ├── backups/<hash>/latest           symlink (or plain file) to newest sessionId
//! └── secrets/<hash>/mcp-env.json     SecretsRecord
//! ```
//!
//! Production code uses [`StorageConfig::from_env`]; tests use
//! [`StorageConfig::with_root`] with a temp directory.

use std::path::{Path, PathBuf};

use fs_err as fs;

use crate::error::{io_err, LayoverError, Result};
use crate::identity::ProjectHash;

/// Environment variable overriding the storage root.
pub const HOME_ENV: &str = "LAYOVER_HOME";

const HISTORY_DIR: &str = "history";

/// Central configuration for all layover storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

/// Per-project paths, composed purely from the root and a [`ProjectHash`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    /// `sessions/<hash>/`: created exclusively by the first session.
    pub session_dir: PathBuf,
    /// `sessions/<hash>/pids/`: one lock file per attached process.
    pub lock_dir: PathBuf,
    /// `sessions/<hash>/backup.json`
    pub backup_ref_file: PathBuf,
    /// `sessions/<hash>/restore.claim`; takeovers add `restore.claim.<n>` beside it.
    pub restore_claim_file: PathBuf,
    /// `backups/<hash>/`
    pub backups_dir: PathBuf,
    /// `secrets/<hash>/`
    pub secrets_dir: PathBuf,
    /// `secrets/<hash>/mcp-env.json`
    pub secrets_file: PathBuf,
    /// `sessions/history/` (shared by all projects)
    pub history_dir: PathBuf,
}

impl StorageConfig {
    /// Resolves the root from `LAYOVER_HOME`, falling back to `~/.layover`.
    pub fn from_env() -> Result<Self> {
        if let Some(root) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }
        let home = dirs::home_dir().ok_or(LayoverError::HomeNotFound)?;
        Ok(Self::with_root(home.join(".layover")))
    }

    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Global Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to config.toml (optional user settings).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Freshness marker for rate-limited maintenance.
    pub fn maintenance_marker(&self) -> PathBuf {
        self.root.join(".last-maintenance")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Directories
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.sessions_dir().join(HISTORY_DIR)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn secrets_dir(&self) -> PathBuf {
        self.root.join("secrets")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Per-Project Paths
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn project_paths(&self, hash: &ProjectHash) -> ProjectPaths {
        let session_dir = self.sessions_dir().join(hash.as_str());
        let secrets_dir = self.secrets_dir().join(hash.as_str());
        ProjectPaths {
            lock_dir: session_dir.join("pids"),
            backup_ref_file: session_dir.join("backup.json"),
            restore_claim_file: session_dir.join("restore.claim"),
            session_dir,
            backups_dir: self.backups_dir().join(hash.as_str()),
            secrets_file: secrets_dir.join("mcp-env.json"),
            secrets_dir,
            history_dir: self.history_dir(),
        }
    }

    /// Path to one snapshot: `backups/<hash>/<sessionId>/`.
    pub fn snapshot_dir(&self, hash: &ProjectHash, session_id: &str) -> PathBuf {
        self.backups_dir().join(hash.as_str()).join(session_id)
    }

    /// Hashes of every project that has session metadata.
    pub fn session_hashes(&self) -> Vec<ProjectHash> {
        list_hash_dirs(&self.sessions_dir())
    }

    /// Hashes of every project that has snapshots.
    pub fn backup_hashes(&self) -> Vec<ProjectHash> {
        list_hash_dirs(&self.backups_dir())
    }

    /// Hashes of every project that has stored secrets.
    pub fn secret_hashes(&self) -> Vec<ProjectHash> {
        list_hash_dirs(&self.secrets_dir())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Directory Creation
    // ─────────────────────────────────────────────────────────────────────────────

    /// Ensures the root directory and standard subdirectories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.sessions_dir(),
            self.history_dir(),
            self.backups_dir(),
            self.secrets_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(io_err("create storage directory"))?;
        }
        Ok(())
    }
}

fn list_hash_dirs(dir: &Path) -> Vec<ProjectHash> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut hashes: Vec<ProjectHash> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| ProjectHash::parse(&e.file_name().to_string_lossy()))
        .collect();
    hashes.sort();
    hashes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hash() -> ProjectHash {
        ProjectHash::parse("00112233aabbccdd").unwrap()
    }

    #[test]
    fn test_with_root_sets_custom_path() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/test-layover"));
        assert_eq!(config.root(), Path::new("/tmp/test-layover"));
    }

    #[test]
    fn test_project_paths_layout() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/layover"));
        let paths = config.project_paths(&hash());
        assert_eq!(
            paths.session_dir,
            PathBuf::from("/tmp/layover/sessions/00112233aabbccdd")
        );
        assert_eq!(
            paths.lock_dir,
            PathBuf::from("/tmp/layover/sessions/00112233aabbccdd/pids")
        );
        assert_eq!(
            paths.backup_ref_file,
            PathBuf::from("/tmp/layover/sessions/00112233aabbccdd/backup.json")
        );
        assert_eq!(
            paths.backups_dir,
            PathBuf::from("/tmp/layover/backups/00112233aabbccdd")
        );
        assert_eq!(
            paths.secrets_file,
            PathBuf::from("/tmp/layover/secrets/00112233aabbccdd/mcp-env.json")
        );
        assert_eq!(
            paths.history_dir,
            PathBuf::from("/tmp/layover/sessions/history")
        );
    }

    #[test]
    fn test_snapshot_dir_path() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/layover"));
        assert_eq!(
            config.snapshot_dir(&hash(), "01HZX"),
            PathBuf::from("/tmp/layover/backups/00112233aabbccdd/01HZX")
        );
    }

    #[test]
    fn test_ensure_dirs_creates_structure() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig::with_root(temp.path().join("root"));
        config.ensure_dirs().unwrap();
        assert!(config.sessions_dir().is_dir());
        assert!(config.history_dir().is_dir());
        assert!(config.backups_dir().is_dir());
        assert!(config.secrets_dir().is_dir());
    }

    #[test]
    fn test_session_hashes_skips_history_and_junk() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig::with_root(temp.path().to_path_buf());
        config.ensure_dirs().unwrap();
        std::fs::create_dir_all(config.sessions_dir().join(hash().as_str())).unwrap();
        std::fs::create_dir_all(config.sessions_dir().join("not-a-hash")).unwrap();
        assert_eq!(config.session_hashes(), vec![hash()]);
    }
}
