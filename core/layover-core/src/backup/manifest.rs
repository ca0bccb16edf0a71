//! Per-snapshot manifest (`backups/<hash>/<sessionId>/manifest.json`).
//!
//! The manifest describes what the overlay changed. It is never consulted to decide
//! *what* to restore; the saved tree and config-file copy are the restore source.
//! It does record *where* the snapshot came from (project and target paths).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::target::Target;

pub const MANIFEST_VERSION: u32 = 1;

/// Files an attach step wrote into one overlay category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayRecord {
    /// Written where nothing existed before.
    pub added: Vec<String>,
    /// Replaced a pre-existing file.
    pub overridden: Vec<String>,
}

impl OverlayRecord {
    pub fn record(&mut self, name: &str, existed: bool) {
        let list = if existed {
            &mut self.overridden
        } else {
            &mut self.added
        };
        if !list.iter().any(|n| n == name) {
            list.push(name.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.overridden.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub version: u32,
    pub session_id: String,
    pub project_path: String,
    pub target: String,
    /// Relative to `project_path`.
    pub config_dir: String,
    /// Relative to `project_path`.
    pub config_file: String,
    pub created_at: DateTime<Utc>,
    pub created_by_pid: u32,
    /// Whether the config directory existed when the snapshot was taken.
    pub has_config_tree: bool,
    /// MD5 of the pre-overlay config file, if it existed.
    #[serde(default)]
    pub config_file_hash: Option<String>,
    #[serde(default)]
    pub agents: OverlayRecord,
    #[serde(default)]
    pub commands: OverlayRecord,
    /// Relative to `project_path`.
    #[serde(default)]
    pub rules_file: Option<String>,
    /// Byte length of the rules file before rules were appended.
    #[serde(default)]
    pub rules_append_offset: Option<u64>,
    #[serde(default)]
    pub secrets_extracted: bool,
}

impl BackupManifest {
    pub fn new(session_id: &str, project_path: &str, target: &Target) -> Self {
        Self {
            version: MANIFEST_VERSION,
            session_id: session_id.to_string(),
            project_path: project_path.to_string(),
            target: target.name.clone(),
            config_dir: target.config_dir.clone(),
            config_file: target.config_file.clone(),
            created_at: Utc::now(),
            created_by_pid: std::process::id(),
            has_config_tree: false,
            config_file_hash: None,
            agents: OverlayRecord::default(),
            commands: OverlayRecord::default(),
            rules_file: None,
            rules_append_offset: None,
            secrets_extracted: false,
        }
    }

    pub fn config_dir_path(&self) -> PathBuf {
        Path::new(&self.project_path).join(&self.config_dir)
    }

    pub fn config_file_path(&self) -> PathBuf {
        Path::new(&self.project_path).join(&self.config_file)
    }

    /// True when the config file is covered by the tree copy.
    pub fn config_file_in_dir(&self) -> bool {
        Path::new(&self.config_file).starts_with(&self.config_dir)
    }

    /// Whether anything was overlaid (used by `status`).
    pub fn has_overlay(&self) -> bool {
        !self.agents.is_empty() || !self.commands.is_empty() || self.rules_append_offset.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_separates_added_and_overridden() {
        let mut record = OverlayRecord::default();
        record.record("a.md", false);
        record.record("b.md", true);
        record.record("a.md", false);
        assert_eq!(record.added, vec!["a.md"]);
        assert_eq!(record.overridden, vec!["b.md"]);
    }

    #[test]
    fn test_manifest_paths_follow_target() {
        let target = Target::builtins().remove(0);
        let manifest = BackupManifest::new("01J00000000000000000000000", "/work/app", &target);
        assert_eq!(manifest.config_dir_path(), PathBuf::from("/work/app/.claude"));
        assert_eq!(manifest.config_file_path(), PathBuf::from("/work/app/.mcp.json"));
        assert!(!manifest.config_file_in_dir());
        assert!(!manifest.has_overlay());
    }

    #[test]
    fn test_older_manifest_without_overlay_fields_parses() {
        let raw = serde_json::json!({
            "version": 1,
            "session_id": "01J00000000000000000000000",
            "project_path": "/p",
            "target": "claude",
            "config_dir": ".claude",
            "config_file": ".mcp.json",
            "created_at": "2026-01-01T00:00:00Z",
            "created_by_pid": 1,
            "has_config_tree": true
        });
        let manifest: BackupManifest = serde_json::from_value(raw).unwrap();
        assert!(manifest.agents.is_empty());
        assert!(!manifest.secrets_extracted);
    }
}
