//! User settings loaded from `<root>/config.toml`.
//!
//! A missing file means defaults. Every field is optional in the file.

use std::path::Path;

use chrono::Duration;
use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, LayoverError, Result};
use crate::target::Target;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoverConfig {
    /// Snapshots retained per project after a restore.
    pub keep_backups: usize,
    /// Archived session records retained.
    pub history_limit: usize,
    /// Minimum time between heavy maintenance passes.
    pub maintenance_interval_hours: i64,
    /// How long a joining session waits for the first session's BackupRef.
    pub join_wait_ms: u64,
    /// Session directories without a BackupRef younger than this are left alone.
    pub stale_session_grace_secs: i64,
    /// Extra targets beyond the built-ins. A custom target with a built-in name wins.
    pub targets: Vec<Target>,
}

impl Default for LayoverConfig {
    fn default() -> Self {
        Self {
            keep_backups: 5,
            history_limit: 100,
            maintenance_interval_hours: 24,
            join_wait_ms: 2_000,
            stale_session_grace_secs: 60,
            targets: Vec::new(),
        }
    }
}

impl LayoverConfig {
    /// Loads the config file, returning defaults if it doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(io_err("read config.toml")(err)),
        };
        let config: Self = toml::from_str(&content).map_err(|e| LayoverError::ConfigMalformed {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
        for target in &config.targets {
            target.validate().map_err(|e| LayoverError::ConfigMalformed {
                path: path.to_path_buf(),
                details: e.to_string(),
            })?;
        }
        Ok(config)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::hours(self.maintenance_interval_hours.max(0))
    }

    pub fn stale_session_grace(&self) -> Duration {
        Duration::seconds(self.stale_session_grace_secs.max(0))
    }

    /// All known targets: custom ones first, then built-ins not shadowed by them.
    pub fn all_targets(&self) -> Vec<Target> {
        let mut targets = self.targets.clone();
        for builtin in Target::builtins() {
            if !targets.iter().any(|t| t.name.eq_ignore_ascii_case(&builtin.name)) {
                targets.push(builtin);
            }
        }
        targets
    }

    /// Looks a target up by name (case-insensitive).
    pub fn target(&self, name: &str) -> Result<Target> {
        self.all_targets()
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| LayoverError::UnknownTarget(name.to_string()))
    }
}
