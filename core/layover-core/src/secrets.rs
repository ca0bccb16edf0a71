//! Per-project store of MCP server secrets (`secrets/<hash>/mcp-env.json`).
//!
//! Each server's `env` and `args` are captured from the live config file before an
//! overlay touches it, and written back after the restore. Values are kept as raw JSON
//! (key order preserved) so they round-trip unchanged. Stored in cleartext.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, json_err, Result};
use crate::fs_util::{read_json, remove_path, write_atomic, write_json_atomic};
use crate::identity::{normalize_project_path, ProjectHash};
use crate::storage::StorageConfig;
use crate::target::Target;

pub const SECRETS_VERSION: u32 = 1;

/// Sensitive fields of one MCP server entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSecrets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretsRecord {
    pub version: u32,
    pub project_path: String,
    pub target: String,
    /// Relative to `project_path`.
    pub config_file: String,
    pub mcp_section_key: String,
    pub servers: BTreeMap<String, ServerSecrets>,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SecretsVault {
    storage: StorageConfig,
}

impl SecretsVault {
    pub fn new(storage: StorageConfig) -> Self {
        Self { storage }
    }

    /// Captures `env`/`args` of every server in the target's MCP section.
    ///
    /// The live file is not modified. Returns `None` when the file or the section
    /// does not exist.
    pub fn extract(&self, project: &Path, target: &Target) -> Result<Option<SecretsRecord>> {
        let Some(config) = read_config(&target.config_file_path(project))? else {
            return Ok(None);
        };
        let Some(section) = config
            .get(&target.mcp_section_key)
            .and_then(Value::as_object)
        else {
            return Ok(None);
        };

        let servers = section
            .iter()
            .filter_map(|(name, server)| {
                let secrets = ServerSecrets {
                    env: server.get("env").cloned(),
                    args: server.get("args").cloned(),
                };
                (secrets.env.is_some() || secrets.args.is_some())
                    .then(|| (name.clone(), secrets))
            })
            .collect();

        Ok(Some(SecretsRecord {
            version: SECRETS_VERSION,
            project_path: normalize_project_path(project),
            target: target.name.clone(),
            config_file: target.config_file.clone(),
            mcp_section_key: target.mcp_section_key.clone(),
            servers,
            extracted_at: Utc::now(),
        }))
    }

    pub fn save(&self, hash: &ProjectHash, record: &SecretsRecord) -> Result<()> {
        write_json_atomic(&self.storage.project_paths(hash).secrets_file, record)?;
        tracing::debug!(project = %hash, servers = record.servers.len(), "Secrets saved");
        Ok(())
    }

    pub fn load(&self, hash: &ProjectHash) -> Result<Option<SecretsRecord>> {
        read_json(&self.storage.project_paths(hash).secrets_file)
    }

    /// Deletes the project's stored secrets. Returns false if there were none.
    pub fn clear(&self, hash: &ProjectHash) -> Result<bool> {
        remove_path(&self.storage.project_paths(hash).secrets_dir)
    }

    /// Writes captured values back into servers still present in the live config file.
    /// Returns how many servers were changed.
    pub fn apply(&self, project: &Path, record: &SecretsRecord) -> Result<usize> {
        let path = project.join(&record.config_file);
        let Some(mut config) = read_config(&path)? else {
            return Ok(0);
        };
        let Some(section) = config
            .get_mut(&record.mcp_section_key)
            .and_then(Value::as_object_mut)
        else {
            return Ok(0);
        };

        let mut changed = 0;
        for (name, secrets) in &record.servers {
            let Some(server) = section.get_mut(name).and_then(Value::as_object_mut) else {
                continue;
            };
            let mut touched = false;
            for (key, value) in [("env", &secrets.env), ("args", &secrets.args)] {
                if let Some(value) = value {
                    if server.get(key) != Some(value) {
                        server.insert(key.to_string(), value.clone());
                        touched = true;
                    }
                }
            }
            if touched {
                changed += 1;
            }
        }

        if changed > 0 {
            let mut payload =
                serde_json::to_vec_pretty(&config).map_err(json_err("serialize config file"))?;
            payload.push(b'\n');
            write_atomic(&path, &payload)?;
            tracing::debug!(path = %path.display(), changed, "Secrets applied");
        }
        Ok(changed)
    }
}

fn read_config(path: &Path) -> Result<Option<Value>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err("read config file")(err)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(json_err(format!("parse {}", path.display())))
}
