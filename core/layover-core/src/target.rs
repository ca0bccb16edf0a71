//! Target descriptors: where an external agent tool keeps its project configuration.
//!
//! All paths are relative to the project root.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LayoverError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    /// Configuration directory snapshotted and restored as a whole (e.g. `.claude`).
    pub config_dir: String,
    /// File holding the MCP server section (may live outside `config_dir`).
    pub config_file: String,
    /// Key of the MCP server map inside `config_file`.
    #[serde(default = "default_mcp_key")]
    pub mcp_section_key: String,
    /// File that rule templates are appended to.
    #[serde(default)]
    pub rules_file: Option<String>,
}

fn default_mcp_key() -> String {
    "mcpServers".to_string()
}

impl Target {
    pub fn new(name: &str, config_dir: &str, config_file: &str, rules_file: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            config_dir: config_dir.to_string(),
            config_file: config_file.to_string(),
            mcp_section_key: default_mcp_key(),
            rules_file: rules_file.map(str::to_string),
        }
    }

    /// Built-in targets, in display order.
    pub fn builtins() -> Vec<Target> {
        vec![
            Target::new("claude", ".claude", ".mcp.json", Some(".claude/CLAUDE.md")),
            Target::new(
                "cursor",
                ".cursor",
                ".cursor/mcp.json",
                Some(".cursor/rules/layover.mdc"),
            ),
            Target::new(
                "gemini",
                ".gemini",
                ".gemini/settings.json",
                Some(".gemini/GEMINI.md"),
            ),
        ]
    }

    /// Rejects descriptors that would write outside the project or outside
    /// what a restore puts back. Every overlay write must land in `config_dir`
    /// or in `config_file`, since those are the only paths snapshotted.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| LayoverError::InvalidTarget {
            name: self.name.clone(),
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if !is_inside_project(&self.config_dir) {
            return Err(invalid(format!(
                "config_dir {:?} must be a relative path inside the project",
                self.config_dir
            )));
        }
        if !is_inside_project(&self.config_file) {
            return Err(invalid(format!(
                "config_file {:?} must be a relative path inside the project",
                self.config_file
            )));
        }
        if Path::new(&self.config_file) == Path::new(&self.config_dir) {
            return Err(invalid("config_file cannot be the config_dir itself".to_string()));
        }
        if self.mcp_section_key.is_empty() {
            return Err(invalid("mcp_section_key is empty".to_string()));
        }
        if let Some(rules) = &self.rules_file {
            let rules_path = Path::new(rules);
            if !is_inside_project(rules)
                || !rules_path.starts_with(&self.config_dir)
                || rules_path == Path::new(&self.config_dir)
            {
                return Err(invalid(format!(
                    "rules_file {rules:?} must be a file under config_dir {:?}",
                    self.config_dir
                )));
            }
        }
        Ok(())
    }

    pub fn config_dir_path(&self, project: &Path) -> PathBuf {
        project.join(&self.config_dir)
    }

    pub fn config_file_path(&self, project: &Path) -> PathBuf {
        project.join(&self.config_file)
    }

    pub fn rules_file_path(&self, project: &Path) -> Option<PathBuf> {
        self.rules_file.as_ref().map(|f| project.join(f))
    }

    /// True when the config file is covered by the config directory snapshot.
    pub fn config_file_in_dir(&self) -> bool {
        Path::new(&self.config_file).starts_with(&self.config_dir)
    }

    /// Paths (relative to the project) that version control should stop reporting.
    pub fn visibility_pathspecs(&self) -> Vec<String> {
        let mut specs = vec![self.config_dir.clone()];
        if !self.config_file_in_dir() {
            specs.push(self.config_file.clone());
        }
        specs
    }
}

/// Non-empty, relative, and made only of plain names (no `.`, `..` or roots).
fn is_inside_project(path: &str) -> bool {
    let path = Path::new(path);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_are_unique() {
        let names: Vec<String> = Target::builtins().into_iter().map(|t| t.name).collect();
        let unique: std::collections::HashSet<&String> = names.iter().collect();
        assert_eq!(names.len(), unique.len());
    }

    #[test]
    fn test_claude_config_file_is_outside_dir() {
        let claude = Target::builtins().remove(0);
        assert!(!claude.config_file_in_dir());
        assert_eq!(claude.visibility_pathspecs(), vec![".claude", ".mcp.json"]);
    }

    #[test]
    fn test_cursor_config_file_is_inside_dir() {
        let cursor = Target::builtins().remove(1);
        assert!(cursor.config_file_in_dir());
        assert_eq!(cursor.visibility_pathspecs(), vec![".cursor"]);
    }

    #[test]
    fn test_paths_are_relative_to_project() {
        let claude = Target::builtins().remove(0);
        let project = Path::new("/work/app");
        assert_eq!(claude.config_dir_path(project), PathBuf::from("/work/app/.claude"));
        assert_eq!(claude.config_file_path(project), PathBuf::from("/work/app/.mcp.json"));
    }

    #[test]
    fn test_builtins_are_valid() {
        for target in Target::builtins() {
            target.validate().unwrap();
        }
    }

    #[test]
    fn test_config_dir_must_stay_in_project() {
        for dir in ["", ".", "..", "/etc", "../sibling", "a/../b", "./.aider"] {
            let target = Target::new("aider", dir, ".aider.json", None);
            let err = target.validate().unwrap_err();
            assert!(
                matches!(err, LayoverError::InvalidTarget { .. }),
                "{dir:?} accepted"
            );
        }
    }

    #[test]
    fn test_config_file_must_stay_in_project() {
        for file in ["", "/tmp/mcp.json", "../mcp.json", ".aider"] {
            let target = Target::new("aider", ".aider", file, None);
            assert!(target.validate().is_err(), "{file:?} accepted");
        }
    }

    #[test]
    fn test_rules_file_must_sit_under_config_dir() {
        let outside = Target::new("codex", ".codex", ".codex/config.json", Some("AGENTS.md"));
        let err = outside.validate().unwrap_err();
        assert!(err.to_string().contains("AGENTS.md"));

        let is_dir = Target::new("codex", ".codex", ".codex/config.json", Some(".codex"));
        assert!(is_dir.validate().is_err());

        let prefix_only = Target::new("codex", ".codex", ".codex/config.json", Some(".codex2/r.md"));
        assert!(prefix_only.validate().is_err());

        let nested = Target::new("codex", ".codex", "codex.json", Some(".codex/rules/layover.md"));
        nested.validate().unwrap();
    }
}
