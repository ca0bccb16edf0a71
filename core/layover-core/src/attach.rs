//! Writing overlay content into a project.
//!
//! Content is opaque: a list of named templates. Agents and commands become files in
//! the target's config directory; rules are appended to the target's rules file. Every
//! write is recorded in the snapshot's manifest so `status` can show what changed.

use std::ffi::OsStr;
use std::io::Write;
use std::path::Path;

use fs_err as fs;

use crate::backup::BackupManifest;
use crate::error::{io_err, Result};
use crate::fs_util::write_atomic;
use crate::target::Target;

/// Writes overlay content and records what it overrode.
pub trait AttachEngine {
    fn attach(&self, project: &Path, target: &Target, manifest: &mut BackupManifest) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Agent,
    Command,
    Rule,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 3] = [TemplateKind::Agent, TemplateKind::Command, TemplateKind::Rule];

    /// Directory name, both in a template source and under the config directory.
    pub fn dir_name(self) -> &'static str {
        match self {
            TemplateKind::Agent => "agents",
            TemplateKind::Command => "commands",
            TemplateKind::Rule => "rules",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub kind: TemplateKind,
    /// Plain file name, e.g. `reviewer.md`.
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateSet {
    templates: Vec<Template>,
}

impl TemplateSet {
    pub fn new(templates: Vec<Template>) -> Self {
        Self { templates }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads `agents/`, `commands/` and `rules/` from `dir`. Missing subdirectories
    /// contribute nothing; files are taken in name order.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut templates = Vec::new();
        for kind in TemplateKind::ALL {
            let sub = dir.join(kind.dir_name());
            if !sub.is_dir() {
                continue;
            }
            let mut files: Vec<_> = fs::read_dir(&sub)
                .map_err(io_err("read template directory"))?
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            files.sort();
            for path in files {
                let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                    continue;
                };
                let content = fs::read_to_string(&path).map_err(io_err("read template"))?;
                templates.push(Template { kind, name, content });
            }
        }
        Ok(Self { templates })
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl AttachEngine for TemplateSet {
    fn attach(&self, project: &Path, target: &Target, manifest: &mut BackupManifest) -> Result<()> {
        let config_dir = target.config_dir_path(project);
        let mut rules = Vec::new();

        for template in &self.templates {
            if Path::new(&template.name).file_name() != Some(OsStr::new(&template.name)) {
                tracing::warn!(name = %template.name, "Skipping template with a non-plain name");
                continue;
            }
            let record = match template.kind {
                TemplateKind::Agent => &mut manifest.agents,
                TemplateKind::Command => &mut manifest.commands,
                TemplateKind::Rule => {
                    rules.push(template);
                    continue;
                }
            };
            let path = config_dir.join(template.kind.dir_name()).join(&template.name);
            let existed = path.exists();
            write_atomic(&path, template.content.as_bytes())?;
            record.record(&template.name, existed);
        }

        if rules.is_empty() {
            return Ok(());
        }
        let (Some(rules_file), Some(rules_path)) =
            (target.rules_file.as_ref(), target.rules_file_path(project))
        else {
            tracing::warn!(target = %target.name, "Target has no rules file; rules not attached");
            return Ok(());
        };

        let offset = fs::metadata(&rules_path).map(|m| m.len()).unwrap_or(0);
        if let Some(parent) = rules_path.parent() {
            fs::create_dir_all(parent).map_err(io_err("create rules directory"))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&rules_path)
            .map_err(io_err("open rules file"))?;
        for rule in rules {
            let block = format!("\n<!-- layover:{} -->\n{}\n", rule.name, rule.content.trim_end());
            file.write_all(block.as_bytes())
                .map_err(io_err("append rule"))?;
        }

        manifest.rules_file = Some(rules_file.clone());
        if manifest.rules_append_offset.is_none() {
            manifest.rules_append_offset = Some(offset);
        }
        Ok(())
    }
}
