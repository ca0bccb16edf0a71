//! Hides tracked config files from `git status` while an overlay is applied.
//!
//! Uses the index's skip-worktree bit. `unhide` always asks the index which files
//! carry the bit instead of remembering what `hide` did, so it works from a process
//! that never called `hide` (e.g. crash recovery).
//!
//! Every failure here is soft: a warning is logged and the lifecycle carries on.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{io_err, LayoverError, Result};
use crate::target::Target;

/// Files `hide` flagged. Informational; `unhide` does not need it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HiddenFiles {
    pub repo_root: PathBuf,
    /// Paths relative to the project directory.
    pub files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GitVisibilityGuard {
    pathspecs: Vec<String>,
}

impl GitVisibilityGuard {
    pub fn new(pathspecs: Vec<String>) -> Self {
        Self { pathspecs }
    }

    /// Guard over the config paths of all the given targets.
    pub fn for_targets<'a>(targets: impl IntoIterator<Item = &'a Target>) -> Self {
        let mut pathspecs: Vec<String> = Vec::new();
        for spec in targets.into_iter().flat_map(Target::visibility_pathspecs) {
            if !pathspecs.contains(&spec) {
                pathspecs.push(spec);
            }
        }
        Self { pathspecs }
    }

    pub fn pathspecs(&self) -> &[String] {
        &self.pathspecs
    }

    /// Sets skip-worktree on every tracked file under the pathspecs.
    /// `None` when the project is not in a repository or git failed.
    pub fn hide(&self, project: &Path) -> Option<HiddenFiles> {
        let repo_root = repo_root(project)?;
        match self.try_hide(project) {
            Ok(files) => {
                if !files.is_empty() {
                    tracing::debug!(count = files.len(), "Hid tracked config files from git");
                }
                Some(HiddenFiles { repo_root, files })
            }
            Err(err) => {
                tracing::warn!(project = %project.display(), error = %err, "Failed to hide config files from git");
                None
            }
        }
    }

    fn try_hide(&self, project: &Path) -> Result<Vec<String>> {
        let mut args = vec!["ls-files", "-z", "--"];
        args.extend(self.pathspecs.iter().map(String::as_str));
        let tracked = split_nul(&git(project, &args, None)?);
        if tracked.is_empty() {
            return Ok(tracked);
        }
        git(
            project,
            &["update-index", "--skip-worktree", "-z", "--stdin"],
            Some(&join_nul(&tracked)),
        )?;
        Ok(tracked)
    }

    /// Files under the pathspecs that currently carry skip-worktree, per the index.
    pub fn hidden_files(&self, project: &Path) -> Result<Vec<String>> {
        let mut args = vec!["ls-files", "-v", "-z", "--"];
        args.extend(self.pathspecs.iter().map(String::as_str));
        Ok(parse_skip_worktree(&git(project, &args, None)?))
    }

    /// Clears skip-worktree on every flagged file under the pathspecs.
    /// Returns how many files were unhidden (0 outside a repository or on failure).
    pub fn unhide(&self, project: &Path) -> usize {
        if repo_root(project).is_none() {
            return 0;
        }
        let result = self.hidden_files(project).and_then(|flagged| {
            if !flagged.is_empty() {
                git(
                    project,
                    &["update-index", "--no-skip-worktree", "-z", "--stdin"],
                    Some(&join_nul(&flagged)),
                )?;
            }
            Ok(flagged.len())
        });
        match result {
            Ok(count) => {
                if count > 0 {
                    tracing::debug!(count, "Unhid config files in git");
                }
                count
            }
            Err(err) => {
                tracing::warn!(project = %project.display(), error = %err, "Failed to unhide config files in git");
                0
            }
        }
    }
}

/// Top level of the repository containing `project`, if any.
pub fn repo_root(project: &Path) -> Option<PathBuf> {
    let out = git(project, &["rev-parse", "--show-toplevel"], None).ok()?;
    let root = String::from_utf8_lossy(&out).trim().to_string();
    (!root.is_empty()).then(|| PathBuf::from(root))
}

fn git(dir: &Path, args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>> {
    let command = format!("git {}", args.join(" "));
    let mut child = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(io_err(format!("spawn {command}")))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input)
            .map_err(io_err(format!("write stdin of {command}")))?;
    }
    let output = child
        .wait_with_output()
        .map_err(io_err(format!("wait for {command}")))?;

    if !output.status.success() {
        return Err(LayoverError::CommandFailed {
            command,
            details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

fn split_nul(raw: &[u8]) -> Vec<String> {
    raw.split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).to_string())
        .collect()
}

fn join_nul(paths: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for path in paths {
        out.extend_from_slice(path.as_bytes());
        out.push(0);
    }
    out
}

/// Picks paths tagged `S` (or `s`, skip-worktree plus assume-unchanged) from
/// `git ls-files -v -z` output.
fn parse_skip_worktree(raw: &[u8]) -> Vec<String> {
    split_nul(raw)
        .into_iter()
        .filter_map(|entry| {
            let (tag, path) = entry.split_once(' ')?;
            matches!(tag, "S" | "s").then(|| path.to_string())
        })
        .collect()
}
