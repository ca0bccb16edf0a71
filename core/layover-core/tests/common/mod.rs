#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use layover_core::{LayoverConfig, SessionOrchestrator, StorageConfig};
use tempfile::TempDir;
use walkdir::WalkDir;

/// A project directory and an isolated storage root.
pub struct Sandbox {
    pub temp: TempDir,
    pub project: PathBuf,
    pub storage: StorageConfig,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).expect("Failed to create project dir");
        let storage = StorageConfig::with_root(temp.path().join("layover-home"));
        storage.ensure_dirs().expect("Failed to create storage dirs");
        Self {
            temp,
            project,
            storage,
        }
    }

    pub fn config(&self) -> LayoverConfig {
        LayoverConfig {
            join_wait_ms: 500,
            stale_session_grace_secs: 0,
            ..LayoverConfig::default()
        }
    }

    pub fn orchestrator(&self) -> SessionOrchestrator {
        SessionOrchestrator::new(self.storage.clone(), self.config())
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.project.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
}

/// Relative path -> contents (None for directories) of every entry under `root`.
pub fn tree_contents(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| !e.path().components().any(|c| c.as_os_str() == ".git"))
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            let data = e.file_type().is_file().then(|| std::fs::read(e.path()).unwrap());
            (rel, data)
        })
        .collect()
}

/// PID of a process that has already exited.
pub fn exited_pid() -> u32 {
    let mut child = std::process::Command::new("true")
        .spawn()
        .expect("Failed to spawn `true`");
    let pid = child.id();
    child.wait().expect("Failed to wait for `true`");
    pid
}

/// Short-lived child processes whose PIDs stand in for concurrent sessions.
/// Killed and reaped on drop.
pub struct LiveProcesses(Vec<std::process::Child>);

impl LiveProcesses {
    pub fn spawn(count: usize) -> Self {
        let children = (0..count)
            .map(|_| {
                std::process::Command::new("sleep")
                    .arg("30")
                    .spawn()
                    .expect("Failed to spawn `sleep`")
            })
            .collect();
        Self(children)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.0.iter().map(|c| c.id()).collect()
    }
}

impl Drop for LiveProcesses {
    fn drop(&mut self) {
        for child in &mut self.0 {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
