//! The acquire → attach → run → release → restore lifecycle.
//!
//! ```text
//! start:  ensure_dirs → recover → acquire
//!         first:  hide → snapshot → extract secrets → attach → manifest
//! finish: release
//!         last:   restore → prune → unhide → secrets apply/clear → finalize
//! ```
//!
//! Running the external process between `start` and `finish` is the caller's job.

use std::path::{Path, PathBuf};

use crate::attach::AttachEngine;
use crate::backup::{BackupStore, SnapshotSummary};
use crate::config::LayoverConfig;
use crate::error::{LayoverError, Result};
use crate::git::{GitVisibilityGuard, HiddenFiles};
use crate::identity::{new_session_id, normalize_project_path, ProjectHash};
use crate::recovery::{CrashRecoveryScanner, RecoveryStats, Teardown, TeardownReport};
use crate::secrets::SecretsVault;
use crate::session::{
    BackupHint, BackupRef, ClaimResult, SessionCoordinator, SessionHistoryEntry, SessionSnapshot,
    SessionStatus,
};
use crate::storage::StorageConfig;
use crate::target::Target;

/// A session this process has joined and must `finish`.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub project_dir: PathBuf,
    pub hash: ProjectHash,
    pub target: Target,
    pub is_first: bool,
    pub backup_ref: Option<BackupRef>,
    pub hidden: Option<HiddenFiles>,
    /// What the startup recovery pass did.
    pub recovery: RecoveryStats,
}

#[derive(Debug)]
pub struct FinishOutcome {
    /// This process was last and restored the project.
    pub restored: bool,
    pub teardown: Option<TeardownReport>,
    /// Processes still attached (when not restored).
    pub live_pids: Vec<u32>,
}

/// Diagnostic view of one project.
#[derive(Debug, Clone)]
pub struct ProjectStatus {
    pub hash: ProjectHash,
    pub session: SessionSnapshot,
    pub snapshots: Vec<SnapshotSummary>,
    pub latest: Option<String>,
    pub has_secrets: bool,
}

#[derive(Debug, Clone)]
pub struct SessionOrchestrator {
    storage: StorageConfig,
    config: LayoverConfig,
    coordinator: SessionCoordinator,
    backups: BackupStore,
    secrets: SecretsVault,
    scanner: CrashRecoveryScanner,
}

impl SessionOrchestrator {
    pub fn new(storage: StorageConfig, config: LayoverConfig) -> Self {
        Self {
            coordinator: SessionCoordinator::new(storage.clone(), &config),
            backups: BackupStore::new(storage.clone()),
            secrets: SecretsVault::new(storage.clone()),
            scanner: CrashRecoveryScanner::new(storage.clone(), config.clone()),
            storage,
            config,
        }
    }

    /// Storage from `LAYOVER_HOME` (or `~/.layover`), settings from its `config.toml`.
    pub fn from_env() -> Result<Self> {
        Self::with_storage(StorageConfig::from_env()?)
    }

    /// Loads `config.toml` from the given storage root.
    pub fn with_storage(storage: StorageConfig) -> Result<Self> {
        let config = LayoverConfig::load(&storage.config_file())?;
        Ok(Self::new(storage, config))
    }

    /// Overrides the PID this orchestrator registers sessions under.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.coordinator = self.coordinator.with_pid(pid);
        self
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn config(&self) -> &LayoverConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    fn teardown(&self) -> Teardown<'_> {
        Teardown {
            coordinator: &self.coordinator,
            backups: &self.backups,
            secrets: &self.secrets,
            config: &self.config,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────────

    /// Joins (or opens) the project's session and, if first, applies the overlay.
    pub fn start(
        &self,
        project: &Path,
        target: &Target,
        attach: &dyn AttachEngine,
    ) -> Result<ActiveSession> {
        target.validate()?;
        if !project.is_dir() {
            return Err(LayoverError::InvalidProjectPath {
                path: project.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }
        self.storage.ensure_dirs()?;
        let recovery = self.scanner.recover(Some(project));

        let project_path = normalize_project_path(project);
        let project_dir = PathBuf::from(&project_path);
        let hash = ProjectHash::of(&project_dir);
        let session_id = new_session_id();
        let hint = BackupHint {
            backup_path: self.storage.snapshot_dir(&hash, &session_id),
            session_id,
        };
        let outcome = self
            .coordinator
            .acquire(&hash, &project_path, &target.name, Some(hint))?;

        let mut session = ActiveSession {
            project_dir,
            hash,
            target: target.clone(),
            is_first: outcome.is_first,
            backup_ref: outcome.backup_ref,
            hidden: None,
            recovery,
        };

        if session.is_first {
            if let Err(err) = self.apply_overlay(&mut session, attach) {
                tracing::warn!(project = %session.hash, error = %err, "Overlay failed; rolling back");
                if let Err(rollback) = self.finish(&session) {
                    tracing::warn!(project = %session.hash, error = %rollback, "Rollback incomplete");
                }
                return Err(err);
            }
        }
        Ok(session)
    }

    fn apply_overlay(&self, session: &mut ActiveSession, attach: &dyn AttachEngine) -> Result<()> {
        let Some(backup_ref) = session.backup_ref.as_ref() else {
            return Ok(());
        };
        let project = session.project_dir.as_path();
        let target = &session.target;

        session.hidden = GitVisibilityGuard::for_targets([target]).hide(project);

        let info = self
            .backups
            .create_with_id(project, &session.hash, target, &backup_ref.session_id)?;
        let mut manifest = info.manifest;

        match self.secrets.extract(project, target) {
            Ok(Some(record)) => {
                self.secrets.save(&session.hash, &record)?;
                manifest.secrets_extracted = true;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(project = %session.hash, error = %err, "Could not extract secrets");
            }
        }

        attach.attach(project, target, &mut manifest)?;
        self.backups.write_manifest(&session.hash, &manifest)
    }

    /// Detaches from the session; the last process out restores the project.
    ///
    /// A missing snapshot retires the session as `failed` and is returned as
    /// [`LayoverError::SnapshotNotFound`].
    pub fn finish(&self, session: &ActiveSession) -> Result<FinishOutcome> {
        let release = self.coordinator.release(&session.hash)?;
        let backup_ref = match release.backup_ref {
            Some(backup_ref) if release.should_restore => backup_ref,
            _ => {
                return Ok(FinishOutcome {
                    restored: false,
                    teardown: None,
                    live_pids: release.live_pids,
                })
            }
        };

        let mut report = self
            .teardown()
            .run(&session.hash, &backup_ref, SessionStatus::Completed)?;
        if let Some(failure) = report.failure.take() {
            return Err(failure);
        }
        Ok(FinishOutcome {
            restored: true,
            teardown: Some(report),
            live_pids: Vec::new(),
        })
    }

    /// Restores a project nobody is attached to. `Ok(None)` if there was nothing to do.
    pub fn restore_project(&self, project: &Path) -> Result<Option<TeardownReport>> {
        let hash = ProjectHash::of(project);
        let Some(backup_ref) = self.coordinator.read_backup_ref(&hash)? else {
            return Ok(None);
        };
        let live = self.coordinator.live_pids(&hash);
        if !live.is_empty() {
            return Err(LayoverError::SessionActive {
                project: backup_ref.project_path,
                pids: live,
            });
        }
        match self.coordinator.claim_restore(&hash)? {
            ClaimResult::Claimed => {}
            ClaimResult::HeldBy(pid) => {
                return Err(LayoverError::SessionActive {
                    project: backup_ref.project_path,
                    pids: vec![pid],
                })
            }
            ClaimResult::Unreadable => {
                return Err(LayoverError::SessionActive {
                    project: backup_ref.project_path,
                    pids: Vec::new(),
                })
            }
            ClaimResult::SessionGone => return Ok(None),
        }

        let mut report = self
            .teardown()
            .run(&hash, &backup_ref, SessionStatus::Completed)?;
        if let Some(failure) = report.failure.take() {
            return Err(failure);
        }
        Ok(Some(report))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Maintenance & Diagnostics
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn recover(&self, project: Option<&Path>, force_maintenance: bool) -> RecoveryStats {
        self.scanner.recover_with(project, force_maintenance)
    }

    /// Projects with any session or snapshot state.
    pub fn known_projects(&self) -> Vec<ProjectHash> {
        let mut hashes = self.storage.session_hashes();
        for hash in self.storage.backup_hashes() {
            if !hashes.contains(&hash) {
                hashes.push(hash);
            }
        }
        hashes.sort();
        hashes
    }

    pub fn status(&self, hash: &ProjectHash) -> ProjectStatus {
        ProjectStatus {
            hash: hash.clone(),
            session: self.coordinator.status(hash),
            snapshots: self.backups.list(hash),
            latest: self.backups.latest(hash),
            has_secrets: self.storage.project_paths(hash).secrets_file.exists(),
        }
    }

    pub fn history(&self, limit: Option<usize>) -> Vec<SessionHistoryEntry> {
        self.coordinator.list_history(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::{Template, TemplateKind, TemplateSet};
    use crate::backup::tests_helper::tree_contents;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _temp: TempDir,
        project: PathBuf,
        orchestrator: SessionOrchestrator,
        target: Target,
    }

    fn fixture() -> Fixture {
        let temp = tempdir().unwrap();
        let project = temp.path().join("project");
        std::fs::create_dir_all(project.join(".claude")).unwrap();
        std::fs::write(project.join(".claude/settings.json"), "{\"theme\":\"dark\"}").unwrap();
        std::fs::write(
            project.join(".mcp.json"),
            serde_json::to_string_pretty(&json!({
                "mcpServers": {"db": {"command": "db-mcp", "env": {"DB_PASSWORD": "hunter2"}}}
            }))
            .unwrap(),
        )
        .unwrap();
        let storage = StorageConfig::with_root(temp.path().join("root"));
        let config = LayoverConfig {
            join_wait_ms: 50,
            ..LayoverConfig::default()
        };
        Fixture {
            orchestrator: SessionOrchestrator::new(storage, config),
            project,
            target: Target::builtins().remove(0),
            _temp: temp,
        }
    }

    fn templates() -> TemplateSet {
        TemplateSet::new(vec![
            Template {
                kind: TemplateKind::Agent,
                name: "reviewer.md".to_string(),
                content: "review".to_string(),
            },
            Template {
                kind: TemplateKind::Rule,
                name: "style.md".to_string(),
                content: "be terse".to_string(),
            },
        ])
    }

    #[test]
    fn test_single_session_round_trip() {
        let f = fixture();
        let before = tree_contents(&f.project);

        let session = f.orchestrator.start(&f.project, &f.target, &templates()).unwrap();
        assert!(session.is_first);
        assert!(f.project.join(".claude/agents/reviewer.md").is_file());
        let session_id = session.backup_ref.as_ref().unwrap().session_id.clone();
        let manifest = f.orchestrator.backups().read_manifest(&session.hash, &session_id).unwrap();
        assert_eq!(manifest.agents.added, vec!["reviewer.md"]);
        assert!(manifest.secrets_extracted);

        let outcome = f.orchestrator.finish(&session).unwrap();
        assert!(outcome.restored);
        assert_eq!(tree_contents(&f.project), before);

        let history = f.orchestrator.history(None);
        assert_eq!(history[0].backup.session_id, session_id);
        assert_eq!(history[0].status, SessionStatus::Completed);
        assert!(!f.orchestrator.status(&session.hash).has_secrets);
    }

    #[test]
    fn test_last_of_two_sessions_restores() {
        let f = fixture();
        let before = tree_contents(&f.project);

        let first = f.orchestrator.start(&f.project, &f.target, &templates()).unwrap();
        let other = f.orchestrator.clone().with_pid(1);
        let second = other.start(&f.project, &f.target, &TemplateSet::empty()).unwrap();
        assert!(!second.is_first);
        assert_eq!(second.backup_ref, first.backup_ref);

        let outcome = f.orchestrator.finish(&first).unwrap();
        assert!(!outcome.restored);
        assert_eq!(outcome.live_pids, vec![1]);
        assert!(f.project.join(".claude/agents/reviewer.md").exists());

        assert!(other.finish(&second).unwrap().restored);
        assert_eq!(tree_contents(&f.project), before);
    }

    #[test]
    fn test_missing_snapshot_surfaces_not_found() {
        let f = fixture();
        let session = f.orchestrator.start(&f.project, &f.target, &TemplateSet::empty()).unwrap();
        f.orchestrator.backups().remove_all(&session.hash).unwrap();

        let err = f.orchestrator.finish(&session).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(f.orchestrator.history(None)[0].status, SessionStatus::Failed);
        assert!(!f.orchestrator.coordinator().is_active(&session.hash));
    }

    #[test]
    fn test_restore_project_refuses_live_session() {
        let f = fixture();
        let session = f.orchestrator.start(&f.project, &f.target, &TemplateSet::empty()).unwrap();
        let err = f.orchestrator.restore_project(&f.project).unwrap_err();
        assert!(matches!(err, LayoverError::SessionActive { .. }));
        f.orchestrator.finish(&session).unwrap();
    }

    #[test]
    fn test_restore_project_after_crash() {
        let f = fixture();
        let before = tree_contents(&f.project);
        let crashed = f.orchestrator.clone().with_pid(99_999_999);
        crashed.start(&f.project, &f.target, &templates()).unwrap();

        let report = f.orchestrator.restore_project(&f.project).unwrap().unwrap();
        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(tree_contents(&f.project), before);
        assert!(f.orchestrator.restore_project(&f.project).unwrap().is_none());
    }

    #[test]
    fn test_start_rejects_rules_file_outside_config_dir() {
        let f = fixture();
        let codex = Target::new("codex", ".codex", ".codex/config.json", Some("AGENTS.md"));

        let err = f.orchestrator.start(&f.project, &codex, &templates()).unwrap_err();
        assert!(matches!(err, LayoverError::InvalidTarget { .. }));
        assert!(!f.project.join("AGENTS.md").exists());
        assert!(!f.project.join(".codex").exists());
        let hash = ProjectHash::of(&f.project);
        assert!(!f.orchestrator.storage().project_paths(&hash).session_dir.exists());
    }

    #[test]
    fn test_start_rejects_missing_project() {
        let f = fixture();
        let err = f
            .orchestrator
            .start(&f.project.join("nope"), &f.target, &TemplateSet::empty())
            .unwrap_err();
        assert!(matches!(err, LayoverError::InvalidProjectPath { .. }));
    }
}
