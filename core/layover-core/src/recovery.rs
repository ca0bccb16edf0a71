//! Startup recovery: interrupted restores, orphaned sessions, periodic maintenance.
//!
//! Runs at the start of every invocation, before any session is acquired. A crash at
//! any point of the lifecycle (including `kill -9` mid-restore) leaves state that
//! this scanner can finish from scratch.
//!
//! 1. **Interrupted restores**: stranded `<config_dir>.layover-restore-*` siblings of
//!    the current project's config directories are renamed into place or deleted.
//! 2. **Orphaned sessions** (every project): a BackupRef with no live lock is restored
//!    and finalized as `recovered`; a session directory with no BackupRef and no live
//!    lock is removed once older than the grace period. Projects are independent: an
//!    error in one is recorded and the scan moves on.
//! 3. **Maintenance** (rate limited by `.last-maintenance`): history pruning and
//!    garbage collection of snapshots/secrets for projects that no longer exist.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::Serialize;

use crate::backup::{recover_interrupted_restores, BackupStore, RestoreReport};
use crate::config::LayoverConfig;
use crate::error::{LayoverError, Result};
use crate::fs_util::{now_rfc3339, write_atomic};
use crate::git::GitVisibilityGuard;
use crate::identity::ProjectHash;
use crate::process::is_pid_alive;
use crate::secrets::SecretsVault;
use crate::session::lock::read_claim;
use crate::session::{BackupRef, ClaimResult, SessionCoordinator, SessionStatus};
use crate::storage::StorageConfig;

/// Results from a recovery pass.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RecoveryStats {
    /// Stranded restore temp directories renamed into a missing config directory.
    pub interrupted_restores_recovered: u32,
    /// Stale restore temp directories deleted.
    pub restore_temps_removed: u32,
    /// Session directories without a BackupRef removed.
    pub stale_sessions_removed: u32,
    /// Orphaned sessions restored and finalized as `recovered`.
    pub orphaned_sessions_restored: u32,
    /// Orphaned sessions whose snapshot was missing, finalized as `failed`.
    pub orphaned_sessions_failed: u32,
    pub maintenance_ran: bool,
    pub history_pruned: u32,
    /// Projects whose snapshots and secrets were garbage collected.
    pub projects_collected: u32,
    /// Errors encountered; each names the project it belongs to.
    pub errors: Vec<String>,
}

impl RecoveryStats {
    pub fn has_activity(&self) -> bool {
        self.interrupted_restores_recovered > 0
            || self.restore_temps_removed > 0
            || self.stale_sessions_removed > 0
            || self.orphaned_sessions_restored > 0
            || self.orphaned_sessions_failed > 0
            || self.history_pruned > 0
            || self.projects_collected > 0
            || !self.errors.is_empty()
    }
}

/// What undoing one overlay epoch did.
#[derive(Debug)]
pub struct TeardownReport {
    pub status: SessionStatus,
    pub restore: Option<RestoreReport>,
    pub pruned: Vec<String>,
    pub unhidden: usize,
    pub secrets_applied: usize,
    /// Why the restore failed when `status` is `Failed`.
    pub failure: Option<LayoverError>,
}

/// Restores a project and retires its session metadata.
///
/// Shared by the last releasing session and by crash recovery. The caller must hold
/// the restore claim. A missing snapshot (or vanished project) finalizes the session
/// as `Failed`; any other restore error gives the claim back and leaves the BackupRef
/// in place so a later pass can retry.
pub(crate) struct Teardown<'a> {
    pub coordinator: &'a SessionCoordinator,
    pub backups: &'a BackupStore,
    pub secrets: &'a SecretsVault,
    pub config: &'a LayoverConfig,
}

impl Teardown<'_> {
    pub fn run(
        &self,
        hash: &ProjectHash,
        backup_ref: &BackupRef,
        success: SessionStatus,
    ) -> Result<TeardownReport> {
        let project = Path::new(&backup_ref.project_path);
        let mut report = TeardownReport {
            status: success,
            restore: None,
            pruned: Vec::new(),
            unhidden: 0,
            secrets_applied: 0,
            failure: None,
        };

        match self.backups.restore(hash, &backup_ref.session_id) {
            Ok(restored) => {
                if let Err(err) = recover_interrupted_restores(&restored.config_dir) {
                    tracing::warn!(project = %hash, error = %err, "Failed to clean restore temps");
                }
                report.restore = Some(restored);
            }
            Err(err)
                if err.is_not_found() || matches!(err, LayoverError::InvalidProjectPath { .. }) =>
            {
                tracing::warn!(
                    project = %hash,
                    session_id = %backup_ref.session_id,
                    error = %err,
                    "Cannot restore; retiring session as failed"
                );
                report.status = SessionStatus::Failed;
                report.failure = Some(err);
            }
            Err(err) => {
                if let Err(claim_err) = self.coordinator.abandon_claim(hash) {
                    tracing::warn!(project = %hash, error = %claim_err, "Failed to release restore claim");
                }
                return Err(err);
            }
        }

        match self.backups.prune(hash, self.config.keep_backups) {
            Ok(pruned) => report.pruned = pruned,
            Err(err) => tracing::warn!(project = %hash, error = %err, "Failed to prune snapshots"),
        }

        if project.is_dir() {
            let targets = self.config.all_targets();
            report.unhidden = GitVisibilityGuard::for_targets(&targets).unhide(project);
        }

        match self.secrets.load(hash) {
            Ok(Some(record)) => {
                if report.restore.is_some() {
                    match self.secrets.apply(project, &record) {
                        Ok(count) => report.secrets_applied = count,
                        Err(err) => {
                            tracing::warn!(project = %hash, error = %err, "Failed to re-apply secrets")
                        }
                    }
                }
                if let Err(err) = self.secrets.clear(hash) {
                    tracing::warn!(project = %hash, error = %err, "Failed to clear secrets");
                }
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(project = %hash, error = %err, "Unreadable secrets record"),
        }

        self.coordinator.finalize(hash, report.status)?;
        Ok(report)
    }
}

/// Outcome of recovering one project's session directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectRecovery {
    /// At least one attached process is alive.
    Active,
    /// No BackupRef, but too young to be debris.
    Pending,
    StaleRemoved,
    Restored,
    Failed,
    /// Another live process is restoring it.
    ClaimedElsewhere,
}

#[derive(Debug, Clone)]
pub struct CrashRecoveryScanner {
    storage: StorageConfig,
    config: LayoverConfig,
    coordinator: SessionCoordinator,
    backups: BackupStore,
    secrets: SecretsVault,
}

impl CrashRecoveryScanner {
    pub fn new(storage: StorageConfig, config: LayoverConfig) -> Self {
        Self {
            coordinator: SessionCoordinator::new(storage.clone(), &config),
            backups: BackupStore::new(storage.clone()),
            secrets: SecretsVault::new(storage.clone()),
            storage,
            config,
        }
    }

    /// Full startup pass. `project` enables the interrupted-restore scan for it.
    pub fn recover(&self, project: Option<&Path>) -> RecoveryStats {
        self.recover_with(project, false)
    }

    pub fn recover_with(&self, project: Option<&Path>, force_maintenance: bool) -> RecoveryStats {
        let mut stats = RecoveryStats::default();

        if let Some(project) = project {
            self.recover_interrupted(project, &mut stats);
        }
        self.recover_orphaned_sessions(&mut stats);
        if force_maintenance || self.maintenance_due() {
            self.run_maintenance(&mut stats);
        }

        if stats.has_activity() {
            tracing::info!(
                restored = stats.orphaned_sessions_restored,
                failed = stats.orphaned_sessions_failed,
                stale = stats.stale_sessions_removed,
                temps_recovered = stats.interrupted_restores_recovered,
                errors = stats.errors.len(),
                "Recovery pass finished"
            );
        }
        stats
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Interrupted Restores
    // ─────────────────────────────────────────────────────────────────────────────

    fn recover_interrupted(&self, project: &Path, stats: &mut RecoveryStats) {
        let hash = ProjectHash::of(project);
        if let Some(holder) = self.restore_in_progress(&hash) {
            // Its temp directories are still being filled.
            tracing::debug!(project = %hash, holder, "Restore in progress; skipping temp scan");
            return;
        }
        for target in self.config.all_targets() {
            let config_dir = target.config_dir_path(project);
            match recover_interrupted_restores(&config_dir) {
                Ok(outcome) => {
                    if outcome.restored.is_some() {
                        stats.interrupted_restores_recovered += 1;
                    }
                    stats.restore_temps_removed += outcome.removed.len() as u32;
                }
                Err(err) => stats
                    .errors
                    .push(format!("{}: {}", config_dir.display(), err)),
            }
        }
    }

    /// A live process other than us holding the project's restore claim.
    fn restore_in_progress(&self, hash: &ProjectHash) -> Option<u32> {
        let holder = read_claim(&self.storage.project_paths(hash).restore_claim_file)?;
        (holder != self.coordinator.pid() && is_pid_alive(holder)).then_some(holder)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Orphaned Sessions
    // ─────────────────────────────────────────────────────────────────────────────

    fn recover_orphaned_sessions(&self, stats: &mut RecoveryStats) {
        for hash in self.storage.session_hashes() {
            match self.recover_project(&hash) {
                Ok(ProjectRecovery::StaleRemoved) => stats.stale_sessions_removed += 1,
                Ok(ProjectRecovery::Restored) => stats.orphaned_sessions_restored += 1,
                Ok(ProjectRecovery::Failed) => stats.orphaned_sessions_failed += 1,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(project = %hash, error = %err, "Failed to recover session");
                    stats.errors.push(format!("{hash}: {err}"));
                }
            }
        }
    }

    /// Recovers a single project's session directory.
    pub fn recover_project(&self, hash: &ProjectHash) -> Result<ProjectRecovery> {
        let backup_ref = self.coordinator.read_backup_ref(hash)?;
        if !self.coordinator.live_pids(hash).is_empty() {
            return Ok(ProjectRecovery::Active);
        }

        let Some(backup_ref) = backup_ref else {
            let young = self
                .coordinator
                .session_dir_age(hash)
                .is_some_and(|age| age < self.config.stale_session_grace());
            if young {
                return Ok(ProjectRecovery::Pending);
            }
            self.coordinator.remove_stale(hash)?;
            tracing::debug!(project = %hash, "Removed stale session directory");
            return Ok(ProjectRecovery::StaleRemoved);
        };

        if self.coordinator.claim_restore(hash)? != ClaimResult::Claimed {
            return Ok(ProjectRecovery::ClaimedElsewhere);
        }

        tracing::info!(
            project = %hash,
            session_id = %backup_ref.session_id,
            "Recovering orphaned session"
        );
        let report = self.teardown().run(hash, &backup_ref, SessionStatus::Recovered)?;
        Ok(match report.status {
            SessionStatus::Failed => ProjectRecovery::Failed,
            _ => ProjectRecovery::Restored,
        })
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
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────────

    /// True if the maintenance marker is missing, unreadable, or older than the interval.
    pub fn maintenance_due(&self) -> bool {
        let Ok(raw) = fs::read_to_string(self.storage.maintenance_marker()) else {
            return true;
        };
        match parse_timestamp(raw.trim()) {
            Some(last) => Utc::now().signed_duration_since(last) >= self.config.maintenance_interval(),
            None => true,
        }
    }

    fn run_maintenance(&self, stats: &mut RecoveryStats) {
        stats.maintenance_ran = true;

        match self.coordinator.prune_history(self.config.history_limit) {
            Ok(count) => stats.history_pruned = count as u32,
            Err(err) => stats.errors.push(format!("history: {err}")),
        }

        let hashes: BTreeSet<ProjectHash> = self
            .storage
            .backup_hashes()
            .into_iter()
            .chain(self.storage.secret_hashes())
            .collect();
        for hash in hashes {
            match self.collect_project(&hash) {
                Ok(true) => stats.projects_collected += 1,
                Ok(false) => {}
                Err(err) => stats.errors.push(format!("{hash}: {err}")),
            }
        }

        if let Err(err) = write_atomic(&self.storage.maintenance_marker(), now_rfc3339().as_bytes()) {
            stats.errors.push(format!("maintenance marker: {err}"));
        }
    }

    /// Deletes snapshots and secrets of a project whose directory is gone and that has
    /// no session in flight. Projects with no recorded path are left alone.
    fn collect_project(&self, hash: &ProjectHash) -> Result<bool> {
        if self.storage.project_paths(hash).session_dir.exists() {
            return Ok(false);
        }
        let recorded = self.backups.recorded_project_path(hash).or_else(|| {
            self.secrets
                .load(hash)
                .ok()
                .flatten()
                .map(|record| record.project_path)
        });
        let Some(project_path) = recorded else {
            return Ok(false);
        };
        if Path::new(&project_path).exists() {
            return Ok(false);
        }

        self.backups.remove_all(hash)?;
        self.secrets.clear(hash)?;
        tracing::info!(project = %hash, path = %project_path, "Collected state of deleted project");
        Ok(true)
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::lock::tests_helper::write_lock_for;
    use crate::session::BackupHint;
    use crate::target::Target;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    const DEAD_PID: u32 = 99_999_999;

    struct Fixture {
        _temp: TempDir,
        project: PathBuf,
        storage: StorageConfig,
        scanner: CrashRecoveryScanner,
        hash: ProjectHash,
    }

    fn fixture() -> Fixture {
        let temp = tempdir().unwrap();
        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        let storage = StorageConfig::with_root(temp.path().join("root"));
        storage.ensure_dirs().unwrap();
        let config = LayoverConfig {
            join_wait_ms: 50,
            stale_session_grace_secs: 0,
            ..LayoverConfig::default()
        };
        let scanner = CrashRecoveryScanner::new(storage.clone(), config);
        let hash = ProjectHash::of(&project);
        Fixture {
            _temp: temp,
            project,
            storage,
            scanner,
            hash,
        }
    }

    /// Simulates a session whose owning process died after overlaying.
    fn crashed_session(f: &Fixture) -> String {
        let target = Target::builtins().remove(0);
        let backups = BackupStore::new(f.storage.clone());
        let info = backups.create(&f.project, &f.hash, &target).unwrap();
        let dead = SessionCoordinator::new(f.storage.clone(), &LayoverConfig::default())
            .with_pid(DEAD_PID);
        dead.acquire(
            &f.hash,
            &info.manifest.project_path,
            "claude",
            Some(BackupHint {
                session_id: info.session_id.clone(),
                backup_path: info.snapshot_dir.clone(),
            }),
        )
        .unwrap();
        info.session_id
    }

    #[test]
    fn test_orphaned_session_is_restored_and_finalized() {
        let f = fixture();
        std::fs::create_dir_all(f.project.join(".claude")).unwrap();
        std::fs::write(f.project.join(".claude/keep.md"), "original").unwrap();
        let session_id = crashed_session(&f);
        std::fs::write(f.project.join(".claude/keep.md"), "overlaid").unwrap();

        let stats = f.scanner.recover(Some(&f.project));
        assert_eq!(stats.orphaned_sessions_restored, 1, "{stats:?}");
        assert_eq!(
            std::fs::read_to_string(f.project.join(".claude/keep.md")).unwrap(),
            "original"
        );
        assert!(!f.storage.project_paths(&f.hash).session_dir.exists());

        let history = f.scanner.coordinator.list_history(None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].backup.session_id, session_id);
        assert_eq!(history[0].status, SessionStatus::Recovered);
    }

    #[test]
    fn test_live_session_is_left_alone() {
        let f = fixture();
        crashed_session(&f);
        write_lock_for(&f.storage.project_paths(&f.hash).lock_dir, 1, "/p");

        assert_eq!(
            f.scanner.recover_project(&f.hash).unwrap(),
            ProjectRecovery::Active
        );
        assert!(f.storage.project_paths(&f.hash).backup_ref_file.exists());
    }

    #[test]
    fn test_missing_snapshot_finalizes_as_failed() {
        let f = fixture();
        crashed_session(&f);
        BackupStore::new(f.storage.clone()).remove_all(&f.hash).unwrap();

        let stats = f.scanner.recover(None);
        assert_eq!(stats.orphaned_sessions_failed, 1);
        assert!(stats.errors.is_empty());
        let history = f.scanner.coordinator.list_history(None);
        assert_eq!(history[0].status, SessionStatus::Failed);
    }

    #[test]
    fn test_stale_session_without_backup_ref_removed() {
        let f = fixture();
        let paths = f.storage.project_paths(&f.hash);
        std::fs::create_dir_all(&paths.lock_dir).unwrap();
        write_lock_for(&paths.lock_dir, DEAD_PID, "/p");

        let stats = f.scanner.recover(None);
        assert_eq!(stats.stale_sessions_removed, 1);
        assert!(!paths.session_dir.exists());
    }

    #[test]
    fn test_young_session_without_backup_ref_is_spared() {
        let f = fixture();
        let scanner = CrashRecoveryScanner::new(
            f.storage.clone(),
            LayoverConfig {
                stale_session_grace_secs: 3_600,
                ..LayoverConfig::default()
            },
        );
        let paths = f.storage.project_paths(&f.hash);
        std::fs::create_dir_all(&paths.session_dir).unwrap();

        assert_eq!(scanner.recover_project(&f.hash).unwrap(), ProjectRecovery::Pending);
        assert!(paths.session_dir.exists());
    }

    #[test]
    fn test_one_bad_project_does_not_block_others() {
        let f = fixture();
        crashed_session(&f);
        // A second project with a corrupt BackupRef.
        let bad = ProjectHash::parse("ffffffffffffffff").unwrap();
        let bad_paths = f.storage.project_paths(&bad);
        std::fs::create_dir_all(&bad_paths.lock_dir).unwrap();
        std::fs::write(&bad_paths.backup_ref_file, "{broken").unwrap();

        let stats = f.scanner.recover(None);
        assert_eq!(stats.orphaned_sessions_restored, 1);
        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].starts_with("ffffffffffffffff"));
    }

    #[test]
    fn test_temps_of_a_restore_in_progress_are_left_alone() {
        let f = fixture();
        std::fs::create_dir_all(f.project.join(".claude")).unwrap();
        std::fs::write(f.project.join(".claude/live.md"), "live").unwrap();
        let temp_dir = f.project.join(format!(
            ".claude.layover-restore-{}-0badc0de",
            crate::identity::new_session_id()
        ));
        std::fs::create_dir_all(&temp_dir).unwrap();
        std::fs::write(temp_dir.join("half.md"), "copying").unwrap();

        // PID 1 is alive and holds the claim while it copies into the temp directory.
        let paths = f.storage.project_paths(&f.hash);
        std::fs::create_dir_all(&paths.session_dir).unwrap();
        std::fs::write(&paths.restore_claim_file, "1").unwrap();

        let stats = f.scanner.recover(Some(&f.project));
        assert_eq!(stats.restore_temps_removed, 0);
        assert!(temp_dir.join("half.md").exists());

        let _ = std::fs::remove_file(&paths.restore_claim_file);
        let stats = f.scanner.recover(Some(&f.project));
        assert_eq!(stats.restore_temps_removed, 1);
        assert!(!temp_dir.exists());
        assert!(f.project.join(".claude/live.md").exists());
    }

    #[test]
    fn test_maintenance_is_rate_limited() {
        let f = fixture();
        assert!(f.scanner.maintenance_due());
        let first = f.scanner.recover(None);
        assert!(first.maintenance_ran);
        assert!(!f.scanner.maintenance_due());
        let second = f.scanner.recover(None);
        assert!(!second.maintenance_ran);
        assert!(f.scanner.recover_with(None, true).maintenance_ran);
    }

    #[test]
    fn test_old_marker_makes_maintenance_due() {
        let f = fixture();
        let old = (Utc::now() - chrono::Duration::hours(48)).to_rfc3339();
        std::fs::write(f.storage.maintenance_marker(), old).unwrap();
        assert!(f.scanner.maintenance_due());
    }

    #[test]
    fn test_gc_removes_state_of_deleted_project() {
        let f = fixture();
        let target = Target::builtins().remove(0);
        BackupStore::new(f.storage.clone())
            .create(&f.project, &f.hash, &target)
            .unwrap();
        std::fs::remove_dir_all(&f.project).unwrap();

        let stats = f.scanner.recover_with(None, true);
        assert_eq!(stats.projects_collected, 1);
        assert!(!f.storage.backups_dir().join(f.hash.as_str()).exists());
    }

    #[test]
    fn test_gc_keeps_existing_project() {
        let f = fixture();
        let target = Target::builtins().remove(0);
        BackupStore::new(f.storage.clone())
            .create(&f.project, &f.hash, &target)
            .unwrap();

        let stats = f.scanner.recover_with(None, true);
        assert_eq!(stats.projects_collected, 0);
        assert!(f.storage.backups_dir().join(f.hash.as_str()).exists());
    }
}
