//! # layover-core
//!
//! Session coordination and crash-safe config backup/restore for layover, which lays
//! generated agent configuration over a project for the duration of a run and takes
//! it off again afterwards.
//!
//! ## Design Principles
//!
//! - **Filesystem is the only lock**: exclusive `create_dir` elects the first session;
//!   PID liveness decides the last. No daemon, no advisory locks, no database.
//! - **No in-memory authority**: every decision can be re-derived by a brand-new
//!   process from what is on disk (or in the git index).
//! - **Crash is the normal case**: any state a `kill -9` can leave behind is finished
//!   by [`CrashRecoveryScanner`] on the next start.
//! - **Synchronous**: No async runtime dependency.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use layover_core::{SessionOrchestrator, TemplateSet};
//!
//! let orchestrator = SessionOrchestrator::from_env()?;
//! let target = orchestrator.config().target("claude")?;
//! let session = orchestrator.start(&project, &target, &TemplateSet::empty())?;
//! // ... run the agent ...
//! orchestrator.finish(&session)?;
//! ```

pub mod attach;
pub mod backup;
pub mod config;
pub mod error;
pub mod fs_util;
pub mod git;
pub mod identity;
pub mod orchestrator;
pub mod process;
pub mod recovery;
pub mod secrets;
pub mod session;
pub mod storage;
pub mod target;

// Re-export commonly used items at crate root
pub use attach::{AttachEngine, Template, TemplateKind, TemplateSet};
pub use backup::{
    recover_interrupted_restores, BackupInfo, BackupManifest, BackupStore, ConfigFileAction,
    OverlayRecord, RestoreReport, SnapshotSummary,
};
pub use config::LayoverConfig;
pub use error::{LayoverError, Result};
pub use git::{GitVisibilityGuard, HiddenFiles};
pub use identity::{new_session_id, normalize_project_path, ProjectHash};
pub use orchestrator::{ActiveSession, FinishOutcome, ProjectStatus, SessionOrchestrator};
pub use process::{is_pid_alive, probe_pid, Liveness};
pub use recovery::{CrashRecoveryScanner, ProjectRecovery, RecoveryStats, TeardownReport};
pub use secrets::{SecretsRecord, SecretsVault, ServerSecrets};
pub use session::{
    AcquireOutcome, BackupHint, BackupRef, ClaimResult, LockObservation, PidLock, ReleaseOutcome,
    SessionCoordinator, SessionHistoryEntry, SessionSnapshot, SessionStatus,
};
pub use storage::{ProjectPaths, StorageConfig, HOME_ENV};
pub use target::Target;
