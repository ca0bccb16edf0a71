//! Multi-process session coordination.
//!
//! All state is on disk under `sessions/<hash>/`; a process with no memory of earlier
//! invocations can always tell who is attached and whether a restore is owed.

mod coordinator;
mod history;
pub mod lock;
mod types;

pub use coordinator::SessionCoordinator;
pub use lock::ClaimResult;
pub use types::{
    AcquireOutcome, BackupHint, BackupRef, LockObservation, PidLock, ReleaseOutcome,
    SessionHistoryEntry, SessionSnapshot, SessionStatus,
};
