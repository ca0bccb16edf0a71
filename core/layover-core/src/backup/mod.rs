//! Pre-overlay snapshots of a target's configuration and their atomic restore.

mod manifest;
mod store;

pub use manifest::{BackupManifest, OverlayRecord, MANIFEST_VERSION};
pub use store::{
    recover_interrupted_restores, BackupInfo, BackupStore, ConfigFileAction, InterruptedRestores,
    RestoreReport, SnapshotSummary,
};

#[cfg(test)]
pub(crate) use store::tests_helper;
