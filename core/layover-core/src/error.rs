//! Error types for layover-core operations.

use std::path::PathBuf;

/// All errors that can occur in layover-core operations.
#[derive(Debug, thiserror::Error)]
pub enum LayoverError {
    // ─────────────────────────────────────────────────────────────────────
    // Storage / Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found; set LAYOVER_HOME")]
    HomeNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Invalid target {name}: {reason}")]
    InvalidTarget { name: String, reason: String },

    #[error("Invalid project path: {path}: {reason}")]
    InvalidProjectPath { path: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Session state for project {0} kept changing during acquire; try again")]
    AcquireContention(String),

    #[error("Project {project} is still in use by PIDs {pids:?}")]
    SessionActive { project: String, pids: Vec<u32> },

    // ─────────────────────────────────────────────────────────────────────
    // Backup Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Backup snapshot not found: project {project}, session {session_id}")]
    SnapshotNotFound { project: String, session_id: String },

    #[error("Backup manifest missing or unreadable: {0}")]
    ManifestMissing(PathBuf),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Command execution failed: {command}: {details}")]
    CommandFailed { command: String, details: String },
}

impl LayoverError {
    /// True for the one failure class that is surfaced to users: a restore
    /// requested for a snapshot that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LayoverError::SnapshotNotFound { .. })
    }

    /// The underlying io::ErrorKind, for matching filesystem races.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            LayoverError::Io { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// Convenience type alias for Results using LayoverError.
pub type Result<T> = std::result::Result<T, LayoverError>;

/// Builds a `map_err` adapter that wraps an io::Error with context.
pub(crate) fn io_err(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> LayoverError {
    let context = context.into();
    move |source| LayoverError::Io { context, source }
}

pub(crate) fn json_err(
    context: impl Into<String>,
) -> impl FnOnce(serde_json::Error) -> LayoverError {
    let context = context.into();
    move |source| LayoverError::Json { context, source }
}

impl From<LayoverError> for String {
    fn from(err: LayoverError) -> String {
        err.to_string()
    }
}
