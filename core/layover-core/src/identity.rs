//! Project identity and session id allocation.
//!
//! Every piece of per-project state is partitioned by a [`ProjectHash`]: the MD5 of the
//! canonicalized project path, truncated to [`HASH_LEN`] hex characters. The same path
//! always yields the same hash, so a brand-new process can find state written by any
//! earlier one.
//!
//! Session ids are ULIDs drawn from a process-wide monotonic generator. Their string
//! form sorts in creation order, which is what snapshot pruning and history ordering
//! rely on.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

/// Number of hex characters kept from the path digest.
pub const HASH_LEN: usize = 16;

static SESSION_IDS: Lazy<Mutex<Generator>> = Lazy::new(|| Mutex::new(Generator::new()));

/// Stable short identifier for a project directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectHash(String);

impl ProjectHash {
    /// Computes the hash for a project path.
    ///
    /// The path is canonicalized when it exists; otherwise the absolute form is
    /// used as-is so that GC of deleted projects still maps to the same hash.
    pub fn of(path: &Path) -> Self {
        let normalized = normalize_project_path(path);
        let digest = format!("{:x}", md5::compute(normalized.as_bytes()));
        ProjectHash(digest[..HASH_LEN].to_string())
    }

    /// Wraps an existing hash string (e.g. a directory name read back from storage).
    /// Returns `None` for anything that is not a well-formed hash.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() == HASH_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(ProjectHash(raw.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical string form of a project path used for hashing and comparison.
/// Strips trailing slashes except for root "/".
pub fn normalize_project_path(path: &Path) -> String {
    let resolved: PathBuf = fs_err::canonicalize(path).unwrap_or_else(|_| absolutize(path));
    let s = resolved.to_string_lossy().to_string();
    #[cfg(windows)]
    let s = s.replace('\\', "/").to_lowercase();
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Allocates a new timestamp-ordered session id.
pub fn new_session_id() -> String {
    let mut generator = match SESSION_IDS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    // Overflow only happens after 2^80 ids in one millisecond; fall back to a fresh id.
    generator
        .generate()
        .unwrap_or_else(|_| Ulid::new())
        .to_string()
}

/// Returns the creation time encoded in a session id, if it is one.
pub fn session_id_time(session_id: &str) -> Option<DateTime<Utc>> {
    let ulid = Ulid::from_string(session_id).ok()?;
    let at: SystemTime = ulid.datetime();
    Some(DateTime::<Utc>::from(at))
}

/// True if `raw` looks like a session id produced by [`new_session_id`].
pub fn is_session_id(raw: &str) -> bool {
    Ulid::from_string(raw).is_ok()
}
