//! Filesystem primitives shared by the stores.
//!
//! Every mutation of shared state is a single atomic step: temp file + rename for
//! JSON records, exclusive create for locks and claims, directory rename for restores.

use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use fs_err as fs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::error::{io_err, json_err, LayoverError, Result};

/// Atomic write: temp file in the same directory, then rename over the target.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| LayoverError::Io {
        context: format!("no parent dir for {}", path.display()),
        source: io::Error::from(io::ErrorKind::InvalidInput),
    })?;
    fs::create_dir_all(parent).map_err(io_err("create parent directory"))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(io_err(format!("create temp file in {}", parent.display())))?;
    tmp.write_all(data)
        .map_err(io_err(format!("write temp file for {}", path.display())))?;
    tmp.flush()
        .map_err(io_err(format!("flush temp file for {}", path.display())))?;
    tmp.persist(path).map_err(|e| LayoverError::Io {
        context: format!("persist {}", path.display()),
        source: e.error,
    })?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let payload =
        serde_json::to_vec_pretty(value).map_err(json_err(format!("serialize {}", path.display())))?;
    write_atomic(path, &payload)
}

/// Reads a JSON record. A missing file is `Ok(None)`; a corrupt one is an error.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err("read JSON record")(err)),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(json_err(format!("parse {}", path.display())))
}

/// Removes a file or directory tree. Missing paths are not an error.
/// Returns true if something was removed.
pub fn remove_path(path: &Path) -> Result<bool> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(io_err(format!("stat {}", path.display()))(err)),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err("remove path")(err)),
    }
}

/// Recursively copies `src` into `dst` (which must not exist yet).
/// Symlinks are recreated, not followed.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).map_err(io_err("create copy destination"))?;
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| LayoverError::Io {
            context: format!("walk {}", src.display()),
            source: e
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("filesystem loop")),
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| LayoverError::Io {
                context: format!("relativize {}", entry.path().display()),
                source: io::Error::other(e),
            })?;
        let target = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(io_err("create directory"))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(io_err("copy file"))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).map_err(io_err("read symlink"))?;
    std::os::unix::fs::symlink(&link, dst)
        .map_err(io_err(format!("create symlink {}", dst.display())))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).map_err(io_err("copy symlink target"))?;
    Ok(())
}

/// How a move was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Renamed,
    /// Source and destination were on different volumes.
    CopiedAcrossDevices,
}

/// Renames `src` to `dst`; across volumes, falls back to copy-then-delete.
pub fn rename_or_copy(src: &Path, dst: &Path) -> Result<MoveKind> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(MoveKind::Renamed),
        Err(err) if is_cross_device(&err) => {
            tracing::debug!(
                src = %src.display(),
                dst = %dst.display(),
                "Rename crosses devices; copying instead"
            );
            if src.is_dir() {
                copy_dir_recursive(src, dst)?;
            } else {
                fs::copy(src, dst).map_err(io_err("copy across devices"))?;
            }
            remove_path(src)?;
            Ok(MoveKind::CopiedAcrossDevices)
        }
        Err(err) => Err(io_err(format!(
            "rename {} -> {}",
            src.display(),
            dst.display()
        ))(err)),
    }
}

fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(not(unix))]
    {
        // ERROR_NOT_SAME_DEVICE
        err.raw_os_error() == Some(17)
    }
}

/// Age of a path based on its modification time.
pub fn path_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(Utc::now() - DateTime::<Utc>::from(modified))
}

/// Current time as an RFC 3339 string.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
