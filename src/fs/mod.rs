//! JSON state files shared between processes.
//!
//! Writers take an exclusive `fd-lock` on a sibling `.lock` file, write to a
//! temporary file and rename it over the target, so readers never observe a
//! half-written document.

use fd_lock::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
    #[error("Invalid JSON in {path}: {message}")]
    Json { path: String, message: String },
}

impl FsError {
    fn io(path: &Path, err: std::io::Error) -> Self {
        FsError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Read and parse a JSON file, returning `None` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, FsError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(FsError::io(path, e)),
    };
    if content.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&content).map(Some).map_err(|e| FsError::Json {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Atomically replace `path` with the pretty-printed JSON of `value`.
///
/// Blocking; async callers run it on the blocking pool.
pub fn write_json_locked<T: Serialize>(path: &Path, value: &T) -> Result<(), FsError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| FsError::io(parent, e))?;
    }

    let json = serde_json::to_string_pretty(value).map_err(|e| FsError::Json {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let lock_file_path = lock_path(path);
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_file_path)
        .map_err(|e| FsError::io(&lock_file_path, e))?;
    let mut lock = RwLock::new(lock_file);
    let _guard = lock.write().map_err(|e| FsError::io(&lock_file_path, e))?;

    let tmp_path = path.with_extension("json.tmp");
    let mut tmp = File::create(&tmp_path).map_err(|e| FsError::io(&tmp_path, e))?;
    tmp.write_all(json.as_bytes())
        .and_then(|_| tmp.sync_all())
        .map_err(|e| FsError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| FsError::io(path, e))?;
    Ok(())
}
