//! Storage layer
//!
//! File primitives shared by the account, profile and book databases.
//! Every persisted mutation goes through [`atomic_write`]: write to a fresh
//! temp file in the same directory, sync it, then rename it over the target.
//! Readers therefore see either the old or the new complete file.
//!
//! Rename is atomic on POSIX filesystems only; other platforms get a
//! best-effort replacement.

pub mod error;

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

pub use error::{StorageError, StorageResult};

/// Write data to a file atomically
///
/// 1. Write to a uniquely named temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
///
/// Concurrent writers of one path never share a temp file; the last rename
/// wins.
pub fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    create_dir_all(parent)?;

    let mut file =
        NamedTempFile::new_in(parent).map_err(|e| StorageError::from_io(e, parent.to_path_buf()))?;
    let temp_path = file.path().to_path_buf();
    file.write_all(data)
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.as_file()
        .sync_all()
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    // A failed persist drops the temp file, which removes it
    file.persist(path)
        .map_err(|e| StorageError::AtomicWriteFailed {
            from: temp_path,
            to: path.to_path_buf(),
            source: e.error,
        })?;

    debug!(path = %path.display(), bytes = data.len(), "atomic write");
    Ok(())
}

/// Serialize a value as pretty JSON and write it atomically
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, &bytes)
}

/// Read and parse a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> StorageResult<T> {
    let bytes = fs::read(path).map_err(|e| StorageError::from_read_io(e, path.to_path_buf()))?;
    serde_json::from_slice(&bytes).map_err(|source| StorageError::InvalidFormat {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and parse a JSON file, returning `None` if it does not exist
pub fn read_json_optional<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    match read_json(path) {
        Ok(value) => Ok(Some(value)),
        Err(StorageError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Create a directory and all of its parents
pub fn create_dir_all(path: &Path) -> StorageResult<()> {
    fs::create_dir_all(path).map_err(|source| StorageError::CreateDirectory {
        path: path.to_path_buf(),
        source,
    })
}

/// Remove a file, treating a missing file as success
pub fn remove_file(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Remove a directory tree, treating a missing directory as success
pub fn remove_dir_all(path: &Path) -> StorageResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// List the immediate subdirectories of `dir` named by a canonical `u64`
///
/// Entries with other names are ignored, including non-canonical spellings
/// such as `05` or `+5` that would alias another id. A missing directory yields an
/// empty list.
pub fn numbered_subdirectories(dir: &Path) -> StorageResult<Vec<(u64, std::path::PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::from_read_io(e, dir.to_path_buf())),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::from_read_io(e, dir.to_path_buf()))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match name.parse::<u64>() {
            Ok(id) if id.to_string() == name => found.push((id, path)),
            _ => {}
        }
    }
    found.sort_by_key(|(id, _)| *id);
    Ok(found)
}
