//! In-process storage backend
//!
//! Keeps files in a map instead of on disk. Modification times are taken from
//! the wall clock but forced to be strictly increasing, so write order is
//! always recoverable from `modified` even when two writes land in the same
//! clock tick.

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::backend::{FileEntry, StorageBackend};
use crate::error::StorageError;

struct StoredFile {
    data: Bytes,
    modified: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    files: BTreeMap<PathBuf, StoredFile>,
    dirs: BTreeSet<PathBuf>,
    last_modified: Option<DateTime<Utc>>,
}

impl State {
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_modified {
            Some(last) if now <= last => last + TimeDelta::microseconds(1),
            _ => now,
        };
        self.last_modified = Some(ts);
        ts
    }
}

/// In-process storage backend
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the modification time of an existing file
    pub fn set_modified(&self, path: &Path, modified: DateTime<Utc>) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        let file = state
            .files
            .get_mut(path)
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))?;
        file.modified = modified;
        Ok(())
    }

    /// Whether a file exists at `path`
    pub fn contains(&self, path: &Path) -> bool {
        self.state.lock().files.contains_key(path)
    }

    /// Total bytes stored directly under `dir`
    pub fn dir_size(&self, dir: &Path) -> u64 {
        self.state
            .lock()
            .files
            .iter()
            .filter(|(path, _)| path.parent() == Some(dir))
            .map(|(_, file)| file.data.len() as u64)
            .sum()
    }
}

impl StorageBackend for MemoryStorage {
    fn read(&self, path: &Path) -> Result<Bytes, StorageError> {
        self.state
            .lock()
            .files
            .get(path)
            .map(|file| file.data.clone())
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let mut state = self.state.lock();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !state.dirs.contains(parent)
        {
            return Err(StorageError::NotFound(parent.to_path_buf()));
        }

        let modified = state.next_timestamp();
        state.files.insert(
            path.to_path_buf(),
            StoredFile {
                data: Bytes::copy_from_slice(data),
                modified,
            },
        );
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<(), StorageError> {
        self.state
            .lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))
    }

    fn list(&self, dir: &Path) -> Result<Vec<FileEntry>, StorageError> {
        let state = self.state.lock();

        if !state.dirs.contains(dir) {
            return Err(StorageError::NotFound(dir.to_path_buf()));
        }

        let files = state
            .files
            .iter()
            .filter(|(path, _)| path.parent() == Some(dir))
            .map(|(path, file)| FileEntry {
                path: path.clone(),
                modified: file.modified,
                size: file.data.len() as u64,
                is_dir: false,
            });

        let dirs = state
            .dirs
            .iter()
            .filter(|path| path.parent() == Some(dir))
            .map(|path| FileEntry {
                path: path.clone(),
                modified: Utc::now(),
                size: 0,
                is_dir: true,
            });

        Ok(files.chain(dirs).collect())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            state.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }
}
