//! Storage backend trait

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// A single entry returned by [`StorageBackend::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Last modification time
    pub modified: DateTime<Utc>,
    /// Size in bytes (0 for directories)
    pub size: u64,
    pub is_dir: bool,
}

impl FileEntry {
    /// File name component of the path
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    /// Entries whose name starts with a dot are hidden
    pub fn is_hidden(&self) -> bool {
        self.file_name().is_some_and(|name| name.starts_with('.'))
    }
}

/// Storage backend trait
///
/// Implementations provide the file operations the disk tier is built on.
/// All calls are blocking; async callers dispatch them onto a blocking pool.
pub trait StorageBackend: Send + Sync {
    /// Read a file fully into memory
    fn read(&self, path: &Path) -> Result<Bytes, StorageError>;

    /// Write a file, replacing any previous content
    fn write(&self, path: &Path, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a file
    fn delete(&self, path: &Path) -> Result<(), StorageError>;

    /// List the direct children of a directory
    fn list(&self, dir: &Path) -> Result<Vec<FileEntry>, StorageError>;

    /// Create a directory and all missing parents
    fn create_dir_all(&self, path: &Path) -> Result<(), StorageError>;
}

/// Compute the hex-encoded SHA256 digest of data
pub fn compute_sha256(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
