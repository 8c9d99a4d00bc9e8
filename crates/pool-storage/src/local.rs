//! Local disk storage backend

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::Builder;
use tracing::debug;

use crate::backend::{FileEntry, StorageBackend};
use crate::error::StorageError;

/// Local disk storage backend
///
/// Paths are used as given. Every write goes to its own uniquely named hidden
/// temp file in the target directory and is renamed into place. Concurrent
/// writers of one path never share a temp file, readers see either the old or
/// a complete new file, and listings that skip hidden entries never see
/// in-flight writes.
#[derive(Debug, Clone, Default)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }
}

impl StorageBackend for LocalStorage {
    fn read(&self, path: &Path) -> Result<Bytes, StorageError> {
        debug!("Reading file {:?}", path);

        let data = fs::read(path).map_err(|e| StorageError::from_io(path, e))?;
        Ok(Bytes::from(data))
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        debug!("Writing {} bytes to {:?}", data.len(), path);

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        // Dropped unpersisted on any error, which removes it
        let mut temp = Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(|e| StorageError::from_io(parent, e))?;
        temp.write_all(data)?;
        temp.persist(path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<(), StorageError> {
        debug!("Deleting file {:?}", path);

        fs::remove_file(path).map_err(|e| StorageError::from_io(path, e))
    }

    fn list(&self, dir: &Path) -> Result<Vec<FileEntry>, StorageError> {
        let read_dir = fs::read_dir(dir).map_err(|e| StorageError::from_io(dir, e))?;
        let mut entries = Vec::new();

        for entry in read_dir {
            let entry = entry?;
            // A concurrent delete can remove the entry between listing and stat
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            };
            let modified: DateTime<Utc> = metadata.modified()?.into();

            entries.push(FileEntry {
                path: entry.path(),
                modified,
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                is_dir: metadata.is_dir(),
            });
        }

        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), StorageError> {
        fs::create_dir_all(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();
        let path = dir.path().join("slot");

        storage.write(&path, b"hello").unwrap();
        assert_eq!(storage.read(&path).unwrap(), Bytes::from_static(b"hello"));

        storage.write(&path, b"bye").unwrap();
        assert_eq!(storage.read(&path).unwrap(), Bytes::from_static(b"bye"));
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();

        let err = storage.read(&dir.path().join("missing")).unwrap_err();
        assert!(err.is_not_found());

        let err = storage.delete(&dir.path().join("missing")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_list_reports_sizes_and_dirs() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();

        storage.write(&dir.path().join("a"), &[0u8; 10]).unwrap();
        storage.create_dir_all(&dir.path().join("nested/deeper")).unwrap();

        let mut entries = storage.list(dir.path()).unwrap();
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file_name(), Some("a"));
        assert_eq!(entries[0].size, 10);
        assert!(!entries[0].is_dir);
        assert!(entries[1].is_dir);
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();

        storage.write(&dir.path().join("a"), b"1").unwrap();
        storage.write(&dir.path().join("a"), b"22").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a")]);
    }

    #[test]
    fn test_write_into_missing_dir_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();

        let err = storage.write(&dir.path().join("absent/slot"), b"x").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_concurrent_writers_of_one_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slot");

        let writers: Vec<_> = (1..=8u8)
            .map(|id| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let storage = LocalStorage::new();
                    let payload = vec![id; 1000 + id as usize];
                    (0..100)
                        .filter(|_| storage.write(&path, &payload).is_err())
                        .count()
                })
            })
            .collect();

        // Every read sees one writer's complete payload
        let storage = LocalStorage::new();
        for _ in 0..200 {
            if let Ok(data) = storage.read(&path) {
                let id = data[0];
                assert_eq!(data.len(), 1000 + id as usize);
                assert!(data.iter().all(|b| *b == id));
            }
        }

        let failures: usize = writers.into_iter().map(|w| w.join().unwrap()).sum();
        assert_eq!(failures, 0);
        assert_eq!(storage.list(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_list_missing_dir_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();

        let err = storage.list(&dir.path().join("absent")).unwrap_err();
        assert!(err.is_not_found());
    }
}
