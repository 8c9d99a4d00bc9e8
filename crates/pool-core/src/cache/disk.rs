//! Persistent tier
//!
//! Each slot is one file at `<directory>/<name>/<slot key>` holding the
//! codec-encoded value. Every read and write first sweeps the policy
//! directory: invalid files are deleted, then the remaining files are trimmed
//! when they exceed the size budget.
//!
//! There is no cross-call locking. Two writers of the same slot race at the
//! file system (the last rename wins), and one call's sweep can delete a file
//! another call has just written. Sweeps running side by side may pick the
//! same file; whichever deletes it second treats it as already gone.

use chrono::{DateTime, Utc};
use pool_storage::backend::compute_sha256;
use pool_storage::{
    Codec, FileEntry, JsonCodec, LocalStorage, StorageBackend, decode_value, encode_value,
};
use std::any::type_name;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::CacheError;
use crate::policy::{CachePolicy, DiskCachePolicy};
use crate::pool::{Cacheable, Pool};

/// File name of a slot inside its policy directory
///
/// Built from the value type: the short type name, sanitized for file
/// systems, followed by a digest of the full type name so that generic
/// instantiations get distinct files. Type names are only stable within one
/// build of the program.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey(String);

impl SlotKey {
    pub fn of<V: 'static>() -> Self {
        Self::from_type_name(type_name::<V>())
    }

    pub fn from_type_name(full_name: &str) -> Self {
        let base = full_name.split('<').next().unwrap_or(full_name);
        let short: String = base
            .rsplit("::")
            .next()
            .unwrap_or(base)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        let digest = compute_sha256(full_name.as_bytes());
        Self(format!("{}-{}", short, &digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Files deleted by the expiry rule
    pub expired: usize,
    /// Files deleted to get back under the size budget
    pub trimmed: usize,
    /// Bytes left in the policy directory
    pub remaining_bytes: u64,
}

/// Disk tier over a pluggable storage backend and codec
pub struct DiskCache {
    storage: Arc<dyn StorageBackend>,
    codec: Arc<dyn Codec>,
}

impl DiskCache {
    pub fn new(storage: Arc<dyn StorageBackend>, codec: Arc<dyn Codec>) -> Self {
        Self { storage, codec }
    }

    /// Local file system with JSON encoding
    pub fn local() -> Self {
        Self::new(Arc::new(LocalStorage::new()), Arc::new(JsonCodec::new()))
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Path of the slot file for `(V, P)`
    pub fn slot_path<V: Cacheable, P: CachePolicy>(&self, policy: &P) -> PathBuf {
        policy.disk().cache_dir().join(SlotKey::of::<V>().as_str())
    }

    /// Persist the pool's value, replacing any previous file for the slot
    pub fn set<V: Cacheable, P: CachePolicy>(&self, pool: &Pool<V, P>) -> Result<(), CacheError> {
        let policy = pool.policy().disk();
        self.sweep(policy)?;

        let value = pool
            .value()
            .ok_or_else(|| CacheError::MissingValue(SlotKey::of::<V>().to_string()))?;
        let bytes = encode_value(self.codec.as_ref(), &value).map_err(CacheError::EncodeFailed)?;

        let dir = policy.cache_dir();
        self.storage.create_dir_all(&dir)?;

        let path = self.slot_path::<V, P>(pool.policy());
        self.storage.write(&path, &bytes)?;

        debug!("Stored {} bytes at {:?} ({})", bytes.len(), path, self.codec.name());
        Ok(())
    }

    /// Load the slot into a fresh pool
    ///
    /// A slot that was never written fails with a not-found `IoFailed`.
    pub fn get<V: Cacheable, P: CachePolicy>(&self) -> Result<Pool<V, P>, CacheError> {
        let pool = Pool::<V, P>::new();
        self.sweep(pool.policy().disk())?;

        let path = self.slot_path::<V, P>(pool.policy());
        let bytes = self.storage.read(&path)?;
        let value = decode_value(self.codec.as_ref(), &bytes).map_err(CacheError::DecodeFailed)?;
        pool.overwrite(Some(value));

        debug!("Loaded {} bytes from {:?}", bytes.len(), path);
        Ok(pool)
    }

    /// Delete the slot file. Returns whether it existed.
    pub fn remove<V: Cacheable, P: CachePolicy>(&self) -> Result<bool, CacheError> {
        let path = self.slot_path::<V, P>(&P::default());
        match self.storage.delete(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every slot file of policy type `P`
    pub fn remove_all<P: CachePolicy>(&self) -> Result<usize, CacheError> {
        self.purge(P::default().disk())
    }

    /// Visible files in the policy directory
    ///
    /// Directories and hidden entries are skipped. A directory that doesn't
    /// exist yet lists as empty.
    pub fn entries(&self, policy: &DiskCachePolicy) -> Result<Vec<FileEntry>, CacheError> {
        let dir = policy.cache_dir();
        let listed = match self.storage.list(&dir) {
            Ok(listed) => listed,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(source) => return Err(CacheError::EnumerationFailed { path: dir, source }),
        };

        Ok(listed
            .into_iter()
            .filter(|entry| !entry.is_dir && !entry.is_hidden())
            .collect())
    }

    /// Delete every visible file in the policy directory
    pub fn purge(&self, policy: &DiskCachePolicy) -> Result<usize, CacheError> {
        let entries = self.entries(policy)?;
        for entry in &entries {
            self.delete_entry(entry)?;
        }

        info!("Purged {} files from {:?}", entries.len(), policy.cache_dir());
        Ok(entries.len())
    }

    /// Enforce the expiry rule and size budget on the policy directory
    pub fn sweep(&self, policy: &DiskCachePolicy) -> Result<SweepReport, CacheError> {
        self.sweep_at(policy, Utc::now())
    }

    fn sweep_at(
        &self,
        policy: &DiskCachePolicy,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, CacheError> {
        let mut report = SweepReport::default();
        let mut candidates = Vec::new();
        let mut total_size = 0u64;

        for entry in self.entries(policy)? {
            if policy.expiry.invalidates(entry.modified, now) {
                debug!("Deleting invalid cache file {:?}", entry.path);
                self.delete_entry(&entry)?;
                report.expired += 1;
            } else {
                total_size += entry.size;
                candidates.push(entry);
            }
        }

        if policy.max_size > 0 && total_size > policy.max_size {
            let target = policy.max_size / 2;
            // Newest first
            candidates.sort_by(|a, b| {
                b.modified
                    .cmp(&a.modified)
                    .then_with(|| a.path.cmp(&b.path))
            });

            for entry in candidates {
                debug!("Trimming cache file {:?} ({} bytes)", entry.path, entry.size);
                self.delete_entry(&entry)?;
                total_size = total_size.saturating_sub(entry.size);
                report.trimmed += 1;

                if total_size < target {
                    break;
                }
            }
        }

        report.remaining_bytes = total_size;
        if report.expired > 0 || report.trimmed > 0 {
            info!(
                "Swept {:?}: {} expired, {} trimmed, {} bytes remaining",
                policy.cache_dir(),
                report.expired,
                report.trimmed,
                report.remaining_bytes
            );
        }

        Ok(report)
    }

    /// Delete a listed file. A file already deleted by a concurrent sweep
    /// counts as deleted.
    fn delete_entry(&self, entry: &FileEntry) -> Result<(), CacheError> {
        match self.storage.delete(&entry.path) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Cache file {:?} already gone", entry.path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for DiskCache {
    fn default() -> Self {
        Self::local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Expiry;
    use crate::test_support::{test_policy, test_root};
    use bytes::Bytes;
    use chrono::TimeDelta;
    use pool_storage::{MemoryStorage, StorageError};
    use serde::{Deserialize, Serialize};
    use std::path::Path;

    /// Distinct value type per `N`, serialized as the bare string
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Blob<const N: usize>(String);

    /// Value whose JSON encoding is exactly `len` bytes
    fn blob<const N: usize>(len: usize) -> Pool<Blob<N>, ScenarioPolicy> {
        Pool::with_value(Some(Blob("x".repeat(len - 2))))
    }

    test_policy!(
        ScenarioPolicy,
        DiskCachePolicy::new("scenario")
            .with_max_size(1000)
            .with_directory("/virtual")
    );
    test_policy!(
        ExpiringPolicy,
        DiskCachePolicy::new("expiring")
            .with_expiry(Expiry::At(DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()))
            .with_directory("/virtual")
    );
    test_policy!(
        UnboundedPolicy,
        DiskCachePolicy::new("unbounded")
            .with_max_size(0)
            .with_directory("/virtual")
    );
    test_policy!(LocalPolicy, DiskCachePolicy::new("disk-local").with_directory(test_root()));
    test_policy!(
        RacePolicy,
        DiskCachePolicy::new("disk-race")
            .with_max_size(2000)
            .with_directory(test_root())
    );

    fn memory_disk() -> (Arc<MemoryStorage>, DiskCache) {
        let storage = Arc::new(MemoryStorage::new());
        let disk = DiskCache::new(storage.clone(), Arc::new(JsonCodec::new()));
        (storage, disk)
    }

    #[test]
    fn test_slot_key_is_file_safe_and_distinct() {
        let key = SlotKey::of::<Vec<String>>();
        assert!(key.as_str().starts_with("Vec-"));
        assert!(key
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));

        assert_ne!(SlotKey::of::<Blob<1>>(), SlotKey::of::<Blob<2>>());
        assert_eq!(SlotKey::of::<Blob<1>>(), SlotKey::of::<Blob<1>>());
    }

    #[test]
    fn test_set_then_get_local() {
        let disk = DiskCache::local();
        let pool = Pool::<Vec<String>, LocalPolicy>::with_value(Some(vec!["a".to_string()]));

        disk.set(&pool).unwrap();
        let path = disk.slot_path::<Vec<String>, LocalPolicy>(pool.policy());
        assert!(path.starts_with(test_root().join("disk-local")));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"["a"]"#);

        let loaded = disk.get::<Vec<String>, LocalPolicy>().unwrap();
        assert_eq!(loaded, pool);

        assert!(disk.remove::<Vec<String>, LocalPolicy>().unwrap());
        assert!(!disk.remove::<Vec<String>, LocalPolicy>().unwrap());
        assert!(disk.get::<Vec<String>, LocalPolicy>().unwrap_err().is_not_found());
    }

    #[test]
    fn test_set_without_value_fails() {
        let (_, disk) = memory_disk();

        let err = disk.set(&Pool::<Blob<0>, ScenarioPolicy>::new()).unwrap_err();
        assert!(matches!(err, CacheError::MissingValue(_)));
    }

    #[test]
    fn test_get_never_written_is_not_found() {
        let (_, disk) = memory_disk();

        let err = disk.get::<Blob<0>, ScenarioPolicy>().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_get_corrupt_file_fails_to_decode() {
        let (storage, disk) = memory_disk();
        let policy = ScenarioPolicy::default();
        let path = disk.slot_path::<Blob<0>, ScenarioPolicy>(&policy);

        storage.create_dir_all(&policy.disk().cache_dir()).unwrap();
        storage.write(&path, b"{ not json").unwrap();

        let err = disk.get::<Blob<0>, ScenarioPolicy>().unwrap_err();
        assert!(matches!(err, CacheError::DecodeFailed(_)));
    }

    #[test]
    fn test_five_writes_trim_newest_first() {
        let (storage, disk) = memory_disk();
        let policy = ScenarioPolicy::default();
        let dir = policy.disk().cache_dir();

        disk.set(&blob::<1>(300)).unwrap();
        disk.set(&blob::<2>(300)).unwrap();
        disk.set(&blob::<3>(300)).unwrap();
        disk.set(&blob::<4>(300)).unwrap();
        assert_eq!(storage.dir_size(&dir), 1200);

        // The fifth write's sweep sees 1200 > 1000 and deletes slots 4, 3
        // and 2 (newest first) until under 500, then writes slot 5. The sweep
        // runs before the write, so the directory ends at 600 bytes rather
        // than at most 500: the size bound holds when a sweep completes, not
        // after the write that follows it.
        disk.set(&blob::<5>(300)).unwrap();

        let exists = |path: PathBuf| storage.contains(&path);
        assert!(exists(disk.slot_path::<Blob<1>, _>(&policy)));
        assert!(!exists(disk.slot_path::<Blob<2>, _>(&policy)));
        assert!(!exists(disk.slot_path::<Blob<3>, _>(&policy)));
        assert!(!exists(disk.slot_path::<Blob<4>, _>(&policy)));
        assert!(exists(disk.slot_path::<Blob<5>, _>(&policy)));
        assert_eq!(storage.dir_size(&dir), 600);

        let report = disk.sweep(policy.disk()).unwrap();
        assert_eq!(report, SweepReport { expired: 0, trimmed: 0, remaining_bytes: 600 });
    }

    #[test]
    fn test_sweep_trims_below_half_budget() {
        let (storage, disk) = memory_disk();
        let policy = ScenarioPolicy::default();
        let dir = policy.disk().cache_dir();
        storage.create_dir_all(&dir).unwrap();

        for i in 0..6 {
            storage.write(&dir.join(format!("f{i}")), &[0u8; 250]).unwrap();
        }

        let report = disk.sweep(policy.disk()).unwrap();
        assert_eq!(report.trimmed, 5);
        assert_eq!(report.remaining_bytes, 250);
        assert!(storage.contains(&dir.join("f0")));
        assert!(report.remaining_bytes <= policy.disk().max_size);
    }

    #[test]
    fn test_oversized_file_is_trimmed_whole() {
        let (storage, disk) = memory_disk();
        let policy = ScenarioPolicy::default();
        let dir = policy.disk().cache_dir();
        storage.create_dir_all(&dir).unwrap();
        storage.write(&dir.join("huge"), &[0u8; 4000]).unwrap();

        let report = disk.sweep(policy.disk()).unwrap();
        assert_eq!(report.trimmed, 1);
        assert_eq!(report.remaining_bytes, 0);
    }

    #[test]
    fn test_zero_budget_disables_trimming() {
        let (storage, disk) = memory_disk();
        let policy = UnboundedPolicy::default();
        let dir = policy.disk().cache_dir();
        storage.create_dir_all(&dir).unwrap();
        storage.write(&dir.join("big"), &[0u8; 100_000]).unwrap();

        let report = disk.sweep(policy.disk()).unwrap();
        assert_eq!(report, SweepReport { expired: 0, trimmed: 0, remaining_bytes: 100_000 });
    }

    #[test]
    fn test_sweep_deletes_files_newer_than_deadline() {
        let (storage, disk) = memory_disk();
        let policy = ExpiringPolicy::default();
        let dir = policy.disk().cache_dir();
        let Expiry::At(deadline) = policy.disk().expiry else {
            unreachable!()
        };
        storage.create_dir_all(&dir).unwrap();

        let older = dir.join("older");
        let newer = dir.join("newer");
        let exact = dir.join("exact");
        for path in [&older, &newer, &exact] {
            storage.write(path, b"1").unwrap();
        }
        storage.set_modified(&older, deadline - TimeDelta::days(1)).unwrap();
        storage.set_modified(&newer, deadline + TimeDelta::seconds(1)).unwrap();
        storage.set_modified(&exact, deadline).unwrap();

        let report = disk.sweep(policy.disk()).unwrap();
        assert_eq!(report.expired, 1);
        assert!(storage.contains(&older));
        assert!(storage.contains(&exact));
        assert!(!storage.contains(&newer));

        // No file left satisfies the invalid predicate
        let now = Utc::now();
        for entry in disk.entries(policy.disk()).unwrap() {
            assert!(!policy.disk().expiry.invalidates(entry.modified, now));
        }
    }

    #[test]
    fn test_sweep_ignores_hidden_files_and_directories() {
        let (storage, disk) = memory_disk();
        let policy = ScenarioPolicy::default();
        let dir = policy.disk().cache_dir();
        storage.create_dir_all(&dir.join("nested")).unwrap();
        storage.write(&dir.join(".in-flight.tmp"), &[0u8; 5000]).unwrap();
        storage.write(&dir.join("nested/inner"), &[0u8; 5000]).unwrap();

        let report = disk.sweep(policy.disk()).unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(storage.contains(&dir.join(".in-flight.tmp")));
        assert!(disk.entries(policy.disk()).unwrap().is_empty());
    }

    #[test]
    fn test_purge_removes_every_visible_file() {
        let (storage, disk) = memory_disk();
        disk.set(&blob::<1>(10)).unwrap();
        disk.set(&blob::<2>(10)).unwrap();

        assert_eq!(disk.remove_all::<ScenarioPolicy>().unwrap(), 2);
        assert_eq!(storage.dir_size(&ScenarioPolicy::default().disk().cache_dir()), 0);
        assert_eq!(disk.remove_all::<ScenarioPolicy>().unwrap(), 0);
    }

    /// Storage that refuses listings or deletes
    struct BrokenStorage {
        inner: MemoryStorage,
        fail_list: bool,
    }

    fn denied() -> StorageError {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ))
    }

    impl StorageBackend for BrokenStorage {
        fn read(&self, path: &Path) -> Result<Bytes, StorageError> {
            self.inner.read(path)
        }

        fn write(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
            self.inner.write(path, data)
        }

        fn delete(&self, _path: &Path) -> Result<(), StorageError> {
            Err(denied())
        }

        fn list(&self, dir: &Path) -> Result<Vec<FileEntry>, StorageError> {
            if self.fail_list {
                Err(denied())
            } else {
                self.inner.list(dir)
            }
        }

        fn create_dir_all(&self, path: &Path) -> Result<(), StorageError> {
            self.inner.create_dir_all(path)
        }
    }

    #[test]
    fn test_listing_failure_is_enumeration_error() {
        let storage = BrokenStorage {
            inner: MemoryStorage::new(),
            fail_list: true,
        };
        let disk = DiskCache::new(Arc::new(storage), Arc::new(JsonCodec::new()));

        let err = disk.set(&blob::<1>(10)).unwrap_err();
        assert!(matches!(err, CacheError::EnumerationFailed { .. }));
        let err = disk.get::<Blob<1>, ScenarioPolicy>().unwrap_err();
        assert!(matches!(err, CacheError::EnumerationFailed { .. }));
    }

    /// Storage whose listings also report a file that no longer exists
    struct StaleListing {
        inner: MemoryStorage,
        phantom: FileEntry,
    }

    impl StorageBackend for StaleListing {
        fn read(&self, path: &Path) -> Result<Bytes, StorageError> {
            self.inner.read(path)
        }

        fn write(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
            self.inner.write(path, data)
        }

        fn delete(&self, path: &Path) -> Result<(), StorageError> {
            self.inner.delete(path)
        }

        fn list(&self, dir: &Path) -> Result<Vec<FileEntry>, StorageError> {
            let mut entries = self.inner.list(dir)?;
            entries.push(self.phantom.clone());
            Ok(entries)
        }

        fn create_dir_all(&self, path: &Path) -> Result<(), StorageError> {
            self.inner.create_dir_all(path)
        }
    }

    #[test]
    fn test_sweep_counts_files_deleted_concurrently() {
        let inner = MemoryStorage::new();
        let dir = ScenarioPolicy::default().disk().cache_dir();
        inner.create_dir_all(&dir).unwrap();
        inner.write(&dir.join("kept"), &[0u8; 100]).unwrap();

        // Newest entry, already deleted by someone else's sweep
        let phantom = FileEntry {
            path: dir.join("gone"),
            modified: Utc::now() + TimeDelta::hours(1),
            size: 1500,
            is_dir: false,
        };
        let disk = DiskCache::new(
            Arc::new(StaleListing { inner, phantom }),
            Arc::new(JsonCodec::new()),
        );

        let report = disk.sweep(ScenarioPolicy::default().disk()).unwrap();
        assert_eq!(report.trimmed, 1);
        assert_eq!(report.remaining_bytes, 100);

        // The write that follows the sweep still lands
        disk.set(&blob::<7>(10)).unwrap();
        assert_eq!(disk.get::<Blob<7>, ScenarioPolicy>().unwrap(), blob::<7>(10));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Racer<const N: usize>(String);

    /// Write 100 distinct 600-byte values to the `Racer<N>` slot, collecting errors
    fn race_writer<const N: usize>(disk: Arc<DiskCache>) -> std::thread::JoinHandle<Vec<String>> {
        std::thread::spawn(move || {
            (0..100)
                .filter_map(|i| {
                    let value = Racer::<N>(format!("{i:0>598}"));
                    let pool = Pool::<_, RacePolicy>::with_value(Some(value));
                    disk.set(&pool).err().map(|e| e.to_string())
                })
                .collect()
        })
    }

    #[test]
    fn test_concurrent_writers_to_distinct_slots_under_budget() {
        let disk = Arc::new(DiskCache::local());

        let writers = vec![
            race_writer::<1>(disk.clone()),
            race_writer::<2>(disk.clone()),
            race_writer::<3>(disk.clone()),
            race_writer::<4>(disk.clone()),
            race_writer::<5>(disk.clone()),
            race_writer::<6>(disk.clone()),
        ];
        let errors: Vec<String> = writers
            .into_iter()
            .flat_map(|writer| writer.join().unwrap())
            .collect();
        assert!(errors.is_empty(), "writes failed: {errors:?}");

        let report = disk.sweep(RacePolicy::default().disk()).unwrap();
        assert!(report.remaining_bytes <= 2000);
    }

    #[test]
    fn test_delete_failure_aborts_sweep() {
        let inner = MemoryStorage::new();
        let dir = ScenarioPolicy::default().disk().cache_dir();
        inner.create_dir_all(&dir).unwrap();
        inner.write(&dir.join("a"), &[0u8; 800]).unwrap();
        inner.write(&dir.join("b"), &[0u8; 800]).unwrap();

        let storage = Arc::new(BrokenStorage {
            inner,
            fail_list: false,
        });
        let disk = DiskCache::new(storage.clone(), Arc::new(JsonCodec::new()));

        let err = disk.sweep(ScenarioPolicy::default().disk()).unwrap_err();
        assert!(matches!(err, CacheError::IoFailed(StorageError::Io(_))));
        assert!(storage.inner.contains(&dir.join("a")));
        assert!(storage.inner.contains(&dir.join("b")));
    }
}
