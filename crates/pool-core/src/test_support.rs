//! Shared fixtures for unit tests

use std::path::Path;
use std::sync::OnceLock;
use tempfile::TempDir;

/// Scratch directory shared by every test in the process
///
/// Policies are built through `Default`, so they can't capture a per-test
/// directory. Each test policy uses its own name below this root instead.
pub fn test_root() -> &'static Path {
    static ROOT: OnceLock<TempDir> = OnceLock::new();
    ROOT.get_or_init(|| TempDir::new().expect("create test root"))
        .path()
}

/// Declare a policy type whose `Default` builds the given disk policy
macro_rules! test_policy {
    ($name:ident, $disk:expr) => {
        test_policy!($name, $disk, $crate::policy::MemoryPressureLevel::Normal);
    };
    ($name:ident, $disk:expr, $level:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        struct $name {
            disk: $crate::policy::DiskCachePolicy,
            memory: $crate::policy::MemoryCachePolicy,
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    disk: $disk,
                    memory: $crate::policy::MemoryCachePolicy::new($level),
                }
            }
        }

        impl $crate::policy::CachePolicy for $name {
            fn disk(&self) -> &$crate::policy::DiskCachePolicy {
                &self.disk
            }

            fn memory(&self) -> &$crate::policy::MemoryCachePolicy {
                &self.memory
            }
        }
    };
}

pub(crate) use test_policy;
