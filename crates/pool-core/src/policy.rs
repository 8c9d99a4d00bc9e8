//! Cache policies
//!
//! A policy is a static, hashable description of where a slot is persisted,
//! how long files stay valid, how large the policy directory may grow, and at
//! which memory pressure level the in-memory copies are dropped.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding the default cache root
pub const CACHE_DIR_ENV: &str = "POOL_CACHE_DIR";

/// Static configuration for one cache entry
///
/// Implementors are plain data types; the cache only ever builds them through
/// `Default`, so two slots sharing a policy type share its directory and its
/// pressure bucket.
pub trait CachePolicy: Default + Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    fn disk(&self) -> &DiskCachePolicy;
    fn memory(&self) -> &MemoryCachePolicy;
}

/// Root directory used when a policy doesn't set one
pub fn default_cache_directory() -> PathBuf {
    std::env::var_os(CACHE_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("pool-cache"))
}

fn default_max_size() -> u64 {
    u64::MAX
}

/// Disk tier settings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiskCachePolicy {
    /// Subdirectory of `directory` holding this policy's files
    pub name: String,
    #[serde(default)]
    pub expiry: Expiry,
    /// Size budget in bytes for the policy directory (0 disables trimming)
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    #[serde(default = "default_cache_directory")]
    pub directory: PathBuf,
}

impl DiskCachePolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expiry: Expiry::Never,
            max_size: default_max_size(),
            directory: default_cache_directory(),
        }
    }

    pub fn with_expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_directory(mut self, directory: impl AsRef<Path>) -> Self {
        self.directory = directory.as_ref().to_path_buf();
        self
    }

    /// Directory holding this policy's slot files: `<directory>/<name>`
    pub fn cache_dir(&self) -> PathBuf {
        self.directory.join(&self.name)
    }
}

/// Memory tier settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MemoryCachePolicy {
    /// Pressure level whose notification drops this policy's slots
    #[serde(default)]
    pub pressure_level: MemoryPressureLevel,
}

impl MemoryCachePolicy {
    pub fn new(pressure_level: MemoryPressureLevel) -> Self {
        Self { pressure_level }
    }
}

/// Validity rule for persisted files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expiry {
    #[default]
    Never,
    /// Fixed point in time
    At(DateTime<Utc>),
    /// Offset from the moment a sweep runs
    #[serde(rename = "after_secs")]
    After(#[serde(with = "duration_secs")] Duration),
}

impl Expiry {
    pub fn seconds(secs: u64) -> Self {
        Expiry::After(Duration::from_secs(secs))
    }

    pub fn minutes(minutes: u64) -> Self {
        Expiry::After(Duration::from_secs(minutes.saturating_mul(60)))
    }

    pub fn hours(hours: u64) -> Self {
        Expiry::After(Duration::from_secs(hours.saturating_mul(3600)))
    }

    /// Cutoff computed at `now`: the fixed time, or `now` plus the offset.
    /// `None` means no cutoff.
    pub fn deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Expiry::Never => None,
            Expiry::At(at) => Some(*at),
            Expiry::After(offset) => TimeDelta::from_std(*offset)
                .ok()
                .and_then(|offset| now.checked_add_signed(offset)),
        }
    }

    /// A file is invalid when its modification time is strictly newer than
    /// the deadline.
    pub fn invalidates(&self, modified: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.deadline(now).is_some_and(|deadline| modified > deadline)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Error type for parsing a memory pressure level
#[derive(Debug, Clone)]
pub struct ParsePressureLevelError(String);

impl fmt::Display for ParsePressureLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid memory pressure level: {}", self.0)
    }
}

impl std::error::Error for ParsePressureLevelError {}

/// System memory pressure level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressureLevel {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl MemoryPressureLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryPressureLevel::Normal => "normal",
            MemoryPressureLevel::Warning => "warning",
            MemoryPressureLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for MemoryPressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryPressureLevel {
    type Err = ParsePressureLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" => Ok(MemoryPressureLevel::Normal),
            "warning" => Ok(MemoryPressureLevel::Warning),
            "critical" => Ok(MemoryPressureLevel::Critical),
            _ => Err(ParsePressureLevelError(s.to_string())),
        }
    }
}

/// Policy used when callers have no specific requirements
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DefaultCachePolicy {
    disk: DiskCachePolicy,
    memory: MemoryCachePolicy,
}

impl Default for DefaultCachePolicy {
    fn default() -> Self {
        Self {
            disk: DiskCachePolicy::new("Default"),
            memory: MemoryCachePolicy::default(),
        }
    }
}

impl CachePolicy for DefaultCachePolicy {
    fn disk(&self) -> &DiskCachePolicy {
        &self.disk
    }

    fn memory(&self) -> &MemoryCachePolicy {
        &self.memory
    }
}
