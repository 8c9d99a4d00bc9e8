//! Configuration loading

use anyhow::{Context, Result, bail};
use pool_core::policy::default_cache_directory;
use pool_core::{DiskCachePolicy, Expiry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_policies")]
    pub policies: Vec<PolicyConfig>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per policy
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Disk settings of one policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub name: String,
    #[serde(default)]
    pub expiry: Expiry,
    /// Size budget in bytes. Unset means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

impl PolicyConfig {
    /// Disk policy rooted at `root`
    pub fn to_disk_policy(&self, root: &Path) -> DiskCachePolicy {
        let policy = DiskCachePolicy::new(&self.name)
            .with_expiry(self.expiry)
            .with_directory(root);
        match self.max_size {
            Some(max_size) => policy.with_max_size(max_size),
            None => policy,
        }
    }
}

fn default_root() -> PathBuf {
    default_cache_directory()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_policies() -> Vec<PolicyConfig> {
    vec![PolicyConfig {
        name: "Default".to_string(),
        expiry: Expiry::Never,
        max_size: None,
    }]
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Disk policies to operate on: the named one, or all of them
    pub fn select_policies(&self, name: Option<&str>) -> Result<Vec<DiskCachePolicy>> {
        let selected: Vec<DiskCachePolicy> = self
            .policies
            .iter()
            .filter(|policy| name.is_none_or(|name| policy.name == name))
            .map(|policy| policy.to_disk_policy(&self.storage.root))
            .collect();

        if let Some(name) = name
            && selected.is_empty()
        {
            bail!("No policy named '{}' in configuration", name);
        }

        Ok(selected)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            policies: default_policies(),
        }
    }
}
