//! Pool Cache - maintenance tool for on-disk cache directories

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pool_core::{DiskCache, DiskCachePolicy};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::Config;

/// Pool Cache - inspect, sweep and purge cache directories
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "POOL_CACHE_CONFIG", default_value = "config/default.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the files of each policy directory
    Inspect {
        /// Only this policy
        #[arg(long)]
        policy: Option<String>,
    },
    /// Apply expiry and size budget now
    Sweep {
        #[arg(long)]
        policy: Option<String>,
    },
    /// Delete every cached file
    Purge {
        #[arg(long)]
        policy: Option<String>,
    },
}

impl Command {
    fn policy(&self) -> Option<&str> {
        match self {
            Command::Inspect { policy } | Command::Sweep { policy } | Command::Purge { policy } => {
                policy.as_deref()
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    init_logging(&config.logging.level, &config.logging.format);

    info!("Starting Pool Cache v{}", env!("CARGO_PKG_VERSION"));
    info!("Cache root: {:?}", config.storage.root);

    let policies = config.select_policies(args.command.policy())?;

    // Directory walks and deletes are blocking file system work
    tokio::task::spawn_blocking(move || run(&args.command, &policies))
        .await
        .context("Maintenance task panicked")?
}

fn run(command: &Command, policies: &[DiskCachePolicy]) -> Result<()> {
    let disk = DiskCache::local();

    for policy in policies {
        match command {
            Command::Inspect { .. } => inspect(&disk, policy)?,
            Command::Sweep { .. } => {
                let report = disk
                    .sweep(policy)
                    .with_context(|| format!("Failed to sweep policy '{}'", policy.name))?;
                println!(
                    "{}: {} expired, {} trimmed, {} bytes remaining",
                    policy.name, report.expired, report.trimmed, report.remaining_bytes
                );
            }
            Command::Purge { .. } => {
                let purged = disk
                    .purge(policy)
                    .with_context(|| format!("Failed to purge policy '{}'", policy.name))?;
                println!("{}: {} files deleted", policy.name, purged);
            }
        }
    }

    Ok(())
}

fn inspect(disk: &DiskCache, policy: &DiskCachePolicy) -> Result<()> {
    let entries = disk
        .entries(policy)
        .with_context(|| format!("Failed to list policy '{}'", policy.name))?;
    let now = Utc::now();
    let total: u64 = entries.iter().map(|entry| entry.size).sum();

    println!(
        "{} ({:?}): {} files, {} bytes, budget {}",
        policy.name,
        policy.cache_dir(),
        entries.len(),
        total,
        format_budget(policy.max_size)
    );
    for entry in &entries {
        let state = if policy.expiry.invalidates(entry.modified, now) {
            "invalid"
        } else {
            "valid"
        };
        println!(
            "  {:<40} {:>10} {} {}",
            entry.file_name().unwrap_or("?"),
            entry.size,
            entry.modified.format("%Y-%m-%d %H:%M:%S"),
            state
        );
    }

    Ok(())
}

fn format_budget(max_size: u64) -> String {
    match max_size {
        0 | u64::MAX => "unbounded".to_string(),
        bytes => format!("{} bytes", bytes),
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    // Reports go to stdout, logs to stderr
    if format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
