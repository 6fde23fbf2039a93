//! Configuration settings for SnapWatch
//!
//! Defines all configuration options, CLI arguments, and defaults
//! for the monitors.

use crate::error::{IoResultExt, Result, SnapWatchError};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SnapWatch - checkpointed change feed for directory trees
#[derive(Parser, Debug, Clone)]
#[command(name = "snapwatch")]
#[command(author = "SnapWatch Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Poll directory trees and stream checkpointed change events")]
#[command(long_about = r#"
SnapWatch keeps a durable snapshot of one or more directory trees and
diffs the live tree against it on every pass, producing a stream of
add/delete/modify events that survives crashes and restarts.

Examples:
  snapwatch run /data/docs /srv/share          # Monitor two roots
  snapwatch run /data --exclude '**/*.tmp'     # With an exclude pattern
  snapwatch status                             # Show snapshot state
  snapwatch clean                              # Wipe all state
"#)]
pub struct CliArgs {
    /// Directory holding snapshot and checkpoint state
    #[arg(long, global = true, default_value = ".snapwatch", value_name = "PATH")]
    pub state_dir: PathBuf,

    /// Load settings from a JSON config file (CLI flags still apply on top)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Monitor the given roots and print changes as JSON lines
    #[command(name = "run")]
    Run(RunArgs),

    /// Show snapshot and checkpoint state for every known root
    #[command(name = "status")]
    Status,

    /// Delete all snapshot and checkpoint state (forces a full traversal)
    #[command(name = "clean")]
    Clean,
}

/// Arguments for the `run` subcommand
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Start paths to monitor
    #[arg(value_name = "ROOT")]
    pub roots: Vec<PathBuf>,

    /// File pattern to include (glob)
    #[arg(long, value_name = "PATTERN")]
    pub include: Vec<String>,

    /// File or directory pattern to exclude (glob)
    #[arg(long, value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Maximum file size to feed (e.g., 30M)
    #[arg(long, value_name = "SIZE")]
    pub max_size: Option<String>,

    /// Reject files whose MIME type is not supported
    #[arg(long)]
    pub mime_filter: bool,

    /// Checksum algorithm for content change detection
    #[arg(long, value_enum)]
    pub checksum: Option<HashAlgorithm>,

    /// Seconds a file must stay unchanged before its checksum is trusted
    #[arg(long, value_name = "SECS")]
    pub stability_secs: Option<u64>,

    /// Seconds to wait between passes that found nothing to do
    #[arg(long, value_name = "SECS")]
    pub idle_secs: Option<u64>,

    /// Security policy for combining file and share ACLs
    #[arg(long, value_enum)]
    pub security_policy: Option<SecurityPolicy>,

    /// Restore last-access times after reading file content
    #[arg(long)]
    pub preserve_access_time: bool,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECS")]
    pub run_for: Option<u64>,

    /// Resume from this global checkpoint instead of the saved one
    #[arg(long, value_name = "GLOBAL", conflicts_with = "full")]
    pub from_checkpoint: Option<u64>,

    /// Ignore the saved global checkpoint and traverse everything again
    #[arg(long)]
    pub full: bool,
}

/// Hash algorithm for content checksums
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// XXHash3 - Ultra fast, non-cryptographic (128-bit)
    #[default]
    #[value(name = "xxhash3")]
    XXHash3,
    /// XXHash64 - Fast, non-cryptographic (64-bit)
    #[value(name = "xxhash64")]
    XXHash64,
    /// BLAKE3 - Fast and cryptographically secure
    #[value(name = "blake3")]
    Blake3,
    /// SHA-256 - Standard cryptographic hash
    #[value(name = "sha256")]
    Sha256,
}

impl HashAlgorithm {
    /// Get the output size in bytes
    pub fn output_size(&self) -> usize {
        match self {
            Self::XXHash3 => 16,
            Self::XXHash64 => 8,
            Self::Blake3 => 32,
            Self::Sha256 => 32,
        }
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::XXHash3 => "XXHash3",
            Self::XXHash64 => "XXHash64",
            Self::Blake3 => "BLAKE3",
            Self::Sha256 => "SHA-256",
        }
    }
}

/// Which ACL levels decide who may read a document
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityPolicy {
    /// File-level ACEs only
    #[value(name = "file")]
    File,
    /// Share-level ACEs only
    #[value(name = "share")]
    Share,
    /// Principals allowed at either level
    #[value(name = "fileorshare")]
    FileOrShare,
    /// Principals allowed at both levels
    #[default]
    #[value(name = "fileandshare")]
    FileAndShare,
}

impl SecurityPolicy {
    /// Whether file-level ACEs are consulted
    pub fn uses_file(&self) -> bool {
        !matches!(self, Self::Share)
    }

    /// Whether share-level ACEs are consulted
    pub fn uses_share(&self) -> bool {
        !matches!(self, Self::File)
    }
}

/// How principal names are rendered into ACLs
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PrincipalFormat {
    /// `name`
    #[default]
    #[value(name = "name")]
    Name,
    /// `name@domain`
    #[value(name = "name-at-domain")]
    NameAtDomain,
    /// `domain\name`
    #[value(name = "domain-backslash-name")]
    DomainBackslashName,
}

/// Runtime configuration for a set of monitors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Start paths
    pub roots: Vec<PathBuf>,
    /// Snapshot and checkpoint state directory
    pub state_dir: PathBuf,
    /// Include patterns
    pub include_patterns: Vec<String>,
    /// Exclude patterns
    pub exclude_patterns: Vec<String>,
    /// Max file size in bytes
    pub max_size: Option<u64>,
    /// Reject unsupported MIME types
    pub mime_filter: bool,
    /// Checksum algorithm
    pub checksum: HashAlgorithm,
    /// Stability interval in milliseconds
    pub stability_interval_ms: u64,
    /// Idle wait between passes in milliseconds
    pub idle_interval_ms: u64,
    /// Backoff after a failed pass in milliseconds
    pub retry_delay_ms: u64,
    /// Max changes held in the queue
    pub queue_capacity: usize,
    /// Number of acknowledgements kept in the recovery history
    pub recovery_history: usize,
    /// Bounded join timeout on shutdown in milliseconds
    pub shutdown_timeout_ms: u64,
    /// ACL combination policy
    pub security_policy: SecurityPolicy,
    /// User name rendering
    pub user_format: PrincipalFormat,
    /// Group name rendering
    pub group_format: PrincipalFormat,
    /// Restore access times after reads
    pub preserve_access_time: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            state_dir: PathBuf::from(".snapwatch"),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            max_size: Some(30 * 1024 * 1024),
            mime_filter: false,
            checksum: HashAlgorithm::default(),
            stability_interval_ms: 5_000,
            idle_interval_ms: 10_000,
            retry_delay_ms: 1_000,
            queue_capacity: 10_000,
            recovery_history: 16,
            shutdown_timeout_ms: 5_000,
            security_policy: SecurityPolicy::default(),
            user_format: PrincipalFormat::default(),
            group_format: PrincipalFormat::default(),
            preserve_access_time: false,
        }
    }
}

impl MonitorConfig {
    /// Create configuration from CLI arguments
    pub fn from_cli(args: &CliArgs, run: &RunArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        config.state_dir = args.state_dir.clone();

        if !run.roots.is_empty() {
            config.roots = run.roots.clone();
        }
        config.include_patterns.extend(run.include.iter().cloned());
        config.exclude_patterns.extend(run.exclude.iter().cloned());

        if let Some(size) = &run.max_size {
            config.max_size = Some(parse_size(size).map_err(SnapWatchError::ConfigError)?);
        }
        if run.mime_filter {
            config.mime_filter = true;
        }
        if let Some(algorithm) = run.checksum {
            config.checksum = algorithm;
        }
        if let Some(secs) = run.stability_secs {
            config.stability_interval_ms = secs * 1000;
        }
        if let Some(secs) = run.idle_secs {
            config.idle_interval_ms = secs * 1000;
        }
        if let Some(policy) = run.security_policy {
            config.security_policy = policy;
        }
        if run.preserve_access_time {
            config.preserve_access_time = true;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        serde_json::from_str(&content)
            .map_err(|e| SnapWatchError::config(format!("{}: {}", path.display(), e)))
    }

    /// Check the configuration for obvious mistakes
    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(SnapWatchError::config("at least one root is required"));
        }
        if self.queue_capacity == 0 {
            return Err(SnapWatchError::config("queue_capacity must be positive"));
        }
        if self.recovery_history == 0 {
            return Err(SnapWatchError::config("recovery_history must be positive"));
        }
        Ok(())
    }

    /// Stability interval
    pub fn stability_interval(&self) -> Duration {
        Duration::from_millis(self.stability_interval_ms)
    }

    /// Idle wait between passes
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    /// Backoff after a failed pass
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Join timeout on shutdown
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Parse size string (e.g., "1M", "64K", "1G")
pub fn parse_size(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim().to_uppercase();

    if s.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if s.ends_with("TB") || s.ends_with('T') {
        (s.trim_end_matches("TB").trim_end_matches('T'), 1024u64 * 1024 * 1024 * 1024)
    } else if s.ends_with("GB") || s.ends_with('G') {
        (s.trim_end_matches("GB").trim_end_matches('G'), 1024u64 * 1024 * 1024)
    } else if s.ends_with("MB") || s.ends_with('M') {
        (s.trim_end_matches("MB").trim_end_matches('M'), 1024u64 * 1024)
    } else if s.ends_with("KB") || s.ends_with('K') {
        (s.trim_end_matches("KB").trim_end_matches('K'), 1024u64)
    } else if s.ends_with('B') {
        (s.trim_end_matches('B'), 1u64)
    } else {
        (s.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid size number: {}", num_str))?;

    Ok((num * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("30M").unwrap(), 30 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_size("").is_err());
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_policy_levels() {
        assert!(SecurityPolicy::File.uses_file());
        assert!(!SecurityPolicy::File.uses_share());
        assert!(!SecurityPolicy::Share.uses_file());
        assert!(SecurityPolicy::FileAndShare.uses_file());
        assert!(SecurityPolicy::FileOrShare.uses_share());
    }

    #[test]
    fn test_from_cli_overrides() {
        let args = CliArgs::parse_from([
            "snapwatch",
            "--state-dir",
            "/tmp/state",
            "run",
            "/data",
            "--exclude",
            "**/*.tmp",
            "--max-size",
            "1M",
            "--checksum",
            "blake3",
            "--stability-secs",
            "2",
        ]);
        let Commands::Run(run) = &args.command else {
            panic!("expected run");
        };
        let config = MonitorConfig::from_cli(&args, run).unwrap();
        assert_eq!(config.roots, vec![PathBuf::from("/data")]);
        assert_eq!(config.state_dir, PathBuf::from("/tmp/state"));
        assert_eq!(config.exclude_patterns, vec!["**/*.tmp".to_string()]);
        assert_eq!(config.max_size, Some(1024 * 1024));
        assert_eq!(config.checksum, HashAlgorithm::Blake3);
        assert_eq!(config.stability_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_validate_requires_roots() {
        let config = MonitorConfig::default();
        assert!(matches!(
            config.validate(),
            Err(SnapWatchError::ConfigError(_))
        ));
    }

    #[test]
    fn test_load_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"roots": ["/a", "/b"], "security_policy": "fileorshare", "user_format": "name-at-domain"}"#,
        )
        .unwrap();
        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.roots.len(), 2);
        assert_eq!(config.security_policy, SecurityPolicy::FileOrShare);
        assert_eq!(config.user_format, PrincipalFormat::NameAtDomain);
        assert_eq!(config.stability_interval_ms, 5_000);
    }
}
