//! Configuration types for node-backup
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Dispatcher configuration with validation
//! - Sanitisation of the working directory and file stamp

use crate::error::ConfigError;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Group size above which the dispatcher warns about thread count
pub const LARGE_GROUP_SIZE: usize = 256;

/// Default number of workers per session
pub const DEFAULT_GROUP_SIZE: usize = 2;

/// Default capacity of each work queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Name of the durable per-node failure log inside the working directory
pub const ERROR_LOG_NAME: &str = "save.failed";

/// Incremental backup of remote content nodes
#[derive(Parser, Debug, Clone)]
#[command(
    name = "node-backup",
    version,
    about = "Incremental backup of remote content nodes",
    long_about = "Reads node names (repo.path.to.node) from standard input, one per line.\n\n\
                  For each node a fingerprint of its current content is fetched and compared\n\
                  with the one recorded by the previous run. Only changed nodes are exported\n\
                  and saved under <workdir>/data; fingerprints live under <workdir>/registry.",
    after_help = "EXAMPLES:\n    \
        echo -e 'website.testing\\nusers.admin.testing' | node-backup https://cms1,JSESSIONID=abc\n    \
        node-backup --split --stamp 2015-07-31 https://pub1,SID=a https://pub2,SID=b < nodes.txt"
)]
pub struct CliArgs {
    /// Session specifications (endpoint,name=value)
    #[arg(value_name = "SESSION")]
    pub sessions: Vec<String>,

    /// Give each session its own queue and route nodes by a hash of their name
    ///
    /// Needed when sessions point at different publics, which produce
    /// different fingerprints for the same displayed content.
    #[arg(long)]
    pub split: bool,

    /// Number of connections (workers) per session
    #[arg(long = "groupsize", default_value = "2", value_name = "NUM", allow_negative_numbers = true)]
    pub group_size: i64,

    /// Capacity of each queue (0 hands nodes directly to a waiting worker)
    #[arg(long = "queuesize", default_value = "1000", value_name = "NUM", allow_negative_numbers = true)]
    pub queue_size: i64,

    /// Batch extension appended to the name of each exported file
    #[arg(long, default_value = "", value_name = "STAMP")]
    pub stamp: String,

    /// Parent directory of registry/, data/ and the save.failed log
    #[arg(long = "workdir", value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// HTTP request timeout in seconds (0 disables the timeout)
    #[arg(long, default_value = "300", value_name = "SECS")]
    pub timeout: u64,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// How nodes are spread over sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionMode {
    /// One queue drained by every worker of every session
    #[default]
    Shared,
    /// One queue per session, nodes routed by hash of their identity
    Sharded,
}

/// Validated settings for the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Partitioning policy
    pub partition_mode: PartitionMode,

    /// Workers spawned per session
    pub group_size: usize,

    /// Capacity of each queue (0 = rendezvous)
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            partition_mode: PartitionMode::Shared,
            group_size: DEFAULT_GROUP_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl DispatchConfig {
    /// Build from raw (possibly negative) integers
    pub fn new(
        partition_mode: PartitionMode,
        group_size: i64,
        queue_capacity: i64,
    ) -> Result<Self, ConfigError> {
        let group = usize::try_from(group_size)
            .ok()
            .filter(|g| *g >= 1)
            .ok_or(ConfigError::InvalidGroupSize { size: group_size })?;

        let capacity = usize::try_from(queue_capacity)
            .map_err(|_| ConfigError::InvalidQueueCapacity {
                size: queue_capacity,
            })?;

        Ok(Self {
            partition_mode,
            group_size: group,
            queue_capacity: capacity,
        })
    }

    /// Check the invariants the dispatcher relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_size == 0 {
            return Err(ConfigError::InvalidGroupSize { size: 0 });
        }
        Ok(())
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Dispatcher settings
    pub dispatch: DispatchConfig,

    /// Raw session specifications (parsed by the dispatcher)
    pub sessions: Vec<String>,

    /// Absolute working directory
    pub work_dir: PathBuf,

    /// File stamp, empty or starting with '.'
    pub stamp: String,

    /// Per-request timeout
    pub timeout: Option<Duration>,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl BackupConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(|e| ConfigError::InvalidWorkDir {
            path: PathBuf::from("."),
            reason: e.to_string(),
        })?;
        Self::from_args_in(args, &cwd)
    }

    /// Same as [`BackupConfig::from_args`] with an explicit current directory
    pub fn from_args_in(args: CliArgs, cwd: &Path) -> Result<Self, ConfigError> {
        let mode = if args.split {
            PartitionMode::Sharded
        } else {
            PartitionMode::Shared
        };
        let dispatch = DispatchConfig::new(mode, args.group_size, args.queue_size)?;

        let work_dir = sanitize_work_dir(args.work_dir.as_deref(), cwd);
        if work_dir.exists() && !work_dir.is_dir() {
            return Err(ConfigError::InvalidWorkDir {
                path: work_dir,
                reason: "not a directory".into(),
            });
        }

        Ok(Self {
            dispatch,
            sessions: args.sessions,
            work_dir,
            stamp: sanitize_stamp(&args.stamp),
            timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }

    /// Directory holding fingerprint files
    pub fn registry_dir(&self) -> PathBuf {
        self.work_dir.join("registry")
    }

    /// Directory holding content snapshots
    pub fn data_dir(&self) -> PathBuf {
        self.work_dir.join("data")
    }

    /// Path of the durable failure log
    pub fn error_log_path(&self) -> PathBuf {
        self.work_dir.join(ERROR_LOG_NAME)
    }
}

/// Resolve the working directory against `cwd`
fn sanitize_work_dir(dir: Option<&Path>, cwd: &Path) -> PathBuf {
    match dir {
        None => cwd.to_path_buf(),
        Some(d) if d.as_os_str().is_empty() => cwd.to_path_buf(),
        Some(d) if d.is_absolute() => d.to_path_buf(),
        Some(d) => cwd.join(d),
    }
}

/// Make sure a non-empty stamp starts with a dot
fn sanitize_stamp(stamp: &str) -> String {
    let stamp = stamp.trim();
    if stamp.is_empty() || stamp.starts_with('.') {
        stamp.to_string()
    } else {
        format!(".{}", stamp)
    }
}
