//! Error types for node-backup
//!
//! This module defines the error hierarchy for:
//! - Configuration errors (fatal, the batch never starts)
//! - Parse errors for node lines and session specifications
//! - Content source errors (fingerprint and content fetches)
//! - Fingerprint/content store errors
//! - Worker thread errors
//!
//! Only configuration errors are ever propagated as batch failures.
//! Everything that happens to an individual node is folded into a
//! [`NodeOutcome`] and handled by the worker that produced it.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for node-backup
#[derive(Error, Debug)]
pub enum BackupError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Malformed node lines and session specifications
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Node line without a repository or a name
    #[error("Node string: '{input}'")]
    Node { input: String },

    /// Session spec that is not `endpoint,name=value`
    #[error("Invalid session string '{input}': {reason}")]
    Session { input: String, reason: &'static str },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Group size below one
    #[error("groupsize must be at least 1, not {size}")]
    InvalidGroupSize { size: i64 },

    /// Negative queue capacity
    #[error("queuesize must be at least 0, not {size}")]
    InvalidQueueCapacity { size: i64 },

    /// No session specifications at all
    #[error("Backup requires at least one 'url,name=value' session to run")]
    NoSessions,

    /// Session specifications were given but none parsed
    #[error("None of the {provided} session specifications could be parsed")]
    NoUsableSessions { provided: usize },

    /// Working directory cannot be used
    #[error("Invalid working directory '{path}': {reason}")]
    InvalidWorkDir { path: PathBuf, reason: String },

    /// HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Errors reported by a content source
#[derive(Error, Debug)]
pub enum SourceError {
    /// Remote answered with a non-success, non-redirect status
    #[error("Returned non 200 status code: {status}")]
    Protocol { status: u16 },

    /// Remote answered with a redirect (usually an expired session)
    #[error("Encountered a redirect (status {status})")]
    RedirectEncountered { status: u16 },

    /// Connection, TLS or request-building failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Failure reading the response or writing to the sink
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Text that is not a well-formed fingerprint
    #[error("Invalid digest '{0}'")]
    InvalidDigest(String),
}

impl SourceError {
    /// True for failures that point at the session rather than the node
    pub fn is_session_problem(&self) -> bool {
        matches!(
            self,
            SourceError::RedirectEncountered { .. }
                | SourceError::Protocol {
                    status: 401 | 403
                }
        )
    }
}

/// Errors reported by a fingerprint or content store
#[derive(Error, Debug)]
pub enum StoreError {
    /// No prior fingerprint/content exists for the node
    #[error("Nothing stored for '{node}'")]
    NotFound { node: String },

    /// File system failure
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure in a non file-backed store
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Wrap an I/O error together with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if this is a missing entry rather than a real failure
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound { .. } => true,
            StoreError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            StoreError::Other(_) => false,
        }
    }
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker thread could not be spawned
    #[error("Failed to spawn worker {id}: {reason}")]
    SpawnFailed { id: usize, reason: String },

    /// Worker panicked
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Every worker draining the target queue is gone
    #[error("Queue {queue} is closed: no worker left to drain it")]
    QueueClosed { queue: usize },
}

/// Result type alias for BackupError
pub type Result<T> = std::result::Result<T, BackupError>;

/// Result type alias for SourceError
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which step of saving a node's content went wrong
#[derive(Error, Debug)]
pub enum SaveFailure {
    /// Content sink could not be opened
    #[error("unable to open node file within datastore for backup -- {0}")]
    Open(StoreError),

    /// Content fetch failed (sink may hold partial data)
    #[error("unable to save out node to file within datastore -- {0}")]
    Fetch(SourceError),

    /// Content fetched, but the sink failed to close
    #[error("unable to close node file within datastore -- {0}")]
    Close(StoreError),
}

/// Represents the outcome of backing up a single node
#[derive(Debug)]
pub enum NodeOutcome {
    /// Current fingerprint matches the stored one
    Unchanged,

    /// Content saved and fingerprint recorded
    Saved { bytes: u64 },

    /// Content saved, but the new fingerprint could not be recorded
    PersistWarning { bytes: u64, error: StoreError },

    /// Current fingerprint could not be computed
    FetchFailed(SourceError),

    /// Content could not be saved; fingerprint left untouched
    SaveFailed(SaveFailure),
}

impl NodeOutcome {
    /// Returns true if the node's content is safely backed up
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            NodeOutcome::Unchanged | NodeOutcome::Saved { .. } | NodeOutcome::PersistWarning { .. }
        )
    }

    /// Returns true if the failure belongs in the durable error log
    pub fn is_failure(&self) -> bool {
        matches!(self, NodeOutcome::FetchFailed(_) | NodeOutcome::SaveFailed(_))
    }

    /// Short label for log lines
    pub fn label(&self) -> &'static str {
        match self {
            NodeOutcome::Unchanged => "unchanged",
            NodeOutcome::Saved { .. } => "saved",
            NodeOutcome::PersistWarning { .. } => "persist-warning",
            NodeOutcome::FetchFailed(_) => "fetch-failed",
            NodeOutcome::SaveFailed(_) => "save-failed",
        }
    }
}
