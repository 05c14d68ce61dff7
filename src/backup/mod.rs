//! Concurrent backup pipeline
//!
//! ```text
//!   stdin lines ──► BatchDriver ──► Dispatcher.enqueue(node)
//!                                        │
//!                 shared: one queue      │      sharded: queue[xxh3(node) % sessions]
//!                ┌───────────────────────┼───────────────────────┐
//!                ▼                       ▼                       ▼
//!        ┌──────────────┐        ┌──────────────┐        ┌──────────────┐
//!        │ Worker group │        │ Worker group │        │ Worker group │
//!        │  session 0   │        │  session 1   │  ...   │  session N   │
//!        └──────┬───────┘        └──────┬───────┘        └──────┬───────┘
//!               │ fingerprint → compare → save → record          │
//!               ▼                                                ▼
//!        ContentSource                              Fingerprint/Content store
//! ```
//!
//! `Dispatcher::close_and_wait` closes every queue and joins every worker;
//! it is the only way a batch finishes.

pub mod dispatcher;
pub mod driver;
pub mod queue;
pub mod worker;

pub use dispatcher::{route, BackupProgress, BatchReport, Dispatcher, ProgressHandle};
pub use driver::{request_shutdown, BatchDriver, DriverStats, Interrupt};
pub use queue::{QueueStats, WorkQueue, WorkQueueReceiver, WorkQueueSender};
pub use worker::{backup_node, BackupTotals, Worker, WorkerStats};

use crate::errlog::ErrorLog;
use crate::source::ContentSource;
use crate::store::{ContentStore, FingerprintStore};
use std::sync::Arc;

/// Collaborators shared by every worker
#[derive(Clone)]
pub struct BackupContext {
    /// Where fingerprints and content come from
    pub source: Arc<dyn ContentSource>,

    /// Where fingerprints are recorded
    pub fingerprints: Arc<dyn FingerprintStore>,

    /// Where content snapshots are written
    pub contents: Arc<dyn ContentStore>,

    /// Durable log of per-node failures
    pub error_log: Arc<ErrorLog>,
}

impl BackupContext {
    /// Use one store for both fingerprints and content
    pub fn new<S>(source: Arc<dyn ContentSource>, store: Arc<S>, error_log: Arc<ErrorLog>) -> Self
    where
        S: FingerprintStore + ContentStore + 'static,
    {
        Self {
            source,
            fingerprints: store.clone(),
            contents: store,
            error_log,
        }
    }
}
