//! node-backup - Incremental backup of remote content nodes
//!
//! Backs up a large list of named content nodes from one or more remote
//! endpoints. For every node a cheap fingerprint of its current content is
//! fetched and compared with the one recorded by the previous run; only
//! nodes whose fingerprint changed are exported in full.
//!
//! # Features
//!
//! - **Bounded Concurrency**: a fixed pool of worker threads, a fixed number
//!   per session, fed from bounded queues with backpressure.
//!
//! - **Optional Sharding**: with one queue per session, a node always goes
//!   to the same session, so fingerprints from different publics are never
//!   compared with each other.
//!
//! - **Failure Isolation**: a node that fails is written to the error log
//!   and left for the next run; the batch carries on.
//!
//! - **Clean Shutdown**: closing the dispatcher drains every queue and joins
//!   every worker before returning.
//!
//! # Architecture
//!
//! ```text
//!          stdin (repo.path.to.node per line)
//!                       │
//!                       ▼
//!              ┌─────────────────┐
//!              │   BatchDriver   │  parse, skip bad lines
//!              └────────┬────────┘
//!                       ▼
//!              ┌─────────────────┐
//!              │   Dispatcher    │  route: shared or xxh3 % sessions
//!              └────────┬────────┘
//!                       ▼
//!        ┌──────────────────────────────┐
//!        │   Work Queues (crossbeam)    │
//!        └──────────────┬───────────────┘
//!                       ▼
//!   ┌─────────┐  ┌─────────┐        ┌─────────┐
//!   │Worker 0 │  │Worker 1 │  ...   │Worker N │   groupsize per session
//!   └────┬────┘  └────┬────┘        └────┬────┘
//!        └────────────┼──────────────────┘
//!          ┌──────────┴───────────┐
//!          ▼                      ▼
//!   ┌──────────────┐     ┌──────────────────┐
//!   │ HttpSource   │     │ FsStore          │
//!   │ dump/export  │     │ registry/ data/  │
//!   └──────────────┘     └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Two sessions on the same public, four workers each
//! node-backup --groupsize 4 https://cms,JSESSIONID=a https://cms,JSESSIONID=b < nodes.txt
//!
//! # Different publics: pin each node to one session
//! node-backup --split --stamp 2015-07-31 https://pub1,SID=a https://pub2,SID=b < nodes.txt
//! ```

pub mod backup;
pub mod config;
pub mod errlog;
pub mod error;
pub mod fingerprint;
pub mod node;
pub mod progress;
pub mod session;
pub mod source;
pub mod store;

pub use backup::{BackupContext, BatchDriver, BatchReport, Dispatcher};
pub use config::{BackupConfig, CliArgs, DispatchConfig, PartitionMode};
pub use errlog::ErrorLog;
pub use error::{BackupError, NodeOutcome, Result};
pub use fingerprint::Fingerprint;
pub use node::Node;
pub use session::Session;
