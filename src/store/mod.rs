//! Fingerprint and content stores
//!
//! Where fingerprints and content snapshots live is not the worker's
//! business: it only talks to these traits. [`FsStore`] keeps them in a
//! directory tree, [`MemoryStore`] keeps them in memory.

pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use crate::error::StoreResult;
use crate::fingerprint::Fingerprint;
use crate::node::Node;
use std::io::Write;

/// Last recorded fingerprint per node
pub trait FingerprintStore: Send + Sync {
    /// Fingerprint recorded by a previous run
    ///
    /// Returns `StoreError::NotFound` when nothing was recorded yet. Callers
    /// treat any error as "no prior fingerprint".
    fn read_fingerprint(&self, node: &Node) -> StoreResult<Fingerprint>;

    /// Record `fingerprint` for the node, replacing any previous value
    fn write_fingerprint(&self, node: &Node, fingerprint: &Fingerprint) -> StoreResult<()>;
}

/// Output stream for one content snapshot
///
/// Nothing written becomes the node's snapshot until [`ContentSink::close`]
/// succeeds; the previous snapshot stays in place until then.
pub trait ContentSink: Write + Send {
    /// Flush, release and publish the snapshot; errors mean it was not published
    fn close(self: Box<Self>) -> StoreResult<()>;

    /// Release the sink and throw away everything written to it
    fn abandon(self: Box<Self>) -> StoreResult<()>;
}

/// Destination for content snapshots
pub trait ContentStore: Send + Sync {
    /// Fresh sink for the node's snapshot, owned exclusively by the caller
    fn open_content_sink(&self, node: &Node) -> StoreResult<Box<dyn ContentSink>>;
}
