//! In-memory store
//!
//! Thread-safe and cheap to clone: clones share the same maps, so a test can
//! hand one clone to the dispatcher and inspect the other afterwards.

use crate::error::{StoreError, StoreResult};
use crate::fingerprint::Fingerprint;
use crate::node::Node;
use crate::store::{ContentSink, ContentStore, FingerprintStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    fingerprints: Mutex<HashMap<String, Fingerprint>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
    sinks_opened: AtomicU64,
    fingerprints_written: AtomicU64,
}

/// Fingerprints and content kept in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a fingerprint as if a previous run had recorded it
    pub fn set_fingerprint(&self, node: &Node, fingerprint: Fingerprint) {
        self.inner
            .fingerprints
            .lock()
            .insert(node.identity_key(), fingerprint);
    }

    /// Currently recorded fingerprint
    pub fn fingerprint(&self, node: &Node) -> Option<Fingerprint> {
        self.inner.fingerprints.lock().get(&node.identity_key()).cloned()
    }

    /// Last closed content snapshot
    pub fn content(&self, node: &Node) -> Option<Vec<u8>> {
        self.inner.contents.lock().get(&node.identity_key()).cloned()
    }

    /// Number of content sinks handed out
    pub fn sinks_opened(&self) -> u64 {
        self.inner.sinks_opened.load(Ordering::SeqCst)
    }

    /// Number of fingerprint writes
    pub fn fingerprints_written(&self) -> u64 {
        self.inner.fingerprints_written.load(Ordering::SeqCst)
    }
}

impl FingerprintStore for MemoryStore {
    fn read_fingerprint(&self, node: &Node) -> StoreResult<Fingerprint> {
        self.fingerprint(node).ok_or_else(|| StoreError::NotFound {
            node: node.identity_key(),
        })
    }

    fn write_fingerprint(&self, node: &Node, fingerprint: &Fingerprint) -> StoreResult<()> {
        self.inner.fingerprints_written.fetch_add(1, Ordering::SeqCst);
        self.set_fingerprint(node, fingerprint.clone());
        Ok(())
    }
}

impl ContentStore for MemoryStore {
    fn open_content_sink(&self, node: &Node) -> StoreResult<Box<dyn ContentSink>> {
        self.inner.sinks_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySink {
            key: node.identity_key(),
            buffer: Vec::new(),
            store: Arc::clone(&self.inner),
        }))
    }
}

/// Buffers a snapshot until it is closed
struct MemorySink {
    key: String,
    buffer: Vec<u8>,
    store: Arc<Inner>,
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ContentSink for MemorySink {
    fn close(self: Box<Self>) -> StoreResult<()> {
        let MemorySink { key, buffer, store } = *self;
        store.contents.lock().insert(key, buffer);
        Ok(())
    }

    fn abandon(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
