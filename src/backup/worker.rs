//! Worker thread logic for incremental backup
//!
//! Each worker:
//! - Is bound to one queue and one session for its whole life
//! - Pulls nodes from the queue until it is closed and drained
//! - Compares the node's current fingerprint with the recorded one
//! - Saves changed content and records the new fingerprint
//!
//! Nothing that happens to a single node stops the loop. Workers never
//! retry: a node that failed is picked up again by the next batch.

use crate::backup::queue::WorkQueueReceiver;
use crate::backup::BackupContext;
use crate::error::{NodeOutcome, SaveFailure, WorkerError};
use crate::node::Node;
use crate::session::Session;
use crate::store::ContentSink;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Statistics collected by a worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Nodes taken off the queue
    pub processed: AtomicU64,

    /// Nodes whose fingerprint had not changed
    pub unchanged: AtomicU64,

    /// Nodes saved (with or without fingerprint bookkeeping)
    pub saved: AtomicU64,

    /// Nodes whose fingerprint could not be computed
    pub fetch_failures: AtomicU64,

    /// Nodes whose content could not be saved
    pub save_failures: AtomicU64,

    /// Nodes saved whose new fingerprint could not be recorded
    pub persist_warnings: AtomicU64,

    /// Content bytes written
    pub bytes_saved: AtomicU64,
}

impl WorkerStats {
    fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, outcome: &NodeOutcome) {
        match outcome {
            NodeOutcome::Unchanged => {
                self.unchanged.fetch_add(1, Ordering::Relaxed);
            }
            NodeOutcome::Saved { bytes } => {
                self.saved.fetch_add(1, Ordering::Relaxed);
                self.bytes_saved.fetch_add(*bytes, Ordering::Relaxed);
            }
            NodeOutcome::PersistWarning { bytes, .. } => {
                self.saved.fetch_add(1, Ordering::Relaxed);
                self.persist_warnings.fetch_add(1, Ordering::Relaxed);
                self.bytes_saved.fetch_add(*bytes, Ordering::Relaxed);
            }
            NodeOutcome::FetchFailed(_) => {
                self.fetch_failures.fetch_add(1, Ordering::Relaxed);
            }
            NodeOutcome::SaveFailed(_) => {
                self.save_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Sum of [`WorkerStats`] over a set of workers
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackupTotals {
    pub processed: u64,
    pub unchanged: u64,
    pub saved: u64,
    pub fetch_failures: u64,
    pub save_failures: u64,
    pub persist_warnings: u64,
    pub bytes_saved: u64,
}

impl BackupTotals {
    /// Nodes that ended up in the error log
    pub fn failures(&self) -> u64 {
        self.fetch_failures + self.save_failures
    }
}

/// Aggregate statistics from multiple workers
pub fn aggregate_stats<'a>(stats: impl IntoIterator<Item = &'a Arc<WorkerStats>>) -> BackupTotals {
    let mut totals = BackupTotals::default();
    for s in stats {
        totals.processed += s.processed.load(Ordering::Relaxed);
        totals.unchanged += s.unchanged.load(Ordering::Relaxed);
        totals.saved += s.saved.load(Ordering::Relaxed);
        totals.fetch_failures += s.fetch_failures.load(Ordering::Relaxed);
        totals.save_failures += s.save_failures.load(Ordering::Relaxed);
        totals.persist_warnings += s.persist_warnings.load(Ordering::Relaxed);
        totals.bytes_saved += s.bytes_saved.load(Ordering::Relaxed);
    }
    totals
}

/// A worker thread draining one queue through one session
pub struct Worker {
    /// Worker ID
    id: usize,

    /// Thread handle
    handle: Option<JoinHandle<()>>,

    /// Worker statistics
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Spawn a new worker thread
    pub fn spawn(
        id: usize,
        session: Arc<Session>,
        queue: WorkQueueReceiver,
        ctx: BackupContext,
    ) -> Result<Self, WorkerError> {
        let stats = Arc::new(WorkerStats::default());
        let stats_clone = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name(format!("backup-{}", id))
            .spawn(move || worker_loop(id, session, queue, ctx, stats_clone))
            .map_err(|e| WorkerError::SpawnFailed {
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
            stats,
        })
    }

    /// Get worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get worker statistics
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Wait for the worker to drain its queue and exit
    pub fn join(mut self) -> Result<(), WorkerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|panic| WorkerError::Panicked {
                id: self.id,
                message: panic_message(&panic),
            }),
            None => Ok(()),
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Worker thread panicked".into()
    }
}

/// Main worker loop
fn worker_loop(
    id: usize,
    session: Arc<Session>,
    queue: WorkQueueReceiver,
    ctx: BackupContext,
    stats: Arc<WorkerStats>,
) {
    debug!(worker = id, queue = queue.index(), session = %session, "Worker starting");

    while let Some(node) = queue.recv() {
        stats.record_processed();
        let outcome = backup_node(id, &session, &node, &ctx);
        debug!(worker = id, node = %node, outcome = outcome.label(), "Node done");
        stats.record(&outcome);
    }

    debug!(
        worker = id,
        processed = stats.processed.load(Ordering::Relaxed),
        saved = stats.saved.load(Ordering::Relaxed),
        "Worker drained its queue"
    );
}

/// Back up a single node
///
/// Reads the recorded fingerprint, fetches the current one and, if they
/// differ, saves the content and records the new fingerprint. Failures are
/// logged (and written to the error log) here; the returned outcome is for
/// accounting.
pub fn backup_node(worker: usize, session: &Session, node: &Node, ctx: &BackupContext) -> NodeOutcome {
    // Missing or unreadable: back the node up.
    let saved = match ctx.fingerprints.read_fingerprint(node) {
        Ok(fp) => Some(fp),
        Err(e) => {
            if !e.is_not_found() {
                debug!(worker, node = %node, error = %e, "Unable to read saved fingerprint");
            }
            None
        }
    };

    let start_dump = Instant::now();
    let current = match ctx.source.fetch_fingerprint(session, node) {
        Ok(fp) => fp,
        Err(e) => {
            let message = format!("unable to generate hash dump -- {}", e);
            ctx.error_log.record(worker, node, &message);
            error!(worker, node = %node, error = %e, "Unable to generate hash dump");
            if e.is_session_problem() {
                warn!(worker, session = %session, "Session looks expired or unauthorized");
            }
            return NodeOutcome::FetchFailed(e);
        }
    };
    let elapsed_dump = start_dump.elapsed();

    if saved.as_ref() == Some(&current) {
        info!(worker, node = %node, dump = ?elapsed_dump, "Unchanged");
        return NodeOutcome::Unchanged;
    }

    let start_save = Instant::now();
    let bytes = match save_content(session, node, ctx) {
        Ok(bytes) => bytes,
        Err(failure) => {
            ctx.error_log.record(worker, node, &failure);
            error!(worker, node = %node, dump = ?elapsed_dump, error = %failure, "Save failed");
            return NodeOutcome::SaveFailed(failure);
        }
    };
    info!(
        worker,
        node = %node,
        dump = ?elapsed_dump,
        save = ?start_save.elapsed(),
        bytes,
        "Saved"
    );

    match ctx.fingerprints.write_fingerprint(node, &current) {
        Ok(()) => NodeOutcome::Saved { bytes },
        Err(e) => {
            warn!(
                worker,
                node = %node,
                error = %e,
                "Unable to save fingerprint - node may be backed up again next run"
            );
            NodeOutcome::PersistWarning { bytes, error: e }
        }
    }
}

/// Open a sink, stream the content into it and close it
///
/// The sink is released on every path: closed (published) after a complete
/// fetch, abandoned after a failed one so the partial data never replaces
/// the previous snapshot.
fn save_content(session: &Session, node: &Node, ctx: &BackupContext) -> Result<u64, SaveFailure> {
    let mut sink = ctx
        .contents
        .open_content_sink(node)
        .map_err(SaveFailure::Open)?;

    let fetched = ctx
        .source
        .fetch_content(session, node, &mut SinkWriter(sink.as_mut()));

    match fetched {
        Ok(bytes) => sink.close().map(|()| bytes).map_err(SaveFailure::Close),
        Err(e) => {
            if let Err(abandon_err) = sink.abandon() {
                warn!(node = %node, error = %abandon_err, "Unable to remove partial content");
            }
            Err(SaveFailure::Fetch(e))
        }
    }
}

/// Lends a content sink out as a plain writer
struct SinkWriter<'a>(&'a mut dyn ContentSink);

impl Write for SinkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errlog::ErrorLog;
    use crate::error::{SourceError, SourceResult, StoreError, StoreResult};
    use crate::fingerprint::Fingerprint;
    use crate::source::ContentSource;
    use crate::store::{ContentStore, FingerprintStore, MemoryStore};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Remote with fixed dumps; content fetch can be made to fail halfway
    #[derive(Default)]
    struct FakeSource {
        dumps: HashMap<String, Vec<u8>>,
        failing_content: bool,
        content_fetches: AtomicU64,
    }

    impl FakeSource {
        fn with(node: &str, dump: &[u8]) -> Self {
            let mut source = Self::default();
            source.dumps.insert(node.to_string(), dump.to_vec());
            source
        }
    }

    impl ContentSource for FakeSource {
        fn fetch_fingerprint(&self, _session: &Session, node: &Node) -> SourceResult<Fingerprint> {
            self.dumps
                .get(&node.identity_key())
                .map(|d| Fingerprint::of_records(d))
                .ok_or(SourceError::Protocol { status: 404 })
        }

        fn fetch_content(
            &self,
            _session: &Session,
            node: &Node,
            sink: &mut dyn Write,
        ) -> SourceResult<u64> {
            self.content_fetches.fetch_add(1, Ordering::SeqCst);
            let dump = self
                .dumps
                .get(&node.identity_key())
                .ok_or(SourceError::Protocol { status: 404 })?;
            if self.failing_content {
                sink.write_all(&dump[..dump.len() / 2])?;
                return Err(SourceError::Transport("connection reset".into()));
            }
            sink.write_all(dump)?;
            Ok(dump.len() as u64)
        }
    }

    /// Fingerprint store whose writes always fail
    #[derive(Default)]
    struct ReadOnlyFingerprints {
        recorded: Mutex<HashMap<String, Fingerprint>>,
    }

    impl FingerprintStore for ReadOnlyFingerprints {
        fn read_fingerprint(&self, node: &Node) -> StoreResult<Fingerprint> {
            self.recorded
                .lock()
                .get(&node.identity_key())
                .cloned()
                .ok_or(StoreError::NotFound {
                    node: node.identity_key(),
                })
        }

        fn write_fingerprint(&self, _node: &Node, _fp: &Fingerprint) -> StoreResult<()> {
            Err(StoreError::Other("registry is read-only".into()))
        }
    }

    /// Content store that fails either when opening or when closing a sink
    struct FailingContents {
        fail_open: bool,
    }

    impl ContentStore for FailingContents {
        fn open_content_sink(&self, _node: &Node) -> StoreResult<Box<dyn ContentSink>> {
            if self.fail_open {
                return Err(StoreError::io(
                    "/backup/data/website",
                    io::Error::new(io::ErrorKind::PermissionDenied, "read-only file system"),
                ));
            }
            Ok(Box::new(UnclosableSink(Vec::new())))
        }
    }

    struct UnclosableSink(Vec<u8>);

    impl Write for UnclosableSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ContentSink for UnclosableSink {
        fn close(self: Box<Self>) -> StoreResult<()> {
            Err(StoreError::Other("no space left on device".into()))
        }

        fn abandon(self: Box<Self>) -> StoreResult<()> {
            Ok(())
        }
    }

    fn context(source: FakeSource, store: &MemoryStore) -> (BackupContext, Arc<FakeSource>) {
        let source = Arc::new(source);
        let ctx = BackupContext {
            source: source.clone(),
            fingerprints: Arc::new(store.clone()),
            contents: Arc::new(store.clone()),
            error_log: Arc::new(ErrorLog::discard()),
        };
        (ctx, source)
    }

    fn session() -> Session {
        Session::parse("http://cms,SID=1").unwrap()
    }

    #[test]
    fn test_new_node_saved() {
        let store = MemoryStore::new();
        let (ctx, _) = context(FakeSource::with("website.home", b"b\na\n"), &store);
        let node = Node::parse("website.home").unwrap();

        let outcome = backup_node(0, &session(), &node, &ctx);
        assert!(matches!(outcome, NodeOutcome::Saved { bytes: 4 }));
        assert_eq!(store.content(&node).as_deref(), Some(&b"b\na\n"[..]));
        assert_eq!(store.fingerprint(&node), Some(Fingerprint::of_records(b"a\nb\n")));
    }

    #[test]
    fn test_unchanged_node_skipped() {
        let store = MemoryStore::new();
        let node = Node::parse("website.home").unwrap();
        store.set_fingerprint(&node, Fingerprint::of_records(b"a\nb\n"));
        let (ctx, source) = context(FakeSource::with("website.home", b"b\na\n"), &store);

        let outcome = backup_node(0, &session(), &node, &ctx);
        assert!(matches!(outcome, NodeOutcome::Unchanged));
        assert_eq!(source.content_fetches.load(Ordering::SeqCst), 0);
        assert_eq!(store.sinks_opened(), 0);
        assert_eq!(store.fingerprints_written(), 0);
    }

    #[test]
    fn test_fingerprint_failure() {
        let store = MemoryStore::new();
        let (ctx, source) = context(FakeSource::default(), &store);
        let node = Node::parse("website.missing").unwrap();

        let outcome = backup_node(0, &session(), &node, &ctx);
        assert!(matches!(
            outcome,
            NodeOutcome::FetchFailed(SourceError::Protocol { status: 404 })
        ));
        assert_eq!(source.content_fetches.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.error_log.entries(), 1);
    }

    #[test]
    fn test_failed_save_keeps_old_fingerprint() {
        let store = MemoryStore::new();
        let node = Node::parse("website.home").unwrap();
        let old = Fingerprint::of_records(b"old\n");
        store.set_fingerprint(&node, old.clone());

        let mut source = FakeSource::with("website.home", b"new content\n");
        source.failing_content = true;
        let (ctx, _) = context(source, &store);

        let outcome = backup_node(0, &session(), &node, &ctx);
        assert!(matches!(
            outcome,
            NodeOutcome::SaveFailed(SaveFailure::Fetch(SourceError::Transport(_)))
        ));
        assert_eq!(store.fingerprint(&node), Some(old));
        // Partial snapshot thrown away
        assert_eq!(store.content(&node), None);
        assert_eq!(ctx.error_log.entries(), 1);
    }

    #[test]
    fn test_sink_close_failure_keeps_old_fingerprint() {
        let store = MemoryStore::new();
        let node = Node::parse("website.home").unwrap();
        let old = Fingerprint::of_records(b"old\n");
        store.set_fingerprint(&node, old.clone());

        let (mut ctx, _) = context(FakeSource::with("website.home", b"new\n"), &store);
        ctx.contents = Arc::new(FailingContents { fail_open: false });

        let outcome = backup_node(0, &session(), &node, &ctx);
        assert!(matches!(outcome, NodeOutcome::SaveFailed(SaveFailure::Close(_))));
        assert_eq!(store.fingerprint(&node), Some(old));
        assert_eq!(store.fingerprints_written(), 0);
        assert_eq!(ctx.error_log.entries(), 1);
    }

    #[test]
    fn test_sink_open_failure_skips_fetch() {
        let store = MemoryStore::new();
        let node = Node::parse("website.home").unwrap();
        let old = Fingerprint::of_records(b"old\n");
        store.set_fingerprint(&node, old.clone());

        let (mut ctx, source) = context(FakeSource::with("website.home", b"new\n"), &store);
        ctx.contents = Arc::new(FailingContents { fail_open: true });

        let outcome = backup_node(0, &session(), &node, &ctx);
        assert!(matches!(outcome, NodeOutcome::SaveFailed(SaveFailure::Open(_))));
        assert_eq!(source.content_fetches.load(Ordering::SeqCst), 0);
        assert_eq!(store.fingerprint(&node), Some(old));
        assert_eq!(ctx.error_log.entries(), 1);
    }

    #[test]
    fn test_persist_warning() {
        let store = MemoryStore::new();
        let (mut ctx, _) = context(FakeSource::with("website.home", b"x\n"), &store);
        ctx.fingerprints = Arc::new(ReadOnlyFingerprints::default());
        let node = Node::parse("website.home").unwrap();

        let outcome = backup_node(0, &session(), &node, &ctx);
        assert!(matches!(outcome, NodeOutcome::PersistWarning { bytes: 2, .. }));
        assert!(outcome.is_success());
        // Content is kept, and this is not an error-log failure
        assert_eq!(store.content(&node).as_deref(), Some(&b"x\n"[..]));
        assert_eq!(ctx.error_log.entries(), 0);
    }

    #[test]
    fn test_worker_stats() {
        let stats = WorkerStats::default();
        stats.record_processed();
        stats.record(&NodeOutcome::Saved { bytes: 10 });
        stats.record(&NodeOutcome::PersistWarning {
            bytes: 5,
            error: StoreError::Other("x".into()),
        });
        stats.record(&NodeOutcome::Unchanged);
        stats.record(&NodeOutcome::FetchFailed(SourceError::Protocol { status: 500 }));

        let totals = aggregate_stats([&Arc::new(stats)]);
        assert_eq!(totals.processed, 1);
        assert_eq!(totals.saved, 2);
        assert_eq!(totals.persist_warnings, 1);
        assert_eq!(totals.unchanged, 1);
        assert_eq!(totals.bytes_saved, 15);
        assert_eq!(totals.failures(), 1);
    }
}
