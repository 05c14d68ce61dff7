//! Dispatcher - owns the queues and the worker pool
//!
//! The dispatcher is responsible for:
//! - Validating the dispatch configuration before anything is spawned
//! - Parsing session specifications (bad ones are skipped)
//! - Building one shared queue, or one queue per session when sharded
//! - Spawning `group_size` workers per session
//! - Routing nodes to queues
//! - Closing the queues and waiting for every worker to finish

use crate::backup::queue::{QueueStats, WorkQueue, WorkQueueSender};
use crate::backup::worker::{aggregate_stats, BackupTotals, Worker, WorkerStats};
use crate::backup::BackupContext;
use crate::config::{DispatchConfig, PartitionMode, LARGE_GROUP_SIZE};
use crate::error::{BackupError, ConfigError, WorkerError};
use crate::node::Node;
use crate::session::Session;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Queue index for a node when `queue_count` queues are sharded
///
/// A pure function of the node's identity key and the queue count, so the
/// same node always lands on the same session within a run.
pub fn route(node: &Node, queue_count: usize) -> usize {
    if queue_count <= 1 {
        return 0;
    }
    (xxh3_64(node.identity_key().as_bytes()) % queue_count as u64) as usize
}

/// Result of a finished batch
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Per-node totals over all workers
    pub totals: BackupTotals,

    /// Nodes accepted by the queues
    pub enqueued: u64,

    /// Nodes taken off the queues by workers
    pub dequeued: u64,

    /// Workers spawned (sessions × group size)
    pub workers_spawned: usize,

    /// Workers that drained their queue and returned
    pub workers_completed: usize,

    /// Workers that died with a panic
    pub workers_panicked: usize,

    /// Time from dispatcher start to the last worker returning
    pub duration: Duration,
}

impl BatchReport {
    /// True when every enqueued node was handed to a worker
    pub fn is_drained(&self) -> bool {
        self.enqueued == self.dequeued
    }
}

/// Progress information for display
#[derive(Debug, Clone)]
pub struct BackupProgress {
    /// Per-node totals so far
    pub totals: BackupTotals,

    /// Nodes waiting in queues
    pub queued: u64,

    /// Total workers
    pub total_workers: usize,

    /// Elapsed time
    pub elapsed: Duration,
}

impl BackupProgress {
    /// Calculate nodes per second rate
    pub fn nodes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.totals.processed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Read-only view of the running pipeline, usable from another thread
#[derive(Clone)]
pub struct ProgressHandle {
    worker_stats: Vec<Arc<WorkerStats>>,
    queue_stats: Vec<Arc<QueueStats>>,
    started: Instant,
}

impl ProgressHandle {
    /// Current progress
    pub fn snapshot(&self) -> BackupProgress {
        let (enqueued, dequeued) = queue_counts(&self.queue_stats);
        BackupProgress {
            totals: aggregate_stats(&self.worker_stats),
            queued: enqueued.saturating_sub(dequeued),
            total_workers: self.worker_stats.len(),
            elapsed: self.started.elapsed(),
        }
    }
}

fn queue_counts(stats: &[Arc<QueueStats>]) -> (u64, u64) {
    stats.iter().fold((0, 0), |(enq, deq), s| {
        (
            enq + s.enqueued.load(Ordering::Relaxed),
            deq + s.dequeued.load(Ordering::Relaxed),
        )
    })
}

/// Distributes nodes over a fixed pool of workers
pub struct Dispatcher {
    /// Partitioning policy
    mode: PartitionMode,

    /// Producer side of every queue (one, or one per session)
    senders: Vec<WorkQueueSender>,

    /// Queue statistics, same order as `senders`
    queue_stats: Vec<Arc<QueueStats>>,

    /// Worker threads
    workers: Vec<Worker>,

    /// Usable sessions
    session_count: usize,

    /// Dispatcher start time
    started: Instant,
}

impl Dispatcher {
    /// Validate configuration, parse sessions, build queues and spawn workers
    ///
    /// Unparseable session specifications are skipped. Fails before any
    /// worker exists if the configuration is invalid or no session is usable.
    pub fn new(
        config: &DispatchConfig,
        session_specs: &[String],
        ctx: BackupContext,
    ) -> Result<Self, BackupError> {
        config.validate()?;
        if config.group_size > LARGE_GROUP_SIZE {
            warn!(
                group_size = config.group_size,
                "Very large group size, one thread per worker will be spawned"
            );
        }
        let sessions = parse_sessions(session_specs)?;
        let session_count = sessions.len();

        let queue_count = match config.partition_mode {
            PartitionMode::Shared => 1,
            PartitionMode::Sharded => session_count,
        };
        let queues: Vec<WorkQueue> = (0..queue_count)
            .map(|i| WorkQueue::new(i, config.queue_capacity))
            .collect();

        let mut dispatcher = Self {
            mode: config.partition_mode,
            senders: Vec::with_capacity(queue_count),
            queue_stats: queues.iter().map(WorkQueue::stats).collect(),
            workers: Vec::with_capacity(session_count * config.group_size),
            session_count,
            started: Instant::now(),
        };

        for (idx, session) in sessions.into_iter().enumerate() {
            let queue = match config.partition_mode {
                PartitionMode::Shared => &queues[0],
                PartitionMode::Sharded => &queues[idx],
            };
            for i in 0..config.group_size {
                let id = idx * config.group_size + i;
                match Worker::spawn(id, Arc::clone(&session), queue.receiver(), ctx.clone()) {
                    Ok(worker) => dispatcher.workers.push(worker),
                    Err(e) => {
                        // Let the workers that did start exit before reporting.
                        drop(queues);
                        dispatcher.close_and_wait();
                        return Err(e.into());
                    }
                }
            }
        }

        dispatcher.senders = queues.into_iter().map(WorkQueue::into_sender).collect();

        info!(
            sessions = session_count,
            mode = ?dispatcher.mode,
            queues = queue_count,
            group_size = config.group_size,
            queue_capacity = config.queue_capacity,
            workers = dispatcher.workers.len(),
            "Backup workers started"
        );

        Ok(dispatcher)
    }

    /// Number of usable sessions
    pub fn session_count(&self) -> usize {
        self.session_count
    }

    /// Number of queues
    pub fn queue_count(&self) -> usize {
        self.senders.len()
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a node will be sent to
    pub fn queue_for(&self, node: &Node) -> usize {
        match self.mode {
            PartitionMode::Shared => 0,
            PartitionMode::Sharded => route(node, self.senders.len()),
        }
    }

    /// Hand a node to its queue, blocking while that queue is full
    pub fn enqueue(&self, node: Node) -> Result<(), WorkerError> {
        let index = self.queue_for(&node);
        match self.senders.get(index) {
            Some(sender) => sender.send(node),
            None => Err(WorkerError::QueueClosed { queue: index }),
        }
    }

    /// Handle for watching progress from another thread
    pub fn progress_handle(&self) -> ProgressHandle {
        ProgressHandle {
            worker_stats: self.workers.iter().map(Worker::stats).collect(),
            queue_stats: self.queue_stats.clone(),
            started: self.started,
        }
    }

    /// Close every queue and wait until every worker has drained and returned
    ///
    /// In-flight nodes are finished, not aborted. Consumes the dispatcher,
    /// so it happens exactly once.
    pub fn close_and_wait(mut self) -> BatchReport {
        for sender in self.senders.drain(..) {
            sender.close();
        }

        let workers = std::mem::take(&mut self.workers);
        let workers_spawned = workers.len();
        let stats: Vec<Arc<WorkerStats>> = workers.iter().map(Worker::stats).collect();

        let mut workers_completed = 0;
        let mut workers_panicked = 0;
        for worker in workers {
            let id = worker.id();
            match worker.join() {
                Ok(()) => workers_completed += 1,
                Err(e) => {
                    warn!(worker = id, error = %e, "Worker failed to join cleanly");
                    workers_panicked += 1;
                }
            }
        }

        let (enqueued, dequeued) = queue_counts(&self.queue_stats);
        let report = BatchReport {
            totals: aggregate_stats(&stats),
            enqueued,
            dequeued,
            workers_spawned,
            workers_completed,
            workers_panicked,
            duration: self.started.elapsed(),
        };

        info!(
            processed = report.totals.processed,
            saved = report.totals.saved,
            unchanged = report.totals.unchanged,
            failures = report.totals.failures(),
            workers = report.workers_completed,
            "All workers finished"
        );

        report
    }
}

/// Parse session specifications, skipping the ones that do not parse
fn parse_sessions(specs: &[String]) -> Result<Vec<Arc<Session>>, ConfigError> {
    if specs.is_empty() {
        return Err(ConfigError::NoSessions);
    }

    let sessions: Vec<Arc<Session>> = specs
        .iter()
        .filter_map(|spec| match Session::parse(spec) {
            Ok(session) => Some(Arc::new(session)),
            Err(e) => {
                // Usually an empty argument from stray whitespace.
                warn!(error = %e, "Skipping session");
                None
            }
        })
        .collect();

    if sessions.is_empty() {
        return Err(ConfigError::NoUsableSessions {
            provided: specs.len(),
        });
    }
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errlog::ErrorLog;
    use crate::error::SourceResult;
    use crate::fingerprint::Fingerprint;
    use crate::source::ContentSource;
    use crate::store::MemoryStore;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io::Write;

    /// Records which session handled each node
    #[derive(Default)]
    struct EchoSource {
        seen: Mutex<HashMap<String, Vec<String>>>,
    }

    impl ContentSource for EchoSource {
        fn fetch_fingerprint(&self, session: &Session, node: &Node) -> SourceResult<Fingerprint> {
            self.seen
                .lock()
                .entry(node.identity_key())
                .or_default()
                .push(session.endpoint().to_string());
            Ok(Fingerprint::of_records(node.identity_key().as_bytes()))
        }

        fn fetch_content(
            &self,
            _session: &Session,
            node: &Node,
            sink: &mut dyn Write,
        ) -> SourceResult<u64> {
            sink.write_all(node.path().as_bytes())?;
            Ok(node.path().len() as u64)
        }
    }

    fn context(source: Arc<EchoSource>) -> BackupContext {
        BackupContext::new(source, Arc::new(MemoryStore::new()), Arc::new(ErrorLog::discard()))
    }

    fn specs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_route_deterministic() {
        let node = Node::parse("siteA.x").unwrap();
        let first = route(&node, 2);
        assert!(first < 2);
        for _ in 0..100 {
            assert_eq!(route(&Node::parse("siteA.x").unwrap(), 2), first);
        }
        assert_eq!(route(&node, 1), 0);
    }

    #[test]
    fn test_route_spreads() {
        let mut hit = [false; 4];
        for i in 0..200 {
            hit[route(&Node::parse(&format!("website.page{}", i)).unwrap(), 4)] = true;
        }
        assert!(hit.iter().all(|h| *h));
    }

    #[test]
    fn test_invalid_config() {
        let source = Arc::new(EchoSource::default());
        let config = DispatchConfig {
            group_size: 0,
            ..DispatchConfig::default()
        };
        let err = Dispatcher::new(&config, &specs(&["http://a,S=1"]), context(source)).err().unwrap();
        assert!(matches!(err, BackupError::Config(ConfigError::InvalidGroupSize { .. })));
    }

    #[test]
    fn test_no_sessions() {
        let source = Arc::new(EchoSource::default());
        let err = Dispatcher::new(&DispatchConfig::default(), &[], context(source.clone()))
            .err()
            .unwrap();
        assert!(matches!(err, BackupError::Config(ConfigError::NoSessions)));

        let err = Dispatcher::new(&DispatchConfig::default(), &specs(&["", "  ", "nocomma"]), context(source))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            BackupError::Config(ConfigError::NoUsableSessions { provided: 3 })
        ));
    }

    #[test]
    fn test_bad_sessions_skipped() {
        let source = Arc::new(EchoSource::default());
        let config = DispatchConfig {
            group_size: 3,
            ..DispatchConfig::default()
        };
        let dispatcher =
            Dispatcher::new(&config, &specs(&["", "http://a,S=1", "bad"]), context(source)).unwrap();
        assert_eq!(dispatcher.session_count(), 1);
        assert_eq!(dispatcher.worker_count(), 3);
        assert_eq!(dispatcher.queue_count(), 1);

        let report = dispatcher.close_and_wait();
        assert_eq!(report.workers_spawned, 3);
        assert_eq!(report.workers_completed, 3);
    }

    #[test]
    fn test_shared_mode_drains_everything() {
        let source = Arc::new(EchoSource::default());
        let config = DispatchConfig {
            partition_mode: PartitionMode::Shared,
            group_size: 2,
            queue_capacity: 4,
        };
        let dispatcher = Dispatcher::new(
            &config,
            &specs(&["http://a,S=1", "http://b,S=2"]),
            context(source.clone()),
        )
        .unwrap();
        assert_eq!(dispatcher.worker_count(), 4);

        for i in 0..50 {
            dispatcher
                .enqueue(Node::parse(&format!("website.p{}", i)).unwrap())
                .unwrap();
        }
        let report = dispatcher.close_and_wait();

        assert!(report.is_drained());
        assert_eq!(report.enqueued, 50);
        assert_eq!(report.totals.processed, 50);
        assert_eq!(report.totals.saved, 50);
        assert_eq!(report.workers_completed, 4);
        assert_eq!(source.seen.lock().len(), 50);
    }

    #[test]
    fn test_sharded_mode_pins_nodes_to_sessions() {
        let source = Arc::new(EchoSource::default());
        let config = DispatchConfig {
            partition_mode: PartitionMode::Sharded,
            group_size: 2,
            queue_capacity: 0,
        };
        let endpoints = ["http://a", "http://b", "http://c"];
        let session_specs: Vec<String> = endpoints.iter().map(|e| format!("{},S=1", e)).collect();
        let dispatcher = Dispatcher::new(&config, &session_specs, context(source.clone())).unwrap();
        assert_eq!(dispatcher.queue_count(), 3);

        // Every node three times
        for _ in 0..3 {
            for i in 0..20 {
                dispatcher
                    .enqueue(Node::parse(&format!("dms.doc{}", i)).unwrap())
                    .unwrap();
            }
        }
        let report = dispatcher.close_and_wait();
        assert_eq!(report.totals.processed, 60);

        for (key, seen) in source.seen.lock().iter() {
            assert_eq!(seen.len(), 3);
            let expected = endpoints[route(&Node::parse(key).unwrap(), 3)];
            assert!(seen.iter().all(|e| e == expected), "{} handled by {:?}", key, seen);
        }
    }

    #[test]
    fn test_progress_handle() {
        let source = Arc::new(EchoSource::default());
        let dispatcher =
            Dispatcher::new(&DispatchConfig::default(), &specs(&["http://a,S=1"]), context(source)).unwrap();
        let progress = dispatcher.progress_handle();
        dispatcher.enqueue(Node::parse("website.home").unwrap()).unwrap();
        dispatcher.close_and_wait();

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.totals.processed, 1);
        assert_eq!(snapshot.queued, 0);
        assert_eq!(snapshot.total_workers, 2);
    }
}
