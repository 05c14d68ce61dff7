//! Bounded work queue of nodes
//!
//! Each queue is a crossbeam bounded channel with a single producer (the
//! dispatcher) and any number of consumers (the workers of a group).
//! Sending into a full queue blocks until a worker takes something off it;
//! a capacity of 0 hands each node directly to a waiting worker.
//!
//! Closing is done by dropping the [`WorkQueueSender`]: workers keep
//! receiving until the queue is empty and then see the end of the queue.

use crate::error::WorkerError;
use crate::node::Node;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Statistics for a work queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total nodes enqueued
    pub enqueued: AtomicU64,

    /// Total nodes dequeued
    pub dequeued: AtomicU64,

    /// Number of sends that had to wait for space
    pub backpressure_events: AtomicU64,
}

impl QueueStats {
    /// Nodes handed to workers so far
    pub fn throughput(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    /// Nodes accepted so far
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Get backpressure event count
    pub fn backpressure_count(&self) -> u64 {
        self.backpressure_events.load(Ordering::Relaxed)
    }
}

/// A freshly created queue, before it is split between producer and workers
pub struct WorkQueue {
    index: usize,
    sender: Sender<Node>,
    receiver: Receiver<Node>,
    stats: Arc<QueueStats>,
}

impl WorkQueue {
    /// Create a queue with the given capacity (0 = rendezvous)
    pub fn new(index: usize, capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);

        Self {
            index,
            sender,
            receiver,
            stats: Arc::new(QueueStats::default()),
        }
    }

    /// Get a receiver for this queue (one per worker)
    pub fn receiver(&self) -> WorkQueueReceiver {
        WorkQueueReceiver {
            index: self.index,
            receiver: self.receiver.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Get queue statistics
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    /// Keep only the producer side
    ///
    /// Once workers hold their receivers, the queue is fully owned by them
    /// and the returned sender: dropping the sender closes the queue.
    pub fn into_sender(self) -> WorkQueueSender {
        WorkQueueSender {
            index: self.index,
            sender: self.sender,
            stats: self.stats,
        }
    }
}

/// Producer side of a queue
pub struct WorkQueueSender {
    index: usize,
    sender: Sender<Node>,
    stats: Arc<QueueStats>,
}

impl WorkQueueSender {
    /// Send a node, blocking while the queue is full
    ///
    /// Fails only when no receiver is left to drain the queue.
    pub fn send(&self, node: Node) -> Result<(), WorkerError> {
        let node = match self.sender.try_send(node) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(TrySendError::Full(node)) => node,
            Err(TrySendError::Disconnected(_)) => {
                return Err(WorkerError::QueueClosed { queue: self.index })
            }
        };

        self.stats.backpressure_events.fetch_add(1, Ordering::Relaxed);
        self.sender
            .send(node)
            .map_err(|_| WorkerError::QueueClosed { queue: self.index })?;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Close the queue; workers drain what is left and stop
    pub fn close(self) {
        drop(self);
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

/// Consumer side of a queue
#[derive(Clone)]
pub struct WorkQueueReceiver {
    index: usize,
    receiver: Receiver<Node>,
    stats: Arc<QueueStats>,
}

impl WorkQueueReceiver {
    /// Receive a node from the queue
    ///
    /// Blocks until a node is available. Returns `None` once the queue is
    /// closed and empty.
    pub fn recv(&self) -> Option<Node> {
        match self.receiver.recv() {
            Ok(node) => {
                self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                Some(node)
            }
            Err(_) => None,
        }
    }

    /// Try to receive a node without blocking
    pub fn try_recv(&self) -> Option<Node> {
        match self.receiver.try_recv() {
            Ok(node) => {
                self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                Some(node)
            }
            Err(_) => None,
        }
    }

    /// Queue this receiver drains
    pub fn index(&self) -> usize {
        self.index
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    fn node(s: &str) -> Node {
        Node::parse(s).unwrap()
    }

    #[test]
    fn test_queue_fifo() {
        let queue = WorkQueue::new(0, 10);
        let receiver = queue.receiver();
        let stats = queue.stats();
        let sender = queue.into_sender();

        sender.send(node("a.1")).unwrap();
        sender.send(node("a.2")).unwrap();
        sender.send(node("a.3")).unwrap();
        assert_eq!(sender.len(), 3);

        assert_eq!(receiver.recv().unwrap().name(), "1");
        assert_eq!(receiver.recv().unwrap().name(), "2");
        assert_eq!(receiver.recv().unwrap().name(), "3");
        assert_eq!(stats.enqueued_count(), 3);
        assert_eq!(stats.throughput(), 3);
    }

    #[test]
    fn test_close_then_drain() {
        let queue = WorkQueue::new(0, 10);
        let receiver = queue.receiver();
        let sender = queue.into_sender();

        sender.send(node("a.1")).unwrap();
        sender.send(node("a.2")).unwrap();
        sender.close();

        assert!(receiver.recv().is_some());
        assert!(receiver.recv().is_some());
        assert!(receiver.recv().is_none());
    }

    #[test]
    fn test_queue_backpressure() {
        let queue = WorkQueue::new(0, 1);
        let receiver = queue.receiver();
        let stats = queue.stats();
        let sender = queue.into_sender();

        sender.send(node("a.first")).unwrap();

        let delivered = Arc::new(AtomicBool::new(false));
        let delivered_clone = Arc::clone(&delivered);
        let producer = thread::spawn(move || {
            sender.send(node("a.second")).unwrap();
            delivered_clone.store(true, Ordering::SeqCst);
        });

        // Queue is full: the producer must still be waiting
        thread::sleep(Duration::from_millis(50));
        assert!(!delivered.load(Ordering::SeqCst));

        assert_eq!(receiver.recv().unwrap().name(), "first");
        producer.join().unwrap();
        assert!(delivered.load(Ordering::SeqCst));
        assert_eq!(receiver.recv().unwrap().name(), "second");
        assert_eq!(stats.backpressure_count(), 1);
    }

    #[test]
    fn test_rendezvous_queue() {
        let queue = WorkQueue::new(0, 0);
        let receiver = queue.receiver();
        let sender = queue.into_sender();

        let consumer = thread::spawn(move || {
            let mut names = Vec::new();
            while let Some(n) = receiver.recv() {
                names.push(n.name().to_string());
            }
            names
        });

        for i in 0..5 {
            sender.send(node(&format!("a.{}", i))).unwrap();
        }
        sender.close();

        assert_eq!(consumer.join().unwrap(), vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_send_without_receivers() {
        let queue = WorkQueue::new(7, 4);
        let sender = queue.into_sender();

        let err = sender.send(node("a.1")).unwrap_err();
        assert!(matches!(err, WorkerError::QueueClosed { queue: 7 }));
    }
}
