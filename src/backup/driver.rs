//! Batch driver - feeds input lines to the dispatcher
//!
//! One node per line. Lines that do not parse are logged and skipped; so is
//! a node the dispatcher cannot queue. Reading stops early when the shutdown
//! flag is raised, after which the batch is closed normally so in-flight and
//! queued nodes still finish. A second interrupt while draining aborts
//! (see [`request_shutdown`]).

use crate::backup::dispatcher::{BatchReport, Dispatcher};
use crate::errlog::ErrorLog;
use crate::node::Node;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What the driver saw on its input
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriverStats {
    /// Lines read from the input
    pub lines_read: u64,

    /// Nodes handed to the dispatcher
    pub nodes_enqueued: u64,

    /// Lines that were not valid nodes
    pub parse_errors: u64,

    /// Nodes the dispatcher refused
    pub enqueue_failures: u64,

    /// Reading stopped on the shutdown flag or a read error
    pub stopped_early: bool,
}

/// What an interrupt should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Stop reading input and let queued nodes finish
    Drain,
    /// Shutdown was already requested; exit now
    Abort,
}

/// Raise the shutdown flag and report whether it was already raised
pub fn request_shutdown(flag: &AtomicBool) -> Interrupt {
    if flag.swap(true, Ordering::SeqCst) {
        Interrupt::Abort
    } else {
        Interrupt::Drain
    }
}

/// Single producer for a [`Dispatcher`]
pub struct BatchDriver {
    dispatcher: Dispatcher,
    error_log: Arc<ErrorLog>,
    shutdown: Arc<AtomicBool>,
}

impl BatchDriver {
    /// Create a driver for an already started dispatcher
    pub fn new(dispatcher: Dispatcher, error_log: Arc<ErrorLog>) -> Self {
        Self {
            dispatcher,
            error_log,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a clone of the shutdown flag (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Feed every line of `input`, then close the dispatcher and wait
    pub fn run<R: BufRead>(self, input: R) -> (DriverStats, BatchReport) {
        let stats = self.feed(input);
        if stats.stopped_early {
            info!("Input not fully read; finishing queued nodes");
        }
        let report = self.dispatcher.close_and_wait();
        (stats, report)
    }

    /// Enqueue one node per input line until the input ends or shutdown
    fn feed<R: BufRead>(&self, input: R) -> DriverStats {
        let mut stats = DriverStats::default();

        for line in input.lines() {
            if self.shutdown.load(Ordering::Relaxed) {
                warn!("Shutdown requested, no more nodes will be queued");
                stats.stopped_early = true;
                break;
            }

            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    self.error_log.record("main", "input", format_args!("Unable to read input -- {}", e));
                    error!(error = %e, "Unable to read input");
                    stats.stopped_early = true;
                    break;
                }
            };
            stats.lines_read += 1;

            let node = match Node::parse(line.trim()) {
                Ok(node) => node,
                Err(e) => {
                    stats.parse_errors += 1;
                    self.error_log.record("main", format_args!("line {}", stats.lines_read), format_args!("Unable to parse -- {}", e));
                    error!(line = stats.lines_read, error = %e, "Unable to parse");
                    continue;
                }
            };

            let key = node.identity_key();
            match self.dispatcher.enqueue(node) {
                Ok(()) => stats.nodes_enqueued += 1,
                Err(e) => {
                    stats.enqueue_failures += 1;
                    self.error_log.record("main", &key, format_args!("Unable to queue -- {}", e));
                    error!(node = %key, error = %e, "Unable to queue node");
                }
            }
        }

        stats
    }
}
