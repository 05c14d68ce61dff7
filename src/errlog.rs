//! Durable log of per-node failures
//!
//! Every node that could not be backed up gets one line here, separate from
//! the progress log, so an operator can audit or re-feed failures after the
//! batch:
//!
//! ```text
//! ERROR: 2015-07-31T02:00:13.532+00:00 [3] website.home -- unable to generate hash dump -- ...
//! ```

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::fmt::Display;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Append-only failure log shared by all workers
pub struct ErrorLog {
    writer: Mutex<Box<dyn Write + Send>>,
    entries: AtomicU64,
}

impl ErrorLog {
    /// Create (truncate) the log file at `path`
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(file))
    }

    /// Log into an arbitrary writer
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
            entries: AtomicU64::new(0),
        }
    }

    /// Log that only counts entries
    pub fn discard() -> Self {
        Self::new(io::sink())
    }

    /// Record one failure; `origin` is the worker id or "main"
    pub fn record(&self, origin: impl Display, subject: impl Display, message: impl Display) {
        self.entries.fetch_add(1, Ordering::Relaxed);

        let line = format!(
            "ERROR: {} [{}] {} -- {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false),
            origin,
            subject,
            message
        );

        let mut writer = self.writer.lock();
        if let Err(e) = writer.write_all(line.as_bytes()).and_then(|_| writer.flush()) {
            warn!(error = %e, "Failed to write to error log");
        }
    }

    /// Number of failures recorded so far
    pub fn entries(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ErrorLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorLog")
            .field("entries", &self.entries())
            .finish()
    }
}
