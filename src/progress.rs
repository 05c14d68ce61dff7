//! Progress reporting for a backup batch
//!
//! Provides a live spinner while the batch runs and a summary at the end.

use crate::backup::{BackupProgress, BatchReport, DriverStats};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Progress reporter that displays batch status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        let spinner = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(spinner);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &BackupProgress) {
        let totals = &progress.totals;
        let msg = format!(
            "Nodes: {} | Saved: {} | Unchanged: {} | Failed: {} | Size: {} | Rate: {:.1}/s | Queue: {} | Workers: {}",
            format_number(totals.processed),
            format_number(totals.saved),
            format_number(totals.unchanged),
            format_number(totals.failures()),
            format_size(totals.bytes_saved, BINARY),
            progress.nodes_per_second(),
            progress.queued,
            progress.total_workers,
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the batch
pub fn print_summary(input: &DriverStats, report: &BatchReport, error_log: &Path, logged: u64) {
    let totals = &report.totals;
    let secs = report.duration.as_secs_f64();
    let rate = if secs > 0.0 {
        totals.processed as f64 / secs
    } else {
        0.0
    };

    println!();
    if input.stopped_early {
        println!("{}", style("Backup Interrupted").yellow().bold());
    } else {
        println!("{}", style("Backup Complete").green().bold());
    }
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Nodes:").bold(), format_number(totals.processed));
    println!("  {} {}", style("Saved:").bold(), format_number(totals.saved));
    println!("  {} {}", style("Unchanged:").bold(), format_number(totals.unchanged));
    println!(
        "  {} {}",
        style("Content:").bold(),
        format_size(totals.bytes_saved, BINARY)
    );
    println!(
        "  {} {:.1}s ({:.1} nodes/sec)",
        style("Duration:").bold(),
        secs,
        rate
    );
    if totals.persist_warnings > 0 {
        println!(
            "  {} {}",
            style("Unrecorded:").yellow().bold(),
            format_number(totals.persist_warnings)
        );
    }
    if input.parse_errors > 0 {
        println!(
            "  {} {}",
            style("Bad lines:").yellow().bold(),
            format_number(input.parse_errors)
        );
    }
    if report.workers_panicked > 0 {
        println!(
            "  {} {}/{}",
            style("Workers lost:").red().bold(),
            report.workers_panicked,
            report.workers_spawned
        );
    }
    if logged > 0 {
        println!(
            "  {} {} ({})",
            style("Errors:").red().bold(),
            format_number(logged),
            error_log.display()
        );
    }
    println!();
}

/// Print a header at the start of the batch
pub fn print_header(sessions: usize, workers: usize, work_dir: &Path) {
    println!();
    println!(
        "{} {}",
        style("node-backup").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Sessions:").bold(), sessions);
    println!("  {} {}", style("Workers:").bold(), workers);
    println!("  {} {}", style("Output:").bold(), work_dir.display());
    println!();
}
