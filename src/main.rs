//! node-backup - Incremental backup of remote content nodes
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use node_backup::backup::{
    request_shutdown, BackupContext, BatchDriver, Dispatcher, Interrupt, ProgressHandle,
};
use node_backup::config::{BackupConfig, CliArgs};
use node_backup::errlog::ErrorLog;
use node_backup::progress::{print_header, print_summary, ProgressReporter};
use node_backup::source::HttpSource;
use node_backup::store::FsStore;
use std::fs;
use std::io;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Conventional exit status after SIGINT
const INTERRUPTED_EXIT_CODE: i32 = 130;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let config = BackupConfig::from_args(args).context("Invalid configuration")?;

    fs::create_dir_all(&config.work_dir).with_context(|| {
        format!("Failed to create working directory {}", config.work_dir.display())
    })?;
    let error_log_path = config.error_log_path();
    let error_log = Arc::new(
        ErrorLog::create(&error_log_path)
            .with_context(|| format!("Failed to create {}", error_log_path.display()))?,
    );

    let source = HttpSource::builder()
        .timeout(config.timeout)
        .build()
        .context("Failed to initialize HTTP client")?;
    let store = Arc::new(FsStore::from_config(&config));
    let ctx = BackupContext::new(Arc::new(source), store, Arc::clone(&error_log));

    let dispatcher = Dispatcher::new(&config.dispatch, &config.sessions, ctx)
        .context("Failed to start backup workers")?;

    if config.show_progress {
        print_header(
            dispatcher.session_count(),
            dispatcher.worker_count(),
            &config.work_dir,
        );
    }

    let progress = dispatcher.progress_handle();
    let driver = BatchDriver::new(dispatcher, Arc::clone(&error_log));

    // First interrupt drains, a second one exits without waiting
    let shutdown_flag = driver.shutdown_flag();
    ctrlc::set_handler(move || match request_shutdown(&shutdown_flag) {
        Interrupt::Drain => {
            eprintln!("\nInterrupt received, finishing queued nodes (Ctrl-C again to abort)...");
        }
        Interrupt::Abort => {
            eprintln!("\nAborting");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    })
    .context("Failed to set signal handler")?;

    let done = AtomicBool::new(false);
    let (input, report) = thread::scope(|s| {
        if config.show_progress {
            s.spawn(|| show_progress(&progress, &done));
        }

        let result = driver.run(io::stdin().lock());
        done.store(true, Ordering::SeqCst);
        result
    });

    print_summary(&input, &report, &error_log_path, error_log.entries());

    if input.stopped_early {
        info!("Batch was interrupted before all input was read");
    }
    if report.totals.failures() > 0 || input.parse_errors > 0 {
        info!(
            failures = report.totals.failures(),
            parse_errors = input.parse_errors,
            log = %error_log_path.display(),
            "Batch completed with errors"
        );
    }

    Ok(())
}

/// Refresh the spinner until the batch is done
fn show_progress(progress: &ProgressHandle, done: &AtomicBool) {
    let reporter = ProgressReporter::new();
    reporter.set_status("Reading nodes...");

    while !done.load(Ordering::SeqCst) {
        reporter.update(&progress.snapshot());
        thread::sleep(Duration::from_millis(100));
    }

    reporter.finish_and_clear();
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("node_backup=debug,warn")
    } else {
        EnvFilter::new("node_backup=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(io::stderr)
        .init();

    Ok(())
}
