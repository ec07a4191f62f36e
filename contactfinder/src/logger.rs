use anyhow::{anyhow, Result};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

use crate::report::RunReport;

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum VerbosityLevel {
    Summary = 1,  // Run progress and final summary (default)
    Detailed = 2, // Per-record results, warnings
    Debug = 3,    // Everything including pipeline traces
}

impl VerbosityLevel {
    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }

    /// Default `tracing` filter for this level; `RUST_LOG` overrides it
    pub fn filter_directive(&self) -> &'static str {
        match self {
            VerbosityLevel::Summary => "warn,contactfinder=info",
            VerbosityLevel::Detailed => "info,contactfinder=debug",
            VerbosityLevel::Debug => "debug,contactfinder=trace",
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// Output always goes to stderr: a worker's stdout carries the result
/// protocol and must stay clean.
pub fn init_tracing(verbosity: VerbosityLevel) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow!("Setting up tracing subscriber failed: {}", e))
}

/// Console output for the orchestrator: progress bar plus final summary
#[derive(Clone)]
pub struct CrawlLogger {
    verbosity: VerbosityLevel,
    progress_bar: Arc<Mutex<Option<ProgressBar>>>,
}

impl CrawlLogger {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            progress_bar: Arc::new(Mutex::new(None)),
        }
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        self.verbosity
    }

    pub fn info(&self, message: &str) {
        self.print_message("INFO", message);
    }

    pub fn warn(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Detailed {
            self.print_message("WARN", message);
        }
    }

    pub fn error(&self, message: &str) {
        // Errors are shown regardless of verbosity
        self.print_message("ERROR", message);
    }

    fn print_message(&self, level: &str, message: &str) {
        let msg = format!("[{}] {}: {}", Local::now().format("%H:%M:%S%.3f"), level, message);

        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.println(msg);
                return;
            }
        }

        eprintln!("{}", msg);
    }

    pub fn start_progress(&self, total_records: u64) {
        let pb = if io::stderr().is_terminal() {
            ProgressBar::new(total_records)
        } else {
            ProgressBar::hidden()
        };

        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb.set_message("Launching workers...");

        if let Ok(mut guard) = self.progress_bar.lock() {
            *guard = Some(pb);
        }
    }

    pub fn update_progress(&self, message: &str) {
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.set_message(message.to_string());
            }
        }
    }

    pub fn advance_progress(&self, steps: u64) {
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.inc(steps);
            }
        }
    }

    pub fn finish_progress(&self, final_message: &str) {
        let finished = self.progress_bar.lock().ok().and_then(|mut guard| guard.take());
        if let Some(pb) = finished {
            pb.finish_and_clear();
        }
        self.info(final_message);
    }

    /// Print the end-of-run summary to stdout
    pub fn print_final_summary(&self, report: &RunReport) {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "\n=== CRAWL SUMMARY ===");
        for line in report.summary_lines() {
            let _ = writeln!(out, "{}", line);
        }
        let _ = writeln!(out, "=====================\n");
        let _ = out.flush();
    }
}
