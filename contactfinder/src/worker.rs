//! Worker: one browser, one chunk, records in input order.
//!
//! The worker process receives its chunk as a single JSON line on stdin and
//! reports through JSON lines on stdout. A `cancel` line, stdin EOF or
//! SIGINT asks it to stop after the record in progress. Logs go to stderr.

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::ai::OpenAiAssistant;
use crate::browser::{Browse, BrowseError, BrowserSession};
use crate::config::{AppConfig, SearchConfig};
use crate::extractor::Extractor;
use crate::record::{Chunk, FieldType, OrganizationRecord, Provenance, RecordStatus};
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::search::{NotFoundReason, SearchPipeline, SearchTask, TaskOutcome};
use crate::validator::Validator;

/// Line sent on stdin to request cancellation
pub const CANCEL_COMMAND: &str = "cancel";

/// Granularity of cancellation checks during the inter-record delay
const DELAY_SLICE: Duration = Duration::from_millis(100);

/// Why a worker stopped before finishing its chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StopReason {
    Cancelled,
    Fatal { message: String },
}

/// Result of searching one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOutcome {
    pub field: FieldType,
    #[serde(default)]
    pub found: Option<Provenance>,
    #[serde(default)]
    pub not_found: Option<NotFoundReason>,
}

/// Worker → orchestrator protocol, one JSON object per stdout line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    Started {
        chunk_id: usize,
        pid: u32,
        records: usize,
    },
    Record {
        chunk_id: usize,
        record: OrganizationRecord,
        #[serde(default)]
        outcomes: Vec<FieldOutcome>,
    },
    Stopped {
        chunk_id: usize,
        reason: StopReason,
        incomplete: Vec<String>,
    },
    Finished {
        chunk_id: usize,
        processed: usize,
    },
}

impl WorkerMessage {
    pub fn chunk_id(&self) -> usize {
        match self {
            WorkerMessage::Started { chunk_id, .. }
            | WorkerMessage::Record { chunk_id, .. }
            | WorkerMessage::Stopped { chunk_id, .. }
            | WorkerMessage::Finished { chunk_id, .. } => *chunk_id,
        }
    }

    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize worker message")
    }

    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim()).with_context(|| format!("Invalid worker message: {}", line.trim()))
    }
}

/// What happened to a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub processed: usize,
    pub stopped: Option<StopReason>,
}

/// A record after its processing window
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    pub record: OrganizationRecord,
    pub outcomes: Vec<FieldOutcome>,
}

/// Processes one chunk with one browser session
pub struct Worker {
    pipeline: SearchPipeline,
    retry: RetryPolicy,
    search: SearchConfig,
    record_timeout: Duration,
    record_delay_ms: (u64, u64),
    cancel: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        pipeline: SearchPipeline,
        retry: RetryPolicy,
        search: SearchConfig,
        record_timeout: Duration,
        record_delay_ms: (u64, u64),
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pipeline,
            retry,
            search,
            record_timeout,
            record_delay_ms,
            cancel,
        }
    }

    /// Build a worker from configuration with the given extractor
    pub fn from_config(config: &AppConfig, extractor: Extractor, cancel: Arc<AtomicBool>) -> Self {
        let pipeline = SearchPipeline::new(
            config.search.engines.clone(),
            extractor,
            Validator::new(config.validator.clone()),
        );
        Self::new(
            pipeline,
            RetryPolicy::new(&config.retry),
            config.search.clone(),
            config.worker.record_timeout(&config.browser, &config.search),
            (config.worker.record_delay_min_ms, config.worker.record_delay_max_ms),
            cancel,
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Search every missing field of one record, homepage before fax.
    ///
    /// Returns `Err` with the browser failure message when the session died.
    pub fn process_record(&self, session: &mut dyn Browse, record: OrganizationRecord) -> Result<ProcessedRecord, String> {
        let mut record = record;
        let missing = record.missing_fields();
        if missing.is_empty() {
            debug!("[{}] nothing missing", record.id);
            record.status = RecordStatus::Resolved;
            return Ok(ProcessedRecord {
                record,
                outcomes: Vec::new(),
            });
        }

        let deadline = Instant::now() + self.record_timeout;
        let mut outcomes = Vec::new();

        for field in missing {
            let snapshot = record.clone();
            let result = self.retry.run(deadline, |attempt| {
                if attempt > 1 {
                    debug!("[{}] {} attempt {}", snapshot.id, field, attempt);
                }
                let task = SearchTask::new(&snapshot, field, &self.search);
                self.pipeline.run_task(&mut *session, task, &snapshot, deadline)
            });

            let outcome = match result {
                RetryOutcome::Completed(report) => match report.outcome {
                    TaskOutcome::Found(discovery) => {
                        info!(
                            "[{}] {} found: {} ({}, {})",
                            record.id, field, discovery.value, discovery.provenance, discovery.source_url
                        );
                        record.apply(field, discovery.value, discovery.provenance);
                        FieldOutcome {
                            field,
                            found: Some(discovery.provenance),
                            not_found: None,
                        }
                    }
                    TaskOutcome::NotFound(reason) => not_found(&record.id, field, reason),
                },
                RetryOutcome::Exhausted { attempts, last_error } => {
                    debug!("[{}] {} failed after {} attempt(s): {}", record.id, field, attempts, last_error);
                    let reason = if Instant::now() >= deadline {
                        NotFoundReason::DeadlineExceeded
                    } else {
                        NotFoundReason::RetriesExhausted
                    };
                    not_found(&record.id, field, reason)
                }
                RetryOutcome::Fatal(message) => return Err(message),
            };
            outcomes.push(outcome);
        }

        record.status = if outcomes.iter().all(|o| o.found.is_some()) {
            RecordStatus::Resolved
        } else {
            RecordStatus::Unresolved
        };
        Ok(ProcessedRecord { record, outcomes })
    }

    /// Sleep a random inter-record delay. Returns `true` if cancelled meanwhile.
    fn pause_between_records(&self) -> bool {
        let (min, max) = self.record_delay_ms;
        let ms = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        let until = Instant::now() + Duration::from_millis(ms);
        while Instant::now() < until {
            if self.is_cancelled() {
                return true;
            }
            std::thread::sleep(DELAY_SLICE.min(until.saturating_duration_since(Instant::now())));
        }
        self.is_cancelled()
    }

    /// Process `chunk` with a session from `open`, reporting through `emit`.
    ///
    /// Every exit path closes the session. An `emit` failure means the
    /// orchestrator is gone and ends the chunk early.
    pub fn run_chunk<B, O, E>(&self, chunk: Chunk, open: O, mut emit: E) -> Result<WorkerSummary>
    where
        B: Browse,
        O: FnOnce() -> Result<B, BrowseError>,
        E: FnMut(WorkerMessage) -> Result<()>,
    {
        let chunk_id = chunk.chunk_id;
        let ids = chunk.ids();
        emit(WorkerMessage::Started {
            chunk_id,
            pid: std::process::id(),
            records: ids.len(),
        })?;

        let mut session = match open() {
            Ok(session) => session,
            Err(e) => {
                error!("Worker {} could not open a browser: {}", chunk_id, e);
                let reason = StopReason::Fatal { message: e.to_string() };
                emit(WorkerMessage::Stopped {
                    chunk_id,
                    reason: reason.clone(),
                    incomplete: ids,
                })?;
                return Ok(WorkerSummary {
                    processed: 0,
                    stopped: Some(reason),
                });
            }
        };

        let mut processed = 0;
        for (index, record) in chunk.records.into_iter().enumerate() {
            let cancelled = self.is_cancelled() || (index > 0 && self.pause_between_records());
            if cancelled {
                info!("Worker {} cancelled with {} record(s) left", chunk_id, ids.len() - index);
                session.close();
                emit(WorkerMessage::Stopped {
                    chunk_id,
                    reason: StopReason::Cancelled,
                    incomplete: ids[index..].to_vec(),
                })?;
                return Ok(WorkerSummary {
                    processed,
                    stopped: Some(StopReason::Cancelled),
                });
            }

            match self.process_record(&mut session, record) {
                Ok(done) => {
                    let sent = emit(WorkerMessage::Record {
                        chunk_id,
                        record: done.record,
                        outcomes: done.outcomes,
                    });
                    if let Err(e) = sent {
                        session.close();
                        return Err(e);
                    }
                    processed += 1;
                }
                Err(message) => {
                    error!("Worker {} browser failure: {}", chunk_id, message);
                    session.close();
                    let reason = StopReason::Fatal { message };
                    emit(WorkerMessage::Stopped {
                        chunk_id,
                        reason: reason.clone(),
                        incomplete: ids[index..].to_vec(),
                    })?;
                    return Ok(WorkerSummary {
                        processed,
                        stopped: Some(reason),
                    });
                }
            }
        }

        session.close();
        emit(WorkerMessage::Finished { chunk_id, processed })?;
        Ok(WorkerSummary {
            processed,
            stopped: None,
        })
    }
}

fn not_found(id: &str, field: FieldType, reason: NotFoundReason) -> FieldOutcome {
    info!("[{}] {} not found ({})", id, field, reason);
    FieldOutcome {
        field,
        found: None,
        not_found: Some(reason),
    }
}

/// Entry point of the hidden `worker` subcommand.
///
/// Blocking; call it from a blocking thread. `handle` drives AI requests
/// when AI assistance is enabled.
pub fn run_worker_process(config: AppConfig, chunk_id: usize, handle: tokio::runtime::Handle) -> Result<WorkerSummary> {
    let mut first = String::new();
    let read = std::io::stdin()
        .read_line(&mut first)
        .context("Failed to read chunk from stdin")?;
    if read == 0 {
        return Err(anyhow!("stdin closed before a chunk was received"));
    }
    let chunk: Chunk = serde_json::from_str(first.trim()).context("Failed to parse chunk")?;
    if chunk.chunk_id != chunk_id {
        warn!("Chunk id mismatch: argument {}, payload {}", chunk_id, chunk.chunk_id);
    }

    let cancel = Arc::new(AtomicBool::new(false));

    // Remaining stdin lines are control commands; EOF means the parent is gone
    let watcher_flag = cancel.clone();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) if line.trim() == CANCEL_COMMAND => break,
                Ok(line) => debug!("Ignoring unknown command '{}'", line.trim()),
                Err(_) => break,
            }
        }
        watcher_flag.store(true, Ordering::SeqCst);
    });

    let signal_flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        signal_flag.store(true, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let mut extractor = Extractor::new();
    if config.ai.enabled {
        match OpenAiAssistant::from_config(&config.ai, handle) {
            Ok(assistant) => {
                extractor = extractor.with_assistant(Arc::new(assistant), config.ai.min_confidence);
            }
            Err(e) => warn!("AI assistance disabled: {}", e),
        }
    }

    let worker = Worker::from_config(&config, extractor, cancel);
    let browser_config = config.browser.clone();
    let stdout = std::io::stdout();

    info!("Worker {} starting on {} record(s)", chunk.chunk_id, chunk.records.len());
    worker.run_chunk(
        chunk,
        || BrowserSession::open(&browser_config),
        |message| {
            let line = message.to_line()?;
            let mut out = stdout.lock();
            writeln!(out, "{}", line).context("Failed to write to stdout")?;
            out.flush().context("Failed to flush stdout")?;
            Ok(())
        },
    )
}
