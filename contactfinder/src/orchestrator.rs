//! Orchestrator: partitions the dataset, runs one worker process per chunk,
//! merges streamed results by id and checkpoints progress.
//!
//! The orchestrator is the only writer of the merged dataset and of the
//! checkpoint store. Workers only emit results.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::checkpoint::{generate_settings_hash, Checkpoint, CheckpointStore};
use crate::config::AppConfig;
use crate::export;
use crate::logger::CrawlLogger;
use crate::record::{Chunk, OrganizationRecord, RecordStatus};
use crate::report::{RunReport, RunStats};
use crate::worker::{StopReason, WorkerMessage, CANCEL_COMMAND};

/// File the orchestrator writes its effective settings to for worker processes
pub const EFFECTIVE_CONFIG_FILENAME: &str = "effective-config.toml";

/// Something that happened to a launched worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Message(WorkerMessage),
    /// The worker is gone; no further messages will arrive for this chunk
    Exited {
        chunk_id: usize,
        success: bool,
        detail: String,
    },
}

/// Starts a worker for one chunk.
///
/// Implementations must deliver every protocol message through `events` and
/// finish with exactly one `WorkerEvent::Exited`. When `cancel` flips to
/// `true` the worker should stop after its current record.
pub trait WorkerLauncher: Send + Sync {
    fn launch(
        &self,
        chunk: Chunk,
        events: mpsc::UnboundedSender<WorkerEvent>,
        cancel: watch::Receiver<bool>,
    ) -> Result<()>;
}

/// Launches the current executable's hidden `worker` subcommand
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    executable: PathBuf,
    config_path: PathBuf,
    verbose: u8,
    cancel_grace: Duration,
}

impl ProcessLauncher {
    /// Write `config` where worker processes can read it and launch them with it.
    pub fn prepare(config: &AppConfig, output_dir: &Path, verbose: u8) -> Result<Self> {
        let executable = std::env::current_exe().context("Failed to locate the current executable")?;
        let config_path = output_dir.join(EFFECTIVE_CONFIG_FILENAME);
        let content = toml::to_string(config).context("Failed to serialize effective configuration")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        Ok(Self::new(
            executable,
            config_path,
            verbose,
            Duration::from_secs(config.orchestrator.cancel_grace_secs),
        ))
    }

    pub fn new(executable: PathBuf, config_path: PathBuf, verbose: u8, cancel_grace: Duration) -> Self {
        Self {
            executable,
            config_path,
            verbose,
            cancel_grace,
        }
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        chunk: Chunk,
        events: mpsc::UnboundedSender<WorkerEvent>,
        cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        let chunk_id = chunk.chunk_id;
        let line = serde_json::to_string(&chunk).context("Failed to serialize chunk")?;

        let mut command = Command::new(&self.executable);
        command
            .arg("worker")
            .arg("--chunk-id")
            .arg(chunk_id.to_string())
            .arg("--config")
            .arg(&self.config_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if self.verbose > 0 {
            command.arg(format!("-{}", "v".repeat(self.verbose as usize)));
        }

        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn worker for chunk {}", chunk_id))?;
        debug!("Spawned worker pid {:?} for chunk {}", child.id(), chunk_id);

        tokio::spawn(supervise(child, chunk_id, line, events, cancel, self.cancel_grace));
        Ok(())
    }
}

/// Feed the chunk to a worker process, relay its stdout and enforce cancellation.
async fn supervise(
    mut child: Child,
    chunk_id: usize,
    chunk_line: String,
    events: mpsc::UnboundedSender<WorkerEvent>,
    mut cancel: watch::Receiver<bool>,
    grace: Duration,
) {
    // Dropping stdin means EOF, which the worker treats as cancellation; keep it until the end
    let mut stdin = child.stdin.take();
    if let Some(pipe) = stdin.as_mut() {
        let payload = format!("{}\n", chunk_line);
        if let Err(e) = pipe.write_all(payload.as_bytes()).await {
            warn!("Failed to send chunk {} to worker: {}", chunk_id, e);
        }
        let _ = pipe.flush().await;
    }

    let Some(stdout) = child.stdout.take() else {
        let _ = child.start_kill();
        let _ = events.send(WorkerEvent::Exited {
            chunk_id,
            success: false,
            detail: "worker stdout unavailable".to_string(),
        });
        return;
    };
    let mut lines = BufReader::new(stdout).lines();

    let mut watching_cancel = true;
    let mut kill_at: Option<tokio::time::Instant> = None;

    if *cancel.borrow() {
        watching_cancel = false;
        kill_at = Some(send_cancel(&mut stdin, chunk_id, grace).await);
    }

    loop {
        let kill_deadline = kill_at.unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(86_400));
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match WorkerMessage::from_line(&line) {
                        Ok(message) => {
                            let _ = events.send(WorkerEvent::Message(message));
                        }
                        Err(e) => warn!("Worker {} wrote a non-protocol line: {}", chunk_id, e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read from worker {}: {}", chunk_id, e);
                    break;
                }
            },
            changed = cancel.changed(), if watching_cancel => {
                match changed {
                    Ok(()) if *cancel.borrow() => {
                        watching_cancel = false;
                        kill_at = Some(send_cancel(&mut stdin, chunk_id, grace).await);
                    }
                    Ok(()) => {}
                    Err(_) => watching_cancel = false,
                }
            }
            _ = tokio::time::sleep_until(kill_deadline), if kill_at.is_some() => {
                warn!("Worker {} ignored cancellation for {:?}; killing it", chunk_id, grace);
                let _ = child.start_kill();
                kill_at = None;
            }
        }
    }

    drop(stdin);
    let (success, detail) = match child.wait().await {
        Ok(status) => (status.success(), status.to_string()),
        Err(e) => (false, format!("failed to wait for worker: {}", e)),
    };
    let _ = events.send(WorkerEvent::Exited {
        chunk_id,
        success,
        detail,
    });
}

async fn send_cancel(
    stdin: &mut Option<tokio::process::ChildStdin>,
    chunk_id: usize,
    grace: Duration,
) -> tokio::time::Instant {
    if let Some(pipe) = stdin.as_mut() {
        let command = format!("{}\n", CANCEL_COMMAND);
        if let Err(e) = pipe.write_all(command.as_bytes()).await {
            debug!("Worker {} stdin closed before cancel: {}", chunk_id, e);
        }
        let _ = pipe.flush().await;
    }
    tokio::time::Instant::now() + grace
}

/// Split records into order-preserving, disjoint chunks.
///
/// With `chunk_size == 0` the records are split into `workers` chunks whose
/// sizes differ by at most one. Otherwise chunks hold `chunk_size` records
/// each (the last may be shorter). No chunk is ever empty.
pub fn partition(
    records: Vec<OrganizationRecord>,
    workers: usize,
    chunk_size: usize,
    first_chunk_id: usize,
) -> Vec<Chunk> {
    if records.is_empty() {
        return Vec::new();
    }

    let sizes: Vec<usize> = if chunk_size > 0 {
        let full = records.len() / chunk_size;
        let rest = records.len() % chunk_size;
        let mut sizes = vec![chunk_size; full];
        if rest > 0 {
            sizes.push(rest);
        }
        sizes
    } else {
        let count = workers.max(1).min(records.len());
        let base = records.len() / count;
        let extra = records.len() % count;
        (0..count).map(|i| base + usize::from(i < extra)).collect()
    };

    let mut remaining = records.into_iter();
    sizes
        .into_iter()
        .enumerate()
        .map(|(i, size)| Chunk {
            chunk_id: first_chunk_id + i,
            records: remaining.by_ref().take(size).collect(),
        })
        .collect()
}

/// Build the run's dataset from input and, when resuming, the latest checkpoint.
///
/// Checkpointed records are authoritative. Input records the checkpoint does
/// not know are appended as pending.
pub fn prepare_dataset(
    input: Vec<OrganizationRecord>,
    checkpoint: Option<Checkpoint>,
    settings_hash: &str,
) -> Vec<OrganizationRecord> {
    let Some(checkpoint) = checkpoint else {
        return input
            .into_iter()
            .map(|mut r| {
                r.status = RecordStatus::Pending;
                r
            })
            .collect();
    };

    if checkpoint.settings_hash != settings_hash {
        warn!(
            "Checkpoint was written with different search settings ({} vs {}); resuming anyway",
            checkpoint.settings_hash, settings_hash
        );
    }
    info!("Resuming from {}", checkpoint.summary());

    let mut records = checkpoint.records;
    let known: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
    let mut appended = 0;
    for mut record in input {
        if !known.contains(&record.id) {
            record.status = RecordStatus::Pending;
            records.push(record);
            appended += 1;
        }
    }
    if appended > 0 {
        info!("{} input record(s) not in the checkpoint were added as pending", appended);
    }
    records
}

/// The merged dataset, indexed by id
#[derive(Debug, Clone)]
pub struct Dataset {
    records: Vec<OrganizationRecord>,
    index: HashMap<String, usize>,
}

impl Dataset {
    pub fn new(records: Vec<OrganizationRecord>) -> Self {
        let index = records.iter().enumerate().map(|(i, r)| (r.id.clone(), i)).collect();
        Self { records, index }
    }

    pub fn records(&self) -> &[OrganizationRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<OrganizationRecord> {
        self.records
    }

    pub fn get(&self, id: &str) -> Option<&OrganizationRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    /// Merge a worker's record. Returns the previous status, or `None` when the id is unknown.
    pub fn merge(&mut self, incoming: OrganizationRecord) -> Option<RecordStatus> {
        let &i = self.index.get(&incoming.id)?;
        let previous = self.records[i].status;
        self.records[i].merge_from(incoming);
        Some(previous)
    }

    /// Flag records a worker never reached; already processed records are left alone.
    pub fn mark_incomplete<'a>(&mut self, ids: impl IntoIterator<Item = &'a String>) {
        for id in ids {
            match self.index.get(id) {
                Some(&i) if self.records[i].status.needs_processing() => {
                    self.records[i].status = RecordStatus::Incomplete;
                }
                Some(_) => {}
                None => warn!("Worker reported unknown record id '{}'", id),
            }
        }
    }

    pub fn outstanding(&self) -> Vec<OrganizationRecord> {
        self.records
            .iter()
            .filter(|r| r.status.needs_processing())
            .cloned()
            .collect()
    }
}

/// Records and report of a finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub records: Vec<OrganizationRecord>,
    pub report: RunReport,
}

struct ChunkState {
    outstanding: HashSet<String>,
    aborted: bool,
}

struct RunState {
    dataset: Dataset,
    stats: RunStats,
    since_checkpoint: usize,
    cancelled: bool,
}

pub struct Orchestrator {
    config: AppConfig,
    launcher: Box<dyn WorkerLauncher>,
    store: Box<dyn CheckpointStore>,
    output_dir: PathBuf,
    logger: CrawlLogger,
    cancel: watch::Receiver<bool>,
    settings_hash: String,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        launcher: Box<dyn WorkerLauncher>,
        store: Box<dyn CheckpointStore>,
        output_dir: PathBuf,
        logger: CrawlLogger,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let settings_hash = generate_settings_hash(&config);
        Self {
            config,
            launcher,
            store,
            output_dir,
            logger,
            cancel,
            settings_hash,
        }
    }

    /// Combine input with the latest checkpoint when `resume` is set.
    pub fn prepare(&self, input: Vec<OrganizationRecord>, resume: bool) -> Result<Vec<OrganizationRecord>> {
        let checkpoint = if resume {
            let latest = self.store.load_latest()?;
            if latest.is_none() {
                self.logger.warn("No checkpoint found; starting a fresh run");
            }
            latest
        } else {
            None
        };
        Ok(prepare_dataset(input, checkpoint, &self.settings_hash))
    }

    /// Process every outstanding record, then write the final checkpoint, report and exports.
    pub async fn run(&self, records: Vec<OrganizationRecord>) -> Result<RunSummary> {
        let mut state = RunState {
            dataset: Dataset::new(records),
            stats: RunStats::new(),
            since_checkpoint: 0,
            cancelled: *self.cancel.borrow(),
        };
        state.stats.cancelled = state.cancelled;

        let workers = self.config.worker.count.max(1);
        let outstanding = state.dataset.outstanding().len();
        self.logger.info(&format!(
            "{} of {} organization(s) to process with up to {} worker(s)",
            outstanding,
            state.dataset.records().len(),
            workers
        ));
        self.logger.start_progress(outstanding as u64);

        let mut next_chunk_id = 0;
        for round in 0..=self.config.orchestrator.redispatch_rounds {
            let todo = state.dataset.outstanding();
            if todo.is_empty() || state.cancelled {
                break;
            }
            if round > 0 {
                state.stats.redispatch_rounds = round;
                self.logger.warn(&format!(
                    "Re-dispatching {} incomplete record(s) (round {} of {})",
                    todo.len(),
                    round,
                    self.config.orchestrator.redispatch_rounds
                ));
            }

            let chunks = partition(todo, workers, self.config.worker.chunk_size, next_chunk_id);
            next_chunk_id += chunks.len();
            let aborted_before = state.stats.workers_aborted;
            self.run_round(chunks, workers, &mut state).await;
            if state.stats.workers_aborted == aborted_before {
                break;
            }
        }

        self.save_checkpoint(&mut state);
        self.finish(state)
    }

    async fn run_round(&self, chunks: Vec<Chunk>, workers: usize, state: &mut RunState) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut queue: VecDeque<Chunk> = chunks.into();
        let mut running: HashMap<usize, ChunkState> = HashMap::new();
        let mut cancel = self.cancel.clone();
        let mut watching_cancel = !state.cancelled;

        self.launch_pending(&mut queue, &mut running, workers, &tx, state);

        while !running.is_empty() {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.handle_event(event, &mut running, state),
                    None => break,
                },
                changed = cancel.changed(), if watching_cancel => {
                    match changed {
                        Ok(()) if *cancel.borrow() => {
                            watching_cancel = false;
                            state.cancelled = true;
                            state.stats.cancelled = true;
                            self.logger.warn("Cancellation requested; waiting for workers to finish their current record");
                            self.save_checkpoint(state);
                        }
                        Ok(()) => {}
                        Err(_) => watching_cancel = false,
                    }
                }
            }

            if !state.cancelled {
                self.launch_pending(&mut queue, &mut running, workers, &tx, state);
            }
        }
    }

    fn launch_pending(
        &self,
        queue: &mut VecDeque<Chunk>,
        running: &mut HashMap<usize, ChunkState>,
        workers: usize,
        tx: &mpsc::UnboundedSender<WorkerEvent>,
        state: &mut RunState,
    ) {
        while running.len() < workers {
            let Some(chunk) = queue.pop_front() else { break };
            let chunk_id = chunk.chunk_id;
            let ids: HashSet<String> = chunk.records.iter().map(|r| r.id.clone()).collect();
            let size = ids.len();

            match self.launcher.launch(chunk, tx.clone(), self.cancel.clone()) {
                Ok(()) => {
                    state.stats.workers_launched += 1;
                    info!("Launched worker for chunk {} ({} record(s))", chunk_id, size);
                    running.insert(
                        chunk_id,
                        ChunkState {
                            outstanding: ids,
                            aborted: false,
                        },
                    );
                }
                Err(e) => {
                    self.logger.error(&format!("Failed to launch worker for chunk {}: {:#}", chunk_id, e));
                    state.stats.workers_aborted += 1;
                    state.dataset.mark_incomplete(ids.iter());
                    self.save_checkpoint(state);
                }
            }
        }
    }

    fn handle_event(&self, event: WorkerEvent, running: &mut HashMap<usize, ChunkState>, state: &mut RunState) {
        match event {
            WorkerEvent::Message(WorkerMessage::Started { chunk_id, pid, records }) => {
                debug!("Worker {} (pid {}) started on {} record(s)", chunk_id, pid, records);
            }
            WorkerEvent::Message(WorkerMessage::Record {
                chunk_id,
                record,
                outcomes,
            }) => {
                let id = record.id.clone();
                let status = record.status;
                match state.dataset.merge(record) {
                    Some(previous) => {
                        if let Some(chunk) = running.get_mut(&chunk_id) {
                            chunk.outstanding.remove(&id);
                        }
                        state.stats.records_merged += 1;
                        state.stats.record_outcomes(&outcomes);
                        if previous.needs_processing() {
                            self.logger.advance_progress(1);
                        }
                        debug!("Merged {} from chunk {} as {:?}", id, chunk_id, status);

                        state.since_checkpoint += 1;
                        if state.since_checkpoint >= self.config.checkpoint.interval_records.max(1) {
                            self.save_checkpoint(state);
                        }
                    }
                    None => warn!("Chunk {} returned unknown record id '{}'; ignoring it", chunk_id, id),
                }
            }
            WorkerEvent::Message(WorkerMessage::Stopped {
                chunk_id,
                reason,
                incomplete,
            }) => {
                state.dataset.mark_incomplete(incomplete.iter());
                if let Some(chunk) = running.get_mut(&chunk_id) {
                    for id in &incomplete {
                        chunk.outstanding.remove(id);
                    }
                    if let StopReason::Fatal { message } = &reason {
                        chunk.aborted = true;
                        state.stats.workers_aborted += 1;
                        self.logger
                            .warn(&format!("Worker {} stopped: {} ({} record(s) left)", chunk_id, message, incomplete.len()));
                    }
                }
                if reason == StopReason::Cancelled {
                    info!("Worker {} cancelled with {} record(s) left", chunk_id, incomplete.len());
                }
                self.save_checkpoint(state);
            }
            WorkerEvent::Message(WorkerMessage::Finished { chunk_id, processed }) => {
                debug!("Worker {} finished {} record(s)", chunk_id, processed);
            }
            WorkerEvent::Exited {
                chunk_id,
                success,
                detail,
            } => {
                let Some(chunk) = running.remove(&chunk_id) else {
                    warn!("Exit reported for unknown chunk {}", chunk_id);
                    return;
                };
                if !chunk.outstanding.is_empty() {
                    error!(
                        "Worker {} exited ({}) with {} unreported record(s)",
                        chunk_id,
                        detail,
                        chunk.outstanding.len()
                    );
                    state.dataset.mark_incomplete(chunk.outstanding.iter());
                    if !chunk.aborted {
                        state.stats.workers_aborted += 1;
                    }
                    self.save_checkpoint(state);
                } else if !success {
                    warn!("Worker {} exited with {}", chunk_id, detail);
                } else {
                    debug!("Worker {} exited cleanly", chunk_id);
                }
            }
        }
    }

    fn save_checkpoint(&self, state: &mut RunState) {
        let checkpoint = Checkpoint::new(self.settings_hash.clone(), state.dataset.records().to_vec());
        match self.store.save_checkpoint(&checkpoint) {
            Ok(generation) => {
                state.stats.last_checkpoint_generation = Some(generation);
                state.since_checkpoint = 0;
            }
            Err(e) => self.logger.error(&format!("Failed to save checkpoint: {:#}", e)),
        }
    }

    fn finish(&self, state: RunState) -> Result<RunSummary> {
        let report = RunReport::build(state.dataset.records(), &state.stats);
        report.write(&self.output_dir)?;
        export::export_all(state.dataset.records(), &self.output_dir)?;

        self.logger.finish_progress(&format!(
            "Run finished: {} resolved, {} unresolved, {} incomplete",
            report.resolved,
            report.unresolved,
            report.incomplete + report.pending
        ));

        Ok(RunSummary {
            records: state.dataset.into_records(),
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldType, Provenance};

    fn records(n: usize) -> Vec<OrganizationRecord> {
        (0..n).map(|i| OrganizationRecord::new(format!("r{}", i), format!("Org {}", i))).collect()
    }

    #[test]
    fn test_partition_equal_sizes() {
        let chunks = partition(records(10), 3, 0, 0);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.records.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(chunks[1].records[0].id, "r4");
        assert_eq!(chunks.iter().map(|c| c.chunk_id).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_partition_more_workers_than_records() {
        let chunks = partition(records(2), 8, 0, 5);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.records.len() == 1));
        assert_eq!(chunks[0].chunk_id, 5);
        assert!(partition(Vec::new(), 4, 0, 0).is_empty());
    }

    #[test]
    fn test_partition_fixed_chunk_size() {
        let chunks = partition(records(7), 2, 3, 0);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.records.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_partition_covers_input_exactly_once() {
        for len in 0..25 {
            for workers in 1..7 {
                for chunk_size in [0, 1, 4] {
                    let chunks = partition(records(len), workers, chunk_size, 0);
                    let ids: Vec<String> = chunks.iter().flat_map(|c| c.ids()).collect();
                    let expected: Vec<String> = records(len).into_iter().map(|r| r.id).collect();
                    assert_eq!(ids, expected);
                    if chunk_size == 0 && !chunks.is_empty() {
                        let max = chunks.iter().map(|c| c.records.len()).max().unwrap();
                        let min = chunks.iter().map(|c| c.records.len()).min().unwrap();
                        assert!(max - min <= 1);
                    }
                }
            }
        }
    }

    #[test]
    fn test_merge_by_id_never_clears() {
        let mut found = OrganizationRecord::new("r1", "Org 1");
        found.apply(FieldType::Homepage, "https://org1.or.kr".to_string(), Provenance::Search);
        let mut dataset = Dataset::new(vec![OrganizationRecord::new("r0", "Org 0"), found]);

        let mut incoming = OrganizationRecord::new("r1", "Org 1");
        incoming.status = RecordStatus::Unresolved;
        assert_eq!(dataset.merge(incoming), Some(RecordStatus::Pending));

        let merged = dataset.get("r1").unwrap();
        assert_eq!(merged.homepage.as_deref(), Some("https://org1.or.kr"));
        assert_eq!(merged.status, RecordStatus::Unresolved);
        assert_eq!(dataset.merge(OrganizationRecord::new("zzz", "Ghost")), None);
        assert_eq!(dataset.records().len(), 2);
    }

    #[test]
    fn test_mark_incomplete_skips_processed() {
        let mut done = OrganizationRecord::new("r0", "Org 0");
        done.status = RecordStatus::Resolved;
        let mut dataset = Dataset::new(vec![done, OrganizationRecord::new("r1", "Org 1")]);
        let ids = vec!["r0".to_string(), "r1".to_string()];
        dataset.mark_incomplete(ids.iter());

        assert_eq!(dataset.get("r0").unwrap().status, RecordStatus::Resolved);
        assert_eq!(dataset.get("r1").unwrap().status, RecordStatus::Incomplete);
        assert_eq!(dataset.outstanding().len(), 1);
    }

    #[test]
    fn test_prepare_dataset_resume() {
        let mut done = OrganizationRecord::new("r0", "Org 0");
        done.apply(FieldType::Fax, "02-111-2223".to_string(), Provenance::Search);
        done.status = RecordStatus::Resolved;
        let mut half = OrganizationRecord::new("r1", "Org 1");
        half.status = RecordStatus::Incomplete;
        let checkpoint = Checkpoint::new("hash".to_string(), vec![done, half]);

        let input = records(3);
        let dataset = prepare_dataset(input, Some(checkpoint), "hash");

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset[0].fax.as_deref(), Some("02-111-2223"));
        assert_eq!(dataset[0].status, RecordStatus::Resolved);
        assert_eq!(dataset[1].status, RecordStatus::Incomplete);
        assert_eq!(dataset[2].id, "r2");
        assert_eq!(dataset[2].status, RecordStatus::Pending);
    }

    #[test]
    fn test_prepare_dataset_fresh_resets_status() {
        let mut input = records(1);
        input[0].status = RecordStatus::Resolved;
        let dataset = prepare_dataset(input, None, "hash");
        assert_eq!(dataset[0].status, RecordStatus::Pending);
    }
}
