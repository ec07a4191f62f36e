// checkpoint.rs - durable snapshots of the merged dataset
//
// The orchestrator is the only writer. Every save produces a new generation
// file; the highest generation on disk is the one a resumed run starts from.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::record::{OrganizationRecord, RecordStatus};

/// Current checkpoint format version - bump when making breaking changes
pub const CHECKPOINT_VERSION: u32 = 1;

const FILE_PREFIX: &str = "checkpoint-";
const FILE_SUFFIX: &str = ".json";

/// Snapshot of every record at one point of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Checkpoint format version for compatibility checking
    pub version: u32,

    /// Monotonic sequence number; assigned by the store on save
    pub generation: u64,

    /// UTC timestamp when checkpoint was created
    pub created_at: DateTime<Utc>,

    /// Hash of the settings that affect search results
    pub settings_hash: String,

    /// Records that have left `pending`/`incomplete`
    pub processed_count: usize,

    /// Records with every searchable field filled
    pub success_count: usize,

    /// Every record of the run, exactly once
    pub records: Vec<OrganizationRecord>,
}

impl Checkpoint {
    pub fn new(settings_hash: String, records: Vec<OrganizationRecord>) -> Self {
        let processed_count = records.iter().filter(|r| !r.status.needs_processing()).count();
        let success_count = records.iter().filter(|r| r.status == RecordStatus::Resolved).count();
        Self {
            version: CHECKPOINT_VERSION,
            generation: 0,
            created_at: Utc::now(),
            settings_hash,
            processed_count,
            success_count,
            records,
        }
    }

    /// Records still waiting for a worker
    pub fn outstanding(&self) -> impl Iterator<Item = &OrganizationRecord> {
        self.records.iter().filter(|r| r.status.needs_processing())
    }

    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            generation: self.generation,
            created_at: self.created_at,
            total: self.records.len(),
            processed: self.processed_count,
            succeeded: self.success_count,
        }
    }
}

/// Summary of checkpoint state for display
#[derive(Debug, Clone)]
pub struct CheckpointSummary {
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
}

impl std::fmt::Display for CheckpointSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Checkpoint generation {} from {} - {}/{} records processed, {} resolved",
            self.generation,
            self.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.processed,
            self.total,
            self.succeeded
        )
    }
}

/// Storage collaborator for checkpoints
pub trait CheckpointStore: Send + Sync {
    /// Persist `checkpoint` as a new generation. Saving the same content
    /// twice leaves an identical record set on disk.
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<u64>;

    /// Highest generation available, if any.
    fn load_latest(&self) -> Result<Option<Checkpoint>>;
}

/// Generational JSON files in one directory
#[derive(Debug)]
pub struct FileCheckpointStore {
    directory: PathBuf,
    keep_generations: usize,
    next_generation: AtomicU64,
}

impl FileCheckpointStore {
    pub fn new(directory: impl Into<PathBuf>, keep_generations: usize) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .with_context(|| format!("Failed to create checkpoint directory {}", directory.display()))?;
        let latest = Self::generations_in(&directory)?.last().map(|(g, _)| *g).unwrap_or(0);
        Ok(Self {
            directory,
            keep_generations: keep_generations.max(1),
            next_generation: AtomicU64::new(latest + 1),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, generation: u64) -> PathBuf {
        self.directory.join(format!("{}{:06}{}", FILE_PREFIX, generation, FILE_SUFFIX))
    }

    /// Existing generation files, oldest first
    fn generations_in(directory: &Path) -> Result<Vec<(u64, PathBuf)>> {
        let mut found = Vec::new();
        if !directory.exists() {
            return Ok(found);
        }
        for entry in std::fs::read_dir(directory)
            .with_context(|| format!("Failed to list {}", directory.display()))?
        {
            let path = entry?.path();
            let generation = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(FILE_PREFIX))
                .and_then(|n| n.strip_suffix(FILE_SUFFIX))
                .and_then(|n| n.parse::<u64>().ok());
            if let Some(generation) = generation {
                found.push((generation, path));
            }
        }
        found.sort_by_key(|(g, _)| *g);
        Ok(found)
    }

    fn prune(&self) -> Result<()> {
        let generations = Self::generations_in(&self.directory)?;
        if generations.len() <= self.keep_generations {
            return Ok(());
        }
        let excess = generations.len() - self.keep_generations;
        for (generation, path) in generations.into_iter().take(excess) {
            debug!("Pruning checkpoint generation {}", generation);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove old checkpoint {}: {}", path.display(), e);
            }
        }
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<u64> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let mut snapshot = checkpoint.clone();
        snapshot.version = CHECKPOINT_VERSION;
        snapshot.generation = generation;

        let path = self.path_for(generation);
        let temp_path = self.directory.join(format!(".{}{:06}.tmp", FILE_PREFIX, generation));
        let content = serde_json::to_string_pretty(&snapshot)?;

        // Write to temporary file first, then fsync so the rename never exposes a partial file
        {
            let mut file = std::fs::File::create(&temp_path)
                .with_context(|| format!("Failed to create {}", temp_path.display()))?;
            std::io::Write::write_all(&mut file, content.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&temp_path, &path)
            .with_context(|| format!("Failed to move checkpoint into place at {}", path.display()))?;

        debug!(
            "Saved checkpoint generation {} ({} records, {} processed)",
            generation,
            snapshot.records.len(),
            snapshot.processed_count
        );
        self.prune()?;
        Ok(generation)
    }

    fn load_latest(&self) -> Result<Option<Checkpoint>> {
        let Some((generation, path)) = Self::generations_in(&self.directory)?.pop() else {
            return Ok(None);
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)
            .with_context(|| format!("Checkpoint {} is corrupt", path.display()))?;
        if checkpoint.version != CHECKPOINT_VERSION {
            anyhow::bail!(
                "Incompatible checkpoint version: file has version {} but current version is {}. \
                 Delete the checkpoint directory to start fresh.",
                checkpoint.version,
                CHECKPOINT_VERSION
            );
        }
        info!("Loaded checkpoint generation {} from {}", generation, path.display());
        Ok(Some(checkpoint))
    }
}

/// Generate a settings hash for checkpoint compatibility checking.
/// Covers only settings that change which values a search can produce.
pub fn generate_settings_hash(config: &AppConfig) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    config.search.fax_keyword.hash(&mut hasher);
    config.search.homepage_keyword.hash(&mut hasher);
    for engine in &config.search.engines {
        engine.name.hash(&mut hasher);
        engine.results_url.hash(&mut hasher);
    }
    config.validator.near_duplicate_max_diff.hash(&mut hasher);
    config.ai.enabled.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
