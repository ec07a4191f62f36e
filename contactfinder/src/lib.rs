pub mod ai;
pub mod batch;
pub mod browser;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod domain_utils;
pub mod export;
pub mod extractor;
pub mod logger;
pub mod orchestrator;
pub mod record;
pub mod report;
pub mod retry;
pub mod search;
pub mod validator;
pub mod worker;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
pub use orchestrator::{Orchestrator, WorkerLauncher};
pub use record::{FieldType, OrganizationRecord, Provenance, RecordStatus};
pub use validator::Validator;
