//! Run statistics and the final report.
//!
//! `RunStats` is owned by the orchestrator and only ever touched from its
//! event loop. `RunReport` is computed once from the finalized records.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use crate::record::{FieldType, OrganizationRecord, RecordStatus};
use crate::worker::FieldOutcome;

pub const REPORT_FILENAME: &str = "report.json";

/// Counters accumulated while a run is in flight
#[derive(Debug, Clone)]
pub struct RunStats {
    pub started_at: DateTime<Utc>,
    started: Instant,
    /// field -> provenance -> count, for values found during this run
    pub found: BTreeMap<String, BTreeMap<String, usize>>,
    /// not-found reason -> count
    pub not_found: BTreeMap<String, usize>,
    pub records_merged: usize,
    pub workers_launched: usize,
    pub workers_aborted: usize,
    pub redispatch_rounds: u32,
    pub cancelled: bool,
    pub last_checkpoint_generation: Option<u64>,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            found: BTreeMap::new(),
            not_found: BTreeMap::new(),
            records_merged: 0,
            workers_launched: 0,
            workers_aborted: 0,
            redispatch_rounds: 0,
            cancelled: false,
            last_checkpoint_generation: None,
        }
    }

    pub fn record_outcomes(&mut self, outcomes: &[FieldOutcome]) {
        for outcome in outcomes {
            if let Some(provenance) = outcome.found {
                *self
                    .found
                    .entry(outcome.field.to_string())
                    .or_default()
                    .entry(provenance.to_string())
                    .or_default() += 1;
            }
            if let Some(reason) = outcome.not_found {
                *self.not_found.entry(reason.to_string()).or_default() += 1;
            }
        }
    }

    pub fn found_count(&self, field: FieldType) -> usize {
        self.found.get(field.as_str()).map(|m| m.values().sum()).unwrap_or(0)
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// How the run ended, mapped onto the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    /// Every record resolved
    Complete,
    /// Every record processed, some fields not found
    CompletedWithUnresolved,
    /// Cancelled or left records incomplete
    Aborted,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Complete => 0,
            RunOutcome::CompletedWithUnresolved => 1,
            RunOutcome::Aborted => 2,
        }
    }
}

/// Filled counts for one field across all records
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldFill {
    pub filled: usize,
    pub missing: usize,
}

/// Final summary written as `report.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub outcome: RunOutcome,
    pub total_records: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub incomplete: usize,
    pub pending: usize,
    pub fields: BTreeMap<String, FieldFill>,
    pub found_this_run: BTreeMap<String, BTreeMap<String, usize>>,
    pub not_found: BTreeMap<String, usize>,
    pub cancelled: bool,
    pub workers_launched: usize,
    pub workers_aborted: usize,
    pub redispatch_rounds: u32,
    pub checkpoint_generation: Option<u64>,
    /// Ids still waiting for a worker, for follow-up runs
    pub unfinished_ids: Vec<String>,
}

impl RunReport {
    pub fn build(records: &[OrganizationRecord], stats: &RunStats) -> Self {
        let count = |status: RecordStatus| records.iter().filter(|r| r.status == status).count();
        let resolved = count(RecordStatus::Resolved);
        let unresolved = count(RecordStatus::Unresolved);
        let incomplete = count(RecordStatus::Incomplete);
        let pending = count(RecordStatus::Pending);

        let mut fields = BTreeMap::new();
        for field in [FieldType::Phone, FieldType::Fax, FieldType::Homepage] {
            let filled = records.iter().filter(|r| r.field(field).is_some()).count();
            fields.insert(
                field.to_string(),
                FieldFill {
                    filled,
                    missing: records.len() - filled,
                },
            );
        }

        let outcome = if stats.cancelled || incomplete + pending > 0 {
            RunOutcome::Aborted
        } else if unresolved > 0 {
            RunOutcome::CompletedWithUnresolved
        } else {
            RunOutcome::Complete
        };

        Self {
            started_at: stats.started_at,
            finished_at: Utc::now(),
            elapsed_secs: stats.elapsed_secs(),
            outcome,
            total_records: records.len(),
            resolved,
            unresolved,
            incomplete,
            pending,
            fields,
            found_this_run: stats.found.clone(),
            not_found: stats.not_found.clone(),
            cancelled: stats.cancelled,
            workers_launched: stats.workers_launched,
            workers_aborted: stats.workers_aborted,
            redispatch_rounds: stats.redispatch_rounds,
            checkpoint_generation: stats.last_checkpoint_generation,
            unfinished_ids: records
                .iter()
                .filter(|r| r.status.needs_processing())
                .map(|r| r.id.clone())
                .collect(),
        }
    }

    pub fn write(&self, output_dir: &Path) -> Result<()> {
        let path = output_dir.join(REPORT_FILENAME);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write run report to: {}", path.display()))
    }

    /// Plain-text summary lines for the console
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Run Duration: {:.2}s", self.elapsed_secs),
            format!("Outcome: {:?}", self.outcome),
            format!("Organizations: {}", self.total_records),
            format!(
                "Resolved: {}  Unresolved: {}  Incomplete: {}  Pending: {}",
                self.resolved, self.unresolved, self.incomplete, self.pending
            ),
        ];
        for (field, fill) in &self.fields {
            lines.push(format!("{} filled: {}/{}", field, fill.filled, self.total_records));
        }
        for (field, by_source) in &self.found_this_run {
            let parts: Vec<String> = by_source.iter().map(|(source, n)| format!("{} {}", n, source)).collect();
            lines.push(format!("Found {} this run: {}", field, parts.join(", ")));
        }
        if !self.not_found.is_empty() {
            let parts: Vec<String> = self.not_found.iter().map(|(reason, n)| format!("{} {}", n, reason)).collect();
            lines.push(format!("Not found: {}", parts.join(", ")));
        }
        if self.workers_aborted > 0 {
            lines.push(format!(
                "Workers aborted: {} of {} (re-dispatch rounds: {})",
                self.workers_aborted, self.workers_launched, self.redispatch_rounds
            ));
        }
        if self.cancelled {
            lines.push("Run was cancelled; resume with --resume".to_string());
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Provenance;
    use crate::search::NotFoundReason;
    use tempfile::TempDir;

    fn record(id: &str, status: RecordStatus) -> OrganizationRecord {
        let mut r = OrganizationRecord::new(id, format!("Org {}", id)).with_phone("02-111-2222");
        r.status = status;
        r
    }

    #[test]
    fn test_stats_count_outcomes() {
        let mut stats = RunStats::new();
        stats.record_outcomes(&[
            FieldOutcome {
                field: FieldType::Fax,
                found: Some(Provenance::Search),
                not_found: None,
            },
            FieldOutcome {
                field: FieldType::Homepage,
                found: None,
                not_found: Some(NotFoundReason::AllEnginesBlocked),
            },
        ]);
        assert_eq!(stats.found_count(FieldType::Fax), 1);
        assert_eq!(stats.found_count(FieldType::Homepage), 0);
        assert_eq!(stats.not_found.get("all-engines-blocked"), Some(&1));
    }

    #[test]
    fn test_outcome_selection() {
        let stats = RunStats::new();
        let done = vec![record("a", RecordStatus::Resolved)];
        assert_eq!(RunReport::build(&done, &stats).outcome, RunOutcome::Complete);

        let partial = vec![record("a", RecordStatus::Resolved), record("b", RecordStatus::Unresolved)];
        let report = RunReport::build(&partial, &stats);
        assert_eq!(report.outcome, RunOutcome::CompletedWithUnresolved);
        assert_eq!(report.outcome.exit_code(), 1);

        let aborted = vec![record("a", RecordStatus::Incomplete)];
        let report = RunReport::build(&aborted, &stats);
        assert_eq!(report.outcome, RunOutcome::Aborted);
        assert_eq!(report.unfinished_ids, vec!["a".to_string()]);
    }

    #[test]
    fn test_cancelled_run_is_aborted() {
        let mut stats = RunStats::new();
        stats.cancelled = true;
        let records = vec![record("a", RecordStatus::Resolved)];
        assert_eq!(RunReport::build(&records, &stats).outcome.exit_code(), 2);
    }

    #[test]
    fn test_field_fill_and_write() {
        let mut with_fax = record("a", RecordStatus::Resolved);
        with_fax.apply(FieldType::Fax, "02-111-2223".to_string(), Provenance::HomepageCrawl);
        let records = vec![with_fax, record("b", RecordStatus::Unresolved)];
        let report = RunReport::build(&records, &RunStats::new());
        assert_eq!(report.fields["fax"], FieldFill { filled: 1, missing: 1 });
        assert_eq!(report.fields["phone"].filled, 2);

        let dir = TempDir::new().unwrap();
        report.write(dir.path()).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(REPORT_FILENAME)).unwrap()).unwrap();
        assert_eq!(written["outcome"], "completed-with-unresolved");
        assert_eq!(written["total_records"], 2);
    }
}
