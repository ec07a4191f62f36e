//! Search pipeline: query variants → engines → extraction → validation
//!
//! One [`SearchTask`] covers one field of one organization for one attempt.
//! The pipeline walks the configured engines in priority order for each
//! query variant, and for fax falls back to crawling a known homepage.
//! Not finding a value is an ordinary outcome; errors are reserved for
//! retryable navigation faults and a dead browser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::browser::{Browse, BrowseError, PageContent};
use crate::config::{EngineConfig, SearchConfig};
use crate::extractor::{ExtractionCandidate, ExtractionMethod, Extractor};
use crate::record::{FieldType, OrganizationRecord, Provenance};
use crate::validator::Validator;

/// Administrative suffixes stripped from the first address token
const REGION_SUFFIXES: &[&str] = &[
    "특별자치시", "특별자치도", "특별시", "광역시", "자치시", "도", "시", "-si", "-do",
];

/// Region hint for the secondary query, e.g. `서울` from `서울특별시 중구 ...`
pub fn region_from_address(address: &str) -> Option<String> {
    let first = address
        .split_whitespace()
        .next()?
        .trim_matches(|c: char| c == ',' || c == '(' || c == ')');
    let mut region = first.to_string();
    for suffix in REGION_SUFFIXES {
        if let Some(stripped) = first.strip_suffix(suffix) {
            if !stripped.is_empty() {
                region = stripped.to_string();
                break;
            }
        }
    }
    let region = region.trim_end_matches(',').to_string();
    (!region.is_empty()).then_some(region)
}

/// Primary query plus the optional region-qualified one
pub const MAX_QUERY_VARIANTS: usize = 2;

/// Work order for one field of one organization
#[derive(Debug, Clone, PartialEq)]
pub struct SearchTask {
    pub organization_id: String,
    pub field_type: FieldType,
    /// Primary variant first
    pub query_variants: Vec<String>,
    pub engines_tried: BTreeSet<String>,
}

impl SearchTask {
    pub fn new(record: &OrganizationRecord, field: FieldType, config: &SearchConfig) -> Self {
        let keyword = match field {
            FieldType::Homepage => config.homepage_keyword.as_str(),
            _ => config.fax_keyword.as_str(),
        };
        let name = record.name.trim();

        let mut query_variants = vec![format!("{} {}", name, keyword)];
        if let Some(region) = record.address.as_deref().and_then(region_from_address) {
            if !name.contains(&region) {
                query_variants.push(format!("{} {} {}", name, region, keyword));
            }
        }

        Self {
            organization_id: record.id.clone(),
            field_type: field,
            query_variants,
            engines_tried: BTreeSet::new(),
        }
    }
}

/// Why a task ended without a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotFoundReason {
    /// Every engine answered and nothing valid turned up
    Exhausted,
    /// Every engine served a block page
    AllEnginesBlocked,
    /// Per-record deadline expired before the search finished
    DeadlineExceeded,
    /// Transient failures outlasted the retry envelope
    RetriesExhausted,
}

impl std::fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFoundReason::Exhausted => write!(f, "exhausted"),
            NotFoundReason::AllEnginesBlocked => write!(f, "all-engines-blocked"),
            NotFoundReason::DeadlineExceeded => write!(f, "deadline-exceeded"),
            NotFoundReason::RetriesExhausted => write!(f, "retries-exhausted"),
        }
    }
}

/// A validated value ready to be written to the record
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    pub field: FieldType,
    pub value: String,
    pub provenance: Provenance,
    pub source_url: String,
    pub method: ExtractionMethod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Found(Discovery),
    NotFound(NotFoundReason),
}

/// States visited during one task, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    QueryBuilt { variant: usize },
    EngineNavigated { engine: String },
    EngineBlocked { engine: String },
    ResultParsed { engine: String, candidates: usize },
    FieldFound,
    EngineExhausted { engine: String },
    HomepageFallback,
    TaskDone,
    TaskFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub outcome: TaskOutcome,
    pub trace: Vec<PipelineState>,
    pub engines_tried: BTreeSet<String>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Transient navigation failure: {0}")]
    Transient(BrowseError),

    #[error("Browser failure: {0}")]
    Fatal(String),
}

impl From<BrowseError> for PipelineError {
    fn from(err: BrowseError) -> Self {
        match err {
            BrowseError::Fatal(message) => PipelineError::Fatal(message),
            other => PipelineError::Transient(other),
        }
    }
}

/// Result of one engine attempt
enum EngineStep {
    Page(PageContent),
    Deadline,
}

/// Drives searches for one worker
#[derive(Clone)]
pub struct SearchPipeline {
    engines: Vec<EngineConfig>,
    extractor: Extractor,
    validator: Validator,
}

impl SearchPipeline {
    pub fn new(engines: Vec<EngineConfig>, extractor: Extractor, validator: Validator) -> Self {
        Self {
            engines,
            extractor,
            validator,
        }
    }

    /// Run one task to a terminal outcome.
    pub fn run_task(
        &self,
        session: &mut dyn Browse,
        task: SearchTask,
        record: &OrganizationRecord,
        deadline: Instant,
    ) -> Result<TaskReport, PipelineError> {
        let mut task = task;
        let mut trace = Vec::new();
        let field = task.field_type;
        let mut engine_attempts = 0usize;
        let mut blocked_attempts = 0usize;
        let mut last_transient: Option<BrowseError> = None;

        let variants = std::mem::take(&mut task.query_variants);
        for (index, query) in variants.iter().enumerate() {
            trace.push(PipelineState::QueryBuilt { variant: index });
            debug!("[{}] {} query #{}: '{}'", task.organization_id, field, index, query);

            for engine in &self.engines {
                task.engines_tried.insert(engine.name.clone());
                engine_attempts += 1;

                let page = match self.search_engine(session, engine, query, deadline) {
                    Ok(EngineStep::Page(page)) => page,
                    Ok(EngineStep::Deadline) => {
                        return Ok(finish_not_found(trace, task, NotFoundReason::DeadlineExceeded));
                    }
                    Err(BrowseError::Blocked { indicator, .. }) => {
                        info!("[{}] {} blocked ({}), trying next engine", task.organization_id, engine.name, indicator);
                        blocked_attempts += 1;
                        trace.push(PipelineState::EngineBlocked {
                            engine: engine.name.clone(),
                        });
                        continue;
                    }
                    Err(BrowseError::Fatal(message)) => return Err(PipelineError::Fatal(message)),
                    Err(e) => {
                        debug!("[{}] {} failed: {}", task.organization_id, engine.name, e);
                        last_transient = Some(e);
                        continue;
                    }
                };

                trace.push(PipelineState::EngineNavigated {
                    engine: engine.name.clone(),
                });
                let candidates = self.extractor.extract(&page, field, &record.name);
                trace.push(PipelineState::ResultParsed {
                    engine: engine.name.clone(),
                    candidates: candidates.len(),
                });

                if let Some(discovery) = self.first_accepted(&candidates, field, record, Provenance::Search) {
                    trace.push(PipelineState::FieldFound);
                    trace.push(PipelineState::TaskDone);
                    return Ok(TaskReport {
                        outcome: TaskOutcome::Found(discovery),
                        trace,
                        engines_tried: task.engines_tried,
                    });
                }
                trace.push(PipelineState::EngineExhausted {
                    engine: engine.name.clone(),
                });
            }
        }

        if field == FieldType::Fax {
            if let Some(homepage) = record.field(FieldType::Homepage) {
                if Instant::now() >= deadline {
                    return Ok(finish_not_found(trace, task, NotFoundReason::DeadlineExceeded));
                }
                trace.push(PipelineState::HomepageFallback);
                match session.navigate(homepage) {
                    Ok(page) => {
                        let candidates = self.extractor.extract(&page, field, &record.name);
                        if let Some(discovery) =
                            self.first_accepted(&candidates, field, record, Provenance::HomepageCrawl)
                        {
                            trace.push(PipelineState::FieldFound);
                            trace.push(PipelineState::TaskDone);
                            return Ok(TaskReport {
                                outcome: TaskOutcome::Found(discovery),
                                trace,
                                engines_tried: task.engines_tried,
                            });
                        }
                    }
                    Err(BrowseError::Fatal(message)) => return Err(PipelineError::Fatal(message)),
                    Err(e) => debug!("[{}] homepage crawl of {} failed: {}", task.organization_id, homepage, e),
                }
            }
        }

        if let Some(e) = last_transient {
            return Err(PipelineError::Transient(e));
        }

        let reason = if engine_attempts > 0 && blocked_attempts == engine_attempts {
            NotFoundReason::AllEnginesBlocked
        } else {
            NotFoundReason::Exhausted
        };
        Ok(finish_not_found(trace, task, reason))
    }

    /// Home page → type query → submit, or the direct results URL when the
    /// search box cannot be found.
    fn search_engine(
        &self,
        session: &mut dyn Browse,
        engine: &EngineConfig,
        query: &str,
        deadline: Instant,
    ) -> Result<EngineStep, BrowseError> {
        if Instant::now() >= deadline {
            return Ok(EngineStep::Deadline);
        }
        session.navigate(&engine.home_url)?;

        match session.type_text(&engine.input_selector, query) {
            Ok(()) => {
                if Instant::now() >= deadline {
                    return Ok(EngineStep::Deadline);
                }
                session.submit().map(EngineStep::Page)
            }
            Err(BrowseError::ElementNotFound { selector }) => {
                debug!("{}: input '{}' not found, using results URL", engine.name, selector);
                if Instant::now() >= deadline {
                    return Ok(EngineStep::Deadline);
                }
                session.navigate(&results_url(engine, query)).map(EngineStep::Page)
            }
            Err(e) => Err(e),
        }
    }

    fn first_accepted(
        &self,
        candidates: &[ExtractionCandidate],
        field: FieldType,
        record: &OrganizationRecord,
        provenance: Provenance,
    ) -> Option<Discovery> {
        candidates.iter().find_map(|candidate| {
            let verdict = self.validator.validate(&candidate.raw_value, field, record);
            let value = verdict.normalized_value.filter(|_| verdict.accepted)?;
            let provenance = if candidate.method == ExtractionMethod::AiAssisted {
                Provenance::AiAssisted
            } else {
                provenance
            };
            Some(Discovery {
                field,
                value,
                provenance,
                source_url: candidate.source_url.clone(),
                method: candidate.method,
            })
        })
    }
}

fn finish_not_found(mut trace: Vec<PipelineState>, task: SearchTask, reason: NotFoundReason) -> TaskReport {
    debug!("[{}] {} not found: {}", task.organization_id, task.field_type, reason);
    trace.push(PipelineState::TaskFailed);
    TaskReport {
        outcome: TaskOutcome::NotFound(reason),
        trace,
        engines_tried: task.engines_tried,
    }
}

/// Engine results URL with the query form-encoded into `{query}`
pub fn results_url(engine: &EngineConfig, query: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
    engine.results_url.replace("{query}", &encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_region_from_address() {
        assert_eq!(region_from_address("서울특별시 중구 세종대로 110").as_deref(), Some("서울"));
        assert_eq!(region_from_address("경기도 수원시 팔달구").as_deref(), Some("경기"));
        assert_eq!(region_from_address("부산광역시 연제구").as_deref(), Some("부산"));
        assert_eq!(region_from_address("Seoul, Jung-gu").as_deref(), Some("Seoul"));
        assert_eq!(region_from_address("   "), None);
    }

    #[test]
    fn test_query_variants() {
        let config = AppConfig::from_template().unwrap().search;
        let record = OrganizationRecord::new("1", "Acme Center").with_address("서울특별시 중구");
        let task = SearchTask::new(&record, FieldType::Fax, &config);
        assert_eq!(task.query_variants, vec!["Acme Center 팩스", "Acme Center 서울 팩스"]);

        let no_address = OrganizationRecord::new("2", "Acme Center");
        let task = SearchTask::new(&no_address, FieldType::Homepage, &config);
        assert_eq!(task.query_variants, vec!["Acme Center 홈페이지"]);
    }

    #[test]
    fn test_results_url_encodes_query() {
        let engine = EngineConfig {
            name: "google".to_string(),
            home_url: "https://www.google.com/".to_string(),
            input_selector: "textarea[name='q']".to_string(),
            results_url: "https://www.google.com/search?q={query}&hl=ko".to_string(),
        };
        assert_eq!(
            results_url(&engine, "Acme 팩스"),
            "https://www.google.com/search?q=Acme+%ED%8C%A9%EC%8A%A4&hl=ko"
        );
    }

    #[test]
    fn test_pipeline_error_from_browse_error() {
        assert_eq!(
            PipelineError::from(BrowseError::Fatal("gone".to_string())),
            PipelineError::Fatal("gone".to_string())
        );
        assert!(matches!(
            PipelineError::from(BrowseError::Timeout { url: "u".to_string() }),
            PipelineError::Transient(_)
        ));
    }
}
