//! Configuration management for contactfinder
//!
//! All configuration is loaded from `./config/contactfinder.toml`.
//! Defaults live only in the bundled template; source code carries none.

use serde::{Deserialize, Serialize};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::fs;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::record::FieldType;
use crate::search::MAX_QUERY_VARIANTS;

/// Where `run` and `init` look for the config when `--config` is absent
pub const CONFIG_PATH: &str = "./config/contactfinder.toml";

/// Bundled template written by `init`; every tunable is spelled out here
pub const DEFAULT_CONFIG: &str = include_str!("../config/contactfinder.toml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid URL in '{field}': {url}")]
    InvalidUrl { field: String, url: String },

    #[error("Invalid CSS selector in '{field}': {selector} ({error})")]
    InvalidSelector {
        field: String,
        selector: String,
        error: String,
    },

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },

    #[error("Configuration field '{field}' is out of range: {message}")]
    OutOfRange { field: String, message: String },

    #[error("At least one search engine must be configured")]
    NoEnginesConfigured,
}

/// Crawl settings as read from `contactfinder.toml`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub browser: BrowserConfig,
    pub search: SearchConfig,
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
    pub checkpoint: CheckpointConfig,
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    pub ai: AiConfig,
}

/// Chrome launch and pacing settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    pub headless: bool,
    /// Empty string means auto-detect
    #[serde(default)]
    pub chrome_path: String,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: String,
    pub accept_language: String,
    pub navigation_timeout_secs: u64,
    pub idle_browser_timeout_secs: u64,
    pub settle_delay_min_ms: u64,
    pub settle_delay_max_ms: u64,
    pub keystroke_delay_min_ms: u64,
    pub keystroke_delay_max_ms: u64,
    pub pre_submit_delay_min_ms: u64,
    pub pre_submit_delay_max_ms: u64,
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn chrome_path(&self) -> Option<PathBuf> {
        let trimmed = self.chrome_path.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }
}

/// Search engine and query wording settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    pub fax_keyword: String,
    pub homepage_keyword: String,
    pub engines: Vec<EngineConfig>,
}

impl SearchConfig {
    /// Worst-case navigations for one record: every query variant visits each
    /// engine's home page and then its results, for every searchable field,
    /// plus the single homepage crawl of the fax search.
    pub fn navigation_budget(&self) -> u64 {
        let per_field = MAX_QUERY_VARIANTS * self.engines.len() * 2;
        (per_field * FieldType::SEARCHABLE.len() + 1) as u64
    }
}

/// One search engine, tried in the order configured
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    pub name: String,
    pub home_url: String,
    pub input_selector: String,
    /// Direct results URL with a `{query}` placeholder
    pub results_url: String,
}

/// Worker process settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    pub count: usize,
    #[serde(default)]
    pub chunk_size: usize,
    pub record_delay_min_ms: u64,
    pub record_delay_max_ms: u64,
    /// 0 derives the deadline from the navigation timeout
    #[serde(default)]
    pub record_timeout_secs: u64,
    /// 0 derives the budget from the engine list
    #[serde(default)]
    pub max_navigations_per_record: u32,
    pub record_timeout_slack_secs: u64,
}

impl WorkerConfig {
    /// Navigations a record may spend before its deadline
    pub fn navigation_budget(&self, search: &SearchConfig) -> u64 {
        match self.max_navigations_per_record {
            0 => search.navigation_budget(),
            n => n as u64,
        }
    }

    /// Per-record deadline: explicit override, or navigation timeout times the
    /// navigation budget plus slack.
    pub fn record_timeout(&self, browser: &BrowserConfig, search: &SearchConfig) -> Duration {
        if self.record_timeout_secs > 0 {
            return Duration::from_secs(self.record_timeout_secs);
        }
        let navigations = browser
            .navigation_timeout_secs
            .saturating_mul(self.navigation_budget(search));
        Duration::from_secs(navigations.saturating_add(self.record_timeout_slack_secs))
    }
}

/// Backoff strategy for retries
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Delay grows by the base delay on every attempt
    Linear,
    /// Delay doubles on every attempt
    Exponential,
}

/// Retry envelope around transient navigation faults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub backoff_strategy: BackoffStrategy,
    pub max_attempts: u32,
    pub backoff_base_delay_ms: u64,
    pub backoff_max_delay_ms: u64,
}

impl RetryConfig {
    /// Delay before the given retry attempt (1-indexed; 0 means no delay)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = self.backoff_base_delay_ms;
        let delay_ms = match self.backoff_strategy {
            BackoffStrategy::Linear => base.saturating_mul(attempt as u64),
            BackoffStrategy::Exponential => {
                let factor = 2u64.checked_pow(attempt - 1).unwrap_or(u64::MAX);
                base.saturating_mul(factor)
            }
        };
        Duration::from_millis(delay_ms.min(self.backoff_max_delay_ms))
    }
}

/// Checkpoint store settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub directory: String,
    pub interval_records: usize,
    pub keep_generations: usize,
}

impl CheckpointConfig {
    /// Resolve the checkpoint directory against the run's output directory.
    pub fn resolve_directory(&self, output_dir: &Path) -> PathBuf {
        let trimmed = self.directory.trim();
        if trimmed.is_empty() {
            output_dir.join("checkpoints")
        } else {
            PathBuf::from(trimmed)
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    pub redispatch_rounds: u32,
    pub cancel_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ValidatorConfig {
    #[serde(default = "default_near_duplicate_max_diff")]
    pub near_duplicate_max_diff: usize,
}

fn default_near_duplicate_max_diff() -> usize {
    1
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            near_duplicate_max_diff: default_near_duplicate_max_diff(),
        }
    }
}

/// AI collaborator settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AiConfig {
    pub enabled: bool,
    pub model: String,
    #[serde(default)]
    pub api_base: String,
    pub api_key_env: String,
    pub max_page_chars: usize,
    pub min_confidence: f32,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(CONFIG_PATH))
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse the bundled template without touching the filesystem
    pub fn from_template() -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.browser;
        if b.user_agent.trim().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "browser.user_agent".to_string(),
            });
        }
        if b.navigation_timeout_secs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "browser.navigation_timeout_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if b.window_width == 0 || b.window_height == 0 {
            return Err(ConfigError::OutOfRange {
                field: "browser.window_width/window_height".to_string(),
                message: "window dimensions must be non-zero".to_string(),
            });
        }
        check_range("browser.settle_delay", b.settle_delay_min_ms, b.settle_delay_max_ms)?;
        check_range("browser.keystroke_delay", b.keystroke_delay_min_ms, b.keystroke_delay_max_ms)?;
        check_range("browser.pre_submit_delay", b.pre_submit_delay_min_ms, b.pre_submit_delay_max_ms)?;

        if self.search.fax_keyword.trim().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "search.fax_keyword".to_string(),
            });
        }
        if self.search.homepage_keyword.trim().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "search.homepage_keyword".to_string(),
            });
        }
        if self.search.engines.is_empty() {
            return Err(ConfigError::NoEnginesConfigured);
        }
        for (i, engine) in self.search.engines.iter().enumerate() {
            if engine.name.trim().is_empty() {
                return Err(ConfigError::EmptyRequired {
                    field: format!("search.engines[{}].name", i),
                });
            }
            validate_url(&format!("search.engines[{}].home_url", i), &engine.home_url)?;
            if !engine.results_url.contains("{query}") {
                return Err(ConfigError::InvalidUrl {
                    field: format!("search.engines[{}].results_url (missing {{query}})", i),
                    url: engine.results_url.clone(),
                });
            }
            validate_url(
                &format!("search.engines[{}].results_url", i),
                &engine.results_url.replace("{query}", "test"),
            )?;
            scraper::Selector::parse(&engine.input_selector).map_err(|e| {
                ConfigError::InvalidSelector {
                    field: format!("search.engines[{}].input_selector", i),
                    selector: engine.input_selector.clone(),
                    error: format!("{:?}", e),
                }
            })?;
        }

        if self.worker.count == 0 {
            return Err(ConfigError::OutOfRange {
                field: "worker.count".to_string(),
                message: "at least one worker is required".to_string(),
            });
        }
        check_range("worker.record_delay", self.worker.record_delay_min_ms, self.worker.record_delay_max_ms)?;
        let budget = self.worker.navigation_budget(&self.search);
        let needed = self.search.navigation_budget();
        if budget < needed {
            warn!(
                "worker.max_navigations_per_record = {} is below the {} navigations a record can need; later fields may hit the deadline",
                budget, needed
            );
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                field: "retry.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.retry.backoff_base_delay_ms > self.retry.backoff_max_delay_ms {
            return Err(ConfigError::OutOfRange {
                field: "retry.backoff_base_delay_ms".to_string(),
                message: "base delay exceeds backoff_max_delay_ms".to_string(),
            });
        }

        if self.checkpoint.interval_records == 0 {
            return Err(ConfigError::OutOfRange {
                field: "checkpoint.interval_records".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.checkpoint.keep_generations == 0 {
            return Err(ConfigError::OutOfRange {
                field: "checkpoint.keep_generations".to_string(),
                message: "at least one generation must be kept".to_string(),
            });
        }

        if self.ai.enabled {
            if self.ai.model.trim().is_empty() {
                return Err(ConfigError::EmptyRequired {
                    field: "ai.model".to_string(),
                });
            }
            if !self.ai.api_base.trim().is_empty() {
                validate_url("ai.api_base", &self.ai.api_base)?;
            }
        }
        if !(0.0..=1.0).contains(&self.ai.min_confidence) {
            return Err(ConfigError::OutOfRange {
                field: "ai.min_confidence".to_string(),
                message: format!("{} is not within 0.0..=1.0", self.ai.min_confidence),
            });
        }

        Ok(())
    }

    /// Create default configuration file at the standard location
    pub fn create_default_config() -> Result<PathBuf, ConfigError> {
        Self::create_default_config_at(Path::new(CONFIG_PATH))
    }

    /// Write the bundled template to `path`, creating parent directories
    pub fn create_default_config_at(path: &Path) -> Result<PathBuf, ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;

        Ok(path.to_path_buf())
    }

    /// True when a person is at the keyboard to answer a prompt
    pub fn is_interactive() -> bool {
        io::stdin().is_terminal()
    }

    /// Prompt user to create default config (only in interactive mode)
    pub fn prompt_create_config() -> Result<Option<PathBuf>, ConfigError> {
        if !Self::is_interactive() {
            return Ok(None);
        }

        eprint!("Configuration file not found. Create default config? [Y/n] ");
        io::stderr().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();

        if input.is_empty() || input == "y" || input == "yes" {
            let path = Self::create_default_config()?;
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }
}

fn check_range(field: &str, min: u64, max: u64) -> Result<(), ConfigError> {
    if min > max {
        return Err(ConfigError::OutOfRange {
            field: field.to_string(),
            message: format!("min ({}) is greater than max ({})", min, max),
        });
    }
    Ok(())
}

fn validate_url(field: &str, raw: &str) -> Result<(), ConfigError> {
    match url::Url::parse(raw) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            field: field.to_string(),
            url: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config: Result<AppConfig, _> = toml::from_str(DEFAULT_CONFIG);
        assert!(config.is_ok(), "Default config should parse: {:?}", config.err());
    }

    #[test]
    fn test_default_config_validates() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert!(config.validate().is_ok(), "Default config should validate");
    }

    #[test]
    fn test_default_engine_order() {
        let config = AppConfig::from_template().unwrap();
        let names: Vec<&str> = config.search.engines.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["google", "bing", "naver", "daum"]);
    }

    #[test]
    fn test_backoff_calculation_linear() {
        let config = RetryConfig {
            backoff_strategy: BackoffStrategy::Linear,
            max_attempts: 3,
            backoff_base_delay_ms: 1000,
            backoff_max_delay_ms: 30000,
        };

        assert_eq!(config.calculate_backoff_delay(0), Duration::ZERO);
        assert_eq!(config.calculate_backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(config.calculate_backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(config.calculate_backoff_delay(3), Duration::from_millis(3000));
    }

    #[test]
    fn test_backoff_calculation_exponential() {
        let config = RetryConfig {
            backoff_strategy: BackoffStrategy::Exponential,
            max_attempts: 3,
            backoff_base_delay_ms: 1000,
            backoff_max_delay_ms: 30000,
        };

        assert_eq!(config.calculate_backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(config.calculate_backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(config.calculate_backoff_delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_max_cap() {
        let config = RetryConfig {
            backoff_strategy: BackoffStrategy::Exponential,
            max_attempts: 10,
            backoff_base_delay_ms: 1000,
            backoff_max_delay_ms: 5000,
        };

        // 1000 * 2^9 = 512000, capped
        assert_eq!(config.calculate_backoff_delay(10), Duration::from_millis(5000));
        assert_eq!(config.calculate_backoff_delay(200), Duration::from_millis(5000));
    }

    #[test]
    fn test_record_timeout_derived_and_override() {
        let mut config = AppConfig::from_template().unwrap();
        config.browser.navigation_timeout_secs = 10;
        config.worker.max_navigations_per_record = 5;
        config.worker.record_timeout_slack_secs = 7;
        config.worker.record_timeout_secs = 0;
        assert_eq!(
            config.worker.record_timeout(&config.browser, &config.search),
            Duration::from_secs(57)
        );

        config.worker.record_timeout_secs = 90;
        assert_eq!(
            config.worker.record_timeout(&config.browser, &config.search),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_navigation_budget_covers_every_engine_and_variant() {
        let mut config = AppConfig::from_template().unwrap();
        assert_eq!(config.search.engines.len(), 4);
        // 2 fields x 2 variants x 4 engines x (home + results), plus the homepage crawl
        assert_eq!(config.search.navigation_budget(), 33);
        assert_eq!(config.worker.max_navigations_per_record, 0);
        assert_eq!(config.worker.navigation_budget(&config.search), 33);

        config.browser.navigation_timeout_secs = 10;
        config.worker.record_timeout_slack_secs = 30;
        config.worker.record_timeout_secs = 0;
        assert_eq!(
            config.worker.record_timeout(&config.browser, &config.search),
            Duration::from_secs(360)
        );

        config.search.engines.truncate(1);
        assert_eq!(config.worker.navigation_budget(&config.search), 9);

        config.worker.max_navigations_per_record = 12;
        assert_eq!(config.worker.navigation_budget(&config.search), 12);
    }

    #[test]
    fn test_results_url_requires_placeholder() {
        let mut config = AppConfig::from_template().unwrap();
        config.search.engines[0].results_url = "https://www.google.com/search".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_inverted_delay_range_rejected() {
        let mut config = AppConfig::from_template().unwrap();
        config.worker.record_delay_min_ms = 5000;
        config.worker.record_delay_max_ms = 1000;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn test_validator_section_optional() {
        let without: String = DEFAULT_CONFIG
            .lines()
            .filter(|l| !l.starts_with("[validator]") && !l.starts_with("near_duplicate_max_diff"))
            .collect::<Vec<_>>()
            .join("\n");
        let config: AppConfig = toml::from_str(&without).expect("config without [validator] should parse");
        assert_eq!(config.validator.near_duplicate_max_diff, 1);
    }

    #[test]
    fn test_checkpoint_directory_resolution() {
        let config = AppConfig::from_template().unwrap();
        let dir = config.checkpoint.resolve_directory(Path::new("out"));
        assert_eq!(dir, PathBuf::from("out").join("checkpoints"));
    }
}
