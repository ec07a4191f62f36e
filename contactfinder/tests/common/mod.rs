#![allow(dead_code)]

pub mod fake_browser;
pub mod fixtures;
pub mod wiremock_helpers;

use contactfinder::config::AppConfig;

/// Template configuration with every delay removed
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::from_template().unwrap();
    config.worker.count = 2;
    config.worker.record_delay_min_ms = 0;
    config.worker.record_delay_max_ms = 0;
    config.worker.record_timeout_secs = 60;
    config.retry.max_attempts = 2;
    config.retry.backoff_base_delay_ms = 1;
    config.retry.backoff_max_delay_ms = 2;
    config.checkpoint.interval_records = 1;
    config.orchestrator.cancel_grace_secs = 1;
    config
}
