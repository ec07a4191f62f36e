//! Retry envelope for search tasks
//!
//! Only transient navigation faults are retried. Block pages are handled by
//! engine fallback inside the pipeline and a dead browser ends the worker.

use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::{BackoffStrategy, RetryConfig};
use crate::search::PipelineError;

/// How often and how patiently to retry
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

/// Final result of a retried operation
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Completed(T),
    /// All attempts failed with transient errors
    Exhausted { attempts: u32, last_error: PipelineError },
    /// The browser died; no further attempts are possible
    Fatal(String),
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    pub fn backoff_strategy(&self) -> BackoffStrategy {
        self.config.backoff_strategy
    }

    /// Delay after the given failed attempt (1-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.config.calculate_backoff_delay(attempt)
    }

    /// Run `operation` until it succeeds, fails fatally, or runs out of attempts.
    ///
    /// Backoff sleeps never extend past `deadline`; once it has passed no new
    /// attempt is started.
    pub fn run<T, F>(&self, deadline: Instant, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Result<T, PipelineError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation(attempt) {
                Ok(value) => return RetryOutcome::Completed(value),
                Err(PipelineError::Fatal(message)) => return RetryOutcome::Fatal(message),
                Err(err) => {
                    let now = Instant::now();
                    if attempt >= self.max_attempts() || now >= deadline {
                        warn!("Giving up after {} attempt(s): {}", attempt, err);
                        return RetryOutcome::Exhausted {
                            attempts: attempt,
                            last_error: err,
                        };
                    }

                    let delay = self.delay_for(attempt).min(deadline.saturating_duration_since(now));
                    debug!(
                        "Attempt {} failed ({}), retrying in {:?} with {:?} backoff",
                        attempt, err, delay, self.config.backoff_strategy
                    );
                    std::thread::sleep(delay);
                }
            }
        }
    }
}
