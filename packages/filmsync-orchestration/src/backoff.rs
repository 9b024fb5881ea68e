//! Retry with exponential backoff
//!
//! Only `ErrorCategory::Transient` failures are retried. When the attempt
//! budget runs out the last error is wrapped in
//! `OrchestratorError::RetryExhausted` and returned; the pass then aborts
//! without committing watermarks.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::error::{OrchestratorError, Result};

/// Retry policy configuration
///
/// Delay before attempt `n + 1` is `start_delay * factor^n`, capped at
/// `max_delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryPolicy {
    /// Delay after the first failure, in milliseconds
    pub start_delay_ms: u64,
    /// Backoff multiplier
    pub factor: f64,
    /// Ceiling for a single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Total attempts including the first one
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            start_delay_ms: 100,
            factor: 2.0,
            max_delay_ms: 10_000,
            max_attempts: 20,
        }
    }
}

impl RetryPolicy {
    pub fn new(start_delay: Duration, factor: f64, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            start_delay_ms: start_delay.as_millis() as u64,
            factor,
            max_delay_ms: max_delay.as_millis() as u64,
            max_attempts,
        }
    }

    /// A policy that never waits; for tests and dry runs
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            start_delay_ms: 0,
            factor: 1.0,
            max_delay_ms: 0,
            max_attempts,
        }
    }

    /// Calculate delay for retry attempt (exponential backoff)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = (self.start_delay_ms as f64) * self.factor.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(OrchestratorError::config("retry.max_attempts must be at least 1"));
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(OrchestratorError::config("retry.factor must be >= 1.0"));
        }
        if self.start_delay_ms > self.max_delay_ms {
            return Err(OrchestratorError::config(
                "retry.start_delay_ms must not exceed retry.max_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Run `operation` until it succeeds, fails permanently, or the policy is spent
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    error!(
                        "{} failed after {} attempts, giving up: {}",
                        operation_name, attempt, e
                    );
                    return Err(OrchestratorError::RetryExhausted {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        last_error: Box::new(e),
                    });
                }

                let delay = policy.delay_for_attempt(attempt - 1);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation_name, attempt, max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
