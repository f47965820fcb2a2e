//! Backoff for calls that can fail transiently
//!
//! Anchor submissions are retried in place; the confirmation worker uses the
//! same schedule to space out refreshes of a fingerprint whose authority
//! keeps timing out. Only errors with
//! [`is_transient`](super::ProvenanceError::is_transient) are
//! retried, so integrity faults surface on the first attempt.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

use super::Result;

/// Exponential backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; 0 means a single attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Cap applied before jitter
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random, in `0.0..=1.0`
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl RetryConfig {
    /// Short delays for in-process authorities and tests
    pub fn fast() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: 0.3,
        }
    }

    /// Spacing between refreshes of an unresponsive calendar: starts at a
    /// second, never more than five minutes
    pub fn calendar() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 1.5,
            jitter: 0.5,
        }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(64) as i32;
        let base = (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());

        if self.jitter <= 0.0 || base <= 0.0 {
            return Duration::from_secs_f64(base);
        }
        let spread = base * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((base + offset).max(0.0))
    }
}

/// Outcome of a retried call
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T>,
    /// Calls made, including the first
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Runs a call again while it fails transiently.
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Call `operation` until it succeeds, fails terminally or the retries
    /// are used up. `what` names the call in logs.
    pub async fn run<F, Fut, T>(&self, what: &str, operation: F) -> Retried<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let error = match operation().await {
                Ok(value) => {
                    return Retried {
                        result: Ok(value),
                        attempts,
                        elapsed: start.elapsed(),
                    }
                }
                Err(e) => e,
            };

            if attempts > self.config.max_retries || !error.is_transient() {
                return Retried {
                    result: Err(error),
                    attempts,
                    elapsed: start.elapsed(),
                };
            }

            let delay = self.config.delay_after(attempts);
            debug!(what, attempts, delay_ms = delay.as_millis() as u64, error = %error, "Retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

/// SQLite errors worth another attempt: busy/locked databases and pool
/// exhaustion.
pub fn is_transient_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        // SQLITE_BUSY, SQLITE_LOCKED and their extended codes
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some("5" | "6" | "261" | "262" | "517")
        ),
        _ => false,
    }
}
