//! Exponential backoff with jitter for transient RPC failures.
//!
//! Delays double on every attempt up to a cap, and each delay gets ±25%
//! jitter so parallel prefetch workers do not retry in lockstep:
//!
//! - Attempt 1 fails: ~initial delay
//! - Attempt 2 fails: ~2x initial delay
//! - Attempt 3 fails: ~4x initial delay
//! - ... up to `max_delay`

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{IndexerError, IndexerResult};

/// Retry policy for a single RPC call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for any single delay (before jitter)
    pub max_delay: Duration,
}

impl Backoff {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
        }
    }

    /// Base delay (without jitter) after `failures` failed attempts.
    #[must_use]
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let delay = self.initial_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Delay after `failures` failed attempts, with ±25% jitter.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let delay = self.base_delay(failures);
        let jitter_factor = 0.5 * (rand::random::<f64>() - 0.5);
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let jitter_ms = (delay.as_millis() as f64 * jitter_factor).round() as i64;
        if jitter_ms >= 0 {
            delay + Duration::from_millis(jitter_ms.unsigned_abs())
        } else {
            delay.saturating_sub(Duration::from_millis(jitter_ms.unsigned_abs()))
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error unchanged, or the last transient
    /// error once `max_attempts` have been made.
    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> IndexerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = IndexerResult<T>>,
    {
        let mut failures = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    if failures > 0 {
                        debug!(what, failures, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    failures += 1;
                    if failures >= self.max_attempts {
                        warn!(what, attempts = failures, error = %e, "Retry budget exhausted");
                        return Err(IndexerError::transient(
                            format!("{what} failed after {failures} attempts: {e}"),
                            Some(Box::new(e)),
                        ));
                    }
                    let delay = self.delay_for(failures);
                    warn!(
                        what,
                        attempt = failures,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(7, Duration::from_millis(500), Duration::from_secs(60))
    }
}
