//! Exponential backoff for reconnects and transient read failures.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::Result;

/// Reconnect schedule: `initial_delay` doubling up to `max_delay`, for at
/// most `max_attempts` consecutive failures.
///
/// # Default Values
///
/// - `initial_delay`: 1 second
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0
/// - `max_attempts`: 6 (1s, 2s, 4s, 8s, 16s, 30s)
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 6,
        }
    }
}

impl ReconnectPolicy {
    /// Short schedule for transparently retried reads.
    pub fn for_reads() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_attempts: 3,
        }
    }

    /// Delay before retry number `attempt` (zero-based), capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }

    /// Whether `failures` consecutive failures exhaust the schedule.
    pub fn exhausted(&self, failures: u32) -> bool {
        failures > self.max_attempts
    }
}

/// Retry a read while it fails with a transient error. Anything else is
/// returned immediately.
pub async fn retry_read<F, Fut, T>(policy: &ReconnectPolicy, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(attempt, what, "read succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(attempt, what, ?delay, error = %err, "read failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
