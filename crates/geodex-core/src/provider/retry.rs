use serde::{Deserialize, Serialize};
use std::{fmt::Display, future::Future, time::Duration};
use tracing::debug;

/// Fixed-delay retry applied around a whole provider-chain traversal.
///
/// The chain already tries every provider once per attempt, so retrying an
/// individual provider would multiply the traffic to a source that just
/// failed; retrying the traversal gives every provider another chance after
/// the delay instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first (default: 3).
    pub max_attempts: u32,
    /// Fixed delay between attempts (default: 1 s).
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, delay: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Runs `op` up to `max_attempts` times with a fixed delay in between.
    ///
    /// A `max_attempts` of zero still runs the operation once.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error once all attempts are spent.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.max_attempts.max(1);

        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    debug!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = self.delay.as_millis(),
                        error = %e,
                        "attempt failed, retrying after fixed delay"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        unreachable!("loop returns on the final attempt")
    }
}
