//! Retry policy with exponential backoff and a total time budget

use std::time::Duration;

use serde::Deserialize;

use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts after the first; zero disables retrying.
    pub max_retries: u32,
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    #[serde(with = "millis")]
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Upper bound on the total time spent waiting between attempts.
    #[serde(with = "millis")]
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
            budget: Duration::ZERO,
        }
    }

    /// One retry after a short pause.
    pub fn single() -> Self {
        Self {
            max_retries: 1,
            budget: Duration::from_secs(10),
            ..Self::none()
        }
    }

    /// Backoff before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// How long to wait before retrying `error`, or `None` to give up.
    ///
    /// `waited` is the time already spent sleeping for earlier retries. A provider's
    /// `Retry-After` replaces the computed backoff; when it does not fit in the
    /// remaining budget the call is not retried.
    pub fn delay(&self, error: &TransportError, attempt: u32, waited: Duration) -> Option<Duration> {
        if attempt >= self.max_retries || !error.is_retryable() {
            return None;
        }
        let delay = match error {
            TransportError::RateLimited {
                retry_after: Some(after),
            } => *after,
            _ => self.backoff(attempt),
        };
        (waited + delay <= self.budget).then_some(delay)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
