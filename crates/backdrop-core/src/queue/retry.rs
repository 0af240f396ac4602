//! Retry policy: how many attempts, and how long to wait between them.

use std::time::Duration;

use crate::config::{MAX_RETRY_DELAY_SECS, QueueConfig};

/// Retry policy for failed operations.
///
/// The default shape is a fixed delay (`multiplier == 1.0`). A larger
/// multiplier turns it into exponential backoff, capped per retry at
/// `max_delay`; the worst case is `total_backoff()`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retry_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Growth factor applied per retry.
    pub multiplier: f64,

    /// Ceiling for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(retry_attempts: u32, delay: Duration) -> Self {
        Self {
            retry_attempts,
            base_delay: delay,
            multiplier: 1.0,
            max_delay: default_max_delay().max(delay),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            retry_attempts: config.retry_attempts,
            base_delay: config.retry_delay(),
            multiplier: config.backoff_multiplier,
            max_delay: default_max_delay(),
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }

    /// Delay after the given failed attempt (1-indexed).
    ///
    /// delay = min(base_delay * multiplier^(attempt - 1), max_delay)
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Sum of all delays one operation can spend sleeping.
    pub fn total_backoff(&self) -> Duration {
        (1..=self.retry_attempts)
            .map(|attempt| self.next_delay(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

fn default_max_delay() -> Duration {
    Duration::from_secs_f64(MAX_RETRY_DELAY_SECS)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}
