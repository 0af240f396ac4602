//! Queue configuration.
//!
//! Values come from `BACKDROP_*` environment variables at startup; anything
//! unset keeps its default. [`QueueConfig::from_lookup`] takes any key lookup
//! so tests never have to touch the process environment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::RetryPolicy;

const ENV_PREFIX: &str = "BACKDROP_";

/// Upper bound for a single retry delay.
pub const MAX_RETRY_DELAY_SECS: f64 = 60.0;
/// Upper bound for one graph-memory call.
pub const MAX_EPISODE_TIMEOUT_SECS: f64 = 300.0;
/// Upper bound for the backoff growth factor.
pub const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;
/// Worst-case sleep one operation may accumulate across all its retries.
pub const MAX_TOTAL_BACKOFF_SECS: f64 = 300.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How episode enrichment is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMode {
    /// Through the bounded queue and worker pool.
    #[default]
    Queue,
    /// One detached task per call, no queue, no retries.
    Legacy,
}

impl FromStr for BackgroundMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" | "queued" => Ok(BackgroundMode::Queue),
            "legacy" | "detached" => Ok(BackgroundMode::Legacy),
            _ => Err(()),
        }
    }
}

impl fmt::Display for BackgroundMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackgroundMode::Queue => f.write_str("queue"),
            BackgroundMode::Legacy => f.write_str("legacy"),
        }
    }
}

/// Configuration for the queue manager, its workers, and retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// When false, enqueue still hands out ids but nothing is processed.
    pub enabled: bool,
    /// Number of worker tasks spawned by `start()`.
    pub max_workers: usize,
    /// Capacity of the bounded queue.
    pub max_queue_size: usize,
    /// Extra attempts after the first failure.
    pub retry_attempts: u32,
    /// Delay between attempts, in seconds.
    pub retry_delay_secs: f64,
    /// Growth factor for the retry delay; 1.0 keeps it fixed.
    pub backoff_multiplier: f64,
    pub background_mode: BackgroundMode,
    /// How long a producer may wait for space when the queue is full.
    pub overflow_wait_ms: u64,
    /// Longest a worker waits on an empty queue before re-checking shutdown.
    pub poll_interval_ms: u64,
    /// Time box for one graph-memory call.
    pub episode_timeout_secs: f64,
    /// Number of failed operations retained for diagnostics.
    pub failed_capacity: usize,
    /// Size of the rolling processing-time window.
    pub stats_max_samples: usize,
    /// Log a stats summary on this interval while running.
    pub stats_log_interval_secs: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: 3,
            max_queue_size: 100,
            retry_attempts: 2,
            retry_delay_secs: 1.0,
            backoff_multiplier: 1.0,
            background_mode: BackgroundMode::Queue,
            overflow_wait_ms: 100,
            poll_interval_ms: 1_000,
            episode_timeout_secs: 10.0,
            failed_capacity: 100,
            stats_max_samples: 1_000,
            stats_log_interval_secs: None,
        }
    }
}

impl QueueConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve full keys such as `BACKDROP_MAX_WORKERS`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let defaults = Self::default();

        let config = Self {
            enabled: env.flag("ENABLED")?.unwrap_or(defaults.enabled),
            max_workers: env.parsed("MAX_WORKERS")?.unwrap_or(defaults.max_workers),
            max_queue_size: env.parsed("MAX_QUEUE_SIZE")?.unwrap_or(defaults.max_queue_size),
            retry_attempts: env.parsed("RETRY_ATTEMPTS")?.unwrap_or(defaults.retry_attempts),
            retry_delay_secs: env
                .parsed("RETRY_DELAY_SECS")?
                .unwrap_or(defaults.retry_delay_secs),
            backoff_multiplier: env
                .parsed("BACKOFF_MULTIPLIER")?
                .unwrap_or(defaults.backoff_multiplier),
            background_mode: env
                .parsed("BACKGROUND_MODE")?
                .unwrap_or(defaults.background_mode),
            overflow_wait_ms: env
                .parsed("OVERFLOW_WAIT_MS")?
                .unwrap_or(defaults.overflow_wait_ms),
            poll_interval_ms: env
                .parsed("POLL_INTERVAL_MS")?
                .unwrap_or(defaults.poll_interval_ms),
            episode_timeout_secs: env
                .parsed("EPISODE_TIMEOUT_SECS")?
                .unwrap_or(defaults.episode_timeout_secs),
            failed_capacity: env
                .parsed("FAILED_CAPACITY")?
                .unwrap_or(defaults.failed_capacity),
            stats_max_samples: env
                .parsed("STATS_SAMPLES")?
                .unwrap_or(defaults.stats_max_samples),
            stats_log_interval_secs: env.parsed("STATS_LOG_INTERVAL_SECS")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::Invalid("max_queue_size must be at least 1".into()));
        }
        if self.failed_capacity == 0 {
            return Err(ConfigError::Invalid("failed_capacity must be at least 1".into()));
        }
        if self.stats_max_samples == 0 {
            return Err(ConfigError::Invalid("stats_max_samples must be at least 1".into()));
        }
        if !(self.backoff_multiplier.is_finite()
            && (1.0..=MAX_BACKOFF_MULTIPLIER).contains(&self.backoff_multiplier))
        {
            return Err(ConfigError::Invalid(format!(
                "backoff_multiplier must be between 1.0 and {MAX_BACKOFF_MULTIPLIER}"
            )));
        }
        for (name, secs, max) in [
            ("retry_delay_secs", self.retry_delay_secs, MAX_RETRY_DELAY_SECS),
            ("episode_timeout_secs", self.episode_timeout_secs, MAX_EPISODE_TIMEOUT_SECS),
        ] {
            if !(secs.is_finite() && (0.0..=max).contains(&secs)) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between 0 and {max} seconds"
                )));
            }
        }
        let total_backoff = RetryPolicy::from_config(self).total_backoff();
        if total_backoff.as_secs_f64() > MAX_TOTAL_BACKOFF_SECS {
            return Err(ConfigError::Invalid(format!(
                "retries could sleep {:.1}s per operation; at most {MAX_TOTAL_BACKOFF_SECS}s allowed",
                total_backoff.as_secs_f64()
            )));
        }
        if self.stats_log_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "stats_log_interval_secs must be positive when set".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        secs_to_duration(self.retry_delay_secs, MAX_RETRY_DELAY_SECS)
    }

    pub fn overflow_wait(&self) -> Duration {
        Duration::from_millis(self.overflow_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn episode_timeout(&self) -> Duration {
        secs_to_duration(self.episode_timeout_secs, MAX_EPISODE_TIMEOUT_SECS)
    }

    pub fn stats_log_interval(&self) -> Option<Duration> {
        self.stats_log_interval_secs.map(Duration::from_secs)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay_secs: f64) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_secs = delay_secs;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_background_mode(mut self, mode: BackgroundMode) -> Self {
        self.background_mode = mode;
        self
    }

    pub fn with_overflow_wait_ms(mut self, ms: u64) -> Self {
        self.overflow_wait_ms = ms;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_episode_timeout_secs(mut self, secs: f64) -> Self {
        self.episode_timeout_secs = secs;
        self
    }

    pub fn with_failed_capacity(mut self, capacity: usize) -> Self {
        self.failed_capacity = capacity;
        self
    }

    pub fn with_stats_log_interval_secs(mut self, secs: Option<u64>) -> Self {
        self.stats_log_interval_secs = secs;
        self
    }
}

/// Clamped into `[0, max]`; NaN becomes zero. `validate()` rejects both
/// cases, this only keeps unvalidated configs from panicking.
fn secs_to_duration(secs: f64, max: f64) -> Duration {
    let secs = if secs.is_nan() { 0.0 } else { secs.clamp(0.0, max) };
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, suffix: &str) -> Option<(String, String)> {
        let key = format!("{ENV_PREFIX}{suffix}");
        let value = (self.lookup)(&key)?;
        let value = value.trim().to_string();
        if value.is_empty() {
            None
        } else {
            Some((key, value))
        }
    }

    fn parsed<T: FromStr>(&self, suffix: &str) -> Result<Option<T>, ConfigError> {
        let Some((key, value)) = self.raw(suffix) else {
            return Ok(None);
        };
        value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value })
    }

    fn flag(&self, suffix: &str) -> Result<Option<bool>, ConfigError> {
        let Some((key, value)) = self.raw(suffix) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue { key, value }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = QueueConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, QueueConfig::default());
    }

    #[test]
    fn reads_every_key() {
        let config = QueueConfig::from_lookup(lookup(&[
            ("BACKDROP_ENABLED", "off"),
            ("BACKDROP_MAX_WORKERS", "8"),
            ("BACKDROP_MAX_QUEUE_SIZE", "500"),
            ("BACKDROP_RETRY_ATTEMPTS", "4"),
            ("BACKDROP_RETRY_DELAY_SECS", "0.25"),
            ("BACKDROP_BACKOFF_MULTIPLIER", "2"),
            ("BACKDROP_BACKGROUND_MODE", "legacy"),
            ("BACKDROP_OVERFLOW_WAIT_MS", "50"),
            ("BACKDROP_POLL_INTERVAL_MS", "200"),
            ("BACKDROP_EPISODE_TIMEOUT_SECS", "5"),
            ("BACKDROP_FAILED_CAPACITY", "10"),
            ("BACKDROP_STATS_SAMPLES", "64"),
            ("BACKDROP_STATS_LOG_INTERVAL_SECS", "30"),
        ]))
        .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.max_queue_size, 500);
        assert_eq!(config.retry_attempts, 4);
        assert_eq!(config.retry_delay(), Duration::from_millis(250));
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.background_mode, BackgroundMode::Legacy);
        assert_eq!(config.overflow_wait(), Duration::from_millis(50));
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.episode_timeout(), Duration::from_secs(5));
        assert_eq!(config.failed_capacity, 10);
        assert_eq!(config.stats_max_samples, 64);
        assert_eq!(config.stats_log_interval(), Some(Duration::from_secs(30)));
    }

    #[rstest]
    #[case("1", true)]
    #[case("TRUE", true)]
    #[case("yes", true)]
    #[case("0", false)]
    #[case("False", false)]
    #[case("off", false)]
    fn boolean_spellings(#[case] raw: &str, #[case] expected: bool) {
        let config = QueueConfig::from_lookup(lookup(&[("BACKDROP_ENABLED", raw)])).unwrap();
        assert_eq!(config.enabled, expected);
    }

    #[test]
    fn blank_values_are_ignored() {
        let config =
            QueueConfig::from_lookup(lookup(&[("BACKDROP_MAX_WORKERS", "  ")])).unwrap();
        assert_eq!(config.max_workers, QueueConfig::default().max_workers);
    }

    #[rstest]
    #[case("BACKDROP_MAX_WORKERS", "many")]
    #[case("BACKDROP_ENABLED", "maybe")]
    #[case("BACKDROP_BACKGROUND_MODE", "carrier-pigeon")]
    #[case("BACKDROP_RETRY_DELAY_SECS", "soon")]
    fn unparsable_values_name_the_key(#[case] key: &str, #[case] value: &str) {
        let err = QueueConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            }
        );
    }

    #[rstest]
    #[case::no_workers(QueueConfig::default().with_max_workers(0))]
    #[case::no_capacity(QueueConfig::default().with_max_queue_size(0))]
    #[case::no_failed_capacity(QueueConfig::default().with_failed_capacity(0))]
    #[case::shrinking_backoff(QueueConfig::default().with_backoff_multiplier(0.5))]
    #[case::negative_delay(QueueConfig::default().with_retry(1, -1.0))]
    #[case::nan_timeout(QueueConfig::default().with_episode_timeout_secs(f64::NAN))]
    #[case::zero_log_interval(QueueConfig::default().with_stats_log_interval_secs(Some(0)))]
    #[case::huge_delay(QueueConfig::default().with_retry(1, 1e30))]
    #[case::delay_over_cap(QueueConfig::default().with_retry(1, MAX_RETRY_DELAY_SECS + 1.0))]
    #[case::huge_timeout(QueueConfig::default().with_episode_timeout_secs(1e30))]
    #[case::runaway_backoff(QueueConfig::default().with_retry(5, 1.0).with_backoff_multiplier(1e6))]
    #[case::too_many_retries(QueueConfig::default().with_retry(1_000, 1.0))]
    fn validation_rejects(#[case] config: QueueConfig) {
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn huge_delay_from_env_is_an_error_not_a_panic() {
        let err = QueueConfig::from_lookup(lookup(&[("BACKDROP_RETRY_DELAY_SECS", "1e30")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("retry_delay_secs")));
    }

    #[test]
    fn accessors_never_panic_on_unvalidated_values() {
        let config = QueueConfig::default()
            .with_retry(1, 1e30)
            .with_episode_timeout_secs(f64::NAN);
        assert_eq!(config.retry_delay(), Duration::from_secs(60));
        assert_eq!(config.episode_timeout(), Duration::ZERO);
    }

    #[test]
    fn accepted_configs_keep_backoff_bounded() {
        let config = QueueConfig::default()
            .with_retry(4, 2.0)
            .with_backoff_multiplier(2.0);
        config.validate().unwrap();
        // 2 + 4 + 8 + 16
        assert_eq!(RetryPolicy::from_config(&config).total_backoff(), Duration::from_secs(30));
    }

    #[test]
    fn background_mode_round_trips_through_display() {
        for mode in [BackgroundMode::Queue, BackgroundMode::Legacy] {
            assert_eq!(mode.to_string().parse::<BackgroundMode>(), Ok(mode));
        }
    }
}
