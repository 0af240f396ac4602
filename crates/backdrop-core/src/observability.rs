//! Processing statistics and queue status views.
//!
//! [`StatsTracker`] is written to by workers and producers and read by
//! diagnostics. Call frequency is bounded by the worker count, so a single
//! mutex around a handful of counters is enough.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::BackgroundMode;

#[derive(Debug, Default)]
struct StatsState {
    total_enqueued: u64,
    total_dropped: u64,
    total_processed: u64,
    total_failed: u64,
    total_retries: u64,
    durations: VecDeque<f64>,
    current_queue_size: usize,
    peak_queue_size: usize,
}

/// Thread-safe accumulator of counts, latencies, and queue depth.
#[derive(Debug)]
pub struct StatsTracker {
    state: Mutex<StatsState>,
    max_samples: usize,
    started_at: Instant,
}

impl StatsTracker {
    /// `max_samples` bounds the rolling processing-time window.
    pub fn new(max_samples: usize) -> Self {
        Self {
            state: Mutex::new(StatsState::default()),
            max_samples: max_samples.max(1),
            started_at: Instant::now(),
        }
    }

    // A panic while holding the lock cannot leave the counters in a state
    // worth refusing to read.
    fn lock(&self) -> MutexGuard<'_, StatsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_processing(&self, duration_secs: f64, success: bool, retry_count: u32) {
        let mut state = self.lock();
        state.total_processed += 1;
        if !success {
            state.total_failed += 1;
        }
        state.total_retries += u64::from(retry_count);

        if state.durations.len() >= self.max_samples {
            state.durations.pop_front();
        }
        state.durations.push_back(duration_secs);
    }

    pub fn record_queue_size(&self, size: usize) {
        let mut state = self.lock();
        state.current_queue_size = size;
        state.peak_queue_size = state.peak_queue_size.max(size);
    }

    pub fn record_enqueued(&self) {
        self.lock().total_enqueued += 1;
    }

    /// An operation skipped because the queue stayed full.
    pub fn record_dropped(&self) {
        self.lock().total_dropped += 1;
    }

    pub fn total_processed(&self) -> u64 {
        self.lock().total_processed
    }

    pub fn total_failed(&self) -> u64 {
        self.lock().total_failed
    }

    /// Percentage of processed operations that succeeded; 100 before any.
    pub fn success_rate(&self) -> f64 {
        let state = self.lock();
        success_rate(state.total_processed, state.total_failed)
    }

    pub fn average_processing_time(&self) -> f64 {
        let state = self.lock();
        mean(&state.durations)
    }

    pub fn median_processing_time(&self) -> f64 {
        percentiles(&self.lock().durations).0
    }

    pub fn p95_processing_time(&self) -> f64 {
        percentiles(&self.lock().durations).1
    }

    /// Processed operations per second since the tracker was created.
    pub fn throughput(&self) -> f64 {
        let processed = self.lock().total_processed;
        throughput(processed, self.uptime())
    }

    pub fn current_queue_size(&self) -> usize {
        self.lock().current_queue_size
    }

    pub fn peak_queue_size(&self) -> usize {
        self.lock().peak_queue_size
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// One consistent snapshot of every derived metric.
    pub fn summary(&self) -> StatsSummary {
        let uptime = self.uptime();
        let state = self.lock();
        let (median, p95) = percentiles(&state.durations);

        StatsSummary {
            total_enqueued: state.total_enqueued,
            total_dropped: state.total_dropped,
            total_processed: state.total_processed,
            total_failed: state.total_failed,
            total_retries: state.total_retries,
            success_rate: success_rate(state.total_processed, state.total_failed),
            avg_processing_secs: mean(&state.durations),
            median_processing_secs: median,
            p95_processing_secs: p95,
            throughput_per_sec: throughput(state.total_processed, uptime),
            current_queue_size: state.current_queue_size,
            peak_queue_size: state.peak_queue_size,
            uptime_secs: uptime.as_secs_f64(),
        }
    }
}

fn success_rate(processed: u64, failed: u64) -> f64 {
    if processed == 0 {
        return 100.0;
    }
    (processed - failed) as f64 / processed as f64 * 100.0
}

fn mean(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// (median, p95) of the window; zeros when empty.
fn percentiles(samples: &VecDeque<f64>) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    };
    let p95_idx = ((n as f64 * 0.95) as usize).min(n - 1);
    (median, sorted[p95_idx])
}

fn throughput(processed: u64, uptime: Duration) -> f64 {
    let secs = uptime.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    processed as f64 / secs
}

/// Snapshot returned by [`StatsTracker::summary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total_enqueued: u64,
    pub total_dropped: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_retries: u64,
    pub success_rate: f64,
    pub avg_processing_secs: f64,
    pub median_processing_secs: f64,
    pub p95_processing_secs: f64,
    pub throughput_per_sec: f64,
    pub current_queue_size: usize,
    pub peak_queue_size: usize,
    pub uptime_secs: f64,
}

/// Lifecycle of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Running,
    /// `stop()` is draining workers; `start()` is refused until it finishes.
    Stopping,
}

/// Read-only projection of the queue manager, rebuilt on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub state: LifecycleState,
    pub enabled: bool,
    pub background_mode: BackgroundMode,
    pub active_workers: usize,
    pub max_workers: usize,
    pub queue_size: usize,
    pub max_queue_size: usize,
    pub is_full: bool,
    pub failed_operations: usize,
    pub stats: StatsSummary,
}
