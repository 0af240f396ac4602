//! QueueManager - bounded queue, worker pool and diagnostics in one handle.
//!
//! Producers call `enqueue_*` and move on. Workers drain the queue in the
//! background, retry failures according to [`RetryPolicy`], and park what
//! still fails in a bounded failed buffer. Nothing here ever surfaces an
//! error to the producer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, QueueConfig};
use crate::domain::{Metadata, Operation, OperationId};
use crate::episode::{EpisodeProcessor, GraphEpisodeProcessor};
use crate::observability::{LifecycleState, QueueStatus, StatsTracker};
use crate::ports::{GraphMemoryClient, OperationProcessor};
use crate::worker::WorkerGroup;

use super::buffer::BoundedQueue;
use super::failed::{FailedOperationSummary, FailedOperations};
use super::retry::RetryPolicy;

/// State shared between the manager handle and its workers.
pub(crate) struct QueueCore {
    pub(crate) config: QueueConfig,
    pub(crate) queue: BoundedQueue,
    pub(crate) stats: Arc<StatsTracker>,
    pub(crate) failed: FailedOperations,
    pub(crate) retry: RetryPolicy,
    pub(crate) episodes: Arc<dyn EpisodeProcessor>,
    pub(crate) active_workers: Arc<AtomicUsize>,
}

/// Builds a [`QueueManager`].
///
/// # Example
/// ```ignore
/// let manager = QueueManager::builder(QueueConfig::from_env()?)
///     .with_graph_client(client)
///     .build()?;
/// manager.start();
/// ```
pub struct QueueManagerBuilder {
    config: QueueConfig,
    graph_client: Option<Arc<dyn GraphMemoryClient>>,
    episode_processor: Option<Arc<dyn EpisodeProcessor>>,
}

impl QueueManagerBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            graph_client: None,
            episode_processor: None,
        }
    }

    /// Graph-memory service used by the built-in episode processor.
    pub fn with_graph_client(mut self, client: Arc<dyn GraphMemoryClient>) -> Self {
        self.graph_client = Some(client);
        self
    }

    /// Replace the built-in episode processor entirely.
    pub fn with_episode_processor(mut self, processor: Arc<dyn EpisodeProcessor>) -> Self {
        self.episode_processor = Some(processor);
        self
    }

    /// Validate the configuration and assemble the manager (stopped).
    pub fn build(self) -> Result<QueueManager, ConfigError> {
        self.config.validate()?;

        let episodes = match self.episode_processor {
            Some(processor) => processor,
            None => Arc::new(GraphEpisodeProcessor::new(
                self.graph_client,
                self.config.episode_timeout(),
            )),
        };

        let core = QueueCore {
            queue: BoundedQueue::new(self.config.max_queue_size),
            stats: Arc::new(StatsTracker::new(self.config.stats_max_samples)),
            failed: FailedOperations::new(self.config.failed_capacity),
            retry: RetryPolicy::from_config(&self.config),
            episodes,
            active_workers: Arc::new(AtomicUsize::new(0)),
            config: self.config,
        };

        Ok(QueueManager {
            core: Arc::new(core),
            pool: Mutex::new(Pool::Stopped),
        })
    }
}

/// Worker pool slot guarded by the manager.
enum Pool {
    Stopped,
    Running(WorkerGroup),
    Stopping,
}

/// Background operation queue with a fixed worker pool.
///
/// Build one per process and share it by `Arc`.
pub struct QueueManager {
    core: Arc<QueueCore>,
    pool: Mutex<Pool>,
}

impl QueueManager {
    pub fn builder(config: QueueConfig) -> QueueManagerBuilder {
        QueueManagerBuilder::new(config)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.core.config
    }

    pub fn stats(&self) -> Arc<StatsTracker> {
        Arc::clone(&self.core.stats)
    }

    /// The processor episodes are handed to; shared with the detached sink.
    pub fn episode_processor(&self) -> Arc<dyn EpisodeProcessor> {
        Arc::clone(&self.core.episodes)
    }

    fn pool(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LifecycleState {
        match *self.pool() {
            Pool::Stopped => LifecycleState::Stopped,
            Pool::Running(_) => LifecycleState::Running,
            Pool::Stopping => LifecycleState::Stopping,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Spawn the worker pool. Idempotent.
    ///
    /// Does nothing when the queue is disabled, while a `stop()` is still
    /// draining, or when called outside a Tokio runtime (logged at `error`).
    pub fn start(&self) {
        if !self.core.config.enabled {
            info!("background queue disabled; not starting workers");
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            error!("start() called outside a tokio runtime; workers not started");
            return;
        }

        let mut pool = self.pool();
        match *pool {
            Pool::Running(_) => {
                debug!("background queue already running");
                return;
            }
            Pool::Stopping => {
                warn!("background queue is stopping; start() ignored");
                return;
            }
            Pool::Stopped => {}
        }
        *pool = Pool::Running(WorkerGroup::spawn(Arc::clone(&self.core)));
        info!(
            max_workers = self.core.config.max_workers,
            max_queue_size = self.core.config.max_queue_size,
            retry_attempts = self.core.config.retry_attempts,
            "background queue started"
        );
    }

    /// Stop the worker pool. Idempotent.
    ///
    /// Workers finish their current operation; any still busy after
    /// `timeout` are aborted and their operation is lost. Queued operations
    /// stay queued for the next `start()`.
    pub async fn stop(&self, timeout: Duration) {
        let group = {
            let mut pool = self.pool();
            match std::mem::replace(&mut *pool, Pool::Stopping) {
                Pool::Running(group) => group,
                other => {
                    // already stopped, or another stop() is draining
                    *pool = other;
                    return;
                }
            }
        };

        // Back to Stopped even if this future is dropped mid-drain.
        let _stopped = StoppedOnDrop(&self.pool);
        let aborted = group.shutdown(timeout).await;
        if aborted > 0 {
            warn!(
                aborted,
                timeout_ms = timeout.as_millis() as u64,
                "workers did not stop in time; cancelled"
            );
        }
        info!(
            pending = self.core.queue.len(),
            "background queue stopped"
        );
    }

    /// Queue a conversation episode for graph-memory enrichment.
    pub async fn enqueue_episode(
        &self,
        owner_key: impl Into<String>,
        message: impl Into<String>,
        response: impl Into<String>,
        metadata: Metadata,
    ) -> OperationId {
        self.submit(Operation::new_episode(owner_key, message, response, metadata))
            .await
    }

    /// Queue arbitrary work for `processor`.
    pub async fn enqueue_custom(
        &self,
        owner_key: impl Into<String>,
        data: Metadata,
        processor: Arc<dyn OperationProcessor>,
        metadata: Metadata,
    ) -> OperationId {
        self.submit(Operation::new_custom(owner_key, data, processor, metadata))
            .await
    }

    /// Insert with the overflow policy: try once, wait up to
    /// `overflow_wait` for space, otherwise skip. The id is returned either way.
    async fn submit(&self, op: Operation) -> OperationId {
        let id = op.id();
        let core = &self.core;

        if !core.config.enabled {
            debug!(op_id = %id, "background queue disabled; operation not queued");
            return id;
        }

        let inserted = match core.queue.try_push(op) {
            Ok(depth) => Ok(depth),
            Err(op) => core.queue.push_timeout(op, core.config.overflow_wait()).await,
        };

        match inserted {
            Ok(depth) => {
                core.stats.record_enqueued();
                debug!(op_id = %id, depth, "operation queued");
            }
            Err(op) => {
                core.stats.record_dropped();
                warn!(
                    op_id = %id,
                    kind = %op.kind(),
                    owner_key = op.owner_key(),
                    max_queue_size = core.config.max_queue_size,
                    "queue full; operation skipped"
                );
            }
        }
        id
    }

    /// Synchronous snapshot; never mutates anything.
    pub fn status(&self) -> QueueStatus {
        let state = self.state();
        let core = &self.core;

        QueueStatus {
            state,
            enabled: core.config.enabled,
            background_mode: core.config.background_mode,
            active_workers: core.active_workers.load(Ordering::SeqCst),
            max_workers: core.config.max_workers,
            queue_size: core.queue.len(),
            max_queue_size: core.queue.capacity(),
            is_full: core.queue.is_full(),
            failed_operations: core.failed.len(),
            stats: core.stats.summary(),
        }
    }

    /// Operations that exhausted their attempts, oldest first.
    pub fn failed_operations(&self) -> Vec<FailedOperationSummary> {
        self.core.failed.summaries()
    }
}

struct StoppedOnDrop<'a>(&'a Mutex<Pool>);

impl Drop for StoppedOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Pool::Stopped;
    }
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        // Workers exit at their next wait once the sender is gone; this just
        // makes the intent explicit.
        if let Pool::Running(group) = std::mem::replace(&mut *self.pool(), Pool::Stopped) {
            group.request_shutdown();
        }
    }
}
