use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::domain::{Operation, OperationError, OperationPayload};
use crate::episode::EpisodeContext;
use crate::queue::QueueCore;

/// Worker group handle.
/// - dropping `shutdown_tx` also stops every worker at its next wait
/// - `shutdown()` signals, waits up to a grace period, then aborts stragglers
pub(crate) struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    reporter: Option<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `core.config.max_workers` workers, plus the stats reporter if
    /// one is configured.
    pub(crate) fn spawn(core: Arc<QueueCore>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let n = core.config.max_workers;

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            // Counted before the task is first polled so status() is exact
            // as soon as start() returns.
            let active = ActiveWorker::enter(&core.active_workers);
            let core = Arc::clone(&core);
            let rx = shutdown_rx.clone();

            let join = tokio::spawn(
                async move {
                    let _active = active;
                    worker_loop(core, rx).await;
                }
                .instrument(info_span!("backdrop.worker", worker_id)),
            );
            joins.push(join);
        }

        let reporter = core.config.stats_log_interval().map(|interval| {
            tokio::spawn(stats_reporter(Arc::clone(&core), interval, shutdown_rx.clone()))
        });

        Self {
            shutdown_tx,
            joins,
            reporter,
        }
    }

    /// Request shutdown for all workers.
    /// In-flight attempts are not interrupted; workers just stop taking work.
    pub(crate) fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shut down and wait for all workers, aborting any still running when
    /// `timeout` elapses. Returns how many had to be aborted.
    pub(crate) async fn shutdown(self, timeout: Duration) -> usize {
        self.request_shutdown();
        let deadline = tokio::time::Instant::now() + timeout;

        let mut aborted = 0;
        for mut join in self.joins {
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "worker task ended abnormally"),
                Err(_) => {
                    join.abort();
                    // wait for the abort to land so the worker count is settled
                    let _ = join.await;
                    aborted += 1;
                }
            }
        }

        if let Some(reporter) = self.reporter {
            reporter.abort();
            let _ = reporter.await;
        }
        aborted
    }
}

/// Keeps `active_workers` in step with live worker tasks, including aborted ones.
struct ActiveWorker {
    counter: Arc<AtomicUsize>,
}

impl ActiveWorker {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn worker_loop(core: Arc<QueueCore>, mut shutdown_rx: watch::Receiver<bool>) {
    debug!("worker started");
    loop {
        // exit once shutdown has been requested
        if *shutdown_rx.borrow() {
            break;
        }

        // pop may wait, so race it against shutdown
        let op = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // the group handle was dropped without an explicit stop
                    break;
                }
                continue;
            }
            op = core.queue.pop_timeout(core.config.poll_interval()) => op,
        };

        let Some(op) = op else {
            continue;
        };

        core.stats.record_queue_size(core.queue.len());
        process_with_retry(&core, op).await;
    }
    debug!("worker stopped");
}

/// Run one operation to completion: up to `retry_attempts + 1` attempts,
/// then either count it as processed or park it in the failed buffer.
pub(crate) async fn process_with_retry(core: &Arc<QueueCore>, mut op: Operation) {
    let span = info_span!(
        "backdrop.operation",
        op_id = %op.id(),
        kind = %op.kind(),
        owner_key = %op.owner_key(),
    );

    async move {
        let started = Instant::now();
        let max_attempts = core.retry.max_attempts();
        let mut attempt = 0;

        let outcome = loop {
            attempt += 1;
            let err = match run_attempt(core, &op).await {
                Ok(()) => break Ok(()),
                Err(err) => err,
            };
            op.record_failed_attempt();

            if !err.is_retryable() {
                warn!(attempt, error = %err, "permanent failure; not retrying");
                break Err(err);
            }
            if attempt >= max_attempts {
                break Err(err);
            }

            let delay = core.retry.next_delay(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed; retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        match outcome {
            Ok(()) => {
                core.stats.record_processing(elapsed, true, op.retry_count());
                debug!(
                    retry_count = op.retry_count(),
                    elapsed_ms = (elapsed * 1000.0) as u64,
                    "operation completed"
                );
            }
            Err(err) => {
                core.stats.record_processing(elapsed, false, op.retry_count());
                error!(
                    retry_count = op.retry_count(),
                    error = %err,
                    "operation failed after all attempts"
                );
                core.failed.push(op, err.message().to_string());
            }
        }
    }
    .instrument(span)
    .await
}

/// One attempt on its own task, so a panicking processor costs an attempt
/// instead of a worker.
async fn run_attempt(core: &Arc<QueueCore>, op: &Operation) -> Result<(), OperationError> {
    let core = Arc::clone(core);
    let op = op.clone();
    let mut attempt = AbortOnDrop(tokio::spawn(
        async move { dispatch(&core, &op).await }.in_current_span(),
    ));

    match (&mut attempt.0).await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            Err(OperationError::transient("processor panicked"))
        }
        Err(join_err) => Err(OperationError::transient(join_err.to_string())),
    }
}

async fn dispatch(core: &QueueCore, op: &Operation) -> Result<(), OperationError> {
    match op.payload() {
        OperationPayload::Episode { message, response } => {
            let episode = EpisodeContext {
                operation_id: op.id(),
                owner_key: op.owner_key(),
                message,
                response,
                metadata: op.metadata(),
                created_at: op.created_at(),
            };
            core.episodes.process(&episode).await
        }
        OperationPayload::Custom { data, processor } => {
            processor.process(op.owner_key(), data, op.metadata()).await
        }
    }
}

/// Aborts the attempt if the worker itself is cancelled mid-await.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn stats_reporter(
    core: Arc<QueueCore>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let s = core.stats.summary();
                info!(
                    processed = s.total_processed,
                    failed = s.total_failed,
                    dropped = s.total_dropped,
                    success_rate = s.success_rate,
                    avg_secs = s.avg_processing_secs,
                    p95_secs = s.p95_processing_secs,
                    queue_size = core.queue.len(),
                    peak_queue_size = s.peak_queue_size,
                    active_workers = core.active_workers.load(Ordering::SeqCst),
                    "queue stats"
                );
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
