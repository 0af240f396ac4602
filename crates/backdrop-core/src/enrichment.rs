//! Producer-facing entry point for episode enrichment.
//!
//! Two strategies sit behind [`EnrichmentSink`]:
//! - [`QueueManager`]: bounded queue, worker pool, retries, stats.
//! - [`DetachedEnrichment`]: one untracked task per call, no retry. This is
//!   the `legacy` background mode, kept so a deployment can switch back
//!   without code changes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, debug, info_span, warn};

use crate::config::{BackgroundMode, QueueConfig};
use crate::domain::{Metadata, Operation, OperationId};
use crate::episode::{EpisodeContext, EpisodeProcessor};
use crate::queue::QueueManager;

#[async_trait]
pub trait EnrichmentSink: Send + Sync {
    /// Hand off one conversation turn. Returns promptly; never fails.
    async fn submit_episode(
        &self,
        owner_key: &str,
        message: &str,
        response: &str,
        metadata: Metadata,
    ) -> OperationId;
}

#[async_trait]
impl EnrichmentSink for QueueManager {
    async fn submit_episode(
        &self,
        owner_key: &str,
        message: &str,
        response: &str,
        metadata: Metadata,
    ) -> OperationId {
        self.enqueue_episode(owner_key, message, response, metadata)
            .await
    }
}

/// Fire-and-forget enrichment: spawns a task per episode and forgets it.
pub struct DetachedEnrichment {
    processor: Arc<dyn EpisodeProcessor>,
}

impl DetachedEnrichment {
    pub fn new(processor: Arc<dyn EpisodeProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl EnrichmentSink for DetachedEnrichment {
    async fn submit_episode(
        &self,
        owner_key: &str,
        message: &str,
        response: &str,
        metadata: Metadata,
    ) -> OperationId {
        let op = Operation::new_episode(owner_key, message, response, metadata);
        let id = op.id();

        if tokio::runtime::Handle::try_current().is_err() {
            warn!(op_id = %id, "no tokio runtime; episode dropped");
            return id;
        }

        let processor = Arc::clone(&self.processor);
        let span = info_span!(
            "backdrop.operation",
            op_id = %id,
            kind = %op.kind(),
            owner_key = op.owner_key(),
        );
        tokio::spawn(
            async move {
                let Some(episode) = EpisodeContext::from_operation(&op) else {
                    return;
                };
                match processor.process(&episode).await {
                    Ok(()) => debug!("detached episode processed"),
                    Err(err) => warn!(error = %err, "detached episode failed"),
                }
            }
            .instrument(span),
        );
        id
    }
}

/// Pick the strategy `config.background_mode` asks for.
///
/// Legacy mode reuses `processor` so both paths format and store episodes
/// identically.
pub fn enrichment_sink(
    config: &QueueConfig,
    manager: Arc<QueueManager>,
    processor: Arc<dyn EpisodeProcessor>,
) -> Arc<dyn EnrichmentSink> {
    match config.background_mode {
        BackgroundMode::Queue => manager as Arc<dyn EnrichmentSink>,
        BackgroundMode::Legacy => Arc::new(DetachedEnrichment::new(processor)),
    }
}
