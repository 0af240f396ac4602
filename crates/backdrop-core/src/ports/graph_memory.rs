//! GraphMemoryClient port - the external episode store.
//!
//! The queue only needs one call from the graph-memory service: an
//! idempotent-by-name "add episode" upsert. Everything else about the
//! service is opaque here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body format tag understood by the graph-memory service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeType {
    Text,
}

/// One "add episode" request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRequest {
    /// Episode name; the upsert is idempotent on this.
    pub name: String,
    pub body: String,
    pub source_description: String,
    pub reference_time: DateTime<Utc>,
    pub episode_type: EpisodeType,
    /// Grouping key (partition) inside the graph.
    pub group_id: String,
}

#[derive(Debug, Clone, Error)]
pub enum GraphMemoryError {
    #[error("graph memory service unavailable: {0}")]
    Unavailable(String),

    #[error("episode rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Client for the graph-memory service.
///
/// Calls can take many seconds; callers are expected to put their own
/// timeout around [`GraphMemoryClient::add_episode`].
#[async_trait]
pub trait GraphMemoryClient: Send + Sync {
    /// Upsert an episode and return the service's episode id.
    async fn add_episode(&self, request: EpisodeRequest) -> Result<String, GraphMemoryError>;
}
