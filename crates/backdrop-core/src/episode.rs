//! Built-in episode processing.
//!
//! Episodes are best-effort enrichment. A slow, broken, or missing
//! graph-memory service is logged and then treated as done, so a dead
//! dependency never turns into a retry storm.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::{Metadata, Operation, OperationError, OperationId, OperationPayload};
use crate::ports::{EpisodeRequest, EpisodeType, GraphMemoryClient};

const DEFAULT_AGENT_NAME: &str = "agent";

/// Borrowed view of an episode operation handed to an [`EpisodeProcessor`].
#[derive(Debug, Clone, Copy)]
pub struct EpisodeContext<'a> {
    pub operation_id: OperationId,
    pub owner_key: &'a str,
    pub message: &'a str,
    pub response: &'a str,
    pub metadata: &'a Metadata,
    pub created_at: DateTime<Utc>,
}

impl<'a> EpisodeContext<'a> {
    /// `None` for anything that is not an episode.
    pub fn from_operation(op: &'a Operation) -> Option<Self> {
        match op.payload() {
            OperationPayload::Episode { message, response } => Some(Self {
                operation_id: op.id(),
                owner_key: op.owner_key(),
                message,
                response,
                metadata: op.metadata(),
                created_at: op.created_at(),
            }),
            OperationPayload::Custom { .. } => None,
        }
    }

    fn agent_name(&self) -> &'a str {
        self.metadata
            .get("agent_name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_AGENT_NAME)
    }

    fn is_background_retry(&self) -> bool {
        self.metadata
            .get("background_retry")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Single text body for the graph-memory service.
    pub fn body(&self) -> String {
        format!("User: {}\nAssistant: {}", self.message, self.response)
    }

    pub fn episode_name(&self) -> String {
        format!(
            "{} conversation {} {}",
            self.agent_name(),
            self.owner_key,
            self.created_at.to_rfc3339()
        )
    }

    /// Explicit `group_id` metadata wins; otherwise a sanitized owner key.
    pub fn group_id(&self) -> String {
        if let Some(group) = self.metadata.get("group_id").and_then(|v| v.as_str()) {
            if !group.is_empty() {
                return group.to_string();
            }
        }
        sanitize_group_id(self.owner_key)
    }

    pub fn source_description(&self) -> String {
        let mut description = format!("conversation with {}", self.agent_name());
        if self.is_background_retry() {
            description.push_str(" (background retry)");
        }
        description
    }

    pub fn to_request(&self) -> EpisodeRequest {
        EpisodeRequest {
            name: self.episode_name(),
            body: self.body(),
            source_description: self.source_description(),
            reference_time: self.created_at,
            episode_type: EpisodeType::Text,
            group_id: self.group_id(),
        }
    }
}

/// Graph group ids only allow `[A-Za-z0-9_-]`.
fn sanitize_group_id(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "default".to_string()
    } else {
        sanitized
    }
}

/// Processes episode operations.
#[async_trait]
pub trait EpisodeProcessor: Send + Sync {
    async fn process(&self, episode: &EpisodeContext<'_>) -> Result<(), OperationError>;
}

/// Default processor: one time-boxed upsert against the graph-memory service.
pub struct GraphEpisodeProcessor {
    client: Option<Arc<dyn GraphMemoryClient>>,
    timeout: Duration,
}

impl GraphEpisodeProcessor {
    /// `client == None` models a service that is not configured; every
    /// episode is then skipped with a warning.
    pub fn new(client: Option<Arc<dyn GraphMemoryClient>>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl EpisodeProcessor for GraphEpisodeProcessor {
    async fn process(&self, episode: &EpisodeContext<'_>) -> Result<(), OperationError> {
        let Some(client) = &self.client else {
            warn!(
                op_id = %episode.operation_id,
                "graph memory client not configured; skipping episode"
            );
            return Ok(());
        };

        let request = episode.to_request();
        let group_id = request.group_id.clone();

        // The call runs on its own task so a panicking client degrades like
        // any other client failure.
        let client = Arc::clone(client);
        let mut call = tokio::spawn(async move { client.add_episode(request).await });

        match tokio::time::timeout(self.timeout, &mut call).await {
            Ok(Ok(Ok(episode_id))) => {
                debug!(
                    op_id = %episode.operation_id,
                    %episode_id,
                    %group_id,
                    "episode stored"
                );
            }
            Ok(Ok(Err(err))) => {
                warn!(
                    op_id = %episode.operation_id,
                    %group_id,
                    error = %err,
                    "graph memory rejected episode; continuing without enrichment"
                );
            }
            Ok(Err(join_err)) => {
                warn!(
                    op_id = %episode.operation_id,
                    %group_id,
                    error = %join_err,
                    "graph memory client crashed; continuing without enrichment"
                );
            }
            Err(_) => {
                call.abort();
                warn!(
                    op_id = %episode.operation_id,
                    %group_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "graph memory call timed out; continuing without enrichment"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryGraphMemory;
    use rstest::rstest;

    fn metadata(pairs: &[(&str, serde_json::Value)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn request_is_built_from_operation() {
        let op = Operation::new_episode(
            "user@example.com",
            "where is my order?",
            "it ships tomorrow",
            metadata(&[("agent_name", serde_json::json!("support"))]),
        );
        let ctx = EpisodeContext::from_operation(&op).unwrap();
        let request = ctx.to_request();

        assert_eq!(request.body, "User: where is my order?\nAssistant: it ships tomorrow");
        assert_eq!(request.group_id, "user_example_com");
        assert_eq!(request.source_description, "conversation with support");
        assert_eq!(request.reference_time, op.created_at());
        assert_eq!(request.episode_type, EpisodeType::Text);
        assert!(request.name.starts_with("support conversation user@example.com "));
    }

    #[test]
    fn explicit_group_and_background_flag() {
        let op = Operation::new_episode(
            "u1",
            "m",
            "r",
            metadata(&[
                ("group_id", serde_json::json!("tenant-9")),
                ("background_retry", serde_json::json!(true)),
            ]),
        );
        let request = EpisodeContext::from_operation(&op).unwrap().to_request();
        assert_eq!(request.group_id, "tenant-9");
        assert_eq!(request.source_description, "conversation with agent (background retry)");
    }

    #[test]
    fn custom_operations_have_no_episode_context() {
        let op = Operation::new_custom(
            "u1",
            Metadata::new(),
            crate::ports::processor_fn(|_, _, _| async { Ok(()) }),
            Metadata::new(),
        );
        assert!(EpisodeContext::from_operation(&op).is_none());
    }

    #[rstest]
    #[case("abc-DEF_123", "abc-DEF_123")]
    #[case("a b/c", "a_b_c")]
    #[case("ünï", "_n_")]
    #[case("", "default")]
    fn group_ids_are_sanitized(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize_group_id(raw), expected);
    }

    #[tokio::test]
    async fn stores_episode_through_client() {
        let graph = Arc::new(InMemoryGraphMemory::new());
        let processor =
            GraphEpisodeProcessor::new(Some(graph.clone()), Duration::from_secs(1));
        let op = Operation::new_episode("u1", "hi", "hello", Metadata::new());

        processor
            .process(&EpisodeContext::from_operation(&op).unwrap())
            .await
            .unwrap();

        let stored = graph.episodes();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].group_id, "u1");
    }

    #[tokio::test]
    async fn missing_client_is_a_soft_success() {
        let processor = GraphEpisodeProcessor::new(None, Duration::from_secs(1));
        let op = Operation::new_episode("u1", "hi", "hello", Metadata::new());
        assert!(
            processor
                .process(&EpisodeContext::from_operation(&op).unwrap())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn client_errors_are_a_soft_success() {
        let graph = Arc::new(InMemoryGraphMemory::failing("service down"));
        let processor = GraphEpisodeProcessor::new(Some(graph.clone()), Duration::from_secs(1));
        let op = Operation::new_episode("u1", "hi", "hello", Metadata::new());

        assert!(
            processor
                .process(&EpisodeContext::from_operation(&op).unwrap())
                .await
                .is_ok()
        );
        assert_eq!(graph.calls(), 1);
        assert!(graph.episodes().is_empty());
    }

    struct PanickingGraph;

    #[async_trait]
    impl GraphMemoryClient for PanickingGraph {
        async fn add_episode(
            &self,
            _request: EpisodeRequest,
        ) -> Result<String, crate::ports::GraphMemoryError> {
            panic!("client bug")
        }
    }

    #[tokio::test]
    async fn panicking_client_is_a_soft_success() {
        let processor =
            GraphEpisodeProcessor::new(Some(Arc::new(PanickingGraph)), Duration::from_secs(1));
        let op = Operation::new_episode("u1", "hi", "hello", Metadata::new());

        assert!(
            processor
                .process(&EpisodeContext::from_operation(&op).unwrap())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn slow_client_is_cut_off_by_the_timeout() {
        let graph = Arc::new(InMemoryGraphMemory::new().with_delay(Duration::from_secs(5)));
        let processor =
            GraphEpisodeProcessor::new(Some(graph.clone()), Duration::from_millis(30));
        let op = Operation::new_episode("u1", "hi", "hello", Metadata::new());

        let started = std::time::Instant::now();
        let result = processor
            .process(&EpisodeContext::from_operation(&op).unwrap())
            .await;

        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(graph.episodes().is_empty());
    }
}
