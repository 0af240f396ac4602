//! Operation - one unit of background work.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::OperationId;
use crate::ports::OperationProcessor;

/// Open key/value map used for metadata and custom payload data.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Length of the payload preview kept for failed operations.
pub const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Episode,
    Custom,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Episode => f.write_str("episode"),
            OperationKind::Custom => f.write_str("custom"),
        }
    }
}

/// Kind-specific data of an operation.
#[derive(Clone)]
pub enum OperationPayload {
    /// A (user message, agent response) pair for the graph-memory service.
    Episode { message: String, response: String },

    /// Caller-supplied work with the processor bound at enqueue time.
    Custom {
        data: Metadata,
        processor: Arc<dyn OperationProcessor>,
    },
}

impl OperationPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::Episode { .. } => OperationKind::Episode,
            OperationPayload::Custom { .. } => OperationKind::Custom,
        }
    }

    /// Truncated human-readable view of the payload for diagnostics.
    pub fn preview(&self) -> String {
        let full = match self {
            OperationPayload::Episode { message, .. } => message.clone(),
            OperationPayload::Custom { data, .. } => serde_json::Value::Object(data.clone()).to_string(),
        };
        truncate_chars(&full, PREVIEW_CHARS)
    }
}

impl fmt::Debug for OperationPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationPayload::Episode { message, response } => f
                .debug_struct("Episode")
                .field("message_len", &message.len())
                .field("response_len", &response.len())
                .finish(),
            OperationPayload::Custom { data, .. } => f
                .debug_struct("Custom")
                .field("keys", &data.keys().collect::<Vec<_>>())
                .finish_non_exhaustive(),
        }
    }
}

/// An operation travelling through the queue.
///
/// Everything but `retry_count` is fixed at construction. Only the worker
/// that currently owns the operation bumps `retry_count`.
#[derive(Debug, Clone)]
pub struct Operation {
    id: OperationId,
    owner_key: String,
    payload: OperationPayload,
    metadata: Metadata,
    created_at: DateTime<Utc>,
    retry_count: u32,
}

impl Operation {
    pub fn new_episode(
        owner_key: impl Into<String>,
        message: impl Into<String>,
        response: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self::new(
            owner_key.into(),
            OperationPayload::Episode {
                message: message.into(),
                response: response.into(),
            },
            metadata,
        )
    }

    pub fn new_custom(
        owner_key: impl Into<String>,
        data: Metadata,
        processor: Arc<dyn OperationProcessor>,
        metadata: Metadata,
    ) -> Self {
        Self::new(
            owner_key.into(),
            OperationPayload::Custom { data, processor },
            metadata,
        )
    }

    fn new(owner_key: String, payload: OperationPayload, metadata: Metadata) -> Self {
        Self {
            id: OperationId::generate(),
            owner_key,
            payload,
            metadata,
            created_at: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    pub fn payload(&self) -> &OperationPayload {
        &self.payload
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Record one more failed attempt.
    pub(crate) fn record_failed_attempt(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }
}

/// Cut `s` to at most `max` chars, marking the cut with `...`.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}...", &s[..byte_idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::processor_fn;
    use rstest::rstest;

    #[test]
    fn episode_operation_starts_fresh() {
        let before = Utc::now();
        let op = Operation::new_episode("user-1", "hi", "hello!", Metadata::new());
        assert_eq!(op.kind(), OperationKind::Episode);
        assert_eq!(op.owner_key(), "user-1");
        assert_eq!(op.retry_count(), 0);
        assert!(op.created_at() >= before);
    }

    #[test]
    fn custom_operation_keeps_data() {
        let mut data = Metadata::new();
        data.insert("row".into(), serde_json::json!(3));
        let op = Operation::new_custom(
            "user-2",
            data,
            processor_fn(|_, _, _| async { Ok(()) }),
            Metadata::new(),
        );
        assert_eq!(op.kind(), OperationKind::Custom);
        assert_eq!(op.payload().preview(), r#"{"row":3}"#);
    }

    #[test]
    fn each_operation_gets_its_own_id() {
        let a = Operation::new_episode("u", "m", "r", Metadata::new());
        let b = Operation::new_episode("u", "m", "r", Metadata::new());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn failed_attempts_only_count_up() {
        let mut op = Operation::new_episode("u", "m", "r", Metadata::new());
        op.record_failed_attempt();
        op.record_failed_attempt();
        assert_eq!(op.retry_count(), 2);
    }

    #[rstest]
    #[case::short("hello", 10, "hello")]
    #[case::exact("hello", 5, "hello")]
    #[case::cut("hello world", 5, "hello...")]
    #[case::multibyte("héllo wörld", 7, "héllo w...")]
    fn truncation_respects_char_boundaries(
        #[case] input: &str,
        #[case] max: usize,
        #[case] expected: &str,
    ) {
        assert_eq!(truncate_chars(input, max), expected);
    }

    #[test]
    fn episode_preview_is_truncated_message() {
        let message = "x".repeat(250);
        let op = Operation::new_episode("u", message, "r", Metadata::new());
        let preview = op.payload().preview();
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }
}
