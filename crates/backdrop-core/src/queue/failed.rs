//! Failed-operation ring: the most recent operations that exhausted retries.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Operation, OperationId, OperationKind};

/// An operation that ran out of attempts, plus why.
#[derive(Debug, Clone)]
pub(crate) struct FailedRecord {
    pub(crate) operation: Operation,
    pub(crate) last_error: String,
    pub(crate) failed_at: DateTime<Utc>,
}

/// Diagnostic view of a failed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedOperationSummary {
    pub id: OperationId,
    pub kind: OperationKind,
    pub owner_key: String,
    pub created_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
    /// Payload cut to a short preview.
    pub preview: String,
    pub last_error: String,
}

impl From<&FailedRecord> for FailedOperationSummary {
    fn from(record: &FailedRecord) -> Self {
        let op = &record.operation;
        Self {
            id: op.id(),
            kind: op.kind(),
            owner_key: op.owner_key().to_string(),
            created_at: op.created_at(),
            failed_at: record.failed_at,
            retry_count: op.retry_count(),
            preview: op.payload().preview(),
            last_error: record.last_error.clone(),
        }
    }
}

/// Fixed-capacity ring; pushing past capacity silently evicts the oldest.
pub(crate) struct FailedOperations {
    records: Mutex<VecDeque<FailedRecord>>,
    capacity: usize,
}

impl FailedOperations {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FailedRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, operation: Operation, last_error: String) {
        let record = FailedRecord {
            operation,
            last_error,
            failed_at: Utc::now(),
        };
        let mut records = self.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Oldest first.
    pub(crate) fn summaries(&self) -> Vec<FailedOperationSummary> {
        self.lock().iter().map(FailedOperationSummary::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Metadata;

    fn op(owner: &str) -> Operation {
        Operation::new_episode(owner, format!("message from {owner}"), "r", Metadata::new())
    }

    #[test]
    fn summary_carries_operation_details() {
        let failed = FailedOperations::new(5);
        let mut operation = op("user-1");
        operation.record_failed_attempt();
        let id = operation.id();
        failed.push(operation, "boom".into());

        let summaries = failed.summaries();
        assert_eq!(summaries.len(), 1);
        let s = &summaries[0];
        assert_eq!(s.id, id);
        assert_eq!(s.kind, OperationKind::Episode);
        assert_eq!(s.owner_key, "user-1");
        assert_eq!(s.retry_count, 1);
        assert_eq!(s.preview, "message from user-1");
        assert_eq!(s.last_error, "boom");
        assert!(s.failed_at >= s.created_at);
    }

    #[test]
    fn oldest_entries_are_evicted() {
        let failed = FailedOperations::new(2);
        for owner in ["a", "b", "c"] {
            failed.push(op(owner), "err".into());
        }
        let owners: Vec<String> = failed.summaries().into_iter().map(|s| s.owner_key).collect();
        assert_eq!(owners, vec!["b", "c"]);
        assert_eq!(failed.len(), 2);
    }
}
