//! Operation identifiers.
//!
//! Ids are ULIDs: time-sortable, 128-bit, and generated without any
//! coordination, so producers on different tasks never need a shared counter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Identifier of one enqueued operation.
///
/// This is the only handle a producer gets back from `enqueue_*`. Holding one
/// says nothing about delivery: a skipped operation still has an id.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Ulid);

impl OperationId {
    const PREFIX: &'static str = "op-";

    /// Generate a fresh id from the current time and OS randomness.
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for OperationId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

impl FromStr for OperationId {
    type Err = ulid::DecodeError;

    /// Accepts both the displayed form (`op-01H...`) and a bare ULID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(Self::PREFIX).unwrap_or(s);
        Ulid::from_string(raw).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn display_has_prefix() {
        let id = OperationId::generate();
        assert!(id.to_string().starts_with("op-"));
    }

    #[test]
    fn generated_ids_are_distinct() {
        let ids: HashSet<OperationId> = (0..1_000).map(|_| OperationId::generate()).collect();
        assert_eq!(ids.len(), 1_000);
    }

    #[test]
    fn parses_displayed_and_bare_forms() {
        let id = OperationId::generate();
        assert_eq!(id.to_string().parse::<OperationId>().unwrap(), id);
        assert_eq!(id.as_ulid().to_string().parse::<OperationId>().unwrap(), id);
        assert!("op-not-a-ulid".parse::<OperationId>().is_err());
    }

    #[test]
    fn ids_are_sortable_by_creation_time() {
        let first = OperationId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = OperationId::generate();
        assert!(first < second);
    }

    #[test]
    fn serializes_as_bare_ulid() {
        let id = OperationId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));
        let back: OperationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
