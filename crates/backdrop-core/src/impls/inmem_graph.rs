//! InMemoryGraphMemory - development stand-in for the graph-memory service.
//!
//! Keeps every accepted episode in memory, keyed by name so repeated
//! upserts overwrite instead of duplicating. Can be told to fail or to be
//! slow, which is what the queue tests need.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::ports::{EpisodeRequest, GraphMemoryClient, GraphMemoryError};

#[derive(Default)]
pub struct InMemoryGraphMemory {
    episodes: Mutex<HashMap<String, EpisodeRequest>>,
    order: Mutex<Vec<String>>,
    calls: AtomicUsize,
    failure: Option<String>,
    delay: Option<Duration>,
}

impl InMemoryGraphMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with [`GraphMemoryError::Unavailable`].
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Stored episodes in first-insert order.
    pub fn episodes(&self) -> Vec<EpisodeRequest> {
        let episodes = lock(&self.episodes);
        lock(&self.order)
            .iter()
            .filter_map(|name| episodes.get(name).cloned())
            .collect()
    }

    /// Number of `add_episode` calls, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl GraphMemoryClient for InMemoryGraphMemory {
    async fn add_episode(&self, request: EpisodeRequest) -> Result<String, GraphMemoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(GraphMemoryError::Unavailable(message.clone()));
        }

        let name = request.name.clone();
        let mut episodes = lock(&self.episodes);
        if episodes.insert(name.clone(), request).is_none() {
            lock(&self.order).push(name.clone());
        }
        Ok(format!("episode:{name}"))
    }
}
