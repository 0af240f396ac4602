//! Bounded FIFO shared by producers and workers.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::Operation;

/// Bounded in-memory queue.
///
/// Design:
/// - Items live behind a std `Mutex` that is never held across an `.await`,
///   so `len()` stays synchronous for status snapshots.
/// - `available` wakes workers after a push, `space` wakes producers after a pop.
pub(crate) struct BoundedQueue {
    items: Mutex<VecDeque<Operation>>,
    capacity: usize,
    available: Notify,
    space: Notify,
}

impl BoundedQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            available: Notify::new(),
            space: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Operation>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Insert without waiting. Gives the operation back when full.
    ///
    /// Returns the depth after the insert.
    pub(crate) fn try_push(&self, op: Operation) -> Result<usize, Operation> {
        let depth = {
            let mut items = self.lock();
            if items.len() >= self.capacity {
                return Err(op);
            }
            items.push_back(op);
            items.len()
        };
        self.available.notify_one();
        Ok(depth)
    }

    /// Insert, waiting at most `wait` for space to free up.
    pub(crate) async fn push_timeout(&self, op: Operation, wait: Duration) -> Result<usize, Operation> {
        let deadline = Instant::now() + wait;
        let mut op = op;
        loop {
            // Register interest before checking, so a pop between the check
            // and the await is not missed.
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(op) {
                Ok(depth) => return Ok(depth),
                Err(returned) => op = returned,
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_push(op);
            }
        }
    }

    pub(crate) fn try_pop(&self) -> Option<Operation> {
        let op = self.lock().pop_front();
        if op.is_some() {
            self.space.notify_one();
        }
        op
    }

    /// Take the oldest operation, waiting at most `wait` for one to arrive.
    pub(crate) async fn pop_timeout(&self, wait: Duration) -> Option<Operation> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(op) = self.try_pop() {
                return Some(op);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Metadata;
    use std::sync::Arc;

    fn op(owner: &str) -> Operation {
        Operation::new_episode(owner, "m", "r", Metadata::new())
    }

    #[test]
    fn fifo_order() {
        let q = BoundedQueue::new(3);
        q.try_push(op("a")).unwrap();
        q.try_push(op("b")).unwrap();
        assert_eq!(q.try_pop().unwrap().owner_key(), "a");
        assert_eq!(q.try_pop().unwrap().owner_key(), "b");
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn rejects_when_full_and_returns_the_operation() {
        let q = BoundedQueue::new(1);
        assert_eq!(q.try_push(op("a")).unwrap(), 1);
        assert!(q.is_full());
        let rejected = q.try_push(op("b")).unwrap_err();
        assert_eq!(rejected.owner_key(), "b");
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn push_timeout_gives_up_after_the_window() {
        let q = BoundedQueue::new(1);
        q.try_push(op("a")).unwrap();

        let started = std::time::Instant::now();
        let result = q.push_timeout(op("b"), Duration::from_millis(50)).await;
        let elapsed = started.elapsed();

        assert!(result.is_err());
        assert!(elapsed >= Duration::from_millis(45));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn push_timeout_succeeds_when_space_frees_up() {
        let q = Arc::new(BoundedQueue::new(1));
        q.try_push(op("a")).unwrap();

        let consumer = Arc::clone(&q);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            consumer.try_pop();
        });

        let depth = q
            .push_timeout(op("b"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(depth, 1);
        assert_eq!(q.try_pop().unwrap().owner_key(), "b");
    }

    #[tokio::test]
    async fn pop_timeout_returns_none_on_empty_queue() {
        let q = BoundedQueue::new(1);
        assert!(q.pop_timeout(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn pop_timeout_wakes_on_push() {
        let q = Arc::new(BoundedQueue::new(4));
        let producer = Arc::clone(&q);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.try_push(op("late")).unwrap();
        });

        let popped = q.pop_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(popped.owner_key(), "late");
    }
}
