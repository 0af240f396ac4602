//! Queue module: bounded buffer, retry policy, failed buffer, and the manager.

mod buffer;
mod failed;
mod manager;
mod retry;

pub use failed::FailedOperationSummary;
pub use manager::{QueueManager, QueueManagerBuilder};
pub use retry::RetryPolicy;

pub(crate) use manager::QueueCore;
