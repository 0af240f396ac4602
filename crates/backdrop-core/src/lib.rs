//! backdrop-core
//!
//! In-process background operation queue: producers hand off slow
//! side-effecting work (graph-memory enrichment, custom jobs) and return
//! immediately; a fixed worker pool drains a bounded queue with retries.
//!
//! # Modules
//! - **domain**: domain model (ids, operation, errors)
//! - **ports**: seams to the outside (OperationProcessor, GraphMemoryClient)
//! - **queue**: QueueManager, bounded buffer, retry policy, failed buffer
//! - **episode**: built-in episode processor
//! - **enrichment**: EnrichmentSink (queue vs. legacy dispatch)
//! - **observability**: StatsTracker, QueueStatus
//! - **config**: QueueConfig (loaded from the environment)
//! - **impls**: development implementations (InMemoryGraphMemory)

pub mod config;
pub mod domain;
pub mod enrichment;
pub mod episode;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

mod worker;

pub use config::{BackgroundMode, ConfigError, QueueConfig};
pub use domain::{ErrorKind, Metadata, Operation, OperationError, OperationId, OperationKind};
pub use enrichment::{DetachedEnrichment, EnrichmentSink, enrichment_sink};
pub use episode::{EpisodeContext, EpisodeProcessor, GraphEpisodeProcessor};
pub use observability::{LifecycleState, QueueStatus, StatsSummary, StatsTracker};
pub use ports::{GraphMemoryClient, GraphMemoryError, OperationProcessor, processor_fn};
pub use queue::{FailedOperationSummary, QueueManager, QueueManagerBuilder, RetryPolicy};
