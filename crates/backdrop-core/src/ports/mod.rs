//! Ports - seams to the outside world.
//!
//! - **OperationProcessor**: caller-supplied work for custom operations
//! - **GraphMemoryClient**: the external episode store

pub mod graph_memory;
pub mod processor;

pub use self::graph_memory::{EpisodeRequest, EpisodeType, GraphMemoryClient, GraphMemoryError};
pub use self::processor::{OperationProcessor, ProcessorFn, processor_fn};
