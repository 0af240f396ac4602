//! Domain model: operation ids, the operation envelope, and failure kinds.

pub mod errors;
pub mod ids;
pub mod operation;

pub use errors::{ErrorKind, OperationError};
pub use ids::OperationId;
pub use operation::{Metadata, Operation, OperationKind, OperationPayload, PREVIEW_CHARS};
