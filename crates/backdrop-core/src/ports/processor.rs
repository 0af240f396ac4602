//! OperationProcessor port - caller-supplied background work.
//!
//! Custom operations carry their own processor, so the queue can run work
//! it knows nothing about. A processor is a single async method; plain async
//! closures are adapted with [`processor_fn`].

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{Metadata, OperationError};

/// Runs one custom operation.
///
/// Return `Ok(())` on success. A transient error is retried by the worker;
/// a permanent one sends the operation straight to the failed buffer.
#[async_trait]
pub trait OperationProcessor: Send + Sync {
    async fn process(
        &self,
        owner_key: &str,
        data: &Metadata,
        metadata: &Metadata,
    ) -> Result<(), OperationError>;
}

/// Adapter from an async closure to [`OperationProcessor`].
///
/// The closure receives owned copies because the operation may be attempted
/// several times.
pub struct ProcessorFn<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> OperationProcessor for ProcessorFn<F, Fut>
where
    F: Fn(String, Metadata, Metadata) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), OperationError>> + Send,
{
    async fn process(
        &self,
        owner_key: &str,
        data: &Metadata,
        metadata: &Metadata,
    ) -> Result<(), OperationError> {
        (self.f)(owner_key.to_string(), data.clone(), metadata.clone()).await
    }
}

/// Wrap an async closure as a shareable processor.
///
/// ```ignore
/// let processor = processor_fn(|owner, data, _meta| async move {
///     sync_notes(&owner, &data).await.map_err(|e| OperationError::transient(e.to_string()))
/// });
/// manager.enqueue_custom("user-1", data, processor, Metadata::new()).await;
/// ```
pub fn processor_fn<F, Fut>(f: F) -> Arc<dyn OperationProcessor>
where
    F: Fn(String, Metadata, Metadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
{
    Arc::new(ProcessorFn {
        f,
        _marker: PhantomData,
    })
}
