use async_trait::async_trait;
use serde::Deserialize;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, Instant, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

use backdrop_core::impls::InMemoryGraphMemory;
use backdrop_core::{
    Metadata, OperationError, OperationProcessor, QueueConfig, QueueManager, enrichment_sink,
};

#[derive(Debug, Deserialize)]
struct NotePayload {
    title: String,
}

/// Custom processor that fails a fixed number of times before succeeding.
struct FlakyNoteSync {
    remaining_failures: AtomicU32,
}

impl FlakyNoteSync {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl OperationProcessor for FlakyNoteSync {
    async fn process(
        &self,
        owner_key: &str,
        data: &Metadata,
        _metadata: &Metadata,
    ) -> Result<(), OperationError> {
        let p: NotePayload = serde_json::from_value(serde_json::Value::Object(data.clone()))
            .map_err(|e| OperationError::permanent(format!("json decode: {e}")))?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(OperationError::transient(format!(
                "intentional failure (left={left})"
            )));
        }

        info!(owner_key, title = %p.title, "note synced");
        Ok(())
    }
}

fn metadata(value: serde_json::Value) -> Metadata {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 1) config from the environment, with short retries for the demo
    let config = QueueConfig::from_env()?.with_retry(2, 0.2);
    let graph = Arc::new(InMemoryGraphMemory::new());

    // 2) build and start the manager
    let manager = Arc::new(
        QueueManager::builder(config.clone())
            .with_graph_client(graph.clone())
            .build()?,
    );
    manager.start();

    // 3) producer entry point follows background_mode
    let sink = enrichment_sink(&config, manager.clone(), manager.episode_processor());
    for (owner, message, response) in [
        ("alice", "what's on my calendar?", "two meetings this afternoon"),
        ("bob", "summarize my inbox", "three unread threads from the team"),
    ] {
        let meta = metadata(serde_json::json!({ "agent_name": "demo" }));
        let id = sink.submit_episode(owner, message, response, meta).await;
        info!(op_id = %id, owner, "episode submitted");
    }

    let id = manager
        .enqueue_custom(
            "alice",
            metadata(serde_json::json!({"title": "weekly plan"})),
            Arc::new(FlakyNoteSync::new(1)),
            Metadata::new(),
        )
        .await;
    info!(op_id = %id, "custom operation submitted");

    // 4) wait for the queue to drain, bounded
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let status = manager.status();
        if status.queue_size == 0 && status.stats.total_processed >= status.stats.total_enqueued {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    println!("{}", serde_json::to_string_pretty(&manager.status())?);
    println!("stored episodes: {}", graph.episodes().len());
    for failed in manager.failed_operations() {
        println!("failed: {}", serde_json::to_string(&failed)?);
    }

    manager.stop(Duration::from_secs(5)).await;
    Ok(())
}
