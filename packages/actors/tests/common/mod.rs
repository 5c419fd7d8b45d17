#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use actors::{JobQueue, WorkerRegistry};
use db::MemoryStore;
use queue_core::{QueueConfig, WorkerConfig};
use serde_json::{Map, Value};

pub fn payload_with_message(message: &str) -> Value {
    let mut map = Map::new();
    map.insert("msg".to_string(), Value::String(message.to_string()));
    Value::Object(map)
}

pub fn test_config() -> QueueConfig {
    QueueConfig {
        worker: WorkerConfig {
            poll_timeout_ms: 50,
        },
        ..Default::default()
    }
}

/// A queue over a fresh memory store with a private worker registry, so tests
/// running in parallel never see each other's workers.
pub fn memory_queue() -> (MemoryStore, JobQueue<MemoryStore>) {
    let store = MemoryStore::new();
    let queue = JobQueue::with_registry(
        store.clone(),
        test_config(),
        Arc::new(WorkerRegistry::new()),
    );
    (store, queue)
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
