#![allow(dead_code)]

use serde_json::{Map, Value};

use db::repositories::{JobRepository, QueueRepository};
use db::{DbConfig, DbError, MemoryStore, Store, SurrealStore};
use queue_core::Keys;

pub fn payload_with_message(message: &str) -> Value {
    let mut map = Map::new();
    map.insert("msg".to_string(), Value::String(message.to_string()));
    Value::Object(map)
}

pub fn repositories<S: Store>(store: &S) -> (JobRepository<S>, QueueRepository<S>) {
    let keys = Keys::default();
    (
        JobRepository::new(store.clone(), keys.clone()),
        QueueRepository::new(store.clone(), keys),
    )
}

pub fn memory_repositories() -> (
    MemoryStore,
    JobRepository<MemoryStore>,
    QueueRepository<MemoryStore>,
) {
    let store = MemoryStore::new();
    let (jobs, queue) = repositories(&store);
    (store, jobs, queue)
}

/// Every test gets its own database so tests can run in parallel.
pub async fn surreal_store(database: &str) -> Result<SurrealStore, DbError> {
    SurrealStore::open(&DbConfig::memory().with_database(database)).await
}
