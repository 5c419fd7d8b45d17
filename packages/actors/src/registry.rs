//! Registry of live worker units.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use ractor::ActorRef;

use crate::messages::WorkerMessage;

/// Process-unique worker identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

impl WorkerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// A registered worker unit.
#[derive(Debug)]
pub struct WorkerEntry {
    pub id: WorkerId,
    pub job_type: String,
    actor: ActorRef<WorkerMessage>,
}

impl WorkerEntry {
    pub fn new(id: WorkerId, job_type: impl Into<String>, actor: ActorRef<WorkerMessage>) -> Self {
        Self {
            id,
            job_type: job_type.into(),
            actor,
        }
    }

    pub fn actor(&self) -> &ActorRef<WorkerMessage> {
        &self.actor
    }
}

/// Live worker set shared by the pools that spawn into it and the shutdowns
/// that drain it.
///
/// Iteration works on a snapshot, so workers appended during a shutdown are
/// neither seen nor disturbed by it.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<Vec<Arc<WorkerEntry>>>,
}

impl WorkerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a worker.
    pub fn register(&self, entry: WorkerEntry) -> Arc<WorkerEntry> {
        let entry = Arc::new(entry);
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        entry
    }

    /// Workers registered at this instant, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<WorkerEntry>> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove a worker; returns whether it was registered.
    pub fn remove(&self, id: WorkerId) -> bool {
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        let before = workers.len();
        workers.retain(|entry| entry.id != id);
        workers.len() != before
    }

    pub fn len(&self) -> usize {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Global registry instance.
static REGISTRY: LazyLock<Arc<WorkerRegistry>> = LazyLock::new(|| Arc::new(WorkerRegistry::new()));

/// Get the process-wide worker registry.
pub fn global_registry() -> Arc<WorkerRegistry> {
    REGISTRY.clone()
}
