//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use queue_core::Job;

/// Result type for job handlers. The error is recorded on the failed job.
pub type HandlerResult = Result<(), String>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for job handlers.
///
/// Implement this trait to define how jobs of a type are processed. A handler
/// is shared by every worker started with it, so it runs concurrently.
pub trait JobHandler: Send + Sync + 'static {
    /// Process a job.
    fn handle(&self, job: Job) -> HandlerFuture;
}

impl JobHandler for Arc<dyn JobHandler> {
    fn handle(&self, job: Job) -> HandlerFuture {
        (**self).handle(job)
    }
}

/// Registry for job handlers.
///
/// Maps job types to their handlers for dynamic dispatch.
#[derive(Default, Clone)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job type.
    pub fn register<H: JobHandler>(&mut self, job_type: impl Into<String>, handler: H) {
        self.handlers.insert(job_type.into(), Arc::new(handler));
    }

    /// Get a handler for a job type.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Check if a handler exists for a job type.
    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// List all registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F> {
    handler: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new function-based handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, job: Job) -> HandlerFuture {
        Box::pin((self.handler)(job))
    }
}

/// Helper macro for creating job handlers from async blocks.
#[macro_export]
macro_rules! job_handler {
    (|$job:ident| $body:expr) => {
        $crate::FnHandler::new(move |$job: $crate::queue_core::Job| async move { $body })
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_core::{JobId, NewJob};

    fn job(job_type: &str) -> Job {
        NewJob::new(job_type, serde_json::json!({ "n": 1 })).into_job(JobId(1), chrono::Utc::now())
    }

    #[tokio::test]
    async fn registry_dispatches_by_type() {
        let mut registry = JobHandlerRegistry::new();
        registry.register("ok", FnHandler::new(|_job| async { Ok(()) }));
        registry.register(
            "fail",
            FnHandler::new(|job: Job| async move { Err(format!("cannot run {}", job.job_type)) }),
        );

        assert_eq!(registry.job_types(), vec!["fail", "ok"]);
        assert!(registry.has_handler("ok"));
        assert!(registry.get("missing").is_none());

        let ok = registry.get("ok").unwrap();
        assert_eq!(ok.handle(job("ok")).await, Ok(()));

        let fail = registry.get("fail").unwrap();
        assert_eq!(fail.handle(job("fail")).await, Err("cannot run fail".to_string()));
    }
}
