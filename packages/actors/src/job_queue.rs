//! The queue: one store, one worker registry, one event bus, one promoter.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use db::Store;
use db::repositories::{JobRepository, QueueRepository};
use queue_core::{Job, JobEvent, JobId, JobState, NewJob, PromotionConfig, QueueConfig, QueueStats};

use crate::events::{EventBus, EventChannel, Subscription};
use crate::handler::JobHandler;
use crate::messages::{QueueError, QueueResult};
use crate::pool::{ReconcileOutcome, WorkerPool};
use crate::promoter::{PromoterArgs, PromotionHandle, start_promoter};
use crate::registry::{WorkerEntry, WorkerId, WorkerRegistry, global_registry};

/// Entry point to the job queue.
///
/// ```ignore
/// let queue = JobQueue::new(MemoryStore::new(), QueueConfig::default());
/// queue.promote(PromotionConfig::default()).await?;
/// queue.process("email", 2, FnHandler::new(|job| async move { send(job).await })).await?;
/// queue.enqueue("email", json!({ "to": "a@example.com" })).await?;
/// ```
pub struct JobQueue<S> {
    config: QueueConfig,
    jobs: JobRepository<S>,
    queue: QueueRepository<S>,
    events: EventBus,
    pool: WorkerPool<S>,
    promoter: Mutex<Option<PromotionHandle>>,
}

impl<S: Store> JobQueue<S> {
    /// Create a queue that registers its workers in the process-wide registry.
    /// Must be called inside a Tokio runtime.
    pub fn new(store: S, config: QueueConfig) -> Self {
        Self::with_registry(store, config, global_registry())
    }

    /// Create a queue with its own worker registry.
    pub fn with_registry(store: S, config: QueueConfig, registry: Arc<WorkerRegistry>) -> Self {
        let keys = config.keys();
        let jobs = JobRepository::new(store.clone(), keys.clone());
        let queue = QueueRepository::new(store, keys);
        let events = EventBus::default();
        let pool = WorkerPool::new(
            jobs.clone(),
            queue.clone(),
            registry,
            Arc::new(events.clone()),
            config.worker.clone(),
        );

        Self {
            config,
            jobs,
            queue,
            events,
            pool,
            promoter: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn jobs(&self) -> &JobRepository<S> {
        &self.jobs
    }

    // Promotion

    /// Start promoting due delayed jobs. Only one promoter runs per queue.
    pub async fn promote(&self, config: PromotionConfig) -> QueueResult<PromotionHandle> {
        if self.promoter_handle().is_some_and(|handle| handle.is_running()) {
            return Err(QueueError::PromoterRunning);
        }

        let handle = start_promoter(PromoterArgs {
            jobs: self.jobs.clone(),
            events: Arc::new(self.events.clone()),
            config,
        })
        .await
        .map_err(|e| QueueError::Spawn(e.to_string()))?;

        let mut slot = self.promoter.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|existing| existing.is_running()) {
            // Lost a race with a concurrent call
            drop(slot);
            handle.stop();
            return Err(QueueError::PromoterRunning);
        }
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Start promoting with the queue's configured interval and batch limit.
    pub async fn promote_default(&self) -> QueueResult<PromotionHandle> {
        self.promote(self.config.promotion.clone()).await
    }

    /// Stop the promoter, if one is running, and wait for it to exit.
    pub async fn stop_promotion(&self) {
        let handle = self
            .promoter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop_and_wait().await;
        }
    }

    fn promoter_handle(&self) -> Option<PromotionHandle> {
        self.promoter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // Workers

    /// Reconcile the dispatch list of `job_type`, then start `concurrency`
    /// workers running `handler`.
    pub async fn process<H: JobHandler>(
        &self,
        job_type: &str,
        concurrency: usize,
        handler: H,
    ) -> QueueResult<Vec<WorkerId>> {
        self.pool.process(job_type, concurrency, Arc::new(handler)).await
    }

    /// Top up the dispatch list of `job_type` without starting workers.
    pub async fn reconcile(&self, job_type: &str) -> QueueResult<ReconcileOutcome> {
        self.pool.reconcile(job_type).await
    }

    /// Stop matching workers (substring of the job type, empty for all).
    /// Resolves once every registered worker has been accounted for, with
    /// the first error any of them reported.
    pub async fn shutdown(&self, type_filter: &str, grace: Option<Duration>) -> QueueResult<()> {
        self.pool.shutdown(type_filter, grace).await
    }

    /// Callback form of [`JobQueue::shutdown`]; the callback runs exactly once.
    pub fn shutdown_with<F>(&self, type_filter: &str, grace: Option<Duration>, callback: F)
    where
        F: FnOnce(QueueResult<()>) + Send + 'static,
    {
        self.pool.shutdown_with(type_filter, grace, callback);
    }

    /// Workers currently registered.
    pub fn workers(&self) -> Vec<Arc<WorkerEntry>> {
        self.pool.registry().snapshot()
    }

    /// Stop the promoter and every worker, using the configured grace period.
    pub async fn close(&self) -> QueueResult<()> {
        self.stop_promotion().await;
        self.shutdown("", self.config.shutdown_grace()).await
    }

    // Jobs

    /// Persist a job and announce it.
    pub async fn create_job(&self, new_job: NewJob) -> QueueResult<Job> {
        let job = self.jobs.create(new_job).await?;
        self.events.publish(JobEvent::JobEnqueued {
            job_id: job.id,
            job_type: job.job_type.clone(),
            state: job.state,
            timestamp: Utc::now(),
        });
        Ok(job)
    }

    /// Persist a job with default options.
    pub async fn enqueue(
        &self,
        job_type: impl Into<String>,
        data: serde_json::Value,
    ) -> QueueResult<Job> {
        self.create_job(NewJob::new(job_type, data)).await
    }

    pub async fn get_job(&self, id: JobId) -> QueueResult<Job> {
        self.jobs.get(id).await.map_err(|e| {
            if e.is_not_found() {
                QueueError::JobNotFound(id)
            } else {
                e.into()
            }
        })
    }

    pub async fn remove_job(&self, id: JobId) -> QueueResult<()> {
        self.jobs.remove(id).await.map_err(|e| {
            if e.is_not_found() {
                QueueError::JobNotFound(id)
            } else {
                e.into()
            }
        })
    }

    // State

    pub async fn ids_in_state(&self, state: JobState) -> QueueResult<Vec<JobId>> {
        Ok(self.queue.ids_in_state(state).await?)
    }

    pub async fn count_in_state(&self, state: JobState) -> QueueResult<u64> {
        Ok(self.queue.count_in_state(state).await?)
    }

    pub async fn count_in_state_for_type(&self, job_type: &str, state: JobState) -> QueueResult<u64> {
        Ok(self.queue.count_in_state_for_type(job_type, state).await?)
    }

    /// Total milliseconds spent running completed jobs.
    pub async fn cumulative_work_time(&self) -> QueueResult<u64> {
        Ok(self.queue.work_time().await?)
    }

    pub async fn stats(&self) -> QueueResult<QueueStats> {
        Ok(self.queue.stats().await?)
    }

    /// Every job type ever created.
    pub async fn types(&self) -> QueueResult<Vec<String>> {
        Ok(self.queue.types().await?)
    }

    pub async fn setting(&self, name: &str) -> QueueResult<Option<String>> {
        Ok(self.queue.setting(name).await?)
    }

    pub async fn set_setting(&self, name: &str, value: impl Into<String>) -> QueueResult<()> {
        Ok(self.queue.set_setting(name, value).await?)
    }

    // Events

    /// Subscribe to job and worker events published from now on.
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}
