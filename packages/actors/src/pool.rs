//! Worker pool: spawning, dispatch reconciliation, event aggregation and
//! graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use db::Store;
use db::repositories::{JobRepository, QueueRepository};
use queue_core::{JobEvent, WorkerConfig};
use ractor::Actor;
use ractor::rpc::CallResult;
use tokio::sync::{mpsc, oneshot};

use crate::events::EventChannel;
use crate::handler::JobHandler;
use crate::messages::{QueueError, QueueResult, WorkerEvent, WorkerMessage};
use crate::registry::{WorkerEntry, WorkerId, WorkerRegistry};
use crate::shutdown::{ShutdownCallback, ShutdownCountdown};
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Result of reconciling a dispatch list against the inactive index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Dispatch list length before reconciliation.
    pub dispatch_len: u64,
    /// Inactive jobs of the type.
    pub inactive: u64,
    /// Filler tokens appended.
    pub appended: u64,
    /// Tokens beyond the inactive count, left in place.
    pub surplus: u64,
}

/// Starts and stops worker units and folds their events into queue state.
pub struct WorkerPool<S> {
    jobs: JobRepository<S>,
    queue: QueueRepository<S>,
    registry: Arc<WorkerRegistry>,
    config: WorkerConfig,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl<S: Store> WorkerPool<S> {
    /// Create a pool and start its event aggregator. Must be called inside a
    /// Tokio runtime.
    pub fn new(
        jobs: JobRepository<S>,
        queue: QueueRepository<S>,
        registry: Arc<WorkerRegistry>,
        events: Arc<dyn EventChannel>,
        config: WorkerConfig,
    ) -> Self {
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        tokio::spawn(aggregate_events(worker_rx, queue.clone(), events));
        Self {
            jobs,
            queue,
            registry,
            config,
            worker_tx,
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Top up the dispatch list of `job_type` so it holds a token for every
    /// inactive job. A longer list is left alone.
    pub async fn reconcile(&self, job_type: &str) -> QueueResult<ReconcileOutcome> {
        let snapshot = self.queue.dispatch_snapshot(job_type).await?;
        let mut outcome = ReconcileOutcome {
            dispatch_len: snapshot.dispatch_len,
            inactive: snapshot.inactive,
            ..Default::default()
        };

        if snapshot.dispatch_len < snapshot.inactive {
            outcome.appended = snapshot.inactive - snapshot.dispatch_len;
            self.queue
                .push_dispatch_tokens(job_type, outcome.appended)
                .await?;
            tracing::info!(
                job_type,
                appended = outcome.appended,
                "Dispatch list was behind the inactive index"
            );
        } else if snapshot.dispatch_len > snapshot.inactive {
            outcome.surplus = snapshot.dispatch_len - snapshot.inactive;
            tracing::warn!(
                job_type,
                surplus = outcome.surplus,
                "Dispatch list has more tokens than inactive jobs"
            );
        }

        Ok(outcome)
    }

    /// Reconcile `job_type`, then start `concurrency` workers running
    /// `handler`. Nothing is started when reconciliation fails, and workers
    /// already started are stopped again when a later spawn fails.
    pub async fn process(
        &self,
        job_type: &str,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> QueueResult<Vec<WorkerId>> {
        self.reconcile(job_type).await?;

        let mut started: Vec<Arc<WorkerEntry>> = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let id = WorkerId::next();
            let args = WorkerArgs {
                id,
                job_type: job_type.to_string(),
                handler: handler.clone(),
                jobs: self.jobs.clone(),
                poll_timeout: self.config.poll_timeout(),
                events: self.worker_tx.clone(),
            };
            match Actor::spawn(None, WorkerActor::<S>::new(), args).await {
                Ok((actor, _handle)) => {
                    started.push(self.registry.register(WorkerEntry::new(id, job_type, actor)));
                }
                Err(e) => {
                    tracing::warn!(job_type, started = started.len(), "Worker spawn failed: {}", e);
                    self.abandon(&started).await;
                    return Err(QueueError::Spawn(e.to_string()));
                }
            }
        }

        tracing::info!(job_type, concurrency, "Workers started");
        Ok(started.iter().map(|entry| entry.id).collect())
    }

    /// Stop and deregister workers of a `process` call that did not complete.
    async fn abandon(&self, workers: &[Arc<WorkerEntry>]) {
        for entry in workers {
            if let Err(e) = stop_worker(entry, None).await {
                tracing::debug!(worker_id = %entry.id, "Abandoned worker stopped with error: {}", e);
            }
            self.registry.remove(entry.id);
        }
    }

    /// Stop every registered worker whose type contains `type_filter` (all of
    /// them when empty) and call `callback` exactly once when the whole
    /// registry snapshot has been accounted for.
    ///
    /// Targets get `grace` to finish their current job; `None` waits for it.
    /// With an empty registry the callback runs before this returns.
    pub fn shutdown_with<F>(&self, type_filter: &str, grace: Option<Duration>, callback: F)
    where
        F: FnOnce(QueueResult<()>) + Send + 'static,
    {
        let workers = self.registry.snapshot();
        let callback: ShutdownCallback = Box::new(callback);
        let countdown = ShutdownCountdown::new(workers.len(), callback);

        let (targets, skipped): (Vec<_>, Vec<_>) = workers
            .into_iter()
            .partition(|entry| entry.job_type.contains(type_filter));
        tracing::info!(
            type_filter,
            targets = targets.len(),
            skipped = skipped.len(),
            "Shutting down workers"
        );

        for _ in &skipped {
            countdown.done(Ok(()));
        }
        for entry in targets {
            let countdown = countdown.clone();
            let registry = self.registry.clone();
            tokio::spawn(async move {
                let result = stop_worker(&entry, grace).await;
                registry.remove(entry.id);
                countdown.done(result);
            });
        }
    }

    /// Future form of [`WorkerPool::shutdown_with`].
    pub async fn shutdown(&self, type_filter: &str, grace: Option<Duration>) -> QueueResult<()> {
        let (tx, rx) = oneshot::channel();
        self.shutdown_with(type_filter, grace, move |result| {
            let _ = tx.send(result);
        });
        rx.await
            .unwrap_or_else(|_| Err(QueueError::Actor("Shutdown abandoned".to_string())))
    }
}

/// Ask one worker to stop and wait for its answer.
async fn stop_worker(entry: &WorkerEntry, grace: Option<Duration>) -> QueueResult<()> {
    let call = ractor::rpc::call(
        entry.actor(),
        |reply| WorkerMessage::Shutdown { grace, reply },
        None,
    )
    .await;

    match call {
        Ok(CallResult::Success(result)) => result,
        Ok(CallResult::Timeout) => Err(QueueError::ShutdownTimeout),
        Ok(CallResult::SenderError) => Err(QueueError::Actor(format!(
            "{} stopped without answering shutdown",
            entry.id
        ))),
        // Already gone
        Err(_) => Ok(()),
    }
}

/// Fold worker events into the work-time statistic and republish them.
async fn aggregate_events<S: Store>(
    mut rx: mpsc::UnboundedReceiver<WorkerEvent>,
    queue: QueueRepository<S>,
    events: Arc<dyn EventChannel>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            WorkerEvent::Notify(event) => events.publish(event),
            WorkerEvent::JobComplete {
                worker_id,
                job_id,
                job_type,
                duration_ms,
            } => {
                if let Err(e) = queue.incr_work_time(duration_ms).await {
                    tracing::warn!(%job_id, "Failed to record work time: {}", e);
                }
                tracing::debug!(%worker_id, %job_id, duration_ms, "Job complete");
                events.publish(JobEvent::JobCompleted {
                    job_id,
                    job_type,
                    duration_ms,
                    timestamp: Utc::now(),
                });
            }
            WorkerEvent::Error {
                worker_id,
                job_type,
                error,
            } => {
                tracing::warn!(%worker_id, job_type = %job_type, "Worker error: {}", error);
                events.publish(JobEvent::WorkerError {
                    worker_id: worker_id.to_string(),
                    job_type,
                    error,
                    timestamp: Utc::now(),
                });
            }
        }
    }
}
