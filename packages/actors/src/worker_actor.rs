//! Worker actor for executing jobs.
//!
//! Each worker runs one cycle at a time on a separate task: wait for a
//! dispatch token, claim the highest-priority inactive job of its type, run
//! the handler and record the outcome. The actor itself only tracks the cycle
//! so that shutdown can interrupt an idle wait at once and bound a running job
//! by its grace period.

use std::any::Any;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use db::repositories::JobRepository;
use db::{DbError, Store};
use futures_util::FutureExt;
use queue_core::{Job, JobEvent, JobState};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::handler::{HandlerResult, JobHandler};
use crate::messages::{QueueError, WorkerEvent, WorkerMessage};
use crate::registry::WorkerId;

/// Error recorded on a job that was still running when its worker's grace
/// period ran out.
pub const SHUTDOWN_ERROR: &str = "Shutdown";

/// Worker actor arguments.
pub struct WorkerArgs<S> {
    pub id: WorkerId,
    pub job_type: String,
    pub handler: Arc<dyn JobHandler>,
    pub jobs: JobRepository<S>,
    /// How long one dispatch wait blocks before the worker polls again.
    pub poll_timeout: Duration,
    pub events: mpsc::UnboundedSender<WorkerEvent>,
}

/// What a cycle needs, cloned into each cycle task.
#[derive(Clone)]
struct WorkerContext<S> {
    id: WorkerId,
    job_type: String,
    handler: Arc<dyn JobHandler>,
    jobs: JobRepository<S>,
    poll_timeout: Duration,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl<S: Store> WorkerContext<S> {
    fn notify(&self, event: JobEvent) {
        let _ = self.events.send(WorkerEvent::Notify(event));
    }

    fn report_error(&self, error: impl ToString) {
        let _ = self.events.send(WorkerEvent::Error {
            worker_id: self.id,
            job_type: self.job_type.clone(),
            error: error.to_string(),
        });
    }

    fn job_failed(&self, job: &Job, error: String, next: JobState) {
        self.notify(JobEvent::JobFailed {
            job_id: job.id,
            job_type: job.job_type.clone(),
            error,
            attempts: job.attempts,
            will_retry: next == JobState::Inactive,
            timestamp: Utc::now(),
        });
    }
}

/// A shutdown waiting for the current cycle to end.
struct PendingStop {
    replies: Vec<RpcReplyPort<Result<(), QueueError>>>,
    timer: Option<JoinHandle<()>>,
}

/// State for the worker actor.
pub struct WorkerState<S> {
    ctx: WorkerContext<S>,
    stop_tx: watch::Sender<bool>,
    cycle: Option<JoinHandle<()>>,
    /// Job claimed by the running cycle.
    current: Option<Job>,
    stopping: Option<PendingStop>,
}

/// Worker actor that executes jobs of one type.
pub struct WorkerActor<S>(PhantomData<S>);

impl<S> WorkerActor<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for WorkerActor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store> Actor for WorkerActor<S> {
    type Msg = WorkerMessage;
    type State = WorkerState<S>;
    type Arguments = WorkerArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(worker_id = %args.id, job_type = %args.job_type, "Starting worker");

        let ctx = WorkerContext {
            id: args.id,
            job_type: args.job_type,
            handler: args.handler,
            jobs: args.jobs,
            poll_timeout: args.poll_timeout,
            events: args.events,
        };
        ctx.notify(JobEvent::WorkerStarted {
            worker_id: ctx.id.to_string(),
            job_type: ctx.job_type.clone(),
            timestamp: Utc::now(),
        });
        myself.send_message(WorkerMessage::Poll)?;

        let (stop_tx, _) = watch::channel(false);
        Ok(WorkerState {
            ctx,
            stop_tx,
            cycle: None,
            current: None,
            stopping: None,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if state.stopping.is_some() || state.cycle.is_some() {
                    return Ok(());
                }
                let cycle = run_cycle(state.ctx.clone(), state.stop_tx.subscribe(), myself.clone());
                state.cycle = Some(tokio::spawn(cycle));
            }

            WorkerMessage::Claimed { job } => {
                state.current = Some(*job);
            }

            WorkerMessage::Idle | WorkerMessage::Finished => {
                state.cycle = None;
                state.current = None;
                if state.stopping.is_some() {
                    finish_stop(&myself, state, false);
                } else {
                    myself.send_message(WorkerMessage::Poll)?;
                }
            }

            WorkerMessage::Shutdown { grace, reply } => {
                if let Some(pending) = state.stopping.as_mut() {
                    pending.replies.push(reply);
                    return Ok(());
                }

                tracing::info!(worker_id = %state.ctx.id, ?grace, "Shutting down worker");
                let _ = state.stop_tx.send(true);
                state.stopping = Some(PendingStop {
                    replies: vec![reply],
                    timer: None,
                });
                if state.cycle.is_none() {
                    finish_stop(&myself, state, false);
                    return Ok(());
                }

                if let (Some(grace), Some(pending)) = (grace, state.stopping.as_mut()) {
                    let me = myself.clone();
                    pending.timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(grace).await;
                        let _ = me.send_message(WorkerMessage::GraceExpired);
                    }));
                }
            }

            WorkerMessage::GraceExpired => {
                if state.stopping.is_none() {
                    return Ok(());
                }
                if let Some(cycle) = state.cycle.take() {
                    cycle.abort();
                }

                let timed_out = match state.current.take() {
                    Some(mut job) => {
                        tracing::warn!(
                            worker_id = %state.ctx.id,
                            job_id = %job.id,
                            "Grace period expired, failing running job"
                        );
                        match state.ctx.jobs.failed(&mut job, SHUTDOWN_ERROR).await {
                            Ok(next) => state.ctx.job_failed(&job, SHUTDOWN_ERROR.to_string(), next),
                            Err(e) => state.ctx.report_error(e),
                        }
                        true
                    }
                    None => false,
                };
                finish_stop(&myself, state, timed_out);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(cycle) = state.cycle.take() {
            cycle.abort();
        }
        if let Some(pending) = state.stopping.take() {
            for reply in pending.replies {
                let _ = reply.send(Ok(()));
            }
            if let Some(timer) = pending.timer {
                timer.abort();
            }
        }

        tracing::info!(worker_id = %state.ctx.id, "Worker stopped");
        state.ctx.notify(JobEvent::WorkerStopped {
            worker_id: state.ctx.id.to_string(),
            job_type: state.ctx.job_type.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

/// Answer every pending shutdown and stop the actor.
fn finish_stop<S>(myself: &ActorRef<WorkerMessage>, state: &mut WorkerState<S>, timed_out: bool) {
    if let Some(pending) = state.stopping.take() {
        if let Some(timer) = pending.timer {
            timer.abort();
        }
        for reply in pending.replies {
            let result = if timed_out {
                Err(QueueError::ShutdownTimeout)
            } else {
                Ok(())
            };
            let _ = reply.send(result);
        }
    }
    myself.stop(None);
}

/// One fetch-and-run cycle. Ends by sending `Idle` or `Finished`.
async fn run_cycle<S: Store>(
    ctx: WorkerContext<S>,
    mut stop_rx: watch::Receiver<bool>,
    myself: ActorRef<WorkerMessage>,
) {
    let job = match fetch(&ctx, &mut stop_rx).await {
        Ok(job) => job,
        Err(e) => {
            tracing::warn!(worker_id = %ctx.id, "Failed to fetch job: {}", e);
            ctx.report_error(e);
            tokio::select! {
                _ = stopped(&mut stop_rx) => {}
                _ = tokio::time::sleep(ctx.poll_timeout) => {}
            }
            None
        }
    };

    let Some(job) = job else {
        let _ = myself.send_message(WorkerMessage::Idle);
        return;
    };

    let _ = myself.send_message(WorkerMessage::Claimed {
        job: Box::new(job.clone()),
    });
    execute(&ctx, job).await;
    let _ = myself.send_message(WorkerMessage::Finished);
}

/// Wait for a dispatch token and claim a job, unless stopped first.
async fn fetch<S: Store>(
    ctx: &WorkerContext<S>,
    stop_rx: &mut watch::Receiver<bool>,
) -> Result<Option<Job>, DbError> {
    let dispatch = ctx.jobs.keys().dispatch(&ctx.job_type);
    let token = tokio::select! {
        biased;
        _ = stopped(stop_rx) => return Ok(None),
        token = ctx.jobs.store().blpop(&dispatch, ctx.poll_timeout) => token?,
    };
    if token.is_none() {
        return Ok(None);
    }

    let Some(id) = ctx.jobs.pop_inactive(&ctx.job_type).await? else {
        tracing::debug!(worker_id = %ctx.id, "Dispatch token without an inactive job");
        return Ok(None);
    };
    let mut job = match ctx.jobs.get(id).await {
        Ok(job) => job,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => {
            match ctx.jobs.recover_unclaimed(&ctx.job_type, id, &e).await {
                Ok(state) => {
                    tracing::warn!(worker_id = %ctx.id, job_id = %id, %state, "Could not load claimed job")
                }
                Err(recover) => {
                    tracing::error!(worker_id = %ctx.id, job_id = %id, "Job left unclaimable: {}", recover)
                }
            }
            return Err(e);
        }
    };
    if !ctx.jobs.active(&mut job).await? {
        return Ok(None);
    }
    Ok(Some(job))
}

/// Resolves once the stop signal is raised or its sender is gone.
async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *stop_rx.borrow_and_update();
        if stop || stop_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Run the handler and record the outcome.
async fn execute<S: Store>(ctx: &WorkerContext<S>, mut job: Job) {
    ctx.notify(JobEvent::JobStarted {
        job_id: job.id,
        job_type: job.job_type.clone(),
        worker_id: ctx.id.to_string(),
        timestamp: Utc::now(),
    });

    let started = Instant::now();
    let result = run_handler(ctx.handler.as_ref(), job.clone()).await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(()) => match ctx.jobs.complete(&mut job, duration_ms).await {
            Ok(true) => {
                let _ = ctx.events.send(WorkerEvent::JobComplete {
                    worker_id: ctx.id,
                    job_id: job.id,
                    job_type: job.job_type.clone(),
                    duration_ms,
                });
            }
            Ok(false) => {
                tracing::debug!(job_id = %job.id, "Completed job was moved while running");
            }
            Err(e) => ctx.report_error(e),
        },
        Err(error) => {
            tracing::debug!(job_id = %job.id, "Job failed: {}", error);
            match ctx.jobs.failed(&mut job, error.clone()).await {
                Ok(next) => ctx.job_failed(&job, error, next),
                Err(e) => ctx.report_error(e),
            }
        }
    }
}

/// Invoke a handler, turning a panic into a job failure.
async fn run_handler(handler: &dyn JobHandler, job: Job) -> HandlerResult {
    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(job))) {
        Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
        Err(panic) => Err(panic),
    };
    outcome.unwrap_or_else(|panic| Err(panic_message(panic.as_ref())))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("Job handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("Job handler panicked: {message}")
    } else {
        "Job handler panicked".to_string()
    }
}
