//! Message types for actor communication.

use std::time::Duration;

use db::DbError;
use queue_core::{Job, JobId};
use ractor::RpcReplyPort;

use crate::registry::WorkerId;

/// Messages for the PromoterActor.
#[derive(Debug)]
pub enum PromoterMessage {
    /// Scan the delayed index once.
    Tick,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Start the next fetch-and-run cycle.
    Poll,

    /// The running cycle claimed a job and is executing it.
    Claimed { job: Box<Job> },

    /// The running cycle ended without a job (poll timeout, stop signal or
    /// a surplus dispatch token).
    Idle,

    /// The running cycle finished its job.
    Finished,

    /// Stop after the current job, waiting at most `grace` for it.
    Shutdown {
        grace: Option<Duration>,
        reply: RpcReplyPort<Result<(), QueueError>>,
    },

    /// The shutdown grace period ran out.
    GraceExpired,
}

/// Notifications from workers to the pool's event aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Forwarded to subscribers unchanged.
    Notify(queue_core::JobEvent),

    /// A job completed; its duration feeds the work-time statistic.
    JobComplete {
        worker_id: WorkerId,
        job_id: JobId,
        job_type: String,
        duration_ms: u64,
    },

    /// A worker failed outside of a job handler.
    Error {
        worker_id: WorkerId,
        job_type: String,
        error: String,
    },
}

/// Error type for queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Promoter is already running")]
    PromoterRunning,

    #[error("Worker did not stop within its grace period")]
    ShutdownTimeout,

    #[error("Failed to spawn actor: {0}")]
    Spawn(String),

    #[error("Actor error: {0}")]
    Actor(String),
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
