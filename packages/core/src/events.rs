//! Event types for real-time updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobState};

/// Events emitted by the job queue system for real-time updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Job events
    /// A new job was persisted.
    JobEnqueued {
        job_id: JobId,
        job_type: String,
        state: JobState,
        timestamp: DateTime<Utc>,
    },
    /// A delayed job became due and is being moved to inactive.
    Promotion {
        job_id: JobId,
        job_type: String,
        timestamp: DateTime<Utc>,
    },
    /// A job started executing.
    JobStarted {
        job_id: JobId,
        job_type: String,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: JobId,
        job_type: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job attempt failed.
    JobFailed {
        job_id: JobId,
        job_type: String,
        error: String,
        attempts: u32,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },

    // Worker events
    /// A worker unit started.
    WorkerStarted {
        worker_id: String,
        job_type: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker unit stopped.
    WorkerStopped {
        worker_id: String,
        job_type: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker unit hit an error outside of a job handler.
    WorkerError {
        worker_id: String,
        job_type: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobEnqueued { timestamp, .. } => *timestamp,
            JobEvent::Promotion { timestamp, .. } => *timestamp,
            JobEvent::JobStarted { timestamp, .. } => *timestamp,
            JobEvent::JobCompleted { timestamp, .. } => *timestamp,
            JobEvent::JobFailed { timestamp, .. } => *timestamp,
            JobEvent::WorkerStarted { timestamp, .. } => *timestamp,
            JobEvent::WorkerStopped { timestamp, .. } => *timestamp,
            JobEvent::WorkerError { timestamp, .. } => *timestamp,
        }
    }

    /// Event name as used on the pub/sub channel.
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::JobEnqueued { .. } => "enqueue",
            JobEvent::Promotion { .. } => "promotion",
            JobEvent::JobStarted { .. } => "start",
            JobEvent::JobCompleted { .. } => "complete",
            JobEvent::JobFailed { .. } => "failed",
            JobEvent::WorkerStarted { .. } => "worker start",
            JobEvent::WorkerStopped { .. } => "worker stop",
            JobEvent::WorkerError { .. } => "error",
        }
    }

    /// Get the job type associated with this event.
    pub fn job_type(&self) -> &str {
        match self {
            JobEvent::JobEnqueued { job_type, .. }
            | JobEvent::Promotion { job_type, .. }
            | JobEvent::JobStarted { job_type, .. }
            | JobEvent::JobCompleted { job_type, .. }
            | JobEvent::JobFailed { job_type, .. }
            | JobEvent::WorkerStarted { job_type, .. }
            | JobEvent::WorkerStopped { job_type, .. }
            | JobEvent::WorkerError { job_type, .. } => job_type,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobEnqueued { job_id, .. } => Some(*job_id),
            JobEvent::Promotion { job_id, .. } => Some(*job_id),
            JobEvent::JobStarted { job_id, .. } => Some(*job_id),
            JobEvent::JobCompleted { job_id, .. } => Some(*job_id),
            JobEvent::JobFailed { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobEnqueued { job_id, state, .. } => {
                format!("Job {} enqueued as {}", job_id, state)
            }
            JobEvent::Promotion { job_id, .. } => format!("Job {} promoted", job_id),
            JobEvent::JobStarted {
                job_id, worker_id, ..
            } => format!("Job {} started by {}", job_id, worker_id),
            JobEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            JobEvent::JobFailed {
                job_id,
                error,
                will_retry,
                ..
            } => {
                let retry = if *will_retry { " (will retry)" } else { "" };
                format!("Job {} failed: {}{}", job_id, error, retry)
            }
            JobEvent::WorkerStarted {
                worker_id,
                job_type,
                ..
            } => format!("Worker {} started for {}", worker_id, job_type),
            JobEvent::WorkerStopped { worker_id, .. } => format!("Worker {} stopped", worker_id),
            JobEvent::WorkerError {
                worker_id, error, ..
            } => format!("Worker {} error: {}", worker_id, error),
        }
    }
}
