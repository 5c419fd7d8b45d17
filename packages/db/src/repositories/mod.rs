//! Repositories that give the store primitives job queue semantics.

mod job_repo;
mod queue_repo;

pub use job_repo::JobRepository;
pub use queue_repo::{DispatchSnapshot, QueueRepository};

/// Placeholder pushed onto a dispatch list for each inactive job.
pub const DISPATCH_TOKEN: &str = "1";
