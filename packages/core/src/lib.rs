//! Core domain types for the job queue system.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobState and Priority for work items
//! - Keys for the persisted key layout
//! - QueueConfig and QueueStats for queue behavior and monitoring
//! - Events for real-time updates

mod events;
mod job;
mod keys;
mod queue;

pub use events::JobEvent;
pub use job::{Job, JobDecodeError, JobId, JobState, NewJob, Priority};
pub use keys::Keys;
pub use queue::{ConfigError, PromotionConfig, QueueConfig, QueueStats, WorkerConfig};
