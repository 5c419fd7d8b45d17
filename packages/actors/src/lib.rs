//! Actor system for the job queue.
//!
//! This crate provides the orchestration layer on top of the `db` store:
//! delayed-job promotion, worker pools and the queue facade tying them
//! together.
//!
//! # Architecture
//!
//! - `JobQueue` - Composition root owning the store, registry, event bus and promoter
//! - `PromoterActor` - Periodically moves due delayed jobs to inactive
//! - `WorkerPool` - Reconciles dispatch lists, spawns workers and shuts them down
//! - `WorkerActor` - Claims and executes jobs of one type
//!
//! # Usage
//!
//! ```ignore
//! use actors::{FnHandler, JobQueue};
//!
//! let queue = JobQueue::new(store, QueueConfig::default());
//! queue.promote(PromotionConfig::default()).await?;
//! queue.process("email", 3, FnHandler::new(|job| async move { Ok(()) })).await?;
//!
//! // Later
//! queue.close().await?;
//! ```

mod events;
mod handler;
mod job_queue;
mod messages;
mod pool;
mod promoter;
pub mod registry;
mod shutdown;
mod worker_actor;

pub use events::{DEFAULT_EVENT_CAPACITY, EventBus, EventChannel, Subscription};
pub use handler::{FnHandler, HandlerFuture, HandlerResult, JobHandler, JobHandlerRegistry};
pub use job_queue::JobQueue;
pub use messages::{PromoterMessage, QueueError, QueueResult, WorkerEvent, WorkerMessage};
pub use pool::{ReconcileOutcome, WorkerPool};
pub use promoter::{PromoterActor, PromoterArgs, PromotionHandle, PromotionReport, promote_due, start_promoter};
pub use registry::{WorkerEntry, WorkerId, WorkerRegistry, global_registry};
pub use shutdown::{ShutdownCallback, ShutdownCountdown};
pub use worker_actor::{SHUTDOWN_ERROR, WorkerActor, WorkerArgs};

/// Re-exported for the [`job_handler!`] macro.
pub use queue_core;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
