//! Persistence for the job queue system.
//!
//! This crate provides the [`Store`] primitives the queue is built on
//! (counters, hashes, sorted sets, lists, sets and a batch read), two
//! adapters, and the repositories that give those primitives job semantics.
//!
//! # Adapters
//!
//! - [`MemoryStore`]: in-process storage for tests and local runs
//! - [`SurrealStore`]: SurrealDB (`mem://`, `file://` or `rocksdb://` with the `rocksdb` feature)

mod connection;
mod memory;
mod schema;
mod store;
mod surreal;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use memory::MemoryStore;
pub use schema::init_schema;
pub use store::{Command, Reply, Store};
pub use surreal::SurrealStore;
