//! Store primitives shared by every adapter.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use crate::DbError;

/// A read executed as part of a [`Store::batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Counter value.
    Get(String),
    /// List length.
    LLen(String),
    /// Sorted-set cardinality.
    ZCard(String),
}

/// Result of one [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Int(i64),
    Nil,
}

impl Reply {
    /// Interpret the reply as a non-negative count (`Nil` is zero).
    pub fn as_count(&self) -> u64 {
        match self {
            Reply::Int(n) => u64::try_from(*n).unwrap_or(0),
            Reply::Nil => 0,
        }
    }
}

/// Key-value store with atomic single-command semantics.
///
/// Sorted sets order members by ascending score, ties broken by member.
/// Every method is a single atomic operation against the backing store.
pub trait Store: Clone + Send + Sync + 'static {
    fn get_counter(&self, key: &str) -> impl Future<Output = Result<Option<i64>, DbError>> + Send;

    fn set_counter(&self, key: &str, value: i64) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Add `delta` to a counter (missing counters start at zero) and return the new value.
    fn incr_by(&self, key: &str, delta: i64) -> impl Future<Output = Result<i64, DbError>> + Send;

    fn hget(
        &self,
        key: &str,
        field: &str,
    ) -> impl Future<Output = Result<Option<String>, DbError>> + Send;

    /// Set several fields of a hash, creating it if needed.
    fn hset(
        &self,
        key: &str,
        fields: &[(&str, String)],
    ) -> impl Future<Output = Result<(), DbError>> + Send;

    /// All fields of a hash, or `None` if the hash does not exist.
    fn hgetall(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<HashMap<String, String>>, DbError>> + Send;

    /// Delete a key of any kind.
    fn del(&self, key: &str) -> impl Future<Output = Result<(), DbError>> + Send;

    fn zadd(
        &self,
        key: &str,
        score: i64,
        member: &str,
    ) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Remove a member; returns whether it was present.
    fn zrem(&self, key: &str, member: &str) -> impl Future<Output = Result<bool, DbError>> + Send;

    fn zcard(&self, key: &str) -> impl Future<Output = Result<u64, DbError>> + Send;

    /// Members in score order, skipping `offset` and returning at most `limit`.
    fn zrange(
        &self,
        key: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<String>, DbError>> + Send;

    /// Remove and return the lowest-scored member.
    fn zpopmin(&self, key: &str) -> impl Future<Output = Result<Option<String>, DbError>> + Send;

    /// Members of a sorted set ordered by a numeric field of the hash
    /// `hash_prefix + member`, paired with that field's raw value.
    ///
    /// Members whose hash or field is missing sort first with `None`.
    fn sort_by_field(
        &self,
        key: &str,
        hash_prefix: &str,
        field: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<(String, Option<String>)>, DbError>> + Send;

    /// Append values to a list; returns the new length.
    fn rpush(&self, key: &str, values: &[String])
    -> impl Future<Output = Result<u64, DbError>> + Send;

    fn llen(&self, key: &str) -> impl Future<Output = Result<u64, DbError>> + Send;

    fn lpop(&self, key: &str) -> impl Future<Output = Result<Option<String>, DbError>> + Send;

    /// Pop the head of a list, waiting up to `timeout` for one to arrive.
    fn blpop(
        &self,
        key: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<String>, DbError>> + Send;

    /// Add a member to a set; returns whether it was new.
    fn sadd(&self, key: &str, member: &str) -> impl Future<Output = Result<bool, DbError>> + Send;

    fn smembers(&self, key: &str) -> impl Future<Output = Result<Vec<String>, DbError>> + Send;

    /// Execute several reads and return their results in order.
    fn batch(
        &self,
        commands: &[Command],
    ) -> impl Future<Output = Result<Vec<Reply>, DbError>> + Send {
        async move {
            let mut replies = Vec::with_capacity(commands.len());
            for command in commands {
                let reply = match command {
                    Command::Get(key) => self.get_counter(key).await?.map_or(Reply::Nil, Reply::Int),
                    Command::LLen(key) => Reply::Int(count_reply(self.llen(key).await?)),
                    Command::ZCard(key) => Reply::Int(count_reply(self.zcard(key).await?)),
                };
                replies.push(reply);
            }
            Ok(replies)
        }
    }
}

pub(crate) fn count_reply(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
