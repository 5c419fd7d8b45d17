//! In-process store used by tests and local runs.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::store::{Command, Reply, Store, count_reply};
use crate::DbError;

/// In-memory [`Store`] with the same atomicity guarantees as the real backends.
///
/// Clones share the same data. [`MemoryStore::set_unavailable`] makes every
/// operation fail, which is how tests simulate a store outage.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    data: Mutex<Data>,
    pushed: Notify,
    unavailable: AtomicBool,
}

#[derive(Default)]
struct Data {
    counters: HashMap<String, i64>,
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, SortedSet>,
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, BTreeSet<String>>,
}

#[derive(Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, score: i64, member: &str) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn pop_first(&mut self) -> Option<String> {
        let (_, member) = self.ordered.pop_first()?;
        self.scores.remove(&member);
        Some(member)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with [`DbError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn data(&self) -> Result<MutexGuard<'_, Data>, DbError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable);
        }
        Ok(self
            .inner
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner))
    }

    fn pop_head(&self, key: &str) -> Result<Option<String>, DbError> {
        let mut data = self.data()?;
        let Some(list) = data.lists.get_mut(key) else {
            return Ok(None);
        };
        let head = list.pop_front();
        if list.is_empty() {
            data.lists.remove(key);
        }
        Ok(head)
    }
}

impl Store for MemoryStore {
    async fn get_counter(&self, key: &str) -> Result<Option<i64>, DbError> {
        Ok(self.data()?.counters.get(key).copied())
    }

    async fn set_counter(&self, key: &str, value: i64) -> Result<(), DbError> {
        self.data()?.counters.insert(key.to_string(), value);
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, DbError> {
        let mut data = self.data()?;
        let value = data.counters.entry(key.to_string()).or_insert(0);
        *value += delta;
        Ok(*value)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, DbError> {
        Ok(self
            .data()?
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<(), DbError> {
        let mut data = self.data()?;
        let hash = data.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.to_string(), value.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<Option<HashMap<String, String>>, DbError> {
        Ok(self.data()?.hashes.get(key).cloned())
    }

    async fn del(&self, key: &str) -> Result<(), DbError> {
        let mut data = self.data()?;
        data.counters.remove(key);
        data.hashes.remove(key);
        data.zsets.remove(key);
        data.lists.remove(key);
        data.sets.remove(key);
        Ok(())
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), DbError> {
        self.data()?
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(score, member);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, DbError> {
        let mut data = self.data()?;
        let Some(set) = data.zsets.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(member);
        if set.scores.is_empty() {
            data.zsets.remove(key);
        }
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<u64, DbError> {
        Ok(self
            .data()?
            .zsets
            .get(key)
            .map_or(0, |set| set.scores.len() as u64))
    }

    async fn zrange(
        &self,
        key: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<String>, DbError> {
        let data = self.data()?;
        let Some(set) = data.zsets.get(key) else {
            return Ok(Vec::new());
        };
        Ok(set
            .ordered
            .iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, member)| member.clone())
            .collect())
    }

    async fn zpopmin(&self, key: &str) -> Result<Option<String>, DbError> {
        let mut data = self.data()?;
        let Some(set) = data.zsets.get_mut(key) else {
            return Ok(None);
        };
        let head = set.pop_first();
        if set.scores.is_empty() {
            data.zsets.remove(key);
        }
        Ok(head)
    }

    async fn sort_by_field(
        &self,
        key: &str,
        hash_prefix: &str,
        field: &str,
        limit: usize,
    ) -> Result<Vec<(String, Option<String>)>, DbError> {
        let data = self.data()?;
        let Some(set) = data.zsets.get(key) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<(Option<i64>, String, Option<String>)> = set
            .ordered
            .iter()
            .map(|(_, member)| {
                let raw = data
                    .hashes
                    .get(&format!("{hash_prefix}{member}"))
                    .and_then(|hash| hash.get(field))
                    .cloned();
                let weight = raw.as_deref().and_then(|v| v.parse::<i64>().ok());
                (weight, member.clone(), raw)
            })
            .collect();
        rows.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|(_, member, raw)| (member, raw))
            .collect())
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<u64, DbError> {
        let len = {
            let mut data = self.data()?;
            let list = data.lists.entry(key.to_string()).or_default();
            list.extend(values.iter().cloned());
            list.len() as u64
        };
        self.inner.pushed.notify_waiters();
        Ok(len)
    }

    async fn llen(&self, key: &str) -> Result<u64, DbError> {
        Ok(self.data()?.lists.get(key).map_or(0, |list| list.len() as u64))
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, DbError> {
        self.pop_head(key)
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>, DbError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(head) = self.pop_head(key)? {
                return Ok(Some(head));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, DbError> {
        Ok(self
            .data()?
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, DbError> {
        Ok(self
            .data()?
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn batch(&self, commands: &[Command]) -> Result<Vec<Reply>, DbError> {
        let data = self.data()?;
        Ok(commands
            .iter()
            .map(|command| match command {
                Command::Get(key) => data.counters.get(key).copied().map_or(Reply::Nil, Reply::Int),
                Command::LLen(key) => Reply::Int(count_reply(
                    data.lists.get(key).map_or(0, |list| list.len() as u64),
                )),
                Command::ZCard(key) => Reply::Int(count_reply(
                    data.zsets.get(key).map_or(0, |set| set.scores.len() as u64),
                )),
            })
            .collect())
    }
}
