//! Queue-wide queries over the state indices, counters and settings.

use queue_core::{JobId, JobState, Keys, QueueStats};

use super::DISPATCH_TOKEN;
use crate::{Command, DbError, Store};

/// Dispatch list length and inactive count of one job type, read together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub dispatch_len: u64,
    pub inactive: u64,
}

/// Repository for queue-level reads and statistics.
#[derive(Clone)]
pub struct QueueRepository<S> {
    store: S,
    keys: Keys,
}

impl<S: Store> QueueRepository<S> {
    pub fn new(store: S, keys: Keys) -> Self {
        Self { store, keys }
    }

    /// Ids currently indexed under `state`, in index order.
    pub async fn ids_in_state(&self, state: JobState) -> Result<Vec<JobId>, DbError> {
        let members = self
            .store
            .zrange(&self.keys.state_index(state), 0, None)
            .await?;
        Ok(members
            .iter()
            .filter_map(|member| JobId::parse(member).ok())
            .collect())
    }

    pub async fn count_in_state(&self, state: JobState) -> Result<u64, DbError> {
        self.store.zcard(&self.keys.state_index(state)).await
    }

    pub async fn count_in_state_for_type(
        &self,
        job_type: &str,
        state: JobState,
    ) -> Result<u64, DbError> {
        self.store
            .zcard(&self.keys.type_state_index(job_type, state))
            .await
    }

    /// Total milliseconds spent running completed jobs.
    pub async fn work_time(&self) -> Result<u64, DbError> {
        let value = self.store.get_counter(&self.keys.work_time()).await?;
        Ok(value.map_or(0, |v| u64::try_from(v).unwrap_or(0)))
    }

    /// Add a completed job's duration to the work-time counter.
    pub async fn incr_work_time(&self, duration_ms: u64) -> Result<u64, DbError> {
        let delta = i64::try_from(duration_ms).unwrap_or(i64::MAX);
        let total = self.store.incr_by(&self.keys.work_time(), delta).await?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    /// Counts for every state plus work time, read in one batch.
    pub async fn stats(&self) -> Result<QueueStats, DbError> {
        let mut commands: Vec<Command> = JobState::ALL
            .iter()
            .map(|state| Command::ZCard(self.keys.state_index(*state)))
            .collect();
        commands.push(Command::Get(self.keys.work_time()));

        let replies = self.store.batch(&commands).await?;
        let mut stats = QueueStats::default();
        for (state, reply) in JobState::ALL.iter().zip(&replies) {
            stats.set(*state, reply.as_count());
        }
        stats.work_time_ms = replies.last().map_or(0, |reply| reply.as_count());
        Ok(stats)
    }

    /// Every job type ever created.
    pub async fn types(&self) -> Result<Vec<String>, DbError> {
        self.store.smembers(&self.keys.job_types()).await
    }

    pub async fn setting(&self, name: &str) -> Result<Option<String>, DbError> {
        self.store.hget(&self.keys.settings(), name).await
    }

    pub async fn set_setting(&self, name: &str, value: impl Into<String>) -> Result<(), DbError> {
        self.store
            .hset(&self.keys.settings(), &[(name, value.into())])
            .await
    }

    /// Read the dispatch length and the inactive count for `job_type` together.
    pub async fn dispatch_snapshot(&self, job_type: &str) -> Result<DispatchSnapshot, DbError> {
        let replies = self
            .store
            .batch(&[
                Command::LLen(self.keys.dispatch(job_type)),
                Command::ZCard(self.keys.type_state_index(job_type, JobState::Inactive)),
            ])
            .await?;
        let count = |i: usize| replies.get(i).map_or(0, |reply| reply.as_count());
        Ok(DispatchSnapshot {
            dispatch_len: count(0),
            inactive: count(1),
        })
    }

    /// Append `count` filler tokens to the dispatch list of `job_type`.
    pub async fn push_dispatch_tokens(&self, job_type: &str, count: u64) -> Result<u64, DbError> {
        let tokens = vec![DISPATCH_TOKEN.to_string(); usize::try_from(count).unwrap_or(0)];
        self.store
            .rpush(&self.keys.dispatch(job_type), &tokens)
            .await
    }
}
