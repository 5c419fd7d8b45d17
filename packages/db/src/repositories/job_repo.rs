//! Job repository: persistence and state transitions of individual jobs.

use chrono::Utc;
use queue_core::{Job, JobId, JobState, Keys, NewJob, Priority};

use super::DISPATCH_TOKEN;
use crate::{DbError, Store};

/// Repository for job persistence operations.
///
/// Every transition is safe to call concurrently from several processes: the
/// removal from the old state index is the claim, and only the caller whose
/// removal succeeded writes the new state.
#[derive(Clone)]
pub struct JobRepository<S> {
    store: S,
    keys: Keys,
}

impl<S: Store> JobRepository<S> {
    pub fn new(store: S, keys: Keys) -> Self {
        Self { store, keys }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Persist a new job, allocating its id.
    ///
    /// Jobs with a delay enter the `delayed` index, the rest enter `inactive`
    /// and get a dispatch token.
    pub async fn create(&self, new_job: NewJob) -> Result<Job, DbError> {
        let raw_id = self.store.incr_by(&self.keys.ids(), 1).await?;
        let id = JobId(u64::try_from(raw_id).map_err(|_| {
            DbError::Query(format!("Invalid job id allocated: {raw_id}"))
        })?);
        let job = new_job.into_job(id, Utc::now());

        self.store.hset(&self.keys.job(id), &job.to_fields()).await?;
        self.store.sadd(&self.keys.job_types(), &job.job_type).await?;
        self.index(&job).await?;
        if job.state == JobState::Inactive {
            self.push_token(&job.job_type).await?;
        }

        tracing::debug!(job_id = %id, job_type = %job.job_type, state = %job.state, "Job created");
        Ok(job)
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Job, DbError> {
        let fields = self
            .store
            .hgetall(&self.keys.job(id))
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {id}")))?;
        Ok(Job::from_fields(id, &fields)?)
    }

    /// Delete a job and drop it from every index.
    pub async fn remove(&self, id: JobId) -> Result<(), DbError> {
        let job = self.get(id).await?;
        let member = id.to_string();
        for state in JobState::ALL {
            self.store.zrem(&self.keys.state_index(state), &member).await?;
            self.store
                .zrem(&self.keys.type_state_index(&job.job_type, state), &member)
                .await?;
        }
        self.store.del(&self.keys.job(id)).await?;
        tracing::debug!(job_id = %id, "Job removed");
        Ok(())
    }

    /// Move a job to `state`, persisting its current fields.
    ///
    /// Returns `false` without writing anything when the job is already in
    /// `state` or another caller moved it out of its current state first.
    /// Entering `inactive` pushes one dispatch token for the job's type.
    pub async fn set_state(&self, job: &mut Job, state: JobState) -> Result<bool, DbError> {
        let from = job.state;
        if from == state {
            return Ok(false);
        }

        let member = job.id.to_string();
        if !self.store.zrem(&self.keys.state_index(from), &member).await? {
            return Ok(false);
        }
        self.store
            .zrem(&self.keys.type_state_index(&job.job_type, from), &member)
            .await?;

        job.state = state;
        job.updated_at = Utc::now();
        self.store.hset(&self.keys.job(job.id), &job.to_fields()).await?;
        self.index(job).await?;
        if state == JobState::Inactive {
            self.push_token(&job.job_type).await?;
        }

        tracing::trace!(job_id = %job.id, %from, to = %state, "Job state changed");
        Ok(true)
    }

    /// Make the job ready to run.
    pub async fn inactive(&self, job: &mut Job) -> Result<bool, DbError> {
        self.set_state(job, JobState::Inactive).await
    }

    pub async fn delayed(&self, job: &mut Job) -> Result<bool, DbError> {
        self.set_state(job, JobState::Delayed).await
    }

    /// Mark the job as running, counting the attempt.
    pub async fn active(&self, job: &mut Job) -> Result<bool, DbError> {
        job.attempts += 1;
        let claimed = self.set_state(job, JobState::Active).await?;
        if !claimed {
            job.attempts -= 1;
        }
        Ok(claimed)
    }

    /// Mark the job as complete with its measured duration.
    pub async fn complete(&self, job: &mut Job, duration_ms: u64) -> Result<bool, DbError> {
        job.duration_ms = Some(duration_ms);
        self.set_state(job, JobState::Complete).await
    }

    /// Record a failure. The job goes back to `inactive` while it has attempts
    /// left, otherwise to `failed`. Returns the state it ended up in.
    pub async fn failed(
        &self,
        job: &mut Job,
        error: impl Into<String>,
    ) -> Result<JobState, DbError> {
        job.error = Some(error.into());
        let next = if job.can_retry() {
            JobState::Inactive
        } else {
            JobState::Failed
        };
        self.set_state(job, next).await?;
        Ok(job.state)
    }

    /// Up to `limit` delayed members ordered by due time, with the raw
    /// `promote_at` field (`None` when the job record is gone).
    pub async fn delayed_candidates(
        &self,
        limit: usize,
    ) -> Result<Vec<(String, Option<String>)>, DbError> {
        self.store
            .sort_by_field(
                &self.keys.state_index(JobState::Delayed),
                &self.keys.job_prefix(),
                "promote_at",
                limit,
            )
            .await
    }

    /// Drop a member from the delayed index without touching any record.
    pub async fn remove_delayed_entry(&self, member: &str) -> Result<bool, DbError> {
        self.store
            .zrem(&self.keys.state_index(JobState::Delayed), member)
            .await
    }

    /// Take the highest-priority inactive job id of `job_type`.
    pub async fn pop_inactive(&self, job_type: &str) -> Result<Option<JobId>, DbError> {
        let Some(member) = self
            .store
            .zpopmin(&self.keys.type_state_index(job_type, JobState::Inactive))
            .await?
        else {
            return Ok(None);
        };
        match JobId::parse(&member) {
            Ok(id) => Ok(Some(id)),
            Err(_) => {
                tracing::warn!(job_type, member = %member, "Discarding invalid inactive entry");
                Ok(None)
            }
        }
    }

    /// Settle a job popped by [`JobRepository::pop_inactive`] whose record
    /// could not be loaded, so it is not stranded outside the per-type index.
    ///
    /// A record that fails to decode is moved to `failed` with the decode
    /// error; after any other error the job is put back in the per-type
    /// inactive index with a fresh dispatch token. Returns the state the job
    /// is left in.
    pub async fn recover_unclaimed(
        &self,
        job_type: &str,
        id: JobId,
        cause: &DbError,
    ) -> Result<JobState, DbError> {
        let member = id.to_string();
        let score = self.stored_score(id).await?;

        if !matches!(cause, DbError::Decode(_)) {
            self.store
                .zadd(&self.keys.type_state_index(job_type, JobState::Inactive), score, &member)
                .await?;
            self.push_token(job_type).await?;
            return Ok(JobState::Inactive);
        }

        self.store
            .zrem(&self.keys.state_index(JobState::Inactive), &member)
            .await?;
        self.store
            .hset(
                &self.keys.job(id),
                &[
                    ("state", JobState::Failed.as_str().to_string()),
                    ("error", cause.to_string()),
                    ("updated_at", Utc::now().timestamp_millis().to_string()),
                ],
            )
            .await?;
        self.store
            .zadd(&self.keys.state_index(JobState::Failed), score, &member)
            .await?;
        self.store
            .zadd(&self.keys.type_state_index(job_type, JobState::Failed), score, &member)
            .await?;
        Ok(JobState::Failed)
    }

    /// Index score of a job read straight from its hash.
    async fn stored_score(&self, id: JobId) -> Result<i64, DbError> {
        let raw = self.store.hget(&self.keys.job(id), "priority").await?;
        Ok(raw
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|score| Priority::from_score(*score).is_some())
            .unwrap_or(Priority::Normal.score()))
    }

    async fn index(&self, job: &Job) -> Result<(), DbError> {
        let member = job.id.to_string();
        let score = job.priority.score();
        self.store
            .zadd(&self.keys.state_index(job.state), score, &member)
            .await?;
        self.store
            .zadd(
                &self.keys.type_state_index(&job.job_type, job.state),
                score,
                &member,
            )
            .await
    }

    async fn push_token(&self, job_type: &str) -> Result<(), DbError> {
        self.store
            .rpush(&self.keys.dispatch(job_type), &[DISPATCH_TOKEN.to_string()])
            .await?;
        Ok(())
    }
}
