//! Job domain types for work items in the queue.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a job, allocated from a monotonic counter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// Parse a job ID from an index member.
    pub fn parse(s: &str) -> Result<Self, std::num::ParseIntError> {
        Ok(Self(s.trim().parse()?))
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority level for job execution order.
///
/// Each level maps to a sorted-set score; lower scores are dequeued first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Score used in the state indices.
    pub fn score(self) -> i64 {
        match self {
            Priority::Low => 10,
            Priority::Normal => 0,
            Priority::Medium => -5,
            Priority::High => -10,
            Priority::Critical => -15,
        }
    }

    /// Map a stored score back to its level.
    pub fn from_score(score: i64) -> Option<Self> {
        match score {
            10 => Some(Priority::Low),
            0 => Some(Priority::Normal),
            -5 => Some(Priority::Medium),
            -10 => Some(Priority::High),
            -15 => Some(Priority::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Lifecycle state of a job. Each state has its own id index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready to be picked up by a worker.
    #[default]
    Inactive,
    /// Waiting for its promotion time.
    Delayed,
    /// Being executed by a worker.
    Active,
    /// Finished successfully.
    Complete,
    /// Finished with an error and no attempts left.
    Failed,
}

impl JobState {
    /// Every lifecycle state, in display order.
    pub const ALL: [JobState; 5] = [
        JobState::Inactive,
        JobState::Delayed,
        JobState::Active,
        JobState::Complete,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Inactive => "inactive",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = JobDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| JobDecodeError::InvalidField {
                field: "state",
                value: s.to_string(),
            })
    }
}

/// Errors raised while decoding a persisted job record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobDecodeError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// A job that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub job_type: String,
    pub data: serde_json::Value,
    pub priority: Priority,
    pub delay: Duration,
    pub max_attempts: u32,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            data,
            priority: Priority::default(),
            delay: Duration::ZERO,
            max_attempts: 1,
        }
    }

    /// Set the priority for this job.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Delay eligibility until `delay` after creation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Allow the job to be retried until it has run `max_attempts` times.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Materialize the job with its allocated id at `now`.
    pub fn into_job(self, id: JobId, now: DateTime<Utc>) -> Job {
        let delay_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX);
        let state = if delay_ms > 0 {
            JobState::Delayed
        } else {
            JobState::Inactive
        };
        let created_at = truncate_millis(now);
        Job {
            id,
            job_type: self.job_type,
            data: self.data,
            priority: self.priority,
            state,
            delay_ms,
            attempts: 0,
            max_attempts: self.max_attempts,
            duration_ms: None,
            error: None,
            created_at,
            updated_at: created_at,
        }
    }
}

/// A job represents a unit of work to be executed by the queue system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Type of job (used for routing to workers).
    pub job_type: String,
    /// Job payload as JSON.
    pub data: serde_json::Value,
    pub priority: Priority,
    pub state: JobState,
    /// Delay before the job becomes eligible, in milliseconds.
    pub delay_ms: u64,
    /// Number of times the job has been started.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Measured execution time, set on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Last failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// When the job becomes eligible to run.
    pub fn promote_at(&self) -> DateTime<Utc> {
        let delay = i64::try_from(self.delay_ms).unwrap_or(i64::MAX);
        self.created_at
            .checked_add_signed(TimeDelta::milliseconds(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Check if the job may run again after a failure.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Encode the job as hash fields.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("type", self.job_type.clone()),
            ("data", self.data.to_string()),
            ("priority", self.priority.score().to_string()),
            ("state", self.state.as_str().to_string()),
            ("delay", self.delay_ms.to_string()),
            ("attempts", self.attempts.to_string()),
            ("max_attempts", self.max_attempts.to_string()),
            ("created_at", self.created_at.timestamp_millis().to_string()),
            ("updated_at", self.updated_at.timestamp_millis().to_string()),
            ("promote_at", self.promote_at().timestamp_millis().to_string()),
        ];
        if let Some(duration) = self.duration_ms {
            fields.push(("duration", duration.to_string()));
        }
        if let Some(error) = &self.error {
            fields.push(("error", error.clone()));
        }
        fields
    }

    /// Decode a job from its hash fields.
    pub fn from_fields(id: JobId, fields: &HashMap<String, String>) -> Result<Self, JobDecodeError> {
        let job_type = required(fields, "type")?.to_string();
        let data = serde_json::from_str(required(fields, "data")?).map_err(|_| {
            JobDecodeError::InvalidField {
                field: "data",
                value: fields["data"].clone(),
            }
        })?;
        let score: i64 = parse(fields, "priority")?;
        let priority = Priority::from_score(score).ok_or_else(|| JobDecodeError::InvalidField {
            field: "priority",
            value: score.to_string(),
        })?;

        Ok(Self {
            id,
            job_type,
            data,
            priority,
            state: required(fields, "state")?.parse()?,
            delay_ms: parse(fields, "delay")?,
            attempts: parse(fields, "attempts")?,
            max_attempts: parse(fields, "max_attempts")?,
            duration_ms: fields.get("duration").map(|_| parse(fields, "duration")).transpose()?,
            error: fields.get("error").cloned(),
            created_at: timestamp(fields, "created_at")?,
            updated_at: timestamp(fields, "updated_at")?,
        })
    }
}

fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

fn required<'a>(
    fields: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, JobDecodeError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(JobDecodeError::MissingField(name))
}

fn parse<T: std::str::FromStr>(
    fields: &HashMap<String, String>,
    name: &'static str,
) -> Result<T, JobDecodeError> {
    let raw = required(fields, name)?;
    raw.parse().map_err(|_| JobDecodeError::InvalidField {
        field: name,
        value: raw.to_string(),
    })
}

fn timestamp(
    fields: &HashMap<String, String>,
    name: &'static str,
) -> Result<DateTime<Utc>, JobDecodeError> {
    let millis: i64 = parse(fields, name)?;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| JobDecodeError::InvalidField {
        field: name,
        value: millis.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_map(job: &Job) -> HashMap<String, String> {
        job.to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn delayed_job_promotes_after_delay() {
        let now = Utc::now();
        let job = NewJob::new("email", serde_json::json!({"to": "a@b.c"}))
            .with_delay(Duration::from_millis(1000))
            .into_job(JobId(7), now);

        assert_eq!(job.state, JobState::Delayed);
        assert_eq!(
            job.promote_at().timestamp_millis(),
            now.timestamp_millis() + 1000
        );
    }

    #[test]
    fn job_without_delay_starts_inactive() {
        let job = NewJob::new("sms", serde_json::Value::Null).into_job(JobId(1), Utc::now());
        assert_eq!(job.state, JobState::Inactive);
        assert_eq!(job.promote_at(), job.created_at);
    }

    #[test]
    fn decodes_what_it_encodes() {
        let mut job = NewJob::new("email", serde_json::json!({"n": 1}))
            .with_priority(Priority::High)
            .with_max_attempts(3)
            .into_job(JobId(42), Utc::now());
        job.duration_ms = Some(150);
        job.error = Some("boom".into());

        let decoded = Job::from_fields(job.id, &field_map(&job)).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn missing_field_is_reported() {
        let job = NewJob::new("email", serde_json::Value::Null).into_job(JobId(3), Utc::now());
        let mut fields = field_map(&job);
        fields.remove("state");

        assert_eq!(
            Job::from_fields(job.id, &fields),
            Err(JobDecodeError::MissingField("state"))
        );
    }

    #[test]
    fn unknown_priority_score_is_rejected() {
        let job = NewJob::new("email", serde_json::Value::Null).into_job(JobId(3), Utc::now());
        let mut fields = field_map(&job);
        fields.insert("priority".into(), "3".into());

        assert!(matches!(
            Job::from_fields(job.id, &fields),
            Err(JobDecodeError::InvalidField { field: "priority", .. })
        ));
    }

    #[test]
    fn states_parse_from_index_names() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>(), Ok(state));
        }
        assert!("queued".parse::<JobState>().is_err());
    }
}
