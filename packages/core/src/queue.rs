//! Queue configuration and monitoring types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{JobState, Keys};

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

/// Delayed-job promotion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Time between promotion ticks (milliseconds).
    pub interval_ms: u64,
    /// Maximum delayed entries examined per tick.
    pub batch_limit: usize,
}

impl PromotionConfig {
    pub fn new(interval: Duration, batch_limit: usize) -> Self {
        Self {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            batch_limit,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            batch_limit: 50,
        }
    }
}

/// Worker unit settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// How long a worker blocks on its dispatch list before polling again.
    pub poll_timeout_ms: u64,
}

impl WorkerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
        }
    }
}

/// Configuration for queue behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Prefix for every persisted key.
    pub prefix: String,
    pub promotion: PromotionConfig,
    pub worker: WorkerConfig,
    /// Default grace period for shutdown (milliseconds). `None` waits for running jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_grace_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefix: "q".to_string(),
            promotion: PromotionConfig::default(),
            worker: WorkerConfig::default(),
            shutdown_grace_ms: None,
        }
    }
}

impl QueueConfig {
    pub fn keys(&self) -> Keys {
        Keys::new(self.prefix.clone())
    }

    pub fn shutdown_grace(&self) -> Option<Duration> {
        self.shutdown_grace_ms.map(Duration::from_millis)
    }

    /// Build a config from environment variables.
    ///
    /// - `QUEUE_PREFIX` (default: `q`)
    /// - `QUEUE_PROMOTE_INTERVAL_MS` (default: `5000`)
    /// - `QUEUE_PROMOTE_LIMIT` (default: `50`)
    /// - `QUEUE_POLL_TIMEOUT_MS` (default: `1000`)
    /// - `QUEUE_SHUTDOWN_GRACE_MS` (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        let value = |var: &'static str| lookup(var).and_then(non_empty);

        if let Some(prefix) = value("QUEUE_PREFIX") {
            cfg.prefix = prefix;
        }
        if let Some(raw) = value("QUEUE_PROMOTE_INTERVAL_MS") {
            cfg.promotion.interval_ms = parse_var("QUEUE_PROMOTE_INTERVAL_MS", raw)?;
        }
        if let Some(raw) = value("QUEUE_PROMOTE_LIMIT") {
            cfg.promotion.batch_limit = parse_var("QUEUE_PROMOTE_LIMIT", raw)?;
        }
        if let Some(raw) = value("QUEUE_POLL_TIMEOUT_MS") {
            cfg.worker.poll_timeout_ms = parse_var("QUEUE_POLL_TIMEOUT_MS", raw)?;
        }
        if let Some(raw) = value("QUEUE_SHUTDOWN_GRACE_MS") {
            cfg.shutdown_grace_ms = Some(parse_var("QUEUE_SHUTDOWN_GRACE_MS", raw)?);
        }

        Ok(cfg)
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::InvalidValue { var, value: raw })
}

/// Job counts per lifecycle state plus cumulative work time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub inactive: u64,
    pub delayed: u64,
    pub active: u64,
    pub complete: u64,
    pub failed: u64,
    /// Cumulative execution time of completed jobs in milliseconds.
    pub work_time_ms: u64,
}

impl QueueStats {
    /// Record the count for one state.
    pub fn set(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Inactive => self.inactive = count,
            JobState::Delayed => self.delayed = count,
            JobState::Active => self.active = count,
            JobState::Complete => self.complete = count,
            JobState::Failed => self.failed = count,
        }
    }

    /// Jobs not yet finished (inactive + delayed + active).
    pub fn pending(&self) -> u64 {
        self.inactive + self.delayed + self.active
    }

    /// Total processed jobs.
    pub fn processed(&self) -> u64 {
        self.complete + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.complete as f64 / total as f64) * 100.0)
        }
    }

    /// Average execution time of completed jobs.
    pub fn avg_duration_ms(&self) -> Option<f64> {
        if self.complete == 0 {
            None
        } else {
            Some(self.work_time_ms as f64 / self.complete as f64)
        }
    }
}
