//! Persisted key layout.

use crate::{JobId, JobState};

/// Builds store keys under a common prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Sorted set of every job id in `state`.
    pub fn state_index(&self, state: JobState) -> String {
        format!("{}:jobs:{}", self.prefix, state)
    }

    /// Sorted set of job ids of `job_type` in `state`.
    pub fn type_state_index(&self, job_type: &str, state: JobState) -> String {
        format!("{}:jobs:{}:{}", self.prefix, job_type, state)
    }

    /// Prefix shared by all job hashes; the job id is appended.
    pub fn job_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    pub fn job(&self, id: JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    /// FIFO token list consumed by workers of `job_type`.
    pub fn dispatch(&self, job_type: &str) -> String {
        format!("{}:{}:dispatch", self.prefix, job_type)
    }

    pub fn job_types(&self) -> String {
        format!("{}:job:types", self.prefix)
    }

    pub fn settings(&self) -> String {
        format!("{}:settings", self.prefix)
    }

    pub fn work_time(&self) -> String {
        format!("{}:stats:work-time", self.prefix)
    }

    pub fn ids(&self) -> String {
        format!("{}:ids", self.prefix)
    }
}

impl Default for Keys {
    fn default() -> Self {
        Self::new("q")
    }
}
