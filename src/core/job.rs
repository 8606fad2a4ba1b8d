//! Job definition: a scheduled unit of work.
//!
//! A [`Job`] pairs a [`Trigger`] with a handler type discriminator and the
//! opaque configuration payload the handler receives at execution time. The
//! scheduler maintains `last_execution`/`next_execution`; everything else is
//! set at creation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use super::retry::RetryPolicy;
use super::trigger::Trigger;
use super::types::JobId;

/// Default handler timeout when a job does not specify one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors that can occur when building a job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Missing or empty name.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Missing or empty job type.
    #[error("invalid job type: {0}")]
    InvalidJobType(String),

    /// A trigger is required.
    #[error("missing trigger: {0}")]
    MissingTrigger(String),

    /// Invalid timeout.
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
}

/// Whether a job is eligible for scheduling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is considered when evaluating due-ness.
    #[default]
    Active,
    /// Job is never selected as due.
    Paused,
}

/// A scheduled unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    id: JobId,
    /// Human-readable name, unique across jobs.
    name: String,
    /// Discriminator selecting a registered handler.
    job_type: String,
    /// When the job fires.
    trigger: Trigger,
    /// Opaque payload passed to the handler at execution time.
    config: HashMap<String, Value>,
    /// Active/Paused.
    status: JobStatus,
    /// Maximum handler execution duration before forced failure.
    #[serde(with = "timeout_secs")]
    timeout: Duration,
    /// Retry bounds for retriable failures.
    retry: RetryPolicy,
    /// When the job last started executing.
    last_execution: Option<DateTime<Utc>>,
    /// Next due time. Holds retry times and manual triggers; natural
    /// due-ness is always recomputed from `last_execution` + trigger.
    next_execution: Option<DateTime<Utc>>,
    /// When the job was created.
    created_at: DateTime<Utc>,
    /// When the job was last updated.
    updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new active job with default timeout and no retries.
    pub fn new(
        id: impl Into<JobId>,
        name: impl Into<String>,
        job_type: impl Into<String>,
        trigger: Trigger,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            job_type: job_type.into(),
            trigger,
            config: HashMap::new(),
            status: JobStatus::Active,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::none(),
            last_execution: None,
            next_execution: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the configuration payload.
    pub fn with_config(mut self, config: HashMap<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Add a single configuration value.
    pub fn with_config_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Set the handler timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the job status.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    /// Get the job ID.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Get the job name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the handler type discriminator.
    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Get the trigger.
    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// Get the configuration payload.
    pub fn config(&self) -> &HashMap<String, Value> {
        &self.config
    }

    /// Get a specific configuration value, deserialized.
    pub fn get_config<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get the job status.
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Check if the job is active.
    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Active
    }

    /// Get the handler timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// When the job last started executing.
    pub fn last_execution(&self) -> Option<DateTime<Utc>> {
        self.last_execution
    }

    /// The stored next due time.
    pub fn next_execution(&self) -> Option<DateTime<Utc>> {
        self.next_execution
    }

    /// When the job was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the job was last updated.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Whether this job is due at `now`.
    ///
    /// Paused jobs are never due. Otherwise a job is due when its trigger
    /// says so (recomputed from `last_execution`, with never-run jobs due
    /// immediately), or when a stored `next_execution` — a pending retry or
    /// a manual trigger — has arrived.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        if self.trigger.is_due(self.last_execution, now) {
            return true;
        }
        self.next_execution.map(|next| now >= next).unwrap_or(false)
    }

    /// Record the start time of the latest execution.
    pub fn set_last_execution(&mut self, at: DateTime<Utc>) {
        self.last_execution = Some(at);
        self.updated_at = Utc::now();
    }

    /// Overwrite the stored next due time.
    pub fn set_next_execution(&mut self, at: Option<DateTime<Utc>>) {
        self.next_execution = at;
        self.updated_at = Utc::now();
    }

    /// Change the job status.
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Raw field bundle used by storage backends to rehydrate a job.
pub(crate) struct JobParts {
    pub id: JobId,
    pub name: String,
    pub job_type: String,
    pub trigger: Trigger,
    pub config: HashMap<String, Value>,
    pub status: JobStatus,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub last_execution: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn from_parts(parts: JobParts) -> Self {
        Self {
            id: parts.id,
            name: parts.name,
            job_type: parts.job_type,
            trigger: parts.trigger,
            config: parts.config,
            status: parts.status,
            timeout: parts.timeout,
            retry: parts.retry,
            last_execution: parts.last_execution,
            next_execution: parts.next_execution,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        }
    }
}

/// Builder for creating jobs with validation.
pub struct JobBuilder {
    id: JobId,
    name: String,
    job_type: String,
    trigger: Option<Trigger>,
    config: HashMap<String, Value>,
    status: JobStatus,
    timeout: Duration,
    retry: RetryPolicy,
}

impl JobBuilder {
    /// Create a new job builder.
    pub fn new(id: impl Into<JobId>, name: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            job_type: job_type.into(),
            trigger: None,
            config: HashMap::new(),
            status: JobStatus::Active,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::none(),
        }
    }

    /// Set the trigger.
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Add a configuration value.
    pub fn config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Replace the whole configuration payload.
    pub fn config_map(mut self, config: HashMap<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Set the handler timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create the job paused.
    pub fn paused(mut self) -> Self {
        self.status = JobStatus::Paused;
        self
    }

    /// Build the job.
    pub fn build(self) -> Result<Job, JobError> {
        if self.name.trim().is_empty() {
            return Err(JobError::InvalidName("name cannot be empty".into()));
        }
        if self.job_type.trim().is_empty() {
            return Err(JobError::InvalidJobType("job type cannot be empty".into()));
        }
        let trigger = self
            .trigger
            .ok_or_else(|| JobError::MissingTrigger(self.id.to_string()))?;
        if self.timeout.is_zero() {
            return Err(JobError::InvalidTimeout("timeout cannot be zero".into()));
        }

        let now = Utc::now();
        Ok(Job {
            id: self.id,
            name: self.name,
            job_type: self.job_type,
            trigger,
            config: self.config,
            status: self.status,
            timeout: self.timeout,
            retry: self.retry,
            last_execution: None,
            next_execution: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Serde helper serializing the timeout as whole seconds.
mod timeout_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
