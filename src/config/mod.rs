//! YAML job-definition loading.
//!
//! Job definitions can be declared in YAML files (one job per file) and
//! loaded into the store at startup. A definition names exactly one of
//! `schedule` (cron expression or `@every` form) or `interval_hours`;
//! declaring both or neither is a configuration error.
//!
//! ```yaml
//! id: nightly-fetch
//! name: Nightly Fetch
//! type: command
//! schedule: "0 2 * * *"
//! config:
//!   command: fetch-feed
//!   args: ["--source", "arxiv"]
//! timeout_secs: 600
//! retry:
//!   max_attempts: 2
//!   delay_secs: 60
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::core::{Job, JobBuilder, JobError, RetryPolicy, Trigger, TriggerError};

/// Errors that can occur when loading job definitions.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a definition file.
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid definition value.
    #[error("invalid job definition: {0}")]
    InvalidDefinition(String),

    /// Invalid trigger expression.
    #[error("invalid trigger: {0}")]
    Trigger(#[from] TriggerError),

    /// Invalid job field.
    #[error("invalid job: {0}")]
    Job(#[from] JobError),
}

/// A job definition as declared in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFile {
    /// Job identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Handler type discriminator.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Cron expression or `@every` form.
    #[serde(default)]
    pub schedule: Option<String>,
    /// Fixed interval in hours; mutually exclusive with `schedule`.
    #[serde(default)]
    pub interval_hours: Option<u64>,
    /// Timezone for cron evaluation.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Opaque handler payload.
    #[serde(default)]
    pub config: HashMap<String, Value>,
    /// Handler timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Retry block.
    #[serde(default)]
    pub retry: Option<RetryFile>,
    /// Create the job paused.
    #[serde(default)]
    pub paused: bool,
}

/// Retry configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryFile {
    /// Maximum retry attempts after a failure.
    pub max_attempts: u32,
    /// Delay in seconds before a retry becomes due.
    #[serde(default)]
    pub delay_secs: u64,
}

impl JobFile {
    /// Convert the definition into a [`Job`], enforcing the
    /// exactly-one-schedule rule.
    pub fn into_job(self) -> Result<Job, ConfigError> {
        let trigger = match (&self.schedule, self.interval_hours) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidDefinition(format!(
                    "job '{}' declares both schedule and interval_hours",
                    self.id
                )));
            }
            (None, None) => {
                return Err(ConfigError::InvalidDefinition(format!(
                    "job '{}' declares neither schedule nor interval_hours",
                    self.id
                )));
            }
            (Some(expression), None) => match &self.timezone {
                Some(tz) => Trigger::with_timezone(expression, tz)?,
                None => Trigger::parse(expression)?,
            },
            (None, Some(hours)) => {
                if self.timezone.is_some() {
                    return Err(ConfigError::InvalidDefinition(format!(
                        "job '{}' sets a timezone on an interval schedule",
                        self.id
                    )));
                }
                Trigger::interval(Duration::from_secs(hours * 3600))?
            }
        };

        let mut builder = JobBuilder::new(self.id, self.name, self.job_type)
            .trigger(trigger)
            .config_map(self.config);

        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(retry) = self.retry {
            builder = builder.retry_policy(RetryPolicy::fixed(
                retry.max_attempts,
                Duration::from_secs(retry.delay_secs),
            ));
        }
        if self.paused {
            builder = builder.paused();
        }

        Ok(builder.build()?)
    }
}

/// Load a single job definition from a YAML file.
pub fn load_job_from_file(path: impl AsRef<Path>) -> Result<Job, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let file: JobFile = serde_yaml::from_str(&contents)?;
    file.into_job()
}

/// Load all job definitions (`*.yaml` / `*.yml`) from a directory.
///
/// File order is not significant; jobs are returned sorted by id. Duplicate
/// ids across files are rejected.
pub fn load_jobs_from_directory(path: impl AsRef<Path>) -> Result<Vec<Job>, ConfigError> {
    let mut jobs = Vec::new();
    let mut seen = HashSet::new();

    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);
        if !is_yaml {
            continue;
        }

        let job = load_job_from_file(&path).map_err(|e| {
            ConfigError::InvalidDefinition(format!("{}: {}", path.display(), e))
        })?;

        if !seen.insert(job.id().clone()) {
            return Err(ConfigError::InvalidDefinition(format!(
                "duplicate job id '{}' in {}",
                job.id(),
                path.display()
            )));
        }
        jobs.push(job);
    }

    jobs.sort_by(|a, b| a.id().as_str().cmp(b.id().as_str()));
    Ok(jobs)
}
