//! Storage abstraction for persisting jobs and execution history.
//!
//! The [`JobStore`] trait is the engine's sole source of durable truth:
//! schedules survive restarts because due-ness is recomputed from what the
//! store says, not from anything held in memory. Two backends are provided:
//! in-memory (testing/development) and SQLite.

mod memory;
#[cfg(any(feature = "sqlite", test))]
mod sqlite;

pub use memory::InMemoryStore;
#[cfg(any(feature = "sqlite", test))]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::{ExecutionId, Job, JobId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Status of a job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Created but not yet started.
    Pending,
    /// Handler is currently running.
    Running,
    /// Handler returned successfully.
    Succeeded,
    /// Handler errored, timed out, or could not be resolved.
    Failed,
}

impl ExecutionStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Succeeded | ExecutionStatus::Failed)
    }
}

/// One concrete invocation attempt of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    /// Unique execution identifier.
    pub id: ExecutionId,
    /// Owning job.
    pub job_id: JobId,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// 0 for the first attempt of a trigger cycle, incrementing per retry.
    pub retry_attempt: u32,
    /// The failed execution this one retries, if any.
    pub triggered_by: Option<ExecutionId>,
    /// Whether a retry was scheduled after this execution failed. Persisted
    /// so attempt numbering survives a scheduler restart.
    pub retry_scheduled: bool,
    /// When the handler invocation started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Handler-defined success payload.
    pub result: Option<Value>,
    /// Failure message, present only on Failed.
    pub error: Option<String>,
    /// When the execution record was created.
    pub created_at: DateTime<Utc>,
}

impl JobExecution {
    /// Create a new pending execution.
    pub fn new(job_id: JobId, retry_attempt: u32, triggered_by: Option<ExecutionId>) -> Self {
        Self {
            id: ExecutionId::new(),
            job_id,
            status: ExecutionStatus::Pending,
            retry_attempt,
            triggered_by,
            retry_scheduled: false,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Mark the execution as running.
    pub fn mark_running(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the execution as succeeded with a result payload.
    pub fn mark_succeeded(&mut self, result: Value) {
        self.status = ExecutionStatus::Succeeded;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
    }

    /// Mark the execution as failed.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// Whether the execution has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock duration, if started and completed.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Storage trait for persisting scheduler state.
#[async_trait]
pub trait JobStore: Send + Sync {
    // Job operations

    /// Save a new job definition. Fails on duplicate id or name.
    async fn create_job(&self, job: Job) -> Result<(), StorageError>;

    /// Get a job by ID.
    async fn get_job(&self, id: &JobId) -> Result<Job, StorageError>;

    /// List all jobs.
    async fn list_jobs(&self) -> Result<Vec<Job>, StorageError>;

    /// List jobs with Active status.
    async fn list_active_jobs(&self) -> Result<Vec<Job>, StorageError>;

    /// Replace a job definition.
    async fn update_job(&self, job: Job) -> Result<(), StorageError>;

    /// Delete a job by ID.
    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError>;

    // Execution operations

    /// Save a new execution record.
    async fn create_execution(&self, execution: JobExecution) -> Result<(), StorageError>;

    /// Get an execution by ID.
    async fn get_execution(&self, id: &ExecutionId) -> Result<JobExecution, StorageError>;

    /// Replace an execution record.
    async fn update_execution(&self, execution: JobExecution) -> Result<(), StorageError>;

    /// The most recently created execution for a job, if any.
    async fn latest_execution(&self, job_id: &JobId)
        -> Result<Option<JobExecution>, StorageError>;

    /// List executions for a job, newest first, at most `limit`.
    async fn list_executions(
        &self,
        job_id: &JobId,
        limit: usize,
    ) -> Result<Vec<JobExecution>, StorageError>;

    /// All executions still in Pending or Running status.
    async fn list_incomplete_executions(&self) -> Result<Vec<JobExecution>, StorageError>;
}
