//! In-memory storage implementation.
//!
//! Thread-safe backend for testing and development. Data is not persisted
//! across restarts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{JobExecution, JobStore, StorageError};
use crate::core::{ExecutionId, Job, JobId};

/// In-memory storage backend.
pub struct InMemoryStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    executions: RwLock<HashMap<ExecutionId, JobExecution>>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create_job(&self, job: Job) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        if jobs.contains_key(job.id()) {
            return Err(StorageError::DuplicateKey(format!("job: {}", job.id())));
        }
        if jobs.values().any(|j| j.name() == job.name()) {
            return Err(StorageError::DuplicateKey(format!(
                "job name: {}",
                job.name()
            )));
        }
        jobs.insert(job.id().clone(), job);
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Job, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = jobs.values().cloned().collect();
        result.sort_by_key(|j| j.created_at());
        Ok(result)
    }

    async fn list_active_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = jobs.values().filter(|j| j.is_active()).cloned().collect();
        result.sort_by_key(|j| j.created_at());
        Ok(result)
    }

    async fn update_job(&self, job: Job) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        if !jobs.contains_key(job.id()) {
            return Err(StorageError::NotFound(format!("job: {}", job.id())));
        }
        jobs.insert(job.id().clone(), job);
        Ok(())
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        jobs.remove(id)
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))?;
        Ok(())
    }

    async fn create_execution(&self, execution: JobExecution) -> Result<(), StorageError> {
        let mut executions = self
            .executions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if executions.contains_key(&execution.id) {
            return Err(StorageError::DuplicateKey(format!(
                "execution: {}",
                execution.id
            )));
        }
        executions.insert(execution.id, execution);
        Ok(())
    }

    async fn get_execution(&self, id: &ExecutionId) -> Result<JobExecution, StorageError> {
        let executions = self
            .executions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        executions
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("execution: {}", id)))
    }

    async fn update_execution(&self, execution: JobExecution) -> Result<(), StorageError> {
        let mut executions = self
            .executions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if !executions.contains_key(&execution.id) {
            return Err(StorageError::NotFound(format!(
                "execution: {}",
                execution.id
            )));
        }
        executions.insert(execution.id, execution);
        Ok(())
    }

    async fn latest_execution(
        &self,
        job_id: &JobId,
    ) -> Result<Option<JobExecution>, StorageError> {
        let executions = self
            .executions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(executions
            .values()
            .filter(|e| &e.job_id == job_id)
            .max_by_key(|e| (e.created_at, e.retry_attempt))
            .cloned())
    }

    async fn list_executions(
        &self,
        job_id: &JobId,
        limit: usize,
    ) -> Result<Vec<JobExecution>, StorageError> {
        let executions = self
            .executions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = executions
            .values()
            .filter(|e| &e.job_id == job_id)
            .cloned()
            .collect();
        // Newest first.
        result.sort_by(|a, b| {
            (b.created_at, b.retry_attempt).cmp(&(a.created_at, a.retry_attempt))
        });
        result.truncate(limit);
        Ok(result)
    }

    async fn list_incomplete_executions(&self) -> Result<Vec<JobExecution>, StorageError> {
        let executions = self
            .executions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(executions
            .values()
            .filter(|e| !e.is_terminal())
            .cloned()
            .collect())
    }
}
