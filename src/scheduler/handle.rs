//! Control handle for a running scheduler.
//!
//! The handle manages job definitions directly against the store (the loop
//! picks up changes on its next poll tick), and talks to the loop itself
//! over the command channel for status and shutdown. Manual triggering is
//! deliberately just a `next_execution` update: there is no dispatch path
//! that bypasses the loop's mutual-exclusion bookkeeping.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

use super::{SchedulerCommand, SchedulerError, SchedulerState};
use crate::core::{Job, JobId, JobStatus};
use crate::storage::{JobExecution, JobStore};

/// Snapshot of the scheduler's current state.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerStatus {
    /// Loop state.
    pub state: SchedulerState,
    /// Number of executions currently in flight.
    pub in_flight: usize,
    /// Total job definitions in the store.
    pub total_jobs: usize,
    /// Jobs with Active status.
    pub active_jobs: usize,
}

/// Handle for controlling a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    state: Arc<RwLock<SchedulerState>>,
    store: Arc<dyn JobStore>,
}

impl SchedulerHandle {
    pub(crate) fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            command_tx,
            state,
            store,
        }
    }

    /// Create a new job definition.
    pub async fn create_job(&self, job: Job) -> Result<(), SchedulerError> {
        self.store.create_job(job).await?;
        Ok(())
    }

    /// Get a job definition.
    pub async fn job(&self, id: impl Into<JobId>) -> Result<Job, SchedulerError> {
        let id = id.into();
        self.store
            .get_job(&id)
            .await
            .map_err(|_| SchedulerError::JobNotFound(id.to_string()))
    }

    /// List all job definitions.
    pub async fn jobs(&self) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.store.list_jobs().await?)
    }

    /// Pause a job. In-flight executions run to completion; the job is
    /// simply never selected as due while paused.
    pub async fn pause_job(&self, id: impl Into<JobId>) -> Result<(), SchedulerError> {
        self.set_job_status(id.into(), JobStatus::Paused).await
    }

    /// Resume a paused job.
    pub async fn resume_job(&self, id: impl Into<JobId>) -> Result<(), SchedulerError> {
        self.set_job_status(id.into(), JobStatus::Active).await
    }

    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<(), SchedulerError> {
        let mut job = self
            .store
            .get_job(&id)
            .await
            .map_err(|_| SchedulerError::JobNotFound(id.to_string()))?;
        job.set_status(status);
        self.store.update_job(job).await?;
        Ok(())
    }

    /// Request an immediate run by setting `next_execution` to now. The
    /// next poll tick dispatches it, subject to mutual exclusion.
    pub async fn trigger_job(&self, id: impl Into<JobId>) -> Result<(), SchedulerError> {
        let id = id.into();
        let mut job = self
            .store
            .get_job(&id)
            .await
            .map_err(|_| SchedulerError::JobNotFound(id.to_string()))?;
        job.set_next_execution(Some(Utc::now()));
        self.store.update_job(job).await?;
        tracing::info!(job_id = %id, "Manual trigger requested");
        Ok(())
    }

    /// Delete a job definition. Its execution history is retained.
    pub async fn delete_job(&self, id: impl Into<JobId>) -> Result<(), SchedulerError> {
        let id = id.into();
        self.store
            .delete_job(&id)
            .await
            .map_err(|_| SchedulerError::JobNotFound(id.to_string()))?;
        Ok(())
    }

    /// List recent executions of a job, newest first.
    pub async fn executions(
        &self,
        id: impl Into<JobId>,
        limit: usize,
    ) -> Result<Vec<JobExecution>, SchedulerError> {
        Ok(self.store.list_executions(&id.into(), limit).await?)
    }

    /// Get a status snapshot from the running loop.
    pub async fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(SchedulerCommand::Status {
                response: response_tx,
            })
            .await
            .map_err(|_| SchedulerError::ChannelError("failed to send status command".into()))?;

        response_rx
            .await
            .map_err(|_| SchedulerError::ChannelError("failed to receive status response".into()))
    }

    /// Gracefully stop the scheduler, waiting (bounded) for in-flight
    /// executions.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(SchedulerCommand::Shutdown {
                response: response_tx,
            })
            .await
            .map_err(|_| SchedulerError::ChannelError("failed to send shutdown command".into()))?;

        response_rx
            .await
            .map_err(|_| SchedulerError::ChannelError("failed to receive shutdown response".into()))
    }

    /// Get the current loop state.
    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// Check if the loop is running.
    pub async fn is_running(&self) -> bool {
        *self.state.read().await == SchedulerState::Running
    }
}
