//! Best-effort persistence of execution lifecycle transitions.
//!
//! Every status change flows through the [`RunTracker`]. Persistence
//! failures are logged and swallowed: a dropped status update is preferable
//! to losing the execution entirely, and it must never take down the
//! executor. Retry policy is not decided here.

use std::sync::Arc;

use crate::storage::{JobExecution, JobStore};

/// Records execution lifecycle transitions into the job store.
pub struct RunTracker<S> {
    store: Arc<S>,
}

impl<S: JobStore> RunTracker<S> {
    /// Create a tracker backed by the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Persist a newly created execution record.
    pub async fn record_created(&self, execution: &JobExecution) {
        if let Err(e) = self.store.create_execution(execution.clone()).await {
            tracing::warn!(
                execution_id = %execution.id,
                job_id = %execution.job_id,
                error = %e,
                "Failed to persist new execution record"
            );
        }
    }

    /// Persist a status transition on an existing execution record.
    pub async fn record_transition(&self, execution: &JobExecution) {
        if let Err(e) = self.store.update_execution(execution.clone()).await {
            tracing::warn!(
                execution_id = %execution.id,
                job_id = %execution.job_id,
                status = ?execution.status,
                error = %e,
                "Failed to persist execution transition"
            );
        }
    }
}
