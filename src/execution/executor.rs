//! Job execution engine.
//!
//! The [`JobExecutor`] runs a single job through the execution lifecycle:
//! it creates the execution record, resolves the handler, invokes it under
//! the job's timeout, persists the outcome, and decides whether a retry is
//! scheduled. Timeouts abandon the handler task rather than blocking on it:
//! the execution is finalized as failed immediately and a handler that
//! keeps running in the background has its eventual result discarded.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::timeout;

use super::tracker::RunTracker;
use crate::core::{ExecutionId, Job};
use crate::events::{Event, EventBus};
use crate::handler::HandlerRegistry;
use crate::storage::{JobExecution, JobStore};

/// Executes individual jobs with timeout enforcement and retry scheduling.
pub struct JobExecutor<S> {
    store: Arc<S>,
    registry: Arc<HandlerRegistry>,
    tracker: RunTracker<S>,
    event_bus: Arc<EventBus>,
}

impl<S: JobStore + 'static> JobExecutor<S> {
    /// Create a new executor.
    pub fn new(store: Arc<S>, registry: Arc<HandlerRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            tracker: RunTracker::new(Arc::clone(&store)),
            store,
            registry,
            event_bus,
        }
    }

    /// Execute one attempt of a job.
    ///
    /// `retry_attempt` is 0 for the first attempt of a trigger cycle;
    /// `triggered_by` links a retry to the failed execution it follows.
    /// Returns the finalized execution record.
    pub async fn execute(
        &self,
        mut job: Job,
        retry_attempt: u32,
        triggered_by: Option<ExecutionId>,
    ) -> JobExecution {
        let mut execution = JobExecution::new(job.id().clone(), retry_attempt, triggered_by);
        self.tracker.record_created(&execution).await;

        execution.mark_running();
        self.tracker.record_transition(&execution).await;
        self.event_bus
            .emit(Event::execution_started(
                job.id().clone(),
                execution.id,
                retry_attempt,
            ))
            .await;

        // Err carries (message, retriable). Handler errors, timeouts, and
        // panics are retriable; a missing registration will not self-heal
        // and is not.
        let outcome: Result<Value, (String, bool)> = match self.registry.resolve(job.job_type()) {
            None => Err((
                format!("no handler registered for job type '{}'", job.job_type()),
                false,
            )),
            Some(handler) => {
                let snapshot = job.clone();
                let invocation = tokio::spawn(async move { handler.run(&snapshot).await });
                match timeout(job.timeout(), invocation).await {
                    // Dropping the JoinHandle detaches the task; the
                    // execution is finalized without waiting for it.
                    Err(_) => Err((
                        format!("handler timed out after {:?}", job.timeout()),
                        true,
                    )),
                    Ok(Err(join_err)) if join_err.is_panic() => {
                        Err(("handler panicked".to_string(), true))
                    }
                    Ok(Err(join_err)) => Err((format!("handler task failed: {}", join_err), true)),
                    Ok(Ok(Ok(value))) => Ok(value),
                    Ok(Ok(Err(err))) => Err((err.to_string(), true)),
                }
            }
        };

        let started_at = execution.started_at.unwrap_or(execution.created_at);
        let mut will_retry = false;

        match outcome {
            Ok(value) => {
                execution.mark_succeeded(value);
                self.tracker.record_transition(&execution).await;

                let duration = execution
                    .duration()
                    .and_then(|d| d.to_std().ok())
                    .unwrap_or_default();
                tracing::info!(
                    job_id = %job.id(),
                    execution_id = %execution.id,
                    ?duration,
                    "Job execution succeeded"
                );
                self.event_bus
                    .emit(Event::execution_succeeded(
                        job.id().clone(),
                        execution.id,
                        duration,
                    ))
                    .await;
            }
            Err((message, retriable)) => {
                will_retry = retriable && job.retry_policy().should_retry(retry_attempt);
                execution.retry_scheduled = will_retry;
                execution.mark_failed(&message);
                self.tracker.record_transition(&execution).await;

                tracing::warn!(
                    job_id = %job.id(),
                    execution_id = %execution.id,
                    retry_attempt,
                    will_retry,
                    error = %message,
                    "Job execution failed"
                );
                self.event_bus
                    .emit(Event::execution_failed(
                        job.id().clone(),
                        execution.id,
                        message,
                        will_retry,
                    ))
                    .await;
            }
        }

        // Advance the job's schedule bookkeeping regardless of outcome, so
        // due-ness moves forward even on failure.
        job.set_last_execution(started_at);
        let next = if will_retry {
            let at = Utc::now()
                + chrono::Duration::from_std(job.retry_policy().delay)
                    .unwrap_or_else(|_| chrono::Duration::zero());
            self.event_bus
                .emit(Event::retry_scheduled(
                    job.id().clone(),
                    execution.id,
                    retry_attempt + 1,
                    at,
                ))
                .await;
            Some(at)
        } else {
            job.trigger().next_after(started_at).ok()
        };
        job.set_next_execution(next);

        if let Err(e) = self.store.update_job(job.clone()).await {
            tracing::warn!(job_id = %job.id(), error = %e, "Failed to update job schedule state");
        }

        execution
    }
}
