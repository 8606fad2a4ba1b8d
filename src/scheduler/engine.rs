//! Scheduler engine implementation.
//!
//! The scheduler polls the job store at a fixed interval, evaluates which
//! active jobs are due, and dispatches each on its own task. An in-process
//! live set of executing job ids guarantees that executions of the same
//! job never overlap. All scheduling state lives in the store, so the loop
//! can be stopped and restarted without losing track of anything beyond
//! executions that were mid-flight (those are failed by [`Scheduler::recover`]
//! at startup).

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use super::handle::{SchedulerHandle, SchedulerStatus};
use super::{SchedulerCommand, SchedulerError, SchedulerState};
use crate::core::{ExecutionId, JobId};
use crate::events::EventBus;
use crate::execution::JobExecutor;
use crate::handler::{Handler, HandlerRegistry};
use crate::storage::JobStore;

/// Buffer size for the command channel between handle and loop.
const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Default poll interval.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default graceful shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// The scheduling engine.
pub struct Scheduler<S> {
    store: Arc<S>,
    registry: HandlerRegistry,
    event_bus: Arc<EventBus>,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    /// Live set of currently executing jobs, keyed by job id.
    in_flight: Arc<RwLock<HashMap<JobId, JoinHandle<()>>>>,
}

impl<S: JobStore + 'static> Scheduler<S> {
    /// Create a new scheduler owning the given store.
    pub fn new(store: S) -> Self {
        Self::with_store(Arc::new(store))
    }

    /// Create a new scheduler with shared store access (useful in tests).
    pub fn with_store(store: Arc<S>) -> Self {
        Self {
            store,
            registry: HandlerRegistry::new(),
            event_bus: Arc::new(EventBus::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            in_flight: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Arc::new(event_bus);
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Register a handler. Handlers must be registered before [`start`].
    ///
    /// [`start`]: Scheduler::start
    pub fn register_handler(&mut self, handler: Arc<dyn Handler>) {
        self.registry.register(handler);
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Reconcile executions left over from a previous process.
    ///
    /// Any execution still Pending or Running in the store did not survive
    /// its scheduler; it is marked Failed so it can never be mistaken for
    /// live work. A pending retry encoded in a job's `next_execution` is
    /// untouched and will fire normally.
    pub async fn recover(&self) -> Result<Vec<ExecutionId>, SchedulerError> {
        let incomplete = self.store.list_incomplete_executions().await?;
        let mut recovered = Vec::new();

        for mut execution in incomplete {
            execution.mark_failed("interrupted by scheduler restart");
            if let Err(e) = self.store.update_execution(execution.clone()).await {
                tracing::warn!(
                    execution_id = %execution.id,
                    error = %e,
                    "Failed to mark stale execution during recovery"
                );
            }
            recovered.push(execution.id);
        }

        if !recovered.is_empty() {
            tracing::info!(count = recovered.len(), "Marked stale executions as failed");
        }

        Ok(recovered)
    }

    /// Start the scheduler and return a handle for controlling it.
    pub async fn start(mut self) -> (SchedulerHandle, JoinHandle<()>) {
        if let Err(e) = self.recover().await {
            tracing::warn!(error = %e, "Startup recovery failed; continuing");
        }

        let registry = Arc::new(std::mem::take(&mut self.registry));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));

        let handle = SchedulerHandle::new(
            command_tx,
            Arc::clone(&state),
            Arc::clone(&self.store) as Arc<dyn JobStore>,
        );

        let loop_task = tokio::spawn(async move {
            self.run(registry, command_rx, state).await;
        });

        (handle, loop_task)
    }

    /// Main scheduler loop.
    async fn run(
        self,
        registry: Arc<HandlerRegistry>,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
    ) {
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&self.store),
            registry,
            Arc::clone(&self.event_bus),
        ));

        tracing::info!(poll_interval = ?self.poll_interval, "Scheduler started");
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if *state.read().await == SchedulerState::Running {
                        self.poll(&executor).await;
                    }
                    self.cleanup_finished().await;
                }

                Some(command) = command_rx.recv() => {
                    match command {
                        SchedulerCommand::Status { response } => {
                            let _ = response.send(self.build_status(&state).await);
                        }
                        SchedulerCommand::Shutdown { response } => {
                            *state.write().await = SchedulerState::Stopped;
                            self.await_in_flight().await;
                            let _ = response.send(());
                            tracing::info!("Scheduler stopped");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// One poll tick: find due jobs and dispatch them.
    ///
    /// A store read failure skips the tick; the loop retries next interval.
    async fn poll(&self, executor: &Arc<JobExecutor<S>>) {
        let jobs = match self.store.list_active_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list active jobs; skipping poll tick");
                return;
            }
        };

        let now = Utc::now();
        for job in jobs {
            if !job.is_due(now) {
                continue;
            }

            // Mutual exclusion: never dispatch a job that is still executing.
            if self.in_flight.read().await.contains_key(job.id()) {
                tracing::debug!(job_id = %job.id(), "Job still executing; skipping dispatch");
                continue;
            }

            // Retry linkage: a failure that scheduled a retry makes this
            // dispatch attempt N+1 of the same trigger cycle.
            let (attempt, triggered_by) = match self.store.latest_execution(job.id()).await {
                Ok(Some(prev)) if prev.retry_scheduled => (prev.retry_attempt + 1, Some(prev.id)),
                Ok(_) => (0, None),
                Err(e) => {
                    tracing::warn!(job_id = %job.id(), error = %e, "Failed to read latest execution; treating dispatch as a fresh attempt");
                    (0, None)
                }
            };

            tracing::info!(job_id = %job.id(), attempt, "Dispatching due job");

            let job_id = job.id().clone();
            let executor = Arc::clone(executor);
            let in_flight = Arc::clone(&self.in_flight);
            let task_job_id = job_id.clone();

            let handle = tokio::spawn(async move {
                executor.execute(job, attempt, triggered_by).await;
                in_flight.write().await.remove(&task_job_id);
            });

            self.in_flight.write().await.insert(job_id, handle);
        }
    }

    /// Drop live-set entries whose task has already finished.
    async fn cleanup_finished(&self) {
        let mut in_flight = self.in_flight.write().await;
        in_flight.retain(|_, handle| !handle.is_finished());
    }

    /// Assemble a status snapshot for the handle.
    async fn build_status(&self, state: &Arc<RwLock<SchedulerState>>) -> SchedulerStatus {
        let (total_jobs, active_jobs) = match self.store.list_jobs().await {
            Ok(jobs) => {
                let active = jobs.iter().filter(|j| j.is_active()).count();
                (jobs.len(), active)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list jobs for status");
                (0, 0)
            }
        };

        SchedulerStatus {
            state: *state.read().await,
            in_flight: self.in_flight.read().await.len(),
            total_jobs,
            active_jobs,
        }
    }

    /// Wait for in-flight executions to finish, bounded by the shutdown
    /// timeout.
    async fn await_in_flight(&self) {
        let running = self.in_flight.read().await.len();
        if running == 0 {
            return;
        }

        tracing::info!(
            running,
            timeout = ?self.shutdown_timeout,
            "Graceful shutdown: waiting for in-flight executions"
        );

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;

        loop {
            {
                let mut in_flight = self.in_flight.write().await;
                in_flight.retain(|_, handle| !handle.is_finished());
                if in_flight.is_empty() {
                    tracing::info!("All in-flight executions completed");
                    return;
                }
            }

            if tokio::time::Instant::now() >= deadline {
                let remaining = self.in_flight.read().await.len();
                tracing::warn!(
                    remaining,
                    "Shutdown timeout exceeded with executions still running"
                );
                return;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
