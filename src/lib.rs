//! cadence - a persistent, database-backed job scheduler.
//!
//! Jobs are defined with a cron or interval trigger, executed through
//! registered handlers with bounded timeouts and retries, and leave a
//! durable run history in a pluggable store. All scheduling state lives in
//! the store, so schedules survive process restarts.

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod handler;
pub mod scheduler;
pub mod storage;

pub use config::{load_job_from_file, load_jobs_from_directory, ConfigError, JobFile};
pub use core::{
    ExecutionId, Job, JobBuilder, JobError, JobId, JobStatus, RetryPolicy, Trigger, TriggerError,
};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{JobExecutor, RunTracker};
pub use handler::{CommandHandler, Handler, HandlerError, HandlerRegistry};
pub use scheduler::{Scheduler, SchedulerError, SchedulerHandle, SchedulerState, SchedulerStatus};
#[cfg(any(feature = "sqlite", test))]
pub use storage::SqliteStore;
pub use storage::{ExecutionStatus, InMemoryStore, JobExecution, JobStore, StorageError};
