//! Scheduler loop and control handle.
//!
//! The [`Scheduler`] owns the poll loop that evaluates due jobs and
//! dispatches them; the [`SchedulerHandle`] is the control surface callers
//! use to manage jobs and stop the loop.

mod engine;
mod handle;

pub use engine::Scheduler;
pub use handle::{SchedulerHandle, SchedulerStatus};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::storage::StorageError;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Command channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// State of the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Loop is not running.
    Stopped,
    /// Loop is polling for due jobs.
    Running,
}

/// Commands sent from the handle to the running loop.
pub(crate) enum SchedulerCommand {
    /// Report loop status.
    Status {
        response: oneshot::Sender<SchedulerStatus>,
    },
    /// Gracefully stop the loop.
    Shutdown { response: oneshot::Sender<()> },
}
