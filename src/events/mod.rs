//! Lifecycle events and event handling.
//!
//! The executor emits an event for each execution transition, giving
//! callers observability into the engine without coupling them to the
//! storage layer. Handlers are registered on an [`EventBus`] before the
//! scheduler starts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::core::{ExecutionId, JobId};

/// Lifecycle events emitted during job execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// An execution has started running.
    ExecutionStarted {
        job_id: JobId,
        execution_id: ExecutionId,
        /// 0 for the first attempt of a trigger cycle.
        retry_attempt: u32,
        timestamp: DateTime<Utc>,
    },

    /// An execution completed successfully.
    ExecutionSucceeded {
        job_id: JobId,
        execution_id: ExecutionId,
        duration: Duration,
        timestamp: DateTime<Utc>,
    },

    /// An execution failed (handler error, timeout, or unresolvable type).
    ExecutionFailed {
        job_id: JobId,
        execution_id: ExecutionId,
        error: String,
        /// Whether a retry was scheduled for this failure.
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },

    /// A retry was scheduled after a failure.
    RetryScheduled {
        job_id: JobId,
        /// The failed execution being retried.
        execution_id: ExecutionId,
        /// The 0-indexed attempt number the retry will carry.
        next_attempt: u32,
        /// When the retry becomes due.
        at: DateTime<Utc>,
    },
}

impl Event {
    /// The job this event belongs to.
    pub fn job_id(&self) -> &JobId {
        match self {
            Event::ExecutionStarted { job_id, .. } => job_id,
            Event::ExecutionSucceeded { job_id, .. } => job_id,
            Event::ExecutionFailed { job_id, .. } => job_id,
            Event::RetryScheduled { job_id, .. } => job_id,
        }
    }

    /// Create an ExecutionStarted event.
    pub fn execution_started(
        job_id: JobId,
        execution_id: ExecutionId,
        retry_attempt: u32,
    ) -> Self {
        Event::ExecutionStarted {
            job_id,
            execution_id,
            retry_attempt,
            timestamp: Utc::now(),
        }
    }

    /// Create an ExecutionSucceeded event.
    pub fn execution_succeeded(
        job_id: JobId,
        execution_id: ExecutionId,
        duration: Duration,
    ) -> Self {
        Event::ExecutionSucceeded {
            job_id,
            execution_id,
            duration,
            timestamp: Utc::now(),
        }
    }

    /// Create an ExecutionFailed event.
    pub fn execution_failed(
        job_id: JobId,
        execution_id: ExecutionId,
        error: impl Into<String>,
        will_retry: bool,
    ) -> Self {
        Event::ExecutionFailed {
            job_id,
            execution_id,
            error: error.into(),
            will_retry,
            timestamp: Utc::now(),
        }
    }

    /// Create a RetryScheduled event.
    pub fn retry_scheduled(
        job_id: JobId,
        execution_id: ExecutionId,
        next_attempt: u32,
        at: DateTime<Utc>,
    ) -> Self {
        Event::RetryScheduled {
            job_id,
            execution_id,
            next_attempt,
            at,
        }
    }
}

/// Handler for lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event. Implementations should be quick; slow handlers
    /// delay execution finalization.
    async fn handle(&self, event: &Event);
}

/// Event bus that fans events out to registered handlers.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}
