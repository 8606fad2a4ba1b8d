//! Handler trait and registry.
//!
//! A [`Handler`] performs the actual work of a job type. External code
//! registers handlers before the scheduler loop starts; the executor
//! resolves them by the job's `job_type` discriminator at dispatch time.

mod command;

pub use command::CommandHandler;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::core::Job;

/// Errors a handler can produce.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Handler execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// External command failed with an exit code.
    #[error("command exited with code {0}")]
    CommandFailed(i32),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// The core trait for job handlers.
///
/// # Example
///
/// ```ignore
/// use cadence::{Handler, HandlerError, Job};
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// struct FeedFetcher;
///
/// #[async_trait]
/// impl Handler for FeedFetcher {
///     fn job_type(&self) -> &str {
///         "feed_fetch"
///     }
///
///     async fn run(&self, job: &Job) -> Result<Value, HandlerError> {
///         let url: String = job
///             .get_config("url")
///             .ok_or_else(|| HandlerError::ExecutionFailed("missing url".into()))?;
///         // ... fetch and process ...
///         Ok(json!({ "url": url, "items": 42 }))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    /// The job type this handler serves.
    fn job_type(&self) -> &str;

    /// Execute the job, returning an opaque result payload on success.
    async fn run(&self, job: &Job) -> Result<Value, HandlerError>;
}

/// Registry mapping job-type strings to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its job type. A later registration for the
    /// same type replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers
            .insert(handler.job_type().to_string(), handler);
    }

    /// Resolve the handler for a job type.
    pub fn resolve(&self, job_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Registered job types.
    pub fn job_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
