//! Built-in subprocess handler.
//!
//! [`CommandHandler`] serves the `command` job type: it runs an external
//! program described by the job's config and captures its output as the
//! execution result.
//!
//! Recognized config keys:
//! - `command` (string, required): the program to run
//! - `args` (array of strings): arguments
//! - `env` (map of string to string): extra environment variables
//! - `working_dir` (string): working directory
//!
//! Timeouts are enforced by the executor, not here; if the execution times
//! out, the subprocess future is dropped along with the handler task.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::process::Command;

use super::{Handler, HandlerError};
use crate::core::Job;

/// Handler for the `command` job type.
#[derive(Debug, Default)]
pub struct CommandHandler;

impl CommandHandler {
    /// Create a new command handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Handler for CommandHandler {
    fn job_type(&self) -> &str {
        "command"
    }

    async fn run(&self, job: &Job) -> Result<Value, HandlerError> {
        let program: String = job
            .get_config("command")
            .ok_or_else(|| HandlerError::ExecutionFailed("missing 'command' in config".into()))?;
        let args: Vec<String> = job.get_config("args").unwrap_or_default();
        let env: HashMap<String, String> = job.get_config("env").unwrap_or_default();
        let working_dir: Option<String> = job.get_config("working_dir");

        let mut command = Command::new(&program);
        command.args(&args).envs(&env).kill_on_drop(true);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        let output = command.output().await.map_err(|e| {
            HandlerError::ExecutionFailed(format!("failed to start '{}': {}", program, e))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            tracing::debug!(job_id = %job.id(), code, stderr = %stderr.trim(), "command failed");
            return Err(HandlerError::CommandFailed(code));
        }

        Ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": output.status.code(),
        }))
    }
}
