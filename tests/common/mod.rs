//! Common test utilities shared across integration tests.

use cadence::{JobExecution, JobId, JobStore};
use std::time::Duration;

/// Wait until a job has at least `count` executions recorded, polling the
/// store. More reliable than fixed sleeps since execution timing varies.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_executions(
    store: &dyn JobStore,
    job_id: &JobId,
    count: usize,
    timeout: Duration,
) -> Vec<JobExecution> {
    let start = tokio::time::Instant::now();
    loop {
        let executions = store.list_executions(job_id, count.max(16)).await.unwrap();
        if executions.len() >= count {
            return executions;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for {} execution(s) of {}, have {}",
                count,
                job_id,
                executions.len()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until every recorded execution of a job is terminal.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_quiescence(
    store: &dyn JobStore,
    job_id: &JobId,
    timeout: Duration,
) -> Vec<JobExecution> {
    let start = tokio::time::Instant::now();
    loop {
        let executions = store.list_executions(job_id, 64).await.unwrap();
        if !executions.is_empty() && executions.iter().all(|e| e.is_terminal()) {
            return executions;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for executions of {} to settle", job_id);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
