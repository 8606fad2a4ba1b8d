//! Retry behavior integration tests.

use async_trait::async_trait;
use cadence::{
    ExecutionStatus, Handler, HandlerError, InMemoryStore, Job, JobBuilder, JobId, JobStore,
    RetryPolicy, Scheduler, Trigger,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::common::wait_for_executions;

/// Handler that fails the first `failures` invocations, then succeeds.
struct FlakyHandler {
    calls: Arc<AtomicU32>,
    failures: u32,
}

#[async_trait]
impl Handler for FlakyHandler {
    fn job_type(&self) -> &str {
        "flaky"
    }

    async fn run(&self, _job: &Job) -> Result<Value, HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(HandlerError::ExecutionFailed(format!(
                "induced failure {}",
                call
            )))
        } else {
            Ok(json!(null))
        }
    }
}

fn flaky_job(id: &str, retries: u32, delay: Duration) -> Job {
    JobBuilder::new(id, format!("Job {}", id), "flaky")
        .trigger(Trigger::parse("@every 1h").unwrap())
        .retry_policy(RetryPolicy::fixed(retries, delay))
        .build()
        .unwrap()
}

/// A persistently failing job with `max_attempts = 2` produces exactly 3
/// executions (attempts 0, 1, 2) and then reverts to its natural tick.
#[tokio::test]
async fn test_retry_bound() {
    let store = Arc::new(InMemoryStore::new());
    let calls = Arc::new(AtomicU32::new(0));

    store
        .create_job(flaky_job("j", 2, Duration::ZERO))
        .await
        .unwrap();

    let mut scheduler = Scheduler::with_store(Arc::clone(&store))
        .with_poll_interval(Duration::from_millis(20));
    scheduler.register_handler(Arc::new(FlakyHandler {
        calls: Arc::clone(&calls),
        failures: u32::MAX,
    }));

    let (handle, task) = scheduler.start().await;

    wait_for_executions(store.as_ref(), &JobId::new("j"), 3, Duration::from_secs(3)).await;
    // No fourth attempt should appear: the job now waits an hour.
    tokio::time::sleep(Duration::from_millis(300)).await;

    handle.shutdown().await.unwrap();
    let _ = task.await;

    let executions = store.list_executions(&JobId::new("j"), 10).await.unwrap();
    assert_eq!(executions.len(), 3);
    assert!(executions.iter().all(|e| e.status == ExecutionStatus::Failed));

    let mut attempts: Vec<u32> = executions.iter().map(|e| e.retry_attempt).collect();
    attempts.sort_unstable();
    assert_eq!(attempts, vec![0, 1, 2]);

    // The final attempt did not schedule another retry, and next_execution
    // is back on the natural schedule.
    let last_attempt = executions
        .iter()
        .find(|e| e.retry_attempt == 2)
        .unwrap();
    assert!(!last_attempt.retry_scheduled);

    let job = store.get_job(&JobId::new("j")).await.unwrap();
    let next = job.next_execution().unwrap();
    let last = job.last_execution().unwrap();
    assert_eq!(next - last, chrono::Duration::hours(1));
}

/// Retries are linked to the execution they follow.
#[tokio::test]
async fn test_retry_linkage() {
    let store = Arc::new(InMemoryStore::new());

    store
        .create_job(flaky_job("j", 2, Duration::ZERO))
        .await
        .unwrap();

    let mut scheduler = Scheduler::with_store(Arc::clone(&store))
        .with_poll_interval(Duration::from_millis(20));
    scheduler.register_handler(Arc::new(FlakyHandler {
        calls: Arc::new(AtomicU32::new(0)),
        failures: u32::MAX,
    }));

    let (handle, task) = scheduler.start().await;
    wait_for_executions(store.as_ref(), &JobId::new("j"), 3, Duration::from_secs(3)).await;
    handle.shutdown().await.unwrap();
    let _ = task.await;

    let mut executions = store.list_executions(&JobId::new("j"), 10).await.unwrap();
    executions.sort_by_key(|e| e.retry_attempt);

    assert!(executions[0].triggered_by.is_none());
    assert_eq!(executions[1].triggered_by, Some(executions[0].id));
    assert_eq!(executions[2].triggered_by, Some(executions[1].id));
}

/// Consecutive attempts are separated by at least the retry delay.
#[tokio::test]
async fn test_retry_delay_spacing() {
    let store = Arc::new(InMemoryStore::new());

    store
        .create_job(flaky_job("j", 2, Duration::from_millis(200)))
        .await
        .unwrap();

    let mut scheduler = Scheduler::with_store(Arc::clone(&store))
        .with_poll_interval(Duration::from_millis(10));
    scheduler.register_handler(Arc::new(FlakyHandler {
        calls: Arc::new(AtomicU32::new(0)),
        failures: u32::MAX,
    }));

    let (handle, task) = scheduler.start().await;
    wait_for_executions(store.as_ref(), &JobId::new("j"), 3, Duration::from_secs(5)).await;
    handle.shutdown().await.unwrap();
    let _ = task.await;

    let mut executions = store.list_executions(&JobId::new("j"), 10).await.unwrap();
    executions.sort_by_key(|e| e.retry_attempt);

    for window in executions.windows(2) {
        let gap = window[1].started_at.unwrap() - window[0].completed_at.unwrap();
        assert!(
            gap >= chrono::Duration::milliseconds(150),
            "retry fired after only {:?}",
            gap
        );
    }
}

/// A retry that succeeds ends the cycle: no further attempts are made.
#[tokio::test]
async fn test_successful_retry_stops_the_cycle() {
    let store = Arc::new(InMemoryStore::new());
    let calls = Arc::new(AtomicU32::new(0));

    store
        .create_job(flaky_job("j", 3, Duration::ZERO))
        .await
        .unwrap();

    let mut scheduler = Scheduler::with_store(Arc::clone(&store))
        .with_poll_interval(Duration::from_millis(20));
    scheduler.register_handler(Arc::new(FlakyHandler {
        calls: Arc::clone(&calls),
        failures: 1,
    }));

    let (handle, task) = scheduler.start().await;

    wait_for_executions(store.as_ref(), &JobId::new("j"), 2, Duration::from_secs(3)).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    handle.shutdown().await.unwrap();
    let _ = task.await;

    let executions = store.list_executions(&JobId::new("j"), 10).await.unwrap();
    assert_eq!(executions.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let retry = executions.iter().find(|e| e.retry_attempt == 1).unwrap();
    assert_eq!(retry.status, ExecutionStatus::Succeeded);
}
