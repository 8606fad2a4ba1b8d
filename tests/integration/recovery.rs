//! Restart recovery and idempotence integration tests.

use async_trait::async_trait;
use cadence::{
    ExecutionStatus, Handler, HandlerError, InMemoryStore, Job, JobBuilder, JobExecution, JobId,
    JobStore, RetryPolicy, Scheduler, SqliteStore, Trigger,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::common::wait_for_executions;

struct CountingHandler {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Handler for CountingHandler {
    fn job_type(&self) -> &str {
        "test"
    }

    async fn run(&self, _job: &Job) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!(null))
    }
}

fn hourly_job(id: &str) -> Job {
    JobBuilder::new(id, format!("Job {}", id), "test")
        .trigger(Trigger::parse("@every 1h").unwrap())
        .build()
        .unwrap()
}

/// Executions left Running by a dead scheduler are failed at startup and
/// not re-dispatched purely because of the stale record.
#[tokio::test]
async fn test_stale_running_execution_failed_on_startup() {
    let store = Arc::new(InMemoryStore::new());
    let calls = Arc::new(AtomicU32::new(0));

    // Job ran recently: not naturally due.
    let mut job = hourly_job("j");
    let now = Utc::now();
    job.set_last_execution(now);
    job.set_next_execution(Some(now + chrono::Duration::hours(1)));
    store.create_job(job).await.unwrap();

    // Its execution was mid-flight when the previous process died.
    let mut stale = JobExecution::new(JobId::new("j"), 0, None);
    stale.mark_running();
    let stale_id = stale.id;
    store.create_execution(stale).await.unwrap();

    let mut scheduler = Scheduler::with_store(Arc::clone(&store))
        .with_poll_interval(Duration::from_millis(20));
    scheduler.register_handler(Arc::new(CountingHandler {
        calls: Arc::clone(&calls),
    }));

    let (handle, task) = scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown().await.unwrap();
    let _ = task.await;

    let stale = store.get_execution(&stale_id).await.unwrap();
    assert_eq!(stale.status, ExecutionStatus::Failed);
    assert!(stale
        .error
        .as_deref()
        .unwrap()
        .contains("interrupted by scheduler restart"));

    // The abandoned execution did not cause a re-run.
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        store.list_executions(&JobId::new("j"), 10).await.unwrap().len(),
        1
    );
}

/// A pending retry encoded in `next_execution` survives a restart: the new
/// scheduler dispatches it with the attempt counter and linkage intact.
#[tokio::test]
async fn test_pending_retry_survives_restart() {
    let store = Arc::new(InMemoryStore::new());
    let calls = Arc::new(AtomicU32::new(0));

    let now = Utc::now();
    let mut job = hourly_job("j");
    job = job.with_retry_policy(RetryPolicy::fixed(2, Duration::from_secs(1)));
    job.set_last_execution(now - chrono::Duration::minutes(5));
    // The retry scheduled by the previous process, now due.
    job.set_next_execution(Some(now - chrono::Duration::seconds(1)));
    store.create_job(job).await.unwrap();

    let mut failed = JobExecution::new(JobId::new("j"), 0, None);
    failed.mark_running();
    failed.retry_scheduled = true;
    failed.mark_failed("previous failure");
    let failed_id = failed.id;
    store.create_execution(failed).await.unwrap();

    let mut scheduler = Scheduler::with_store(Arc::clone(&store))
        .with_poll_interval(Duration::from_millis(20));
    scheduler.register_handler(Arc::new(CountingHandler {
        calls: Arc::clone(&calls),
    }));

    let (handle, task) = scheduler.start().await;
    wait_for_executions(store.as_ref(), &JobId::new("j"), 2, Duration::from_secs(2)).await;
    handle.shutdown().await.unwrap();
    let _ = task.await;

    let executions = store.list_executions(&JobId::new("j"), 10).await.unwrap();
    let retry = executions
        .iter()
        .find(|e| e.id != failed_id)
        .expect("retry execution");
    assert_eq!(retry.retry_attempt, 1);
    assert_eq!(retry.triggered_by, Some(failed_id));
}

/// Restarting against the same store does not re-execute a job that
/// already ran: due-ness is recomputed from persisted state.
#[tokio::test]
async fn test_restart_does_not_double_execute() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cadence.db");
    let calls = Arc::new(AtomicU32::new(0));

    // First process: job runs once.
    {
        let store = Arc::new(SqliteStore::new(&path).await.unwrap());
        store.create_job(hourly_job("j")).await.unwrap();

        let mut scheduler = Scheduler::with_store(Arc::clone(&store))
            .with_poll_interval(Duration::from_millis(20));
        scheduler.register_handler(Arc::new(CountingHandler {
            calls: Arc::clone(&calls),
        }));

        let (handle, task) = scheduler.start().await;
        wait_for_executions(store.as_ref(), &JobId::new("j"), 1, Duration::from_secs(2)).await;
        handle.shutdown().await.unwrap();
        let _ = task.await;
        store.close().await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Second process: same store, nothing is due.
    {
        let store = Arc::new(SqliteStore::new(&path).await.unwrap());

        let mut scheduler = Scheduler::with_store(Arc::clone(&store))
            .with_poll_interval(Duration::from_millis(20));
        scheduler.register_handler(Arc::new(CountingHandler {
            calls: Arc::clone(&calls),
        }));

        let (handle, task) = scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.shutdown().await.unwrap();
        let _ = task.await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.list_executions(&JobId::new("j"), 10).await.unwrap().len(),
            1
        );
        store.close().await;
    }
}
