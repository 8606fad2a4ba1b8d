//! Due-job evaluation and dispatch integration tests.

use async_trait::async_trait;
use cadence::{
    Handler, HandlerError, InMemoryStore, Job, JobBuilder, JobId, JobStore, RetryPolicy,
    Scheduler, Trigger,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{wait_for_executions, wait_for_quiescence};

/// Handler that counts invocations and optionally sleeps.
struct TestHandler {
    calls: Arc<AtomicU32>,
    delay: Duration,
}

impl TestHandler {
    fn new(calls: Arc<AtomicU32>) -> Arc<Self> {
        Arc::new(Self {
            calls,
            delay: Duration::ZERO,
        })
    }

    fn slow(calls: Arc<AtomicU32>, delay: Duration) -> Arc<Self> {
        Arc::new(Self { calls, delay })
    }
}

#[async_trait]
impl Handler for TestHandler {
    fn job_type(&self) -> &str {
        "test"
    }

    async fn run(&self, _job: &Job) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(json!({ "ok": true }))
    }
}

fn interval_job(id: &str, every: &str) -> Job {
    JobBuilder::new(id, format!("Job {}", id), "test")
        .trigger(Trigger::parse(&format!("@every {}", every)).unwrap())
        .build()
        .unwrap()
}

/// A never-run interval job fires immediately, and its next execution is
/// scheduled one interval after the start of the run.
#[tokio::test]
async fn test_interval_job_bootstrap_run() {
    let store = Arc::new(InMemoryStore::new());
    let calls = Arc::new(AtomicU32::new(0));

    store.create_job(interval_job("fetch", "2h")).await.unwrap();

    let mut scheduler = Scheduler::with_store(Arc::clone(&store))
        .with_poll_interval(Duration::from_millis(20));
    scheduler.register_handler(TestHandler::new(Arc::clone(&calls)));

    let (handle, task) = scheduler.start().await;

    let executions =
        wait_for_quiescence(store.as_ref(), &JobId::new("fetch"), Duration::from_secs(2)).await;

    handle.shutdown().await.unwrap();
    let _ = task.await;

    assert_eq!(executions.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let job = store.get_job(&JobId::new("fetch")).await.unwrap();
    let last = job.last_execution().expect("last_execution set");
    let next = job.next_execution().expect("next_execution set");
    assert_eq!(next - last, chrono::Duration::hours(2));
}

/// A job that already ran is not due again until its interval elapses, but
/// a manual trigger makes the next poll tick dispatch it.
#[tokio::test]
async fn test_manual_trigger() {
    let store = Arc::new(InMemoryStore::new());
    let calls = Arc::new(AtomicU32::new(0));

    let mut job = interval_job("fetch", "2h");
    job.set_last_execution(Utc::now());
    job.set_next_execution(Some(Utc::now() + chrono::Duration::hours(2)));
    store.create_job(job).await.unwrap();

    let mut scheduler = Scheduler::with_store(Arc::clone(&store))
        .with_poll_interval(Duration::from_millis(20));
    scheduler.register_handler(TestHandler::new(Arc::clone(&calls)));

    let (handle, task) = scheduler.start().await;

    // Not due: nothing should run.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    handle.trigger_job("fetch").await.unwrap();
    wait_for_executions(store.as_ref(), &JobId::new("fetch"), 1, Duration::from_secs(2)).await;

    handle.shutdown().await.unwrap();
    let _ = task.await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Executions of the same job never overlap: for any two executions, one
/// completes before the other starts.
#[tokio::test]
async fn test_same_job_executions_never_overlap() {
    let store = Arc::new(InMemoryStore::new());
    let calls = Arc::new(AtomicU32::new(0));

    store.create_job(interval_job("busy", "1s")).await.unwrap();

    let mut scheduler = Scheduler::with_store(Arc::clone(&store))
        .with_poll_interval(Duration::from_millis(10));
    scheduler.register_handler(TestHandler::slow(
        Arc::clone(&calls),
        Duration::from_millis(250),
    ));

    let (handle, task) = scheduler.start().await;

    // Let a few trigger cycles elapse.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    handle.shutdown().await.unwrap();
    let _ = task.await;

    let executions = store
        .list_executions(&JobId::new("busy"), 64)
        .await
        .unwrap();
    assert!(!executions.is_empty());

    // Pairwise interval check over [started_at, completed_at).
    for (i, a) in executions.iter().enumerate() {
        for b in executions.iter().skip(i + 1) {
            let (a_start, a_end) = (a.started_at.unwrap(), a.completed_at.unwrap());
            let (b_start, b_end) = (b.started_at.unwrap(), b.completed_at.unwrap());
            assert!(
                a_end <= b_start || b_end <= a_start,
                "executions {} and {} overlap",
                a.id,
                b.id
            );
        }
    }
}

/// A job whose type has no registered handler produces exactly one failed
/// execution per trigger cycle, with no retry despite the retry budget.
#[tokio::test]
async fn test_unknown_job_type_fails_without_retry() {
    let store = Arc::new(InMemoryStore::new());

    let job = JobBuilder::new("orphan", "Orphan", "unregistered")
        .trigger(Trigger::parse("@every 1h").unwrap())
        .retry_policy(RetryPolicy::fixed(3, Duration::ZERO))
        .build()
        .unwrap();
    store.create_job(job).await.unwrap();

    let scheduler = Scheduler::with_store(Arc::clone(&store))
        .with_poll_interval(Duration::from_millis(20));

    let (handle, task) = scheduler.start().await;

    wait_for_quiescence(store.as_ref(), &JobId::new("orphan"), Duration::from_secs(2)).await;
    // Give the loop time to (incorrectly) schedule retries if it were going to.
    tokio::time::sleep(Duration::from_millis(200)).await;

    handle.shutdown().await.unwrap();
    let _ = task.await;

    let executions = store
        .list_executions(&JobId::new("orphan"), 10)
        .await
        .unwrap();
    assert_eq!(executions.len(), 1);
    assert!(executions[0]
        .error
        .as_deref()
        .unwrap()
        .contains("no handler registered"));
    assert!(!executions[0].retry_scheduled);
}
