//! Graceful shutdown integration tests.

use async_trait::async_trait;
use cadence::{
    Handler, HandlerError, InMemoryStore, Job, JobBuilder, JobId, JobStore, Scheduler, Trigger,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Handler that sleeps for a fixed duration and records completion.
struct SlowHandler {
    duration: Duration,
    started: AtomicBool,
    completed: AtomicBool,
}

impl SlowHandler {
    fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            started: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Handler for SlowHandler {
    fn job_type(&self) -> &str {
        "slow"
    }

    async fn run(&self, _job: &Job) -> Result<Value, HandlerError> {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        self.completed.store(true, Ordering::SeqCst);
        Ok(json!(null))
    }
}

fn slow_job(id: &str) -> Job {
    JobBuilder::new(id, format!("Job {}", id), "slow")
        .trigger(Trigger::parse("@every 1h").unwrap())
        .timeout(Duration::from_secs(60))
        .build()
        .unwrap()
}

/// Shutdown waits for a running execution to complete before returning.
#[tokio::test]
async fn test_graceful_shutdown_waits_for_running_execution() {
    let store = Arc::new(InMemoryStore::new());
    let handler = SlowHandler::new(Duration::from_millis(300));

    store.create_job(slow_job("slow")).await.unwrap();

    let mut scheduler = Scheduler::with_store(Arc::clone(&store))
        .with_poll_interval(Duration::from_millis(10))
        .with_shutdown_timeout(Duration::from_secs(5));
    scheduler.register_handler(handler.clone());

    let (handle, task) = scheduler.start().await;

    // Wait for the execution to start, then shut down mid-flight.
    while !handler.started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.shutdown().await.unwrap();
    let _ = task.await;

    assert!(handler.completed.load(Ordering::SeqCst));

    let executions = store.list_executions(&JobId::new("slow"), 1).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert!(executions[0].is_terminal());
    assert!(executions[0].completed_at.is_some());
}

/// Shutdown gives up after the configured timeout instead of blocking on a
/// stuck execution.
#[tokio::test]
async fn test_shutdown_timeout_bounds_the_wait() {
    let store = Arc::new(InMemoryStore::new());
    let handler = SlowHandler::new(Duration::from_secs(30));

    store.create_job(slow_job("stuck")).await.unwrap();

    let mut scheduler = Scheduler::with_store(Arc::clone(&store))
        .with_poll_interval(Duration::from_millis(10))
        .with_shutdown_timeout(Duration::from_millis(200));
    scheduler.register_handler(handler.clone());

    let (handle, task) = scheduler.start().await;

    while !handler.started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let start = Instant::now();
    handle.shutdown().await.unwrap();
    let elapsed = start.elapsed();
    let _ = task.await;

    assert!(
        elapsed < Duration::from_secs(2),
        "shutdown blocked for {:?}",
        elapsed
    );
    assert!(!handler.completed.load(Ordering::SeqCst));
}

/// No new executions are dispatched once the scheduler has stopped.
#[tokio::test]
async fn test_no_dispatch_after_shutdown() {
    let store = Arc::new(InMemoryStore::new());
    let handler = SlowHandler::new(Duration::ZERO);

    let mut scheduler = Scheduler::with_store(Arc::clone(&store))
        .with_poll_interval(Duration::from_millis(10));
    scheduler.register_handler(handler);

    let (handle, task) = scheduler.start().await;
    handle.shutdown().await.unwrap();
    let _ = task.await;

    // Created after shutdown: permanently due, but nothing is polling.
    store.create_job(slow_job("late")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let executions = store.list_executions(&JobId::new("late"), 10).await.unwrap();
    assert!(executions.is_empty());
}
