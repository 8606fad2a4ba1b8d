//! cadence - a persistent job scheduler.
//!
//! Usage:
//!   cadence run --db cadence.db --jobs-dir ./jobs   Run the scheduler
//!   cadence validate ./jobs                         Validate job files
//!   cadence list --db cadence.db                    List stored jobs
//!   cadence trigger --db cadence.db <JOB_ID>        Request an immediate run
//!   cadence history --db cadence.db <JOB_ID>        Show recent executions

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use cadence::{
    load_jobs_from_directory, CommandHandler, Event, EventBus, EventHandler, JobStore, Scheduler,
    SqliteStore, StorageError,
};

/// cadence - a persistent job scheduler
#[derive(Parser)]
#[command(name = "cadence")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler
    Run {
        /// Path to the SQLite database file
        #[arg(long, default_value = "cadence.db")]
        db: PathBuf,

        /// Directory of YAML job definitions to seed the store with
        #[arg(long)]
        jobs_dir: Option<PathBuf>,

        /// Poll interval in seconds
        #[arg(long, default_value = "60")]
        poll_interval: u64,

        /// Graceful shutdown timeout in seconds
        #[arg(long, default_value = "30")]
        shutdown_timeout: u64,
    },

    /// Validate job definition files without running
    Validate {
        /// Path to the directory containing job YAML files
        #[arg(value_name = "JOBS_DIR")]
        jobs_dir: PathBuf,
    },

    /// List all jobs in the store
    List {
        /// Path to the SQLite database file
        #[arg(long, default_value = "cadence.db")]
        db: PathBuf,
    },

    /// Request an immediate run of a job (picked up on the next poll tick)
    Trigger {
        /// Path to the SQLite database file
        #[arg(long, default_value = "cadence.db")]
        db: PathBuf,

        /// Job ID to trigger
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// Show recent executions of a job
    History {
        /// Path to the SQLite database file
        #[arg(long, default_value = "cadence.db")]
        db: PathBuf,

        /// Job ID
        #[arg(value_name = "JOB_ID")]
        job_id: String,

        /// Maximum number of executions to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

/// Event handler that logs execution lifecycle events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::ExecutionStarted {
                job_id,
                execution_id,
                retry_attempt,
                ..
            } => {
                if *retry_attempt == 0 {
                    info!("Job '{}' started (execution: {})", job_id, execution_id);
                } else {
                    info!(
                        "Job '{}' retry {} started (execution: {})",
                        job_id, retry_attempt, execution_id
                    );
                }
            }
            Event::ExecutionSucceeded {
                job_id, duration, ..
            } => {
                info!("Job '{}' succeeded in {:?}", job_id, duration);
            }
            Event::ExecutionFailed {
                job_id,
                error,
                will_retry,
                ..
            } => {
                if *will_retry {
                    warn!("Job '{}' failed (retry scheduled): {}", job_id, error);
                } else {
                    error!("Job '{}' failed: {}", job_id, error);
                }
            }
            Event::RetryScheduled {
                job_id,
                next_attempt,
                at,
                ..
            } => {
                info!("Job '{}' retry {} due at {}", job_id, next_attempt, at);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            db,
            jobs_dir,
            poll_interval,
            shutdown_timeout,
        } => {
            run_scheduler(db, jobs_dir, poll_interval, shutdown_timeout).await?;
        }
        Commands::Validate { jobs_dir } => {
            validate_jobs(jobs_dir)?;
        }
        Commands::List { db } => {
            list_jobs(db).await?;
        }
        Commands::Trigger { db, job_id } => {
            trigger_job(db, job_id).await?;
        }
        Commands::History { db, job_id, limit } => {
            show_history(db, job_id, limit).await?;
        }
    }

    Ok(())
}

/// Seed the store with job definitions from a YAML directory.
///
/// Existing jobs keep their stored definition (and schedule bookkeeping);
/// only new ids are inserted.
async fn seed_jobs(store: &SqliteStore, jobs_dir: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = load_jobs_from_directory(jobs_dir)?;
    info!("Loaded {} job definition(s) from {}", jobs.len(), jobs_dir.display());

    for job in jobs {
        match store.create_job(job.clone()).await {
            Ok(()) => info!("  + {} ({})", job.id(), job.trigger().expression()),
            Err(StorageError::DuplicateKey(_)) => {
                info!("  = {} (already in store)", job.id());
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Run the scheduler until interrupted.
async fn run_scheduler(
    db: PathBuf,
    jobs_dir: Option<PathBuf>,
    poll_interval: u64,
    shutdown_timeout: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::new(&db).await?;

    if let Some(dir) = &jobs_dir {
        seed_jobs(&store, dir).await?;
    }

    let event_bus = EventBus::new();
    event_bus.register(Arc::new(LoggingHandler)).await;

    let mut scheduler = Scheduler::new(store)
        .with_event_bus(event_bus)
        .with_poll_interval(Duration::from_secs(poll_interval))
        .with_shutdown_timeout(Duration::from_secs(shutdown_timeout));

    scheduler.register_handler(Arc::new(CommandHandler::new()));

    info!("Starting scheduler (poll interval: {}s)...", poll_interval);
    info!("Press Ctrl+C to stop");

    let (handle, loop_task) = scheduler.start().await;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            handle.shutdown().await?;
        }
        _ = loop_task => {
            info!("Scheduler stopped");
        }
    }

    info!("Goodbye!");
    Ok(())
}

/// Validate job definitions without running.
fn validate_jobs(jobs_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating jobs in: {}", jobs_dir.display());

    match load_jobs_from_directory(&jobs_dir) {
        Ok(jobs) => {
            info!("All {} job(s) are valid:", jobs.len());
            for job in &jobs {
                info!(
                    "  - {} ({}): {}",
                    job.id(),
                    job.job_type(),
                    job.trigger().expression()
                );
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List all jobs in the store.
async fn list_jobs(db: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::new(&db).await?;
    let jobs = store.list_jobs().await?;

    if jobs.is_empty() {
        println!("No jobs in {}", db.display());
        return Ok(());
    }

    for job in &jobs {
        println!("ID: {}", job.id());
        println!("  Name: {}", job.name());
        println!("  Type: {}", job.job_type());
        println!("  Trigger: {}", job.trigger().expression());
        println!("  Status: {:?}", job.status());
        println!("  Timeout: {:?}", job.timeout());
        if job.retry_policy().is_enabled() {
            println!(
                "  Retries: {} (delay {:?})",
                job.retry_policy().max_attempts,
                job.retry_policy().delay
            );
        }
        match job.last_execution() {
            Some(last) => println!("  Last execution: {}", last),
            None => println!("  Last execution: never"),
        }
        if let Some(next) = job.next_execution() {
            println!("  Next execution: {}", next);
        }
        println!();
    }

    Ok(())
}

/// Request an immediate run by moving the job's next due time to now.
async fn trigger_job(db: PathBuf, job_id: String) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::new(&db).await?;

    let mut job = store.get_job(&job_id.clone().into()).await?;
    job.set_next_execution(Some(chrono::Utc::now()));
    store.update_job(job).await?;

    info!("Job '{}' will run on the scheduler's next poll tick", job_id);
    Ok(())
}

/// Print recent executions of a job.
async fn show_history(
    db: PathBuf,
    job_id: String,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::new(&db).await?;
    let executions = store.list_executions(&job_id.clone().into(), limit).await?;

    if executions.is_empty() {
        println!("No executions recorded for '{}'", job_id);
        return Ok(());
    }

    for execution in &executions {
        let attempt = if execution.retry_attempt > 0 {
            format!(" (retry {})", execution.retry_attempt)
        } else {
            String::new()
        };
        println!("{} {:?}{}", execution.id, execution.status, attempt);
        if let Some(started) = execution.started_at {
            println!("  Started: {}", started);
        }
        if let Some(completed) = execution.completed_at {
            println!("  Completed: {}", completed);
        }
        if let Some(duration) = execution.duration() {
            println!("  Duration: {}ms", duration.num_milliseconds());
        }
        if let Some(error) = &execution.error {
            println!("  Error: {}", error);
        }
        println!();
    }

    Ok(())
}
