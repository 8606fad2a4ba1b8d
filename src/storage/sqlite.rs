//! SQLite storage implementation.
//!
//! Persistent storage using SQLite via sqlx, with automatic schema
//! migration on open. Timestamps are stored as milliseconds since the
//! Unix epoch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::{ExecutionStatus, JobExecution, JobStore, StorageError};
use crate::core::job::JobParts;
use crate::core::{ExecutionId, Job, JobId, JobStatus, RetryPolicy, Trigger};

/// SQLite storage backend.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path and run
    /// migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// Helper functions for column conversion

fn datetime_to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH)
}

fn job_status_to_string(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Active => "active",
        JobStatus::Paused => "paused",
    }
}

fn string_to_job_status(s: &str) -> JobStatus {
    match s {
        "paused" => JobStatus::Paused,
        _ => JobStatus::Active,
    }
}

fn execution_status_to_string(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Succeeded => "succeeded",
        ExecutionStatus::Failed => "failed",
    }
}

fn string_to_execution_status(s: &str) -> ExecutionStatus {
    match s {
        "running" => ExecutionStatus::Running,
        "succeeded" => ExecutionStatus::Succeeded,
        "failed" => ExecutionStatus::Failed,
        _ => ExecutionStatus::Pending,
    }
}

fn map_insert_error(e: sqlx::Error, key: String) -> StorageError {
    if let sqlx::Error::Database(db) = &e {
        if db.message().contains("UNIQUE constraint failed") {
            return StorageError::DuplicateKey(key);
        }
    }
    StorageError::Other(e.to_string())
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, StorageError> {
    let trigger_expr: String = row
        .try_get("trigger_expr")
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let timezone: String = row
        .try_get("timezone")
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let trigger = Trigger::with_timezone(trigger_expr, timezone)
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;

    let config_json: String = row
        .try_get("config")
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let config = serde_json::from_str(&config_json)
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;

    let get_i64 = |name: &str| -> Result<i64, StorageError> {
        row.try_get(name).map_err(|e| StorageError::Other(e.to_string()))
    };
    let get_opt_i64 = |name: &str| -> Result<Option<i64>, StorageError> {
        row.try_get(name).map_err(|e| StorageError::Other(e.to_string()))
    };
    let get_string = |name: &str| -> Result<String, StorageError> {
        row.try_get(name).map_err(|e| StorageError::Other(e.to_string()))
    };

    Ok(Job::from_parts(JobParts {
        id: JobId::new(get_string("id")?),
        name: get_string("name")?,
        job_type: get_string("job_type")?,
        trigger,
        config,
        status: string_to_job_status(&get_string("status")?),
        timeout: Duration::from_secs(get_i64("timeout_secs")?.max(0) as u64),
        retry: RetryPolicy::fixed(
            get_i64("retry_max_attempts")?.max(0) as u32,
            Duration::from_secs(get_i64("retry_delay_secs")?.max(0) as u64),
        ),
        last_execution: get_opt_i64("last_execution")?.map(millis_to_datetime),
        next_execution: get_opt_i64("next_execution")?.map(millis_to_datetime),
        created_at: millis_to_datetime(get_i64("created_at")?),
        updated_at: millis_to_datetime(get_i64("updated_at")?),
    }))
}

fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> Result<JobExecution, StorageError> {
    let id_str: String = row
        .try_get("id")
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let id = uuid::Uuid::parse_str(&id_str)
        .map(ExecutionId::from_uuid)
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;

    let triggered_by: Option<String> = row
        .try_get("triggered_by")
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let triggered_by = triggered_by
        .map(|s| {
            uuid::Uuid::parse_str(&s)
                .map(ExecutionId::from_uuid)
                .map_err(|e| StorageError::SerializationError(e.to_string()))
        })
        .transpose()?;

    let result_json: Option<String> = row
        .try_get("result")
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let result = result_json
        .map(|s| {
            serde_json::from_str(&s).map_err(|e| StorageError::SerializationError(e.to_string()))
        })
        .transpose()?;

    let status: String = row
        .try_get("status")
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let job_id: String = row
        .try_get("job_id")
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let retry_attempt: i64 = row
        .try_get("retry_attempt")
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let retry_scheduled: bool = row
        .try_get("retry_scheduled")
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let started_at: Option<i64> = row
        .try_get("started_at")
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let completed_at: Option<i64> = row
        .try_get("completed_at")
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let error: Option<String> = row
        .try_get("error")
        .map_err(|e| StorageError::Other(e.to_string()))?;
    let created_at: i64 = row
        .try_get("created_at")
        .map_err(|e| StorageError::Other(e.to_string()))?;

    Ok(JobExecution {
        id,
        job_id: JobId::new(job_id),
        status: string_to_execution_status(&status),
        retry_attempt: retry_attempt.max(0) as u32,
        triggered_by,
        retry_scheduled,
        started_at: started_at.map(millis_to_datetime),
        completed_at: completed_at.map(millis_to_datetime),
        result,
        error,
        created_at: millis_to_datetime(created_at),
    })
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn create_job(&self, job: Job) -> Result<(), StorageError> {
        let config = serde_json::to_string(job.config())
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, name, job_type, trigger_expr, timezone, config, status,
                              timeout_secs, retry_max_attempts, retry_delay_secs,
                              last_execution, next_execution, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id().as_str())
        .bind(job.name())
        .bind(job.job_type())
        .bind(job.trigger().expression())
        .bind(job.trigger().timezone())
        .bind(config)
        .bind(job_status_to_string(job.status()))
        .bind(job.timeout().as_secs() as i64)
        .bind(job.retry_policy().max_attempts as i64)
        .bind(job.retry_policy().delay.as_secs() as i64)
        .bind(job.last_execution().map(datetime_to_millis))
        .bind(job.next_execution().map(datetime_to_millis))
        .bind(datetime_to_millis(job.created_at()))
        .bind(datetime_to_millis(job.updated_at()))
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, format!("job: {}", job.id())))?;

        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Job, StorageError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))?;

        row_to_job(&row)
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.iter().map(row_to_job).collect()
    }

    async fn list_active_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE status = 'active' ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.iter().map(row_to_job).collect()
    }

    async fn update_job(&self, job: Job) -> Result<(), StorageError> {
        let config = serde_json::to_string(job.config())
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET name = ?, job_type = ?, trigger_expr = ?, timezone = ?, config = ?,
                status = ?, timeout_secs = ?, retry_max_attempts = ?, retry_delay_secs = ?,
                last_execution = ?, next_execution = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.name())
        .bind(job.job_type())
        .bind(job.trigger().expression())
        .bind(job.trigger().timezone())
        .bind(config)
        .bind(job_status_to_string(job.status()))
        .bind(job.timeout().as_secs() as i64)
        .bind(job.retry_policy().max_attempts as i64)
        .bind(job.retry_policy().delay.as_secs() as i64)
        .bind(job.last_execution().map(datetime_to_millis))
        .bind(job.next_execution().map(datetime_to_millis))
        .bind(datetime_to_millis(job.updated_at()))
        .bind(job.id().as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("job: {}", job.id())));
        }
        Ok(())
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("job: {}", id)));
        }
        Ok(())
    }

    async fn create_execution(&self, execution: JobExecution) -> Result<(), StorageError> {
        let result = execution
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO job_executions (id, job_id, status, retry_attempt, triggered_by,
                                        retry_scheduled, started_at, completed_at,
                                        result, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.job_id.as_str())
        .bind(execution_status_to_string(execution.status))
        .bind(execution.retry_attempt as i64)
        .bind(execution.triggered_by.map(|id| id.to_string()))
        .bind(execution.retry_scheduled)
        .bind(execution.started_at.map(datetime_to_millis))
        .bind(execution.completed_at.map(datetime_to_millis))
        .bind(result)
        .bind(&execution.error)
        .bind(datetime_to_millis(execution.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, format!("execution: {}", execution.id)))?;

        Ok(())
    }

    async fn get_execution(&self, id: &ExecutionId) -> Result<JobExecution, StorageError> {
        let row = sqlx::query("SELECT * FROM job_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound(format!("execution: {}", id)))?;

        row_to_execution(&row)
    }

    async fn update_execution(&self, execution: JobExecution) -> Result<(), StorageError> {
        let result = execution
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        let query_result = sqlx::query(
            r#"
            UPDATE job_executions
            SET status = ?, retry_attempt = ?, triggered_by = ?, retry_scheduled = ?,
                started_at = ?, completed_at = ?, result = ?, error = ?
            WHERE id = ?
            "#,
        )
        .bind(execution_status_to_string(execution.status))
        .bind(execution.retry_attempt as i64)
        .bind(execution.triggered_by.map(|id| id.to_string()))
        .bind(execution.retry_scheduled)
        .bind(execution.started_at.map(datetime_to_millis))
        .bind(execution.completed_at.map(datetime_to_millis))
        .bind(result)
        .bind(&execution.error)
        .bind(execution.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        if query_result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "execution: {}",
                execution.id
            )));
        }
        Ok(())
    }

    async fn latest_execution(
        &self,
        job_id: &JobId,
    ) -> Result<Option<JobExecution>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM job_executions
            WHERE job_id = ?
            ORDER BY created_at DESC, retry_attempt DESC
            LIMIT 1
            "#,
        )
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        row.as_ref().map(row_to_execution).transpose()
    }

    async fn list_executions(
        &self,
        job_id: &JobId,
        limit: usize,
    ) -> Result<Vec<JobExecution>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM job_executions
            WHERE job_id = ?
            ORDER BY created_at DESC, retry_attempt DESC
            LIMIT ?
            "#,
        )
        .bind(job_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.iter().map(row_to_execution).collect()
    }

    async fn list_incomplete_executions(&self) -> Result<Vec<JobExecution>, StorageError> {
        let rows =
            sqlx::query("SELECT * FROM job_executions WHERE status IN ('pending', 'running')")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.iter().map(row_to_execution).collect()
    }
}
