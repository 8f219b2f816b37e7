//! Job Store (§4.14): CRUD + batch + queue + history over the tables
//! migrated in `001_init.sql`. Grounded on `JobStorage`'s operation
//! surface (collections → tables, Mongo upsert → `ON CONFLICT`), kept
//! on the same Postgres pool as the page store rather than adding a
//! second database driver.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crawlhub_core::Priority;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::model::{Job, JobConfig, JobResult, JobStatus};

#[derive(Debug, Default)]
pub struct BatchResult {
    pub successful: Vec<String>,
    pub failed: Vec<String>,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn store_job(&self, job: &Job) -> anyhow::Result<String>;
    async fn get_job(&self, job_id: &str) -> anyhow::Result<Option<Job>>;
    async fn update_job(&self, job: &Job) -> anyhow::Result<bool>;
    async fn delete_job(&self, job_id: &str) -> anyhow::Result<bool>;

    async fn get_jobs_by_user(&self, user_id: &str, limit: i64) -> anyhow::Result<Vec<Job>>;
    async fn get_jobs_by_status(&self, status: JobStatus, limit: i64) -> anyhow::Result<Vec<Job>>;
    async fn get_jobs_by_type(&self, job_type: &str, limit: i64) -> anyhow::Result<Vec<Job>>;
    async fn get_jobs_by_priority(&self, priority: Priority, limit: i64) -> anyhow::Result<Vec<Job>>;

    async fn store_jobs_batch(&self, jobs: &[Job]) -> anyhow::Result<BatchResult>;
    async fn update_jobs_batch(&self, jobs: &[Job]) -> anyhow::Result<BatchResult>;

    async fn enqueue_job(&self, job_id: &str, priority: Priority) -> anyhow::Result<bool>;
    async fn dequeue_job(&self, worker_id: &str) -> anyhow::Result<Option<Job>>;

    async fn record_job_history(
        &self,
        job_id: &str,
        event: &str,
        details: Option<&str>,
        user_id: Option<&str>,
    ) -> anyhow::Result<()>;
    async fn get_job_history(&self, job_id: &str) -> anyhow::Result<Vec<HistoryEntry>>;

    async fn cleanup_expired_data(&self) -> anyhow::Result<u64>;
    async fn cleanup_old_completed_jobs(&self, days_old: i64) -> anyhow::Result<u64>;
    async fn cleanup_old_failed_jobs(&self, days_old: i64) -> anyhow::Result<u64>;

    async fn total_count(&self) -> anyhow::Result<i64>;

    async fn store_job_config(&self, config: &JobConfig) -> anyhow::Result<()>;
    async fn get_job_config(&self, job_type: &str) -> anyhow::Result<Option<JobConfig>>;

    async fn store_job_result(&self, result: &JobResult) -> anyhow::Result<String>;
    async fn get_job_result(&self, job_id: &str) -> anyhow::Result<Option<JobResult>>;
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub job_id: String,
    pub event: String,
    pub details: Option<String>,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Wraps an already-open pool, bypassing the URL-connect path. Used by
    /// `#[sqlx::test]`-driven integration tests that provision their own
    /// ephemeral database.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Processing => "processing",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
        JobStatus::Retrying => "retrying",
    }
}

fn parse_status(s: &str) -> JobStatus {
    match s {
        "processing" => JobStatus::Processing,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "cancelled" => JobStatus::Cancelled,
        "retrying" => JobStatus::Retrying,
        _ => JobStatus::Queued,
    }
}

fn priority_str(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "low",
        Priority::Normal => "normal",
        Priority::High => "high",
        Priority::Critical => "critical",
    }
}

fn parse_priority(s: &str) -> Priority {
    match s {
        "low" => Priority::Low,
        "high" => Priority::High,
        "critical" => Priority::Critical,
        _ => Priority::Normal,
    }
}

fn row_to_job(row: sqlx::postgres::PgRow) -> anyhow::Result<Job> {
    let status: String = row.try_get("status")?;
    let priority: String = row.try_get("priority")?;
    let timeout_secs: Option<i64> = row.try_get("timeout_seconds")?;

    Ok(Job {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        tenant_id: row.try_get("tenant_id")?,
        job_type: row.try_get("job_type")?,
        status: parse_status(&status),
        priority: parse_priority(&priority),
        progress: row.try_get::<i16, _>("progress")? as u8,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        scheduled_at: row.try_get("scheduled_at")?,
        error_message: row.try_get("error_message")?,
        metadata: row.try_get("metadata")?,
        retry_count: row.try_get::<i32, _>("retry_count")? as u32,
        max_retries: row.try_get::<i32, _>("max_retries")? as u32,
        timeout: timeout_secs.map(|s| std::time::Duration::from_secs(s as u64)),
    })
}

fn row_to_job_config(row: sqlx::postgres::PgRow) -> anyhow::Result<JobConfig> {
    let priority: String = row.try_get("default_priority")?;
    let timeout_secs: i64 = row.try_get("timeout_seconds")?;
    let retry_policy: serde_json::Value = row.try_get("retry_policy")?;
    let resource_requirements: serde_json::Value = row.try_get("resource_requirements")?;
    let schedule_config: serde_json::Value = row.try_get("schedule_config")?;
    let parameters: serde_json::Value = row.try_get("parameters")?;
    let tags: serde_json::Value = row.try_get("tags")?;
    let concurrency_limit: Option<i32> = row.try_get("concurrency_limit")?;

    Ok(JobConfig {
        job_type: row.try_get("job_type")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        timeout: std::time::Duration::from_secs(timeout_secs as u64),
        default_priority: parse_priority(&priority),
        retry_policy: serde_json::from_value(retry_policy)?,
        resource_requirements: serde_json::from_value(resource_requirements)?,
        schedule_config: serde_json::from_value(schedule_config)?,
        parameters: serde_json::from_value(parameters)?,
        tags: serde_json::from_value(tags)?,
        enabled: row.try_get("enabled")?,
        concurrency_limit: concurrency_limit.map(|v| v as u32),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_job_result(row: sqlx::postgres::PgRow) -> anyhow::Result<JobResult> {
    let final_status: String = row.try_get("final_status")?;
    let output_files: serde_json::Value = row.try_get("output_files")?;
    let metrics: serde_json::Value = row.try_get("metrics")?;
    let error: Option<serde_json::Value> = row.try_get("error")?;
    let metadata: serde_json::Value = row.try_get("metadata")?;
    let log_messages: serde_json::Value = row.try_get("log_messages")?;

    Ok(JobResult {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        user_id: row.try_get("user_id")?,
        tenant_id: row.try_get("tenant_id")?,
        final_status: parse_status(&final_status),
        result_data: row.try_get("result_data")?,
        error: error.map(serde_json::from_value).transpose()?,
        metrics: serde_json::from_value(metrics)?,
        output_files: serde_json::from_value(output_files)?,
        metadata: serde_json::from_value(metadata)?,
        log_messages: serde_json::from_value(log_messages)?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn store_job(&self, job: &Job) -> anyhow::Result<String> {
        sqlx::query(
            r#"INSERT INTO jobs (id, user_id, tenant_id, job_type, status, priority, progress,
                 created_at, started_at, completed_at, scheduled_at, error_message, metadata,
                 retry_count, max_retries, timeout_seconds)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
               ON CONFLICT (id) DO UPDATE SET
                 status = EXCLUDED.status, priority = EXCLUDED.priority, progress = EXCLUDED.progress,
                 started_at = EXCLUDED.started_at, completed_at = EXCLUDED.completed_at,
                 error_message = EXCLUDED.error_message, metadata = EXCLUDED.metadata,
                 retry_count = EXCLUDED.retry_count"#,
        )
        .bind(&job.id)
        .bind(&job.user_id)
        .bind(&job.tenant_id)
        .bind(&job.job_type)
        .bind(status_str(job.status))
        .bind(priority_str(job.priority))
        .bind(job.progress as i16)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.scheduled_at)
        .bind(&job.error_message)
        .bind(&job.metadata)
        .bind(job.retry_count as i32)
        .bind(job.max_retries as i32)
        .bind(job.timeout.map(|d| d.as_secs() as i64))
        .execute(&self.pool)
        .await?;
        Ok(job.id.clone())
    }

    async fn get_job(&self, job_id: &str) -> anyhow::Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_job).transpose()
    }

    async fn update_job(&self, job: &Job) -> anyhow::Result<bool> {
        self.store_job(job).await?;
        Ok(true)
    }

    async fn delete_job(&self, job_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_jobs_by_user(&self, user_id: &str, limit: i64) -> anyhow::Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2")
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    async fn get_jobs_by_status(&self, status: JobStatus, limit: i64) -> anyhow::Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE status = $1 ORDER BY created_at DESC LIMIT $2")
            .bind(status_str(status))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    async fn get_jobs_by_type(&self, job_type: &str, limit: i64) -> anyhow::Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE job_type = $1 ORDER BY created_at DESC LIMIT $2")
            .bind(job_type)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    async fn get_jobs_by_priority(&self, priority: Priority, limit: i64) -> anyhow::Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE priority = $1 ORDER BY created_at DESC LIMIT $2")
            .bind(priority_str(priority))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    async fn store_jobs_batch(&self, jobs: &[Job]) -> anyhow::Result<BatchResult> {
        let mut result = BatchResult::default();
        for job in jobs {
            match self.store_job(job).await {
                Ok(id) => result.successful.push(id),
                Err(err) => {
                    result.failed.push(job.id.clone());
                    result.errors.push(err.to_string());
                }
            }
        }
        Ok(result)
    }

    async fn update_jobs_batch(&self, jobs: &[Job]) -> anyhow::Result<BatchResult> {
        self.store_jobs_batch(jobs).await
    }

    async fn enqueue_job(&self, job_id: &str, priority: Priority) -> anyhow::Result<bool> {
        sqlx::query(
            r#"INSERT INTO job_queue (job_id, priority, enqueued_at)
               VALUES ($1, $2, $3)
               ON CONFLICT (job_id) DO UPDATE SET priority = EXCLUDED.priority"#,
        )
        .bind(job_id)
        .bind(priority_str(priority))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    /// Atomically claims the highest-priority due job: selects it with
    /// `FOR UPDATE SKIP LOCKED` and transitions it to `PROCESSING`
    /// within the same transaction.
    async fn dequeue_job(&self, worker_id: &str) -> anyhow::Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"SELECT j.* FROM jobs j
               JOIN job_queue q ON q.job_id = j.id
               WHERE j.status = 'queued' AND (j.scheduled_at IS NULL OR j.scheduled_at <= now())
               ORDER BY CASE q.priority
                   WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'normal' THEN 2 ELSE 3 END,
                 q.enqueued_at ASC
               FOR UPDATE OF j SKIP LOCKED
               LIMIT 1"#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let mut job = row_to_job(row)?;
        job.start();

        sqlx::query("UPDATE jobs SET status = 'processing', started_at = $2 WHERE id = $1")
            .bind(&job.id)
            .bind(job.started_at)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE job_queue SET worker_id = $2 WHERE job_id = $1")
            .bind(&job.id)
            .bind(worker_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    async fn record_job_history(
        &self,
        job_id: &str,
        event: &str,
        details: Option<&str>,
        user_id: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO job_history (job_id, event, details, user_id, timestamp) VALUES ($1,$2,$3,$4,$5)",
        )
        .bind(job_id)
        .bind(event)
        .bind(details)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job_history(&self, job_id: &str) -> anyhow::Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT job_id, event, details, user_id, timestamp FROM job_history WHERE job_id = $1 ORDER BY timestamp DESC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(HistoryEntry {
                    job_id: row.try_get("job_id")?,
                    event: row.try_get("event")?,
                    details: row.try_get("details")?,
                    user_id: row.try_get("user_id")?,
                    timestamp: row.try_get("timestamp")?,
                })
            })
            .collect()
    }

    async fn cleanup_expired_data(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE scheduled_at IS NOT NULL AND status = 'queued' AND scheduled_at < now() - interval '90 days'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cleanup_old_completed_jobs(&self, days_old: i64) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status = 'completed' AND completed_at < now() - ($1 || ' days')::interval",
        )
        .bind(days_old.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cleanup_old_failed_jobs(&self, days_old: i64) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status = 'failed' AND completed_at < now() - ($1 || ' days')::interval",
        )
        .bind(days_old.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn total_count(&self) -> anyhow::Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs").fetch_one(&self.pool).await?;
        Ok(row.0)
    }

    async fn store_job_config(&self, config: &JobConfig) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO job_configs (job_type, name, description, timeout_seconds, default_priority,
                 retry_policy, resource_requirements, schedule_config, parameters, tags, enabled,
                 concurrency_limit, created_at, updated_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
               ON CONFLICT (job_type) DO UPDATE SET
                 name = EXCLUDED.name, description = EXCLUDED.description,
                 timeout_seconds = EXCLUDED.timeout_seconds, default_priority = EXCLUDED.default_priority,
                 retry_policy = EXCLUDED.retry_policy, resource_requirements = EXCLUDED.resource_requirements,
                 schedule_config = EXCLUDED.schedule_config, parameters = EXCLUDED.parameters,
                 tags = EXCLUDED.tags, enabled = EXCLUDED.enabled,
                 concurrency_limit = EXCLUDED.concurrency_limit, updated_at = EXCLUDED.updated_at"#,
        )
        .bind(&config.job_type)
        .bind(&config.name)
        .bind(&config.description)
        .bind(config.timeout.as_secs() as i64)
        .bind(priority_str(config.default_priority))
        .bind(serde_json::to_value(&config.retry_policy)?)
        .bind(serde_json::to_value(&config.resource_requirements)?)
        .bind(serde_json::to_value(&config.schedule_config)?)
        .bind(serde_json::to_value(&config.parameters)?)
        .bind(serde_json::to_value(&config.tags)?)
        .bind(config.enabled)
        .bind(config.concurrency_limit.map(|v| v as i32))
        .bind(config.created_at)
        .bind(config.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job_config(&self, job_type: &str) -> anyhow::Result<Option<JobConfig>> {
        let row = sqlx::query("SELECT * FROM job_configs WHERE job_type = $1")
            .bind(job_type)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_job_config).transpose()
    }

    async fn store_job_result(&self, result: &JobResult) -> anyhow::Result<String> {
        sqlx::query(
            r#"INSERT INTO job_results (id, job_id, user_id, tenant_id, final_status, result_data,
                 output_files, metrics, error, metadata, log_messages, created_at, expires_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
               ON CONFLICT (id) DO UPDATE SET
                 final_status = EXCLUDED.final_status, result_data = EXCLUDED.result_data,
                 output_files = EXCLUDED.output_files, metrics = EXCLUDED.metrics, error = EXCLUDED.error,
                 metadata = EXCLUDED.metadata, log_messages = EXCLUDED.log_messages,
                 expires_at = EXCLUDED.expires_at"#,
        )
        .bind(&result.id)
        .bind(&result.job_id)
        .bind(&result.user_id)
        .bind(&result.tenant_id)
        .bind(status_str(result.final_status))
        .bind(&result.result_data)
        .bind(serde_json::to_value(&result.output_files)?)
        .bind(serde_json::to_value(&result.metrics)?)
        .bind(result.error.as_ref().map(serde_json::to_value).transpose()?)
        .bind(serde_json::to_value(&result.metadata)?)
        .bind(serde_json::to_value(&result.log_messages)?)
        .bind(result.created_at)
        .bind(result.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.id.clone())
    }

    async fn get_job_result(&self, job_id: &str) -> anyhow::Result<Option<JobResult>> {
        let row = sqlx::query("SELECT * FROM job_results WHERE job_id = $1 ORDER BY created_at DESC LIMIT 1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_job_result).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_priority_round_trip_through_strings() {
        for s in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Retrying,
        ] {
            assert_eq!(parse_status(status_str(s)), s);
        }
        for p in [Priority::Low, Priority::Normal, Priority::High, Priority::Critical] {
            assert_eq!(parse_priority(priority_str(p)), p);
        }
    }
}
