use serde_json::Value as JsonValue;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    db::error::DatabaseError,
    models::{JobLog, JobStatus},
};

/// Durable audit trail for every job a worker runs, independent of the
/// queue row itself: a job log entry outlives its `job_queue` row once the
/// job finishes or is dead-lettered, so operators can see history the
/// queue table has already cleaned up.
#[derive(Clone)]
pub struct JobLogRepository {
    pool: PgPool,
}

impl JobLogRepository {
    pub fn new(pool: &PgPool) -> Self {
        Self { pool: pool.clone() }
    }

    /// `AddNewJobLog`: one row per enqueued job, created at `queued` status
    /// before the worker ever picks it up.
    pub async fn add_new_job_log(
        &self,
        job_id: &str,
        account_id: Uuid,
        job_type: &str,
        queue: &str,
        params: JsonValue,
    ) -> Result<JobLog, DatabaseError> {
        let now = OffsetDateTime::now_utc();

        sqlx::query(
            r#"
            INSERT INTO job_logs (job_id, account_id, job_type, status, queue, params, retries, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
            "#,
        )
        .bind(job_id)
        .bind(account_id)
        .bind(job_type)
        .bind(JobStatus::Queued)
        .bind(queue)
        .bind(&params)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(JobLog {
            job_id: job_id.to_string(),
            account_id,
            job_type: job_type.to_string(),
            status: JobStatus::Queued,
            queue: queue.to_string(),
            params,
            retries: 0,
            started_at: None,
            finished_at: None,
            error: None,
            created_at: now,
        })
    }

    /// `UpdateJobLogStart`: transitions `queued -> started` the first time a
    /// worker claims the job; a job re-dequeued after a retry instead goes
    /// through `update_retry_count` so `started_at` reflects the first attempt.
    pub async fn update_job_log_start(&self, job_id: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE job_logs
            SET status = $2, started_at = NOW()
            WHERE job_id = $1 AND retries = 0
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Started)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// `UpdateJobLogRetryCount`: called every time a failed job is re-queued
    /// with a higher `retries` count; status returns to `retried` so the
    /// distinction between "first attempt" and "a retry" survives in history.
    pub async fn update_job_log_retry_count(
        &self,
        job_id: &str,
        retries: i32,
        error: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE job_logs
            SET status = $2, retries = $3, error = $4
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Retried)
        .bind(retries)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// `UpdateJobLogFinish`: terminal success.
    pub async fn update_job_log_finish(&self, job_id: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE job_logs
            SET status = $2, finished_at = NOW(), error = NULL
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Finished)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// `UpdateJobLogFailed`: terminal failure, once retries are exhausted.
    pub async fn update_job_log_failed(&self, job_id: &str, error: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE job_logs
            SET status = $2, finished_at = NOW(), error = $3
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Failed)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(&self, job_id: &str) -> Result<Option<JobLog>, DatabaseError> {
        let log = sqlx::query_as::<_, JobLog>(
            r#"
            SELECT job_id, account_id, job_type, status, queue, params, retries,
                   started_at, finished_at, error, created_at
            FROM job_logs
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(log)
    }

    pub async fn find_by_account(&self, account_id: Uuid, limit: i64) -> Result<Vec<JobLog>, DatabaseError> {
        let logs = sqlx::query_as::<_, JobLog>(
            r#"
            SELECT job_id, account_id, job_type, status, queue, params, retries,
                   started_at, finished_at, error, created_at
            FROM job_logs
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }
}
