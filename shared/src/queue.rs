use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

use crate::models::JobStatus;
use crate::utils::generate_ulid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The three priority lanes a job can be enqueued onto. Weighted
/// `critical:6, default:3, low:1` so a worker polling round keeps draining
/// `critical` ahead of `low` without ever starving it outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Critical,
    Default,
    Low,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Critical => "critical",
            QueueName::Default => "default",
            QueueName::Low => "low",
        }
    }

    pub fn weight(&self) -> u32 {
        match self {
            QueueName::Critical => 6,
            QueueName::Default => 3,
            QueueName::Low => 1,
        }
    }

    pub fn all() -> [QueueName; 3] {
        [QueueName::Critical, QueueName::Default, QueueName::Low]
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QueueName {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(QueueName::Critical),
            "default" => Ok(QueueName::Default),
            "low" => Ok(QueueName::Low),
            other => Err(QueueError::Database(sqlx::Error::Decode(
                format!("unknown queue name: {other}").into(),
            ))),
        }
    }
}

const DEFAULT_MAX_RETRIES: i32 = 3;

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub max_retries: Option<i32>,
    /// Delay before the job becomes eligible to run.
    pub delay: Option<Duration>,
    /// If set, an identical `(job_type, payload, queue)` enqueued within this
    /// window returns the existing job's id instead of inserting a new row.
    pub unique_window: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct EnqueueResult {
    pub job_id: String,
    pub queue: QueueName,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub job_id: String,
    pub queue: String,
    pub job_type: String,
    pub payload: JsonValue,
    pub retry_count: i32,
    pub max_retries: i32,
    pub process_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

/// Postgres-backed priority job queue. Lives in the same database as the
/// catalog; dequeues via `FOR UPDATE SKIP LOCKED` so multiple worker
/// processes never double-claim a job, and `NOTIFY`s per queue so idle
/// workers wake promptly instead of polling on a tight loop.
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(
        &self,
        queue: QueueName,
        job_type: &str,
        payload: JsonValue,
        opts: EnqueueOptions,
    ) -> Result<EnqueueResult, QueueError> {
        if let Some(window) = opts.unique_window {
            if let Some(existing_id) = self
                .find_duplicate_within_window(queue, job_type, &payload, window)
                .await?
            {
                return Ok(EnqueueResult {
                    job_id: existing_id,
                    queue,
                });
            }
        }

        let job_id = generate_ulid();
        let max_retries = opts.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        let delay_secs = opts.delay.map(|d| d.as_secs() as f64).unwrap_or(0.0);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO job_queue (job_id, queue, job_type, payload, status, retry_count, max_retries, process_at, created_at)
            VALUES ($1, $2, $3, $4, 'queued', 0, $5, NOW() + ($6 * INTERVAL '1 second'), NOW())
            "#,
        )
        .bind(&job_id)
        .bind(queue.as_str())
        .bind(job_type)
        .bind(&payload)
        .bind(max_retries)
        .bind(delay_secs)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!("NOTIFY job_queue_{}", queue.as_str()))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(EnqueueResult { job_id, queue })
    }

    async fn find_duplicate_within_window(
        &self,
        queue: QueueName,
        job_type: &str,
        payload: &JsonValue,
        window: Duration,
    ) -> Result<Option<String>, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT job_id
            FROM job_queue
            WHERE queue = $1
              AND job_type = $2
              AND payload = $3
              AND status IN ('queued', 'started', 'retried')
              AND created_at > NOW() - ($4 * INTERVAL '1 second')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(queue.as_str())
        .bind(job_type)
        .bind(payload)
        .bind(window.as_secs() as f64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<String, _>("job_id")))
    }

    /// Claim up to `batch_size` ready jobs from `queue`, marking them `started`.
    pub async fn dequeue_batch(
        &self,
        queue: QueueName,
        batch_size: i64,
    ) -> Result<Vec<Job>, QueueError> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            WITH batch AS (
                SELECT job_id
                FROM job_queue
                WHERE queue = $1
                  AND status = 'queued'
                  AND process_at <= NOW()
                ORDER BY process_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE job_queue q
            SET status = 'started'
            FROM batch
            WHERE q.job_id = batch.job_id
            RETURNING
                q.job_id,
                q.queue,
                q.job_type,
                q.payload,
                q.retry_count,
                q.max_retries,
                q.process_at,
                q.created_at
            "#,
        )
        .bind(queue.as_str())
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    pub async fn mark_finished(&self, job_id: &str) -> Result<(), QueueError> {
        sqlx::query("UPDATE job_queue SET status = 'finished' WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Backs the job off by `backoff` and re-queues it, or moves it to
    /// `failed` (dead letter) once `retry_count` reaches `max_retries`.
    pub async fn mark_failed(
        &self,
        job_id: &str,
        backoff: Duration,
    ) -> Result<JobStatus, QueueError> {
        let row = sqlx::query(
            r#"
            UPDATE job_queue
            SET retry_count = retry_count + 1,
                status = CASE
                    WHEN retry_count + 1 >= max_retries THEN 'failed'
                    ELSE 'queued'
                END,
                process_at = CASE
                    WHEN retry_count + 1 >= max_retries THEN process_at
                    ELSE NOW() + ($2 * INTERVAL '1 second')
                END
            WHERE job_id = $1
            RETURNING status
            "#,
        )
        .bind(job_id)
        .bind(backoff.as_secs() as f64)
        .fetch_one(&self.pool)
        .await?;

        let status: String = row.get("status");
        Ok(match status.as_str() {
            "failed" => JobStatus::Failed,
            _ => JobStatus::Retried,
        })
    }

    /// Dead-letters a job immediately, bypassing the retry count — for
    /// errors a handler knows are terminal (missing credentials, an
    /// unsupported provider) rather than worth retrying.
    pub async fn mark_dead_letter(&self, job_id: &str) -> Result<(), QueueError> {
        sqlx::query("UPDATE job_queue SET status = 'failed' WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Requeue jobs stuck in `started` past a worker crash; `timeout` is how
    /// long a job may sit `started` before it's considered abandoned.
    pub async fn recover_stale_started(&self, timeout: Duration) -> Result<i64, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'queued'
            WHERE status = 'started'
              AND process_at < NOW() - ($1 * INTERVAL '1 second')
            "#,
        )
        .bind(timeout.as_secs() as f64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as i64)
    }

    pub async fn pending_count(&self, queue: QueueName) -> Result<i64, QueueError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM job_queue WHERE queue = $1 AND status = 'queued'")
                .bind(queue.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }
}
