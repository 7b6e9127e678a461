//! Postgres-backed job queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::{AppError, Job, JobQueue, QueuedJob};

/// Claimed jobs whose worker vanished become claimable again after this many seconds
const STALE_LOCK_SECS: i64 = 600;

/// Durable queue on the `jobs` table.
///
/// Claiming uses `FOR UPDATE SKIP LOCKED`, so concurrent workers never receive the
/// same job while its lock is fresh.
#[derive(Clone)]
pub struct PostgresJobQueue {
    pool: PgPool,
}

impl PostgresJobQueue {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, job: Job) -> Result<(), AppError> {
        self.enqueue_at(job, Utc::now()).await
    }

    #[instrument(skip(self, job), fields(kind = job.kind()))]
    async fn enqueue_at(&self, job: Job, run_at: DateTime<Utc>) -> Result<(), AppError> {
        let payload =
            serde_json::to_value(&job).map_err(|e| AppError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, payload, max_attempts, run_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(job.kind())
        .bind(payload)
        .bind(job.max_attempts())
        .bind(run_at)
        .execute(&self.pool)
        .await?;
        debug!(%run_at, "Job enqueued");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim(&self, limit: i64) -> Result<Vec<QueuedJob>, AppError> {
        // A lost lock spends an attempt, so a job that keeps killing its worker runs out.
        let buried = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'dead',
                attempts = attempts + 1,
                last_error = 'worker lost the job',
                locked_at = NULL,
                updated_at = NOW()
            WHERE status = 'running'
              AND locked_at < NOW() - make_interval(secs => $1)
              AND attempts + 1 >= max_attempts
            "#,
        )
        .bind(STALE_LOCK_SECS as f64)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if buried > 0 {
            warn!(buried, "Buried stale jobs with no attempts left");
        }

        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET attempts = attempts + CASE WHEN status = 'running' THEN 1 ELSE 0 END,
                status = 'running',
                locked_at = NOW(),
                updated_at = NOW()
            WHERE id IN (
                SELECT id FROM jobs
                WHERE (status = 'queued' AND run_at <= NOW())
                   OR (status = 'running' AND locked_at < NOW() - make_interval(secs => $2))
                ORDER BY run_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, attempts, max_attempts, run_at
            "#,
        )
        .bind(limit)
        .bind(STALE_LOCK_SECS as f64)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            let payload: serde_json::Value = row.try_get("payload")?;
            match serde_json::from_value::<Job>(payload) {
                Ok(job) => jobs.push(QueuedJob {
                    id,
                    job,
                    attempts: row.try_get("attempts")?,
                    max_attempts: row.try_get("max_attempts")?,
                    run_at: row.try_get("run_at")?,
                }),
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Unreadable job payload, burying");
                    self.fail(id, &e.to_string(), None).await?;
                }
            }
        }
        Ok(jobs)
    }

    #[instrument(skip(self))]
    async fn complete(&self, job_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE jobs SET status = 'done', locked_at = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET attempts = attempts + 1,
                last_error = $2,
                status = CASE WHEN $3::timestamptz IS NULL THEN 'dead' ELSE 'queued' END,
                run_at = COALESCE($3, run_at),
                locked_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
