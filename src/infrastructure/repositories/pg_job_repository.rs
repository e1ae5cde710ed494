use super::job_repository::JobRepository;
use crate::domain::audiobook::{AudiobookJob, Checkpoint, JobStatus, CANCELLED_BY_USER};
use crate::error::{AppError, AppResult};
use crate::infrastructure::db::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use std::sync::Arc;
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, title, source_document_ref, status, progress, error_detail, \
     audio_ref, duration_seconds, checkpoint, attempt, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    title: Option<String>,
    source_document_ref: String,
    status: JobStatus,
    progress: i32,
    error_detail: Option<String>,
    audio_ref: Option<String>,
    duration_seconds: Option<f64>,
    checkpoint: Option<Json<Checkpoint>>,
    attempt: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JobRow> for AudiobookJob {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            source_document_ref: row.source_document_ref,
            status: row.status,
            progress: row.progress,
            error_detail: row.error_detail,
            audio_ref: row.audio_ref,
            duration_seconds: row.duration_seconds,
            checkpoint: row.checkpoint.map(|Json(checkpoint)| checkpoint),
            attempt: row.attempt,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// PostgreSQL job store. Every guard lives in the `WHERE` clause so concurrent
/// writers cannot interleave a read-check-write race.
pub struct PgJobRepository {
    pool: Arc<DbPool>,
}

impl PgJobRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create(&self, job: &AudiobookJob) -> AppResult<()> {
        let pool = self.pool.as_ref();

        sqlx::query(
            r#"
            INSERT INTO audiobook_jobs (id, title, source_document_ref, status, progress, attempt, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(job.id)
        .bind(&job.title)
        .bind(&job.source_document_ref)
        .bind(job.status)
        .bind(job.progress)
        .bind(job.attempt)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.is_unique_violation() {
                    return AppError::Conflict(format!("Job {} already exists", job.id));
                }
            }
            AppError::Database(e)
        })?;

        Ok(())
    }

    async fn find_by_id(&self, job_id: Uuid) -> AppResult<Option<AudiobookJob>> {
        let pool = self.pool.as_ref();
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM audiobook_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(AudiobookJob::from))
    }

    async fn list(&self, offset: i64, limit: i64) -> AppResult<(Vec<AudiobookJob>, i64)> {
        let pool = self.pool.as_ref();
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM audiobook_jobs ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
            JOB_COLUMNS
        ))
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM audiobook_jobs")
            .fetch_one(pool)
            .await?;

        Ok((rows.into_iter().map(AudiobookJob::from).collect(), total))
    }

    async fn find_unfinished(&self) -> AppResult<Vec<AudiobookJob>> {
        let pool = self.pool.as_ref();
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM audiobook_jobs WHERE status IN ('pending', 'processing') ORDER BY created_at ASC",
            JOB_COLUMNS
        ))
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(AudiobookJob::from).collect())
    }

    async fn start_attempt(&self, job_id: Uuid, initial_progress: i32) -> AppResult<Option<i32>> {
        let pool = self.pool.as_ref();
        let attempt = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE audiobook_jobs
            SET status = 'processing',
                attempt = attempt + 1,
                progress = $2,
                error_detail = NULL,
                audio_ref = NULL,
                duration_seconds = NULL,
                checkpoint = NULL,
                updated_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING attempt
            "#,
        )
        .bind(job_id)
        .bind(initial_progress.clamp(0, 100))
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?;

        Ok(attempt)
    }

    async fn reset_for_retry(
        &self,
        job_id: Uuid,
        source_document_ref: &str,
        title: Option<&str>,
    ) -> AppResult<bool> {
        let pool = self.pool.as_ref();
        let result = sqlx::query(
            r#"
            UPDATE audiobook_jobs
            SET status = 'pending',
                progress = 0,
                error_detail = NULL,
                audio_ref = NULL,
                duration_seconds = NULL,
                checkpoint = NULL,
                source_document_ref = $2,
                title = COALESCE($3, title),
                updated_at = $4
            WHERE id = $1 AND status IN ('failed', 'completed')
            "#,
        )
        .bind(job_id)
        .bind(source_document_ref)
        .bind(title)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn requeue(&self, job_id: Uuid) -> AppResult<bool> {
        let pool = self.pool.as_ref();
        let result = sqlx::query(
            r#"
            UPDATE audiobook_jobs
            SET status = 'pending', progress = 0, checkpoint = NULL, updated_at = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        attempt: i32,
        progress: i32,
    ) -> AppResult<Option<i32>> {
        let pool = self.pool.as_ref();
        let stored = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE audiobook_jobs
            SET progress = GREATEST(progress, $3), updated_at = $4
            WHERE id = $1 AND attempt = $2 AND status = 'processing'
            RETURNING progress
            "#,
        )
        .bind(job_id)
        .bind(attempt)
        .bind(progress.clamp(0, 100))
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?;

        Ok(stored)
    }

    async fn save_checkpoint(
        &self,
        job_id: Uuid,
        attempt: i32,
        checkpoint: &Checkpoint,
    ) -> AppResult<bool> {
        let pool = self.pool.as_ref();
        let result = sqlx::query(
            r#"
            UPDATE audiobook_jobs
            SET checkpoint = $3, updated_at = $4
            WHERE id = $1 AND attempt = $2 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(attempt)
        .bind(Json(checkpoint))
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete(
        &self,
        job_id: Uuid,
        attempt: i32,
        audio_ref: &str,
        duration_seconds: f64,
    ) -> AppResult<bool> {
        let pool = self.pool.as_ref();
        let result = sqlx::query(
            r#"
            UPDATE audiobook_jobs
            SET status = 'completed',
                progress = 100,
                audio_ref = $3,
                duration_seconds = $4,
                error_detail = NULL,
                checkpoint = NULL,
                updated_at = $5
            WHERE id = $1 AND attempt = $2 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(attempt)
        .bind(audio_ref)
        .bind(duration_seconds)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail(&self, job_id: Uuid, attempt: i32, error_detail: &str) -> AppResult<bool> {
        let pool = self.pool.as_ref();
        let result = sqlx::query(
            r#"
            UPDATE audiobook_jobs
            SET status = 'failed',
                error_detail = $3,
                audio_ref = NULL,
                duration_seconds = NULL,
                checkpoint = NULL,
                updated_at = $4
            WHERE id = $1 AND attempt = $2 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(attempt)
        .bind(error_detail)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel(&self, job_id: Uuid) -> AppResult<bool> {
        let pool = self.pool.as_ref();
        let result = sqlx::query(
            r#"
            UPDATE audiobook_jobs
            SET status = 'failed',
                error_detail = $2,
                progress = 0,
                audio_ref = NULL,
                duration_seconds = NULL,
                checkpoint = NULL,
                updated_at = $3
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(job_id)
        .bind(CANCELLED_BY_USER)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_duration(&self, job_id: Uuid, duration_seconds: f64) -> AppResult<bool> {
        let pool = self.pool.as_ref();
        let result = sqlx::query(
            r#"
            UPDATE audiobook_jobs
            SET duration_seconds = $2, updated_at = $3
            WHERE id = $1 AND status = 'completed'
            "#,
        )
        .bind(job_id)
        .bind(duration_seconds)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, job_id: Uuid) -> AppResult<Option<AudiobookJob>> {
        let pool = self.pool.as_ref();
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "DELETE FROM audiobook_jobs WHERE id = $1 AND status IN ('completed', 'failed') RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(AudiobookJob::from))
    }
}
