use crate::domain::audiobook::{AudiobookJob, Checkpoint};
use crate::error::AppResult;
use async_trait::async_trait;
use uuid::Uuid;

/// Durable job record and progress store.
///
/// The store, not its callers, enforces the job invariants:
/// - `progress` never decreases within an attempt (resets to 0 only on cancel
///   or when a new attempt starts)
/// - worker-side writes carry the attempt number and are rejected unless the
///   job is `processing` under that same attempt
/// - `audio_ref`/`duration_seconds` exist only on `completed`, and the
///   checkpoint is cleared on every terminal transition
///
/// Mutations return whether they were applied so callers can tell a stale or
/// cancelled attempt apart from a storage failure.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new `pending` job
    async fn create(&self, job: &AudiobookJob) -> AppResult<()>;

    async fn find_by_id(&self, job_id: Uuid) -> AppResult<Option<AudiobookJob>>;

    /// One page of jobs, newest first, with the total number of jobs
    async fn list(&self, offset: i64, limit: i64) -> AppResult<(Vec<AudiobookJob>, i64)>;

    /// Jobs left `pending` or `processing`, oldest first
    async fn find_unfinished(&self) -> AppResult<Vec<AudiobookJob>>;

    /// Move a `pending` job to `processing` under a new attempt number.
    /// Returns the attempt, or `None` if the job was not pending.
    async fn start_attempt(&self, job_id: Uuid, initial_progress: i32) -> AppResult<Option<i32>>;

    /// Move a `failed` or `completed` job back to `pending`, clearing its outputs
    async fn reset_for_retry(
        &self,
        job_id: Uuid,
        source_document_ref: &str,
        title: Option<&str>,
    ) -> AppResult<bool>;

    /// Move a `processing` job back to `pending` after its worker vanished
    async fn requeue(&self, job_id: Uuid) -> AppResult<bool>;

    /// Raise progress for the live attempt. Returns the stored value, which is
    /// higher than `progress` when an earlier write already went further.
    async fn update_progress(
        &self,
        job_id: Uuid,
        attempt: i32,
        progress: i32,
    ) -> AppResult<Option<i32>>;

    async fn save_checkpoint(
        &self,
        job_id: Uuid,
        attempt: i32,
        checkpoint: &Checkpoint,
    ) -> AppResult<bool>;

    async fn complete(
        &self,
        job_id: Uuid,
        attempt: i32,
        audio_ref: &str,
        duration_seconds: f64,
    ) -> AppResult<bool>;

    async fn fail(&self, job_id: Uuid, attempt: i32, error_detail: &str) -> AppResult<bool>;

    /// Cancel a `pending` or `processing` job
    async fn cancel(&self, job_id: Uuid) -> AppResult<bool>;

    /// Correct the duration of a `completed` job
    async fn update_duration(&self, job_id: Uuid, duration_seconds: f64) -> AppResult<bool>;

    /// Remove a `completed` or `failed` job. Returns the removed record, or
    /// `None` if the job is missing or still active.
    async fn delete(&self, job_id: Uuid) -> AppResult<Option<AudiobookJob>>;
}
