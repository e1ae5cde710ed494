use super::model::{AudiobookJob, Checkpoint, JobSnapshot};
use crate::error::AppResult;
use crate::infrastructure::repositories::JobRepository;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// In-process fan-out of job snapshots.
///
/// Every accepted write to the job store is followed by one snapshot on this
/// channel, so the status endpoint and the SSE stream read the same signal.
/// Lagging receivers lose intermediate snapshots, never the latest state, since
/// they can always fall back to reading the store.
#[derive(Clone)]
pub struct ProgressHub {
    sender: broadcast::Sender<JobSnapshot>,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, snapshot: JobSnapshot) {
        // No receivers is the common case when nobody is watching
        let _ = self.sender.send(snapshot);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobSnapshot> {
        self.sender.subscribe()
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Job store wrapper that publishes a fresh snapshot after each applied mutation
pub struct ObservedJobRepository {
    inner: Arc<dyn JobRepository>,
    hub: ProgressHub,
}

impl ObservedJobRepository {
    pub fn new(inner: Arc<dyn JobRepository>, hub: ProgressHub) -> Self {
        Self { inner, hub }
    }

    async fn publish_if(&self, job_id: Uuid, applied: bool) {
        if !applied {
            return;
        }
        match self.inner.find_by_id(job_id).await {
            Ok(Some(job)) => self.hub.publish(job.snapshot()),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to read job for progress event");
            }
        }
    }
}

#[async_trait]
impl JobRepository for ObservedJobRepository {
    async fn create(&self, job: &AudiobookJob) -> AppResult<()> {
        self.inner.create(job).await?;
        self.hub.publish(job.snapshot());
        Ok(())
    }

    async fn find_by_id(&self, job_id: Uuid) -> AppResult<Option<AudiobookJob>> {
        self.inner.find_by_id(job_id).await
    }

    async fn list(&self, offset: i64, limit: i64) -> AppResult<(Vec<AudiobookJob>, i64)> {
        self.inner.list(offset, limit).await
    }

    async fn find_unfinished(&self) -> AppResult<Vec<AudiobookJob>> {
        self.inner.find_unfinished().await
    }

    async fn start_attempt(&self, job_id: Uuid, initial_progress: i32) -> AppResult<Option<i32>> {
        let attempt = self.inner.start_attempt(job_id, initial_progress).await?;
        self.publish_if(job_id, attempt.is_some()).await;
        Ok(attempt)
    }

    async fn reset_for_retry(
        &self,
        job_id: Uuid,
        source_document_ref: &str,
        title: Option<&str>,
    ) -> AppResult<bool> {
        let applied = self
            .inner
            .reset_for_retry(job_id, source_document_ref, title)
            .await?;
        self.publish_if(job_id, applied).await;
        Ok(applied)
    }

    async fn requeue(&self, job_id: Uuid) -> AppResult<bool> {
        let applied = self.inner.requeue(job_id).await?;
        self.publish_if(job_id, applied).await;
        Ok(applied)
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        attempt: i32,
        progress: i32,
    ) -> AppResult<Option<i32>> {
        let stored = self.inner.update_progress(job_id, attempt, progress).await?;
        self.publish_if(job_id, stored.is_some()).await;
        Ok(stored)
    }

    async fn save_checkpoint(
        &self,
        job_id: Uuid,
        attempt: i32,
        checkpoint: &Checkpoint,
    ) -> AppResult<bool> {
        let applied = self.inner.save_checkpoint(job_id, attempt, checkpoint).await?;
        self.publish_if(job_id, applied).await;
        Ok(applied)
    }

    async fn complete(
        &self,
        job_id: Uuid,
        attempt: i32,
        audio_ref: &str,
        duration_seconds: f64,
    ) -> AppResult<bool> {
        let applied = self
            .inner
            .complete(job_id, attempt, audio_ref, duration_seconds)
            .await?;
        self.publish_if(job_id, applied).await;
        Ok(applied)
    }

    async fn fail(&self, job_id: Uuid, attempt: i32, error_detail: &str) -> AppResult<bool> {
        let applied = self.inner.fail(job_id, attempt, error_detail).await?;
        self.publish_if(job_id, applied).await;
        Ok(applied)
    }

    async fn cancel(&self, job_id: Uuid) -> AppResult<bool> {
        let applied = self.inner.cancel(job_id).await?;
        self.publish_if(job_id, applied).await;
        Ok(applied)
    }

    async fn update_duration(&self, job_id: Uuid, duration_seconds: f64) -> AppResult<bool> {
        let applied = self.inner.update_duration(job_id, duration_seconds).await?;
        self.publish_if(job_id, applied).await;
        Ok(applied)
    }

    async fn delete(&self, job_id: Uuid) -> AppResult<Option<AudiobookJob>> {
        self.inner.delete(job_id).await
    }
}
