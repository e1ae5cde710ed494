use super::job_repository::JobRepository;
use crate::domain::audiobook::{AudiobookJob, Checkpoint, JobStatus, CANCELLED_BY_USER};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Process-local job store, used when no database is configured and in tests
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, AudiobookJob>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to the job under the write lock; `f` decides whether it mutated
    fn mutate<F>(&self, job_id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut AudiobookJob) -> bool,
    {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&job_id) {
            Some(job) => {
                let applied = f(job);
                if applied {
                    job.updated_at = Utc::now();
                }
                applied
            }
            None => false,
        }
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &AudiobookJob) -> AppResult<()> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(AppError::Conflict(format!("Job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn find_by_id(&self, job_id: Uuid) -> AppResult<Option<AudiobookJob>> {
        Ok(self.jobs.read().get(&job_id).cloned())
    }

    async fn list(&self, offset: i64, limit: i64) -> AppResult<(Vec<AudiobookJob>, i64)> {
        let jobs = self.jobs.read();
        let mut all: Vec<&AudiobookJob> = jobs.values().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let page = all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, jobs.len() as i64))
    }

    async fn find_unfinished(&self) -> AppResult<Vec<AudiobookJob>> {
        let mut unfinished: Vec<AudiobookJob> = self
            .jobs
            .read()
            .values()
            .filter(|job| !job.status.is_terminal())
            .cloned()
            .collect();
        unfinished.sort_by_key(|job| job.created_at);
        Ok(unfinished)
    }

    async fn start_attempt(&self, job_id: Uuid, initial_progress: i32) -> AppResult<Option<i32>> {
        let mut attempt = None;
        self.mutate(job_id, |job| {
            if job.status != JobStatus::Pending {
                return false;
            }
            job.status = JobStatus::Processing;
            job.attempt += 1;
            job.progress = initial_progress.clamp(0, 100);
            job.error_detail = None;
            job.audio_ref = None;
            job.duration_seconds = None;
            job.checkpoint = None;
            attempt = Some(job.attempt);
            true
        });
        Ok(attempt)
    }

    async fn reset_for_retry(
        &self,
        job_id: Uuid,
        source_document_ref: &str,
        title: Option<&str>,
    ) -> AppResult<bool> {
        Ok(self.mutate(job_id, |job| {
            if !job.status.is_terminal() {
                return false;
            }
            job.status = JobStatus::Pending;
            job.progress = 0;
            job.error_detail = None;
            job.audio_ref = None;
            job.duration_seconds = None;
            job.checkpoint = None;
            job.source_document_ref = source_document_ref.to_string();
            if let Some(title) = title {
                job.title = Some(title.to_string());
            }
            true
        }))
    }

    async fn requeue(&self, job_id: Uuid) -> AppResult<bool> {
        Ok(self.mutate(job_id, |job| {
            if job.status != JobStatus::Processing {
                return false;
            }
            job.status = JobStatus::Pending;
            job.progress = 0;
            job.checkpoint = None;
            true
        }))
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        attempt: i32,
        progress: i32,
    ) -> AppResult<Option<i32>> {
        let mut stored = None;
        self.mutate(job_id, |job| {
            if !job.is_active_attempt(attempt) {
                return false;
            }
            job.progress = job.progress.max(progress.clamp(0, 100));
            stored = Some(job.progress);
            true
        });
        Ok(stored)
    }

    async fn save_checkpoint(
        &self,
        job_id: Uuid,
        attempt: i32,
        checkpoint: &Checkpoint,
    ) -> AppResult<bool> {
        Ok(self.mutate(job_id, |job| {
            if !job.is_active_attempt(attempt) {
                return false;
            }
            job.checkpoint = Some(checkpoint.clone());
            true
        }))
    }

    async fn complete(
        &self,
        job_id: Uuid,
        attempt: i32,
        audio_ref: &str,
        duration_seconds: f64,
    ) -> AppResult<bool> {
        Ok(self.mutate(job_id, |job| {
            if !job.is_active_attempt(attempt) {
                return false;
            }
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.audio_ref = Some(audio_ref.to_string());
            job.duration_seconds = Some(duration_seconds);
            job.error_detail = None;
            job.checkpoint = None;
            true
        }))
    }

    async fn fail(&self, job_id: Uuid, attempt: i32, error_detail: &str) -> AppResult<bool> {
        Ok(self.mutate(job_id, |job| {
            if !job.is_active_attempt(attempt) {
                return false;
            }
            job.status = JobStatus::Failed;
            job.error_detail = Some(error_detail.to_string());
            job.audio_ref = None;
            job.duration_seconds = None;
            job.checkpoint = None;
            true
        }))
    }

    async fn cancel(&self, job_id: Uuid) -> AppResult<bool> {
        Ok(self.mutate(job_id, |job| {
            if !job.status.is_cancellable() {
                return false;
            }
            job.status = JobStatus::Failed;
            job.error_detail = Some(CANCELLED_BY_USER.to_string());
            job.progress = 0;
            job.audio_ref = None;
            job.duration_seconds = None;
            job.checkpoint = None;
            true
        }))
    }

    async fn update_duration(&self, job_id: Uuid, duration_seconds: f64) -> AppResult<bool> {
        Ok(self.mutate(job_id, |job| {
            if job.status != JobStatus::Completed {
                return false;
            }
            job.duration_seconds = Some(duration_seconds);
            true
        }))
    }

    async fn delete(&self, job_id: Uuid) -> AppResult<Option<AudiobookJob>> {
        let mut jobs = self.jobs.write();
        let finished = jobs
            .get(&job_id)
            .map_or(false, |job| job.status.is_terminal());
        Ok(if finished { jobs.remove(&job_id) } else { None })
    }
}
