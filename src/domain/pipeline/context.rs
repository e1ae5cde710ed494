use super::error::PipelineError;
use crate::infrastructure::repositories::JobRepository;
use std::sync::Arc;
use uuid::Uuid;

/// Handle on the job record for one processing attempt.
///
/// Every write carries the attempt number, so once the job is cancelled or
/// superseded the store rejects them and the pipeline sees `false`.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub attempt: i32,
    jobs: Arc<dyn JobRepository>,
}

impl JobContext {
    pub fn new(job_id: Uuid, attempt: i32, jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            job_id,
            attempt,
            jobs,
        }
    }

    pub fn jobs(&self) -> &Arc<dyn JobRepository> {
        &self.jobs
    }

    /// Raise progress; `false` means this attempt is no longer live
    pub async fn report_progress(&self, progress: i32) -> Result<bool, PipelineError> {
        let stored = self
            .jobs
            .update_progress(self.job_id, self.attempt, progress)
            .await?;
        Ok(stored.is_some())
    }

    /// True once the job left `processing` under this attempt (cancelled,
    /// deleted, or taken over by a newer attempt)
    pub async fn is_cancelled(&self) -> Result<bool, PipelineError> {
        let job = self.jobs.find_by_id(self.job_id).await?;
        Ok(!job.map(|j| j.is_active_attempt(self.attempt)).unwrap_or(false))
    }
}
