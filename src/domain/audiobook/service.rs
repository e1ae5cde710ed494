use super::error::AudiobookServiceError;
use super::events::ProgressHub;
use super::model::{
    AudiobookJob, JobListResponse, JobSnapshot, JobStatus, JobSummary, Pagination,
    SubmitJobRequest,
};
use super::queue::{JobMessage, WorkQueue};
use crate::infrastructure::repositories::{BlobStore, JobRepository};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

/// Reported durations closer than this to the stored one are ignored
const DURATION_TOLERANCE_SECS: f64 = 1.0;

pub const DEFAULT_PAGE_SIZE: u32 = 9;
pub const MAX_PAGE_SIZE: u32 = 100;

pub struct AudiobookService {
    jobs: Arc<dyn JobRepository>,
    blobs: Arc<dyn BlobStore>,
    queue: WorkQueue,
    hub: ProgressHub,
}

impl AudiobookService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        blobs: Arc<dyn BlobStore>,
        queue: WorkQueue,
        hub: ProgressHub,
    ) -> Self {
        Self {
            jobs,
            blobs,
            queue,
            hub,
        }
    }
}

#[async_trait]
pub trait AudiobookServiceApi: Send + Sync {
    /// Create and enqueue a job, or restart a finished one when `job_id` names it
    async fn submit(&self, request: SubmitJobRequest) -> Result<Uuid, AudiobookServiceError>;

    async fn get_status(&self, job_id: Uuid) -> Result<JobSnapshot, AudiobookServiceError>;

    /// Jobs newest first; `page` starts at 1
    async fn list(
        &self,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<JobListResponse, AudiobookServiceError>;

    /// Remove a finished job and its stored audio
    async fn delete(&self, job_id: Uuid) -> Result<(), AudiobookServiceError>;

    async fn cancel(&self, job_id: Uuid) -> Result<(), AudiobookServiceError>;

    /// Returns the duration stored after reconciliation
    async fn reconcile_duration(
        &self,
        job_id: Uuid,
        duration_seconds: f64,
    ) -> Result<f64, AudiobookServiceError>;

    /// Current snapshot followed by every change, ending after a terminal status
    async fn subscribe(
        &self,
        job_id: Uuid,
    ) -> Result<BoxStream<'static, JobSnapshot>, AudiobookServiceError>;
}

#[async_trait]
impl AudiobookServiceApi for AudiobookService {
    async fn submit(&self, request: SubmitJobRequest) -> Result<Uuid, AudiobookServiceError> {
        let document_ref = request.document_ref.trim();
        if document_ref.is_empty() {
            return Err(AudiobookServiceError::Invalid(
                "document_ref is required".to_string(),
            ));
        }
        let title = request
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| default_title(document_ref));

        let existing = match request.job_id {
            Some(job_id) => self.jobs.find_by_id(job_id).await?,
            None => None,
        };

        let job_id = match existing {
            Some(job) => self.restart(job, document_ref, title.as_deref()).await?,
            None => {
                let job = AudiobookJob::new(
                    request.job_id.unwrap_or_else(Uuid::new_v4),
                    document_ref.to_string(),
                    title,
                );
                self.jobs.create(&job).await?;
                tracing::info!(job_id = %job.id, document_ref = %document_ref, "Audiobook job created");
                job.id
            }
        };

        self.queue.enqueue(JobMessage::Start { job_id })?;
        Ok(job_id)
    }

    async fn get_status(&self, job_id: Uuid) -> Result<JobSnapshot, AudiobookServiceError> {
        Ok(self.find_job(job_id).await?.snapshot())
    }

    async fn list(
        &self,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<JobListResponse, AudiobookServiceError> {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = (page as i64 - 1) * limit as i64;

        let (jobs, total_count) = self.jobs.list(offset, limit as i64).await?;
        Ok(JobListResponse {
            audiobooks: jobs.into_iter().map(JobSummary::from).collect(),
            pagination: Pagination::new(page, limit, total_count),
        })
    }

    async fn delete(&self, job_id: Uuid) -> Result<(), AudiobookServiceError> {
        let job = self.find_job(job_id).await?;
        if !job.status.is_terminal() {
            return Err(AudiobookServiceError::Conflict(format!(
                "Job is still {}, cancel it first",
                job.status
            )));
        }

        let Some(removed) = self.jobs.delete(job_id).await? else {
            return Err(AudiobookServiceError::Conflict(
                "Job changed state, try again".to_string(),
            ));
        };

        let artifacts = removed
            .audio_ref
            .iter()
            .chain(removed.checkpoint.as_ref().map(|c| &c.partial_audio_ref));
        for blob_ref in artifacts {
            if let Err(e) = self.blobs.delete(blob_ref).await {
                tracing::warn!(job_id = %job_id, blob_ref = %blob_ref, error = %e, "Failed to delete audio of removed job");
            }
        }

        tracing::info!(job_id = %job_id, status = %removed.status, "Audiobook job deleted");
        Ok(())
    }

    async fn cancel(&self, job_id: Uuid) -> Result<(), AudiobookServiceError> {
        let job = self.find_job(job_id).await?;
        if !job.status.is_cancellable() {
            return Err(AudiobookServiceError::Conflict(format!(
                "Job is already {}",
                job.status
            )));
        }

        if !self.jobs.cancel(job_id).await? {
            return Err(AudiobookServiceError::Conflict(
                "Job finished before it could be cancelled".to_string(),
            ));
        }
        tracing::info!(job_id = %job_id, "Audiobook job cancelled");

        if let Some(checkpoint) = job.checkpoint {
            if let Err(e) = self.blobs.delete(&checkpoint.partial_audio_ref).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to delete partial audio of cancelled job");
            }
        }

        Ok(())
    }

    async fn reconcile_duration(
        &self,
        job_id: Uuid,
        duration_seconds: f64,
    ) -> Result<f64, AudiobookServiceError> {
        if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
            return Err(AudiobookServiceError::Invalid(
                "duration_seconds must be a positive number".to_string(),
            ));
        }

        let job = self.find_job(job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(AudiobookServiceError::Conflict(
                "Duration can only be set on completed jobs".to_string(),
            ));
        }

        if let Some(stored) = job.duration_seconds {
            if (stored - duration_seconds).abs() <= DURATION_TOLERANCE_SECS {
                return Ok(stored);
            }
        }

        if !self.jobs.update_duration(job_id, duration_seconds).await? {
            return Err(AudiobookServiceError::Conflict(
                "Job is no longer completed".to_string(),
            ));
        }
        tracing::info!(
            job_id = %job_id,
            previous = ?job.duration_seconds,
            duration_seconds = duration_seconds,
            "Audiobook duration reconciled"
        );
        Ok(duration_seconds)
    }

    async fn subscribe(
        &self,
        job_id: Uuid,
    ) -> Result<BoxStream<'static, JobSnapshot>, AudiobookServiceError> {
        // Subscribe before reading so no change between the two is missed
        let mut receiver = self.hub.subscribe();
        let initial = self.find_job(job_id).await?.snapshot();
        let jobs = self.jobs.clone();

        let stream = async_stream::stream! {
            let finished = initial.status.is_terminal();
            let mut last = stage(&initial);
            yield initial;
            if finished {
                return;
            }

            loop {
                let snapshot = match receiver.recv().await {
                    Ok(snapshot) if snapshot.id == job_id => snapshot,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(job_id = %job_id, skipped = skipped, "Progress subscriber lagged, re-reading job");
                        match jobs.find_by_id(job_id).await {
                            Ok(Some(job)) => job.snapshot(),
                            _ => break,
                        }
                    }
                    Err(RecvError::Closed) => break,
                };

                // Changes queued before the initial read are already reflected in it
                if stage(&snapshot) <= last {
                    continue;
                }
                last = stage(&snapshot);

                let finished = snapshot.status.is_terminal();
                yield snapshot;
                if finished {
                    break;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

impl AudiobookService {
    async fn find_job(&self, job_id: Uuid) -> Result<AudiobookJob, AudiobookServiceError> {
        self.jobs
            .find_by_id(job_id)
            .await?
            .ok_or(AudiobookServiceError::NotFound)
    }

    /// Reset a finished job to `pending`; in-flight jobs cannot be restarted
    async fn restart(
        &self,
        job: AudiobookJob,
        document_ref: &str,
        title: Option<&str>,
    ) -> Result<Uuid, AudiobookServiceError> {
        if !job.status.is_terminal() {
            return Err(AudiobookServiceError::Conflict(format!(
                "Job is already {}",
                job.status
            )));
        }

        if !self.jobs.reset_for_retry(job.id, document_ref, title).await? {
            return Err(AudiobookServiceError::Conflict(
                "Job changed state, try again".to_string(),
            ));
        }

        if let Some(audio_ref) = job.audio_ref.as_deref() {
            if let Err(e) = self.blobs.delete(audio_ref).await {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to delete previous audio");
            }
        }

        tracing::info!(job_id = %job.id, previous_status = %job.status, "Audiobook job restarted");
        Ok(job.id)
    }
}

/// Position of a snapshot within one run, for ordering stream updates
fn stage(snapshot: &JobSnapshot) -> (u8, i32) {
    let rank = match snapshot.status {
        JobStatus::Pending => 0,
        JobStatus::Processing => 1,
        JobStatus::Completed | JobStatus::Failed => 2,
    };
    (rank, snapshot.progress)
}

/// File name of the document without its extension
fn default_title(document_ref: &str) -> Option<String> {
    let path = document_ref
        .split(['?', '#'])
        .next()
        .unwrap_or(document_ref);
    let name = path.rsplit('/').next().unwrap_or(path);
    Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.trim().to_string())
        .filter(|stem| !stem.is_empty())
}
