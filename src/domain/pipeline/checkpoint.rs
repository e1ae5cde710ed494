use super::context::JobContext;
use super::error::PipelineError;
use super::settings::PipelineSettings;
use crate::domain::audiobook::{AudiobookJob, Checkpoint, JobMessage, WorkQueue};
use crate::infrastructure::repositories::BlobStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const PARTIAL_WRITE_ATTEMPTS: u32 = 3;
const PARTIAL_WRITE_BACKOFF: Duration = Duration::from_millis(200);

/// Soft deadline of one invocation. The token fires `budget - margin` after
/// arming; dropping the deadline disarms the timer.
pub struct Deadline {
    token: CancellationToken,
    timer: Option<JoinHandle<()>>,
}

impl Deadline {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// What became of a suspension request
#[derive(Debug)]
pub enum SuspendOutcome {
    /// Partial audio stored, checkpoint written, resume queued
    Scheduled(Checkpoint),
    /// The job was cancelled while the partial was being written
    Abandoned,
}

/// Persists partial audio when the time budget runs out and validates the
/// checkpoint when the job comes back
pub struct CheckpointManager {
    blobs: Arc<dyn BlobStore>,
    queue: WorkQueue,
    settings: PipelineSettings,
}

impl CheckpointManager {
    pub fn new(blobs: Arc<dyn BlobStore>, queue: WorkQueue, settings: PipelineSettings) -> Self {
        Self {
            blobs,
            queue,
            settings,
        }
    }

    pub fn arm(&self) -> Deadline {
        let token = CancellationToken::new();
        let timer = self.settings.suspend_after().map(|after| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                token.cancel();
            })
        });
        Deadline { token, timer }
    }

    pub fn partial_key(ctx: &JobContext, next_index: usize) -> String {
        format!("partials/{}/{}-{}.mp3", ctx.job_id, ctx.attempt, next_index)
    }

    /// Store `prefix + buffers` as the new partial artifact, then record the
    /// checkpoint, then drop the superseded partial and queue the resume.
    ///
    /// The checkpoint is only written once the partial is durable, so a
    /// reader never sees a reference to audio that does not exist.
    pub async fn suspend(
        &self,
        ctx: &JobContext,
        prefix: Vec<u8>,
        buffers: Vec<Vec<u8>>,
        next_index: usize,
        total_chunks: usize,
        previous_partial: Option<&str>,
    ) -> Result<SuspendOutcome, PipelineError> {
        let mut audio = prefix;
        for buffer in buffers {
            audio.extend(buffer);
        }

        let key = Self::partial_key(ctx, next_index);
        let partial_ref = self.put_with_retry(&key, audio).await?;

        let checkpoint = Checkpoint {
            total_chunks,
            next_chunk_index: next_index,
            partial_audio_ref: partial_ref.clone(),
            saved_at: Utc::now(),
        };

        if !ctx
            .jobs()
            .save_checkpoint(ctx.job_id, ctx.attempt, &checkpoint)
            .await?
        {
            tracing::info!(job_id = %ctx.job_id, "Job cancelled during checkpoint, discarding partial audio");
            self.discard(&partial_ref).await;
            return Ok(SuspendOutcome::Abandoned);
        }

        if let Some(previous) = previous_partial.filter(|p| *p != partial_ref) {
            self.discard(previous).await;
        }

        self.queue.enqueue_after(
            self.settings.resume_delay,
            JobMessage::Resume {
                job_id: ctx.job_id,
                attempt: ctx.attempt,
                resume_from: next_index,
                partial_audio_ref: partial_ref,
            },
        );

        tracing::info!(
            job_id = %ctx.job_id,
            attempt = ctx.attempt,
            next_chunk_index = next_index,
            total_chunks = total_chunks,
            "Checkpoint saved, resume scheduled"
        );

        Ok(SuspendOutcome::Scheduled(checkpoint))
    }

    /// True when a resume message still describes the job's stored checkpoint
    pub fn matches(
        job: &AudiobookJob,
        attempt: i32,
        resume_from: usize,
        partial_audio_ref: &str,
    ) -> bool {
        job.is_active_attempt(attempt)
            && job.checkpoint.as_ref().is_some_and(|checkpoint| {
                checkpoint.next_chunk_index == resume_from
                    && checkpoint.partial_audio_ref == partial_audio_ref
            })
    }

    /// Fetch the partial audio of a checkpoint after checking it still lines
    /// up with the re-chunked document
    pub async fn load_prefix(
        &self,
        checkpoint: &Checkpoint,
        total_chunks: usize,
    ) -> Result<Vec<u8>, PipelineError> {
        if checkpoint.total_chunks != total_chunks || checkpoint.next_chunk_index > total_chunks {
            return Err(PipelineError::Storage(format!(
                "checkpoint expects {} chunks resuming at {}, document now has {}",
                checkpoint.total_chunks, checkpoint.next_chunk_index, total_chunks
            )));
        }
        Ok(self.blobs.get(&checkpoint.partial_audio_ref).await?)
    }

    /// Best-effort removal of a partial artifact
    pub async fn discard(&self, blob_ref: &str) {
        if let Err(e) = self.blobs.delete(blob_ref).await {
            tracing::warn!(blob_ref = blob_ref, error = %e, "Failed to delete partial audio");
        }
    }

    async fn put_with_retry(&self, key: &str, audio: Vec<u8>) -> Result<String, PipelineError> {
        let mut attempt = 1;
        loop {
            match self.blobs.put(key, audio.clone()).await {
                Ok(blob_ref) => return Ok(blob_ref),
                Err(e) if attempt < PARTIAL_WRITE_ATTEMPTS => {
                    tracing::warn!(key = key, attempt = attempt, error = %e, "Partial audio write failed, retrying");
                    tokio::time::sleep(PARTIAL_WRITE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
