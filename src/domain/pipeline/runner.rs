use super::assembler::{Assembler, AssemblyOutcome};
use super::batcher::{BatchOutcome, Batcher, ProgressRange};
use super::checkpoint::{CheckpointManager, SuspendOutcome};
use super::chunker;
use super::context::JobContext;
use super::duration::DurationEstimator;
use super::error::{ExtractionError, PipelineError, SynthesisError};
use super::extractor::{extract_with_timeout, TextExtractor};
use super::settings::PipelineSettings;
use crate::domain::audiobook::{Checkpoint, JobMessage, JobStatus, WorkQueue};
use crate::domain::tts::VoiceSelector;
use crate::error::AppResult;
use crate::infrastructure::repositories::{BlobStore, DocumentSource, JobRepository, TtsRepository};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// Progress milestones
const PROGRESS_STARTED: i32 = 5;
const PROGRESS_FETCHED: i32 = 15;
const PROGRESS_EXTRACTED: i32 = 30;
const PROGRESS_CHUNKED: i32 = 40;
const PROGRESS_SYNTHESIZED: i32 = 90;
const PROGRESS_ASSEMBLING: i32 = 95;

/// Wait before re-delivering a message whose job is still running here
const REDELIVERY_DELAY: Duration = Duration::from_millis(250);

/// How one job message ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Checkpoint saved and a resume queued
    Suspended,
    /// The job was cancelled or superseded mid-flight
    Cancelled,
    /// The attempt failed and the job was marked `failed`
    Failed,
    /// Stale or duplicate message; nothing was done
    Skipped,
}

/// Everything the runner talks to
pub struct PipelineDeps {
    pub jobs: Arc<dyn JobRepository>,
    pub documents: Arc<dyn DocumentSource>,
    pub extractor: Arc<dyn TextExtractor>,
    pub tts: Arc<dyn TtsRepository>,
    pub blobs: Arc<dyn BlobStore>,
    pub voices: Arc<VoiceSelector>,
    pub estimator: Arc<DurationEstimator>,
}

/// An attempt this invocation owns
struct Claim {
    ctx: JobContext,
    document_ref: String,
    checkpoint: Option<Checkpoint>,
}

/// Runs one job message through extraction, chunking, synthesis and assembly
pub struct JobRunner {
    jobs: Arc<dyn JobRepository>,
    documents: Arc<dyn DocumentSource>,
    extractor: Arc<dyn TextExtractor>,
    voices: Arc<VoiceSelector>,
    batcher: Batcher,
    checkpoints: CheckpointManager,
    assembler: Assembler,
    settings: PipelineSettings,
}

impl JobRunner {
    pub fn new(deps: PipelineDeps, queue: WorkQueue, settings: PipelineSettings) -> Self {
        let range = ProgressRange {
            start: PROGRESS_CHUNKED,
            end: PROGRESS_SYNTHESIZED,
        };
        Self {
            jobs: deps.jobs,
            documents: deps.documents,
            extractor: deps.extractor,
            voices: deps.voices,
            batcher: Batcher::new(deps.tts, settings.clone(), range),
            checkpoints: CheckpointManager::new(deps.blobs.clone(), queue, settings.clone()),
            assembler: Assembler::new(deps.blobs, deps.estimator),
            settings,
        }
    }

    pub async fn run(&self, message: JobMessage) -> RunOutcome {
        let job_id = message.job_id();
        let claim = match self.claim(&message).await {
            Ok(Some(claim)) => claim,
            Ok(None) => return RunOutcome::Skipped,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to claim job");
                return RunOutcome::Skipped;
            }
        };

        let deadline = self.checkpoints.arm();
        match self.process(&claim, deadline.token()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail(&claim.ctx, &e).await;
                RunOutcome::Failed
            }
        }
    }

    /// Turn a message into an owned attempt, or `None` when it no longer applies
    async fn claim(&self, message: &JobMessage) -> Result<Option<Claim>, PipelineError> {
        let job_id = message.job_id();
        let Some(job) = self.jobs.find_by_id(job_id).await? else {
            tracing::warn!(job_id = %job_id, "Job not found, dropping message");
            return Ok(None);
        };

        match message {
            JobMessage::Start { .. } => {
                if job.was_cancelled() {
                    tracing::info!(job_id = %job_id, "Job was cancelled before it started, dropping start message");
                    return Ok(None);
                }
                if job.status != JobStatus::Pending {
                    tracing::info!(job_id = %job_id, status = %job.status, "Job is not pending, dropping start message");
                    return Ok(None);
                }
                let Some(attempt) = self.jobs.start_attempt(job_id, PROGRESS_STARTED).await? else {
                    tracing::info!(job_id = %job_id, "Job was claimed elsewhere, dropping start message");
                    return Ok(None);
                };
                tracing::info!(job_id = %job_id, attempt = attempt, "Processing started");
                Ok(Some(Claim {
                    ctx: JobContext::new(job_id, attempt, self.jobs.clone()),
                    document_ref: job.source_document_ref,
                    checkpoint: None,
                }))
            }
            JobMessage::Resume {
                attempt,
                resume_from,
                partial_audio_ref,
                ..
            } => {
                if job.was_cancelled() {
                    // Cancel cleared the checkpoint; the partial named here is orphaned
                    tracing::info!(job_id = %job_id, attempt = attempt, "Job was cancelled while suspended, discarding partial audio");
                    self.checkpoints.discard(partial_audio_ref).await;
                    return Ok(None);
                }
                if !CheckpointManager::matches(&job, *attempt, *resume_from, partial_audio_ref) {
                    tracing::info!(
                        job_id = %job_id,
                        attempt = attempt,
                        resume_from = resume_from,
                        "Resume message no longer matches the job, dropping it"
                    );
                    return Ok(None);
                }
                tracing::info!(job_id = %job_id, attempt = attempt, resume_from = resume_from, "Resuming processing");
                Ok(Some(Claim {
                    ctx: JobContext::new(job_id, *attempt, self.jobs.clone()),
                    document_ref: job.source_document_ref,
                    checkpoint: job.checkpoint,
                }))
            }
        }
    }

    async fn process(
        &self,
        claim: &Claim,
        suspend: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let ctx = &claim.ctx;

        let bytes = self.documents.fetch(&claim.document_ref).await?;
        if !ctx.report_progress(PROGRESS_FETCHED).await? {
            return Ok(RunOutcome::Cancelled);
        }

        let text =
            extract_with_timeout(self.extractor.clone(), bytes, self.settings.extraction_timeout)
                .await?;
        if !ctx.report_progress(PROGRESS_EXTRACTED).await? {
            return Ok(RunOutcome::Cancelled);
        }

        let voice = self.voices.select(&text);
        let word_count = text.split_whitespace().count();
        let chunks = chunker::split(&text, self.settings.chunk_max_bytes);
        if chunks.is_empty() {
            return Err(ExtractionError::Empty.into());
        }
        tracing::info!(
            job_id = %ctx.job_id,
            text_bytes = text.len(),
            word_count = word_count,
            total_chunks = chunks.len(),
            language = %voice.language,
            "Document prepared for synthesis"
        );
        if !ctx.report_progress(PROGRESS_CHUNKED).await? {
            return Ok(RunOutcome::Cancelled);
        }

        let (start_index, prefix, previous_partial) = match &claim.checkpoint {
            Some(checkpoint) => (
                checkpoint.next_chunk_index,
                self.checkpoints.load_prefix(checkpoint, chunks.len()).await?,
                Some(checkpoint.partial_audio_ref.as_str()),
            ),
            None => (0, Vec::new(), None),
        };

        match self
            .batcher
            .synthesize(&chunks, start_index, &voice, ctx, suspend)
            .await?
        {
            BatchOutcome::Cancelled => Ok(RunOutcome::Cancelled),
            BatchOutcome::Suspended {
                buffers,
                next_index,
            } => {
                if next_index == start_index {
                    return Err(SynthesisError::Stalled { index: start_index }.into());
                }
                let outcome = self
                    .checkpoints
                    .suspend(ctx, prefix, buffers, next_index, chunks.len(), previous_partial)
                    .await?;
                Ok(match outcome {
                    SuspendOutcome::Scheduled(_) => RunOutcome::Suspended,
                    SuspendOutcome::Abandoned => RunOutcome::Cancelled,
                })
            }
            BatchOutcome::Completed(buffers) => {
                if !ctx.report_progress(PROGRESS_ASSEMBLING).await? {
                    return Ok(RunOutcome::Cancelled);
                }
                match self.assembler.assemble(ctx, prefix, buffers, word_count).await? {
                    AssemblyOutcome::Completed { .. } => {
                        if let Some(partial) = previous_partial {
                            self.checkpoints.discard(partial).await;
                        }
                        Ok(RunOutcome::Completed)
                    }
                    AssemblyOutcome::Cancelled => Ok(RunOutcome::Cancelled),
                }
            }
        }
    }

    /// Record the failure on the job and drop any partial audio it still points at
    async fn fail(&self, ctx: &JobContext, err: &PipelineError) {
        tracing::error!(job_id = %ctx.job_id, attempt = ctx.attempt, error = %err, "Processing failed");

        let partial = match self.jobs.find_by_id(ctx.job_id).await {
            Ok(job) => job
                .and_then(|j| j.checkpoint)
                .map(|checkpoint| checkpoint.partial_audio_ref),
            Err(_) => None,
        };

        match self.jobs.fail(ctx.job_id, ctx.attempt, &err.to_string()).await {
            Ok(true) => {
                if let Some(partial) = partial {
                    self.checkpoints.discard(&partial).await;
                }
            }
            Ok(false) => {
                tracing::info!(job_id = %ctx.job_id, "Job already left this attempt, failure not recorded");
            }
            Err(e) => {
                tracing::error!(job_id = %ctx.job_id, error = %e, "Failed to record job failure");
            }
        }
    }
}

/// Removes a job from the active set when its task ends, panics included
struct ActiveGuard {
    active: Arc<Mutex<HashSet<Uuid>>>,
    job_id: Uuid,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.job_id);
    }
}

/// Consumes the work queue, running up to `max_concurrent_jobs` jobs at once
/// and never the same job twice in parallel
pub struct Worker {
    runner: Arc<JobRunner>,
    queue: WorkQueue,
    permits: Arc<Semaphore>,
    active: Arc<Mutex<HashSet<Uuid>>>,
}

impl Worker {
    pub fn new(runner: Arc<JobRunner>, queue: WorkQueue, max_concurrent_jobs: usize) -> Self {
        Self {
            runner,
            queue,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn run(self, mut receiver: mpsc::UnboundedReceiver<JobMessage>) {
        tracing::info!("Pipeline worker started");

        while let Some(message) = receiver.recv().await {
            let job_id = message.job_id();

            if !self.active.lock().insert(job_id) {
                tracing::debug!(job_id = %job_id, "Job already running, re-delivering message later");
                self.queue.enqueue_after(REDELIVERY_DELAY, message);
                continue;
            }
            let guard = ActiveGuard {
                active: self.active.clone(),
                job_id,
            };

            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };

            let runner = self.runner.clone();
            tokio::spawn(async move {
                let _guard = guard;
                let _permit = permit;
                let outcome = runner.run(message).await;
                tracing::info!(job_id = %job_id, outcome = ?outcome, "Job message processed");
            });
        }

        tracing::info!("Work queue closed, pipeline worker stopping");
    }
}

/// Re-enqueue work left behind by a previous process
pub async fn recover_unfinished(jobs: &dyn JobRepository, queue: &WorkQueue) -> AppResult<usize> {
    let mut recovered = 0;

    for job in jobs.find_unfinished().await? {
        let message = match (job.status, job.checkpoint) {
            (JobStatus::Pending, _) => JobMessage::Start { job_id: job.id },
            (JobStatus::Processing, Some(checkpoint)) => JobMessage::Resume {
                job_id: job.id,
                attempt: job.attempt,
                resume_from: checkpoint.next_chunk_index,
                partial_audio_ref: checkpoint.partial_audio_ref,
            },
            (JobStatus::Processing, None) => {
                // The attempt died without a checkpoint; start over
                if !jobs.requeue(job.id).await? {
                    continue;
                }
                JobMessage::Start { job_id: job.id }
            }
            _ => continue,
        };

        tracing::info!(job_id = %job.id, status = %job.status, "Recovering unfinished job");
        queue.enqueue(message)?;
        recovered += 1;
    }

    Ok(recovered)
}
