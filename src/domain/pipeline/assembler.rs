use super::context::JobContext;
use super::duration::{DurationEstimator, Measurement};
use super::error::PipelineError;
use crate::infrastructure::repositories::BlobStore;
use std::sync::Arc;

/// Result of the final write
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblyOutcome {
    Completed {
        audio_ref: String,
        duration_seconds: f64,
    },
    /// The job was cancelled before the completion could be recorded
    Cancelled,
}

/// Joins chunk audio into the final artifact and records completion
pub struct Assembler {
    blobs: Arc<dyn BlobStore>,
    estimator: Arc<DurationEstimator>,
}

impl Assembler {
    pub fn new(blobs: Arc<dyn BlobStore>, estimator: Arc<DurationEstimator>) -> Self {
        Self { blobs, estimator }
    }

    pub fn artifact_key(ctx: &JobContext) -> String {
        format!("audiobooks/{}.mp3", ctx.job_id)
    }

    pub async fn assemble(
        &self,
        ctx: &JobContext,
        prefix: Vec<u8>,
        buffers: Vec<Vec<u8>>,
        word_count: usize,
    ) -> Result<AssemblyOutcome, PipelineError> {
        let mut audio = prefix;
        audio.reserve(buffers.iter().map(Vec::len).sum());
        for buffer in buffers {
            audio.extend(buffer);
        }
        let audio = Arc::new(audio);

        let estimator = self.estimator.clone();
        let probed = audio.clone();
        let measurement = tokio::task::spawn_blocking(move || estimator.measure(&probed, word_count))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Duration probe task failed");
                Measurement {
                    seconds: super::duration::estimate_from_words(word_count),
                    source: "word-estimate",
                }
            });

        let audio_bytes = audio.len();
        let audio = Arc::try_unwrap(audio).unwrap_or_else(|shared| shared.as_ref().clone());
        let audio_ref = self.blobs.put(&Self::artifact_key(ctx), audio).await?;

        let recorded = ctx
            .jobs()
            .complete(ctx.job_id, ctx.attempt, &audio_ref, measurement.seconds)
            .await?;

        if !recorded {
            tracing::info!(job_id = %ctx.job_id, "Job cancelled during assembly, deleting audio");
            if let Err(e) = self.blobs.delete(&audio_ref).await {
                tracing::warn!(audio_ref = %audio_ref, error = %e, "Failed to delete orphaned audio");
            }
            return Ok(AssemblyOutcome::Cancelled);
        }

        tracing::info!(
            job_id = %ctx.job_id,
            audio_ref = %audio_ref,
            audio_bytes = audio_bytes,
            duration_seconds = measurement.seconds,
            duration_source = measurement.source,
            "Audiobook assembled"
        );

        Ok(AssemblyOutcome::Completed {
            audio_ref,
            duration_seconds: measurement.seconds,
        })
    }
}
