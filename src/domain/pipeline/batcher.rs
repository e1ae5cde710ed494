use super::context::JobContext;
use super::error::{PipelineError, SynthesisError};
use super::settings::PipelineSettings;
use crate::domain::tts::{TtsError, VoiceConfig};
use crate::infrastructure::repositories::TtsRepository;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Share of the original text kept when a failed chunk is retried
const RETRY_SHRINK_RATIO: f64 = 0.8;

/// Slice of the 0-100 progress scale the batcher reports into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRange {
    pub start: i32,
    pub end: i32,
}

impl ProgressRange {
    /// `start + floor(done / total * width)`
    pub fn at(&self, done: usize, total: usize) -> i32 {
        if total == 0 {
            return self.end;
        }
        let width = (self.end - self.start).max(0) as usize;
        self.start + (done.min(total) * width / total) as i32
    }
}

/// How a batch ended
#[derive(Debug)]
pub enum BatchOutcome {
    /// One buffer per chunk from `start_index` to the end, in chunk order
    Completed(Vec<Vec<u8>>),
    /// The suspend token fired; `buffers` cover `start_index..next_index`
    Suspended {
        buffers: Vec<Vec<u8>>,
        next_index: usize,
    },
    /// The job stopped being ours; nothing was kept
    Cancelled,
}

enum ChunkResult {
    Audio(Vec<u8>),
    /// The job was cancelled between attempts
    Abandoned,
}

enum Stop {
    Cancelled,
    Suspended,
}

/// Drives per-chunk TTS calls through a bounded pool
pub struct Batcher {
    tts: Arc<dyn TtsRepository>,
    settings: PipelineSettings,
    range: ProgressRange,
}

impl Batcher {
    pub fn new(tts: Arc<dyn TtsRepository>, settings: PipelineSettings, range: ProgressRange) -> Self {
        Self {
            tts,
            settings,
            range,
        }
    }

    /// Synthesize `chunks[start_index..]`.
    ///
    /// At most `concurrency_for(chunks.len())` calls are in flight. The job
    /// record is consulted before every dispatch; once the job is cancelled
    /// no more chunks go out and calls already running are left to finish
    /// with their results dropped. When `suspend` fires, dispatching stops,
    /// running calls are drained, and the completed run is handed back.
    pub async fn synthesize(
        &self,
        chunks: &[String],
        start_index: usize,
        voice: &VoiceConfig,
        ctx: &JobContext,
        suspend: &CancellationToken,
    ) -> Result<BatchOutcome, PipelineError> {
        let total = chunks.len();
        let start_index = start_index.min(total);
        let concurrency = self.settings.concurrency_for(total);
        let consecutive_failures = Arc::new(AtomicUsize::new(0));

        tracing::info!(
            job_id = %ctx.job_id,
            attempt = ctx.attempt,
            total_chunks = total,
            start_index = start_index,
            concurrency = concurrency,
            "Starting chunk synthesis"
        );

        let mut slots: Vec<Option<Vec<u8>>> = vec![None; total - start_index];
        let mut in_flight: FuturesUnordered<JoinHandle<(usize, Result<ChunkResult, SynthesisError>)>> =
            FuturesUnordered::new();
        let mut next_index = start_index;
        let mut dispatched = 0usize;
        let mut completed = 0usize;
        let mut stop: Option<Stop> = None;

        loop {
            while stop.is_none() && in_flight.len() < concurrency && next_index < total {
                if suspend.is_cancelled() {
                    stop = Some(Stop::Suspended);
                    break;
                }
                if ctx.is_cancelled().await? {
                    stop = Some(Stop::Cancelled);
                    break;
                }
                if dispatched > 0
                    && dispatched % concurrency == 0
                    && !self.settings.inter_batch_delay.is_zero()
                {
                    tokio::time::sleep(self.settings.inter_batch_delay).await;
                }

                in_flight.push(self.spawn_chunk(
                    next_index,
                    chunks[next_index].clone(),
                    voice.clone(),
                    ctx.clone(),
                    Arc::clone(&consecutive_failures),
                ));
                next_index += 1;
                dispatched += 1;
            }

            if matches!(stop, Some(Stop::Cancelled)) {
                // Dropping the handles detaches the running calls
                tracing::info!(
                    job_id = %ctx.job_id,
                    in_flight = in_flight.len(),
                    "Job cancelled, abandoning remaining chunks"
                );
                return Ok(BatchOutcome::Cancelled);
            }

            let Some(joined) = in_flight.next().await else {
                break;
            };
            let (index, result) =
                joined.map_err(|e| SynthesisError::TaskFailed(e.to_string()))?;

            match result {
                Ok(ChunkResult::Audio(audio)) => {
                    slots[index - start_index] = Some(audio);
                    completed += 1;

                    let progress = self.range.at(start_index + completed, total);
                    if !ctx.report_progress(progress).await? {
                        stop = Some(Stop::Cancelled);
                        continue;
                    }
                    tracing::debug!(
                        job_id = %ctx.job_id,
                        chunk_index = index,
                        completed = start_index + completed,
                        total_chunks = total,
                        progress = progress,
                        "Chunk synthesized"
                    );
                }
                Ok(ChunkResult::Abandoned) => {
                    stop = Some(Stop::Cancelled);
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %ctx.job_id,
                        chunk_index = index,
                        error = %e,
                        "Chunk synthesis failed, aborting batch"
                    );
                    return Err(e.into());
                }
            }
        }

        // Everything dispatched has been drained at this point
        let buffers: Vec<Vec<u8>> = slots.into_iter().map_while(|slot| slot).collect();
        let next_index = start_index + buffers.len();

        if matches!(stop, Some(Stop::Suspended)) && next_index < total {
            tracing::info!(
                job_id = %ctx.job_id,
                next_index = next_index,
                total_chunks = total,
                "Time budget reached, suspending synthesis"
            );
            return Ok(BatchOutcome::Suspended {
                buffers,
                next_index,
            });
        }

        Ok(BatchOutcome::Completed(buffers))
    }

    fn spawn_chunk(
        &self,
        index: usize,
        text: String,
        voice: VoiceConfig,
        ctx: JobContext,
        consecutive_failures: Arc<AtomicUsize>,
    ) -> JoinHandle<(usize, Result<ChunkResult, SynthesisError>)> {
        let tts = Arc::clone(&self.tts);
        let max_attempts = self.settings.max_chunk_attempts.max(1);
        let failure_limit = self.settings.consecutive_failure_limit.max(1);

        tokio::spawn(async move {
            let result = synthesize_chunk(
                tts.as_ref(),
                index,
                text,
                &voice,
                &ctx,
                &consecutive_failures,
                max_attempts,
                failure_limit,
            )
            .await;
            (index, result)
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn synthesize_chunk(
    tts: &dyn TtsRepository,
    index: usize,
    mut text: String,
    voice: &VoiceConfig,
    ctx: &JobContext,
    consecutive_failures: &AtomicUsize,
    max_attempts: u32,
    failure_limit: usize,
) -> Result<ChunkResult, SynthesisError> {
    let mut attempt = 1;
    loop {
        let message = match tts.synthesize(&text, voice).await {
            Ok(audio) => {
                consecutive_failures.store(0, Ordering::SeqCst);
                return Ok(ChunkResult::Audio(audio));
            }
            Err(TtsError::Rejected(message)) => {
                return Err(SynthesisError::Rejected { index, message });
            }
            Err(TtsError::Transient(message)) => message,
        };

        let failures = consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(
            job_id = %ctx.job_id,
            chunk_index = index,
            attempt = attempt,
            consecutive_failures = failures,
            error = %message,
            "Chunk synthesis attempt failed"
        );

        if failures >= failure_limit {
            return Err(SynthesisError::Systemic { failures, message });
        }
        if attempt >= max_attempts {
            return Err(SynthesisError::ChunkFailed {
                index,
                attempts: attempt,
                message,
            });
        }
        // A store hiccup here is not worth failing the chunk over
        if ctx.is_cancelled().await.unwrap_or(false) {
            return Ok(ChunkResult::Abandoned);
        }

        text = shorten(&text, RETRY_SHRINK_RATIO);
        attempt += 1;
    }
}

/// Cut `text` to about `ratio` of its length, backing off to a word boundary
pub fn shorten(text: &str, ratio: f64) -> String {
    let target = ((text.len() as f64) * ratio).floor() as usize;
    if target == 0 || target >= text.len() {
        return text.to_string();
    }

    let mut cut = target;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &text[..cut];
    let at_word = match head.rfind(char::is_whitespace) {
        Some(space) if !text[cut..].starts_with(char::is_whitespace) => &head[..space],
        _ => head,
    };

    let shortened = at_word.trim_end();
    if shortened.is_empty() {
        head.to_string()
    } else {
        shortened.to_string()
    }
}
