use std::time::Duration;

/// Tunables of the audiobook pipeline, loaded from `Config` in production and
/// built directly in tests
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Byte ceiling of one TTS request
    pub chunk_max_bytes: usize,
    /// In-flight synthesis calls for documents up to `large_document_chunks`
    pub concurrency_small: usize,
    /// In-flight synthesis calls for larger documents
    pub concurrency_large: usize,
    pub large_document_chunks: usize,
    /// Pause after every wave of `concurrency` dispatches
    pub inter_batch_delay: Duration,
    /// Calls per chunk, the first one included
    pub max_chunk_attempts: u32,
    /// Failures in a row, across chunks, that abort the whole job
    pub consecutive_failure_limit: usize,
    /// Wall-clock budget of one invocation; `None` disables checkpointing
    pub processing_budget: Option<Duration>,
    pub checkpoint_safety_margin: Duration,
    /// Delay before a suspended job is picked up again
    pub resume_delay: Duration,
    pub extraction_timeout: Duration,
}

impl PipelineSettings {
    /// Concurrency for a document of `total_chunks` chunks
    pub fn concurrency_for(&self, total_chunks: usize) -> usize {
        let limit = if total_chunks > self.large_document_chunks {
            self.concurrency_large
        } else {
            self.concurrency_small
        };
        limit.max(1)
    }

    /// When the suspend signal fires, if at all
    pub fn suspend_after(&self) -> Option<Duration> {
        self.processing_budget
            .map(|budget| budget.saturating_sub(self.checkpoint_safety_margin))
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_max_bytes: 5000,
            concurrency_small: 5,
            concurrency_large: 3,
            large_document_chunks: 40,
            inter_batch_delay: Duration::ZERO,
            max_chunk_attempts: 3,
            consecutive_failure_limit: 3,
            processing_budget: None,
            checkpoint_safety_margin: Duration::from_secs(30),
            resume_delay: Duration::from_secs(1),
            extraction_timeout: Duration::from_secs(120),
        }
    }
}
