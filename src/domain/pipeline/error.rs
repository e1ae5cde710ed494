use crate::error::AppError;
use crate::infrastructure::repositories::{BlobStoreError, DocumentError};

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("unreadable document: {0}")]
    Unreadable(String),
    #[error("no text could be extracted from the document")]
    Empty,
    #[error("text extraction timed out after {0} seconds")]
    Timeout(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("synthesis of chunk {index} failed after {attempts} attempts: {message}")]
    ChunkFailed {
        index: usize,
        attempts: u32,
        message: String,
    },
    #[error("TTS engine failed {failures} times in a row, giving up: {message}")]
    Systemic { failures: usize, message: String },
    #[error("TTS engine rejected chunk {index}: {message}")]
    Rejected { index: usize, message: String },
    #[error("synthesis task crashed: {0}")]
    TaskFailed(String),
    #[error("processing budget ran out before chunk {index} could be synthesized")]
    Stalled { index: usize },
}

/// Fatal failure of one processing attempt. Its display string is what the
/// job record shows as `error_detail`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Text extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("Audio synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),
    #[error("Storage failed: {0}")]
    Storage(String),
    #[error("Document unavailable: {0}")]
    Document(String),
    #[error("Job store failed: {0}")]
    Store(String),
}

impl From<BlobStoreError> for PipelineError {
    fn from(err: BlobStoreError) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

impl From<DocumentError> for PipelineError {
    fn from(err: DocumentError) -> Self {
        PipelineError::Document(err.to_string())
    }
}

impl From<AppError> for PipelineError {
    fn from(err: AppError) -> Self {
        PipelineError::Store(err.to_string())
    }
}
