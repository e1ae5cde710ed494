use crate::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum AudiobookServiceError {
    #[error("dependency error: {0}")]
    Dependency(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("audiobook job not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<AppError> for AudiobookServiceError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::BadRequest(msg) => AudiobookServiceError::Invalid(msg),
            AppError::NotFound(_) => AudiobookServiceError::NotFound,
            AppError::Conflict(msg) => AudiobookServiceError::Conflict(msg),
            _ => AudiobookServiceError::Dependency(err.to_string()),
        }
    }
}

impl From<AudiobookServiceError> for AppError {
    fn from(err: AudiobookServiceError) -> Self {
        match err {
            AudiobookServiceError::Invalid(msg) => AppError::BadRequest(msg),
            AudiobookServiceError::NotFound => {
                AppError::NotFound("Audiobook job not found".to_string())
            }
            AudiobookServiceError::Conflict(msg) => AppError::Conflict(msg),
            AudiobookServiceError::Dependency(msg) => AppError::Internal(msg),
        }
    }
}
