/// Failure of a single synthesis call.
///
/// The engine decides retryability: `Transient` failures (throttling, network,
/// 5xx) are worth another call, `Rejected` ones (invalid input, unsupported
/// language) will fail again no matter how often they are retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TtsError {
    #[error("TTS engine unavailable: {0}")]
    Transient(String),
    #[error("TTS engine rejected the request: {0}")]
    Rejected(String),
}

impl TtsError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TtsError::Transient(_))
    }
}
