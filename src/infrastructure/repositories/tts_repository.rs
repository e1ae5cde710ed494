use crate::domain::tts::{TtsError, VoiceConfig};
use async_trait::async_trait;

/// Repository for TTS synthesis operations.
/// Abstracts the underlying TTS provider (AWS Polly, OpenAI, ...)
///
/// One call synthesizes one chunk; callers are responsible for keeping the
/// text within the provider's payload ceiling. No batching is assumed on the
/// provider side and calls fail independently of each other.
#[async_trait]
pub trait TtsRepository: Send + Sync {
    /// Synthesize `text` to MP3 audio
    ///
    /// # Errors
    /// `TtsError::Transient` when the call may succeed if repeated,
    /// `TtsError::Rejected` when the provider refuses the input itself
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<Vec<u8>, TtsError>;
}
