use super::tts_repository::TtsRepository;
use crate::domain::tts::{LanguageCode, TtsError, VoiceConfig};
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{CreateSpeechRequest, SpeechModel, Voice},
    Client,
};
use async_trait::async_trait;
use std::sync::Arc;

/// OpenAI has a limit of 4096 characters per request
pub const OPENAI_MAX_REQUEST_BYTES: usize = 4096;

/// OpenAI TTS implementation of TTS repository
pub struct OpenAiTtsRepository {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiTtsRepository {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: String) -> Self {
        Self { client, model }
    }

    /// Select the appropriate OpenAI voice for a language
    fn get_voice_for_language(language: LanguageCode) -> &'static str {
        match language {
            LanguageCode::English => "alloy",
            LanguageCode::Spanish => "echo",
            LanguageCode::French => "nova",
            LanguageCode::German => "onyx",
            LanguageCode::Italian => "fable",
            LanguageCode::Portuguese => "shimmer",
        }
    }

    fn parse_voice(voice: &str) -> Voice {
        match voice.to_lowercase().as_str() {
            "echo" => Voice::Echo,
            "fable" => Voice::Fable,
            "onyx" => Voice::Onyx,
            "nova" => Voice::Nova,
            "shimmer" => Voice::Shimmer,
            _ => Voice::Alloy,
        }
    }

    fn parse_model(&self) -> SpeechModel {
        match self.model.as_str() {
            "tts-1" => SpeechModel::Tts1,
            "tts-1-hd" => SpeechModel::Tts1Hd,
            other => SpeechModel::Other(other.to_string()),
        }
    }

    fn classify_error(err: &OpenAIError) -> TtsError {
        let message = format!("OpenAI TTS error: {}", err);
        match err {
            OpenAIError::InvalidArgument(_) => TtsError::Rejected(message),
            OpenAIError::ApiError(api_err)
                if api_err.r#type.as_deref() == Some("invalid_request_error") =>
            {
                TtsError::Rejected(message)
            }
            _ => TtsError::Transient(message),
        }
    }
}

#[async_trait]
impl TtsRepository for OpenAiTtsRepository {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<Vec<u8>, TtsError> {
        let start_time = std::time::Instant::now();
        let voice_name = voice
            .voice
            .as_deref()
            .unwrap_or_else(|| Self::get_voice_for_language(voice.language));

        tracing::debug!(
            model = %self.model,
            voice = voice_name,
            text_length = text.len(),
            "Calling OpenAI TTS API"
        );

        let request = CreateSpeechRequest {
            model: self.parse_model(),
            input: text.to_string(),
            voice: Self::parse_voice(voice_name),
            response_format: None, // Defaults to MP3
            speed: None,
        };

        let response = self.client.audio().speech(request).await.map_err(|e| {
            let classified = Self::classify_error(&e);
            tracing::error!(
                error = %e,
                retryable = classified.is_retryable(),
                model = %self.model,
                voice = voice_name,
                text_length = text.len(),
                "OpenAI TTS API call failed"
            );
            classified
        })?;

        let audio_bytes = response.bytes.to_vec();
        let duration = start_time.elapsed();

        tracing::info!(
            provider = "openai",
            latency_ms = duration.as_millis(),
            characters_count = text.len(),
            audio_size_bytes = audio_bytes.len(),
            "TTS synthesis completed"
        );

        Ok(audio_bytes)
    }
}
