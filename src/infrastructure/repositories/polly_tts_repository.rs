use super::tts_repository::TtsRepository;
use crate::domain::tts::{LanguageCode, TtsError, VoiceConfig};
use async_trait::async_trait;
use aws_sdk_polly::{
    error::SdkError,
    operation::synthesize_speech::SynthesizeSpeechError,
    types::{Engine, OutputFormat, VoiceId},
    Client as PollyClient,
};
use std::sync::Arc;

/// AWS Polly accepts at most 3000 billable characters per request
pub const POLLY_MAX_REQUEST_BYTES: usize = 3000;

/// AWS Polly implementation of TTS repository
pub struct PollyTtsRepository {
    polly_client: Arc<PollyClient>,
}

impl PollyTtsRepository {
    pub fn new(polly_client: Arc<PollyClient>) -> Self {
        Self { polly_client }
    }

    /// Select the appropriate Polly voice for a language
    fn get_voice_for_language(language: LanguageCode) -> &'static str {
        match language {
            LanguageCode::English => "Joanna",
            LanguageCode::Spanish => "Lupe",
            LanguageCode::French => "Lea",
            LanguageCode::German => "Vicki",
            LanguageCode::Italian => "Bianca",
            LanguageCode::Portuguese => "Ines",
        }
    }

    /// Neural engine when the voice supports it, standard otherwise
    fn engine_for_voice(voice: &str) -> Engine {
        if is_voice_neural_compatible(voice) {
            Engine::Neural
        } else {
            Engine::Standard
        }
    }

    fn classify_error(err: &SdkError<SynthesizeSpeechError>) -> TtsError {
        let message = format!("AWS Polly error: {}", err);
        match err.as_service_error() {
            Some(service_err)
                if service_err.is_text_length_exceeded_exception()
                    || service_err.is_invalid_ssml_exception()
                    || service_err.is_language_not_supported_exception()
                    || service_err.is_engine_not_supported_exception() =>
            {
                TtsError::Rejected(message)
            }
            _ => TtsError::Transient(message),
        }
    }
}

/// Check if a voice supports neural engine
fn is_voice_neural_compatible(voice: &str) -> bool {
    // Based on AWS Polly documentation
    const NEURAL_VOICES: &[&str] = &[
        // English
        "Joanna", "Matthew", "Ivy", "Kendra", "Kimberly", "Salli", "Joey", "Justin", "Kevin",
        // Spanish
        "Lupe", "Pedro", "Sergio", // French
        "Lea", "Remi", // German
        "Vicki", "Daniel", // Italian
        "Bianca", "Adriano", // Portuguese
        "Ines", "Camila", "Vitoria", "Thiago",
    ];

    NEURAL_VOICES.contains(&voice)
}

#[async_trait]
impl TtsRepository for PollyTtsRepository {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<Vec<u8>, TtsError> {
        let start_time = std::time::Instant::now();

        let voice_name = voice
            .voice
            .as_deref()
            .unwrap_or_else(|| Self::get_voice_for_language(voice.language));
        let voice_id = VoiceId::from(voice_name);
        let engine = Self::engine_for_voice(voice_name);

        tracing::debug!(
            language = %voice.language,
            voice = voice_name,
            engine = ?engine,
            text_length = text.len(),
            "Calling AWS Polly synthesize_speech"
        );

        let result = self
            .polly_client
            .synthesize_speech()
            .text(text)
            .voice_id(voice_id)
            .output_format(OutputFormat::Mp3)
            .engine(engine.clone())
            .send()
            .await
            .map_err(|e| {
                let classified = Self::classify_error(&e);
                tracing::error!(
                    error = %e,
                    retryable = classified.is_retryable(),
                    language = %voice.language,
                    voice = voice_name,
                    engine = ?engine,
                    text_length = text.len(),
                    "AWS Polly synthesize_speech failed"
                );
                classified
            })?;

        let audio_stream = result.audio_stream.collect().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to collect audio stream from Polly response");
            TtsError::Transient(format!("Failed to read audio stream: {}", e))
        })?;

        let audio_bytes = audio_stream.into_bytes().to_vec();
        let duration = start_time.elapsed();

        tracing::info!(
            provider = "polly",
            latency_ms = duration.as_millis(),
            characters_count = text.len(),
            audio_size_bytes = audio_bytes.len(),
            "TTS synthesis completed"
        );

        Ok(audio_bytes)
    }
}
