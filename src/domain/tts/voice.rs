use super::language::LanguageCode;
use lingua::{LanguageDetector, LanguageDetectorBuilder};

/// Enough text to detect the language reliably without scanning a whole book
const DETECTION_SAMPLE_BYTES: usize = 4000;

/// Voice parameters passed to every synthesis call of a job
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    pub language: LanguageCode,
    /// Provider voice id; `None` lets the provider pick its default for `language`
    pub voice: Option<String>,
}

/// Picks the voice for a document from its detected language
pub struct VoiceSelector {
    detector: LanguageDetector,
    voice_override: Option<String>,
}

impl VoiceSelector {
    pub fn new(voice_override: Option<String>) -> Self {
        let detector = LanguageDetectorBuilder::from_languages(&LanguageCode::SUPPORTED).build();
        Self {
            detector,
            voice_override,
        }
    }

    pub fn select(&self, text: &str) -> VoiceConfig {
        let language = self.detect_language(sample(text));
        VoiceConfig {
            language,
            voice: self.voice_override.clone(),
        }
    }

    fn detect_language(&self, text: &str) -> LanguageCode {
        match self.detector.detect_language_of(text) {
            Some(language) => LanguageCode::from_lingua(language),
            None => {
                tracing::warn!("Could not detect language, falling back to English");
                LanguageCode::English
            }
        }
    }
}

/// Leading slice of `text`, cut at a char boundary
fn sample(text: &str) -> &str {
    if text.len() <= DETECTION_SAMPLE_BYTES {
        return text;
    }
    let mut end = DETECTION_SAMPLE_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
