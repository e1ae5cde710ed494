use lingua::Language;
use serde::{Deserialize, Serialize};

/// ISO 639-1 language codes supported by the TTS system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LanguageCode {
    #[serde(rename = "en")]
    English,
    #[serde(rename = "es")]
    Spanish,
    #[serde(rename = "fr")]
    French,
    #[serde(rename = "de")]
    German,
    #[serde(rename = "it")]
    Italian,
    #[serde(rename = "pt")]
    Portuguese,
}

impl LanguageCode {
    /// Languages the detector is built with
    pub const SUPPORTED: [Language; 6] = [
        Language::English,
        Language::Spanish,
        Language::French,
        Language::German,
        Language::Italian,
        Language::Portuguese,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageCode::English => "en",
            LanguageCode::Spanish => "es",
            LanguageCode::French => "fr",
            LanguageCode::German => "de",
            LanguageCode::Italian => "it",
            LanguageCode::Portuguese => "pt",
        }
    }

    pub fn from_lingua(language: Language) -> Self {
        match language {
            Language::English => LanguageCode::English,
            Language::Spanish => LanguageCode::Spanish,
            Language::French => LanguageCode::French,
            Language::German => LanguageCode::German,
            Language::Italian => LanguageCode::Italian,
            Language::Portuguese => LanguageCode::Portuguese,
        }
    }
}

impl std::fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
