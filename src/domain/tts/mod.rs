pub mod error;
pub mod language;
pub mod voice;

pub use error::TtsError;
pub use language::LanguageCode;
pub use voice::{VoiceConfig, VoiceSelector};
