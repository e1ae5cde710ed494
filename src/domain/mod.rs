pub mod audiobook;
pub mod pipeline;
pub mod tts;
