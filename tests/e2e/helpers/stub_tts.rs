use async_trait::async_trait;
use audiobook_backend::domain::tts::{TtsError, VoiceConfig};
use audiobook_backend::infrastructure::repositories::TtsRepository;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// MPEG-1 Layer III, 128 kbps at 48 kHz: 384 bytes and 24 ms per frame
const FRAME_HEADER: [u8; 4] = [0xFF, 0xFB, 0x94, 0x00];
const FRAME_BYTES: usize = 384;

/// Frames per synthesized chunk, 1.008 s of audio
pub const FRAMES_PER_CHUNK: usize = 42;

pub fn mp3_frames(count: usize) -> Vec<u8> {
    let mut frame = FRAME_HEADER.to_vec();
    frame.resize(FRAME_BYTES, 0);
    frame.repeat(count)
}

/// TTS engine double: fixed-length MP3 audio per chunk, with adjustable
/// latency and a budget of forced failures
#[derive(Default)]
pub struct StubTts {
    delay_ms: AtomicU64,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl StubTts {
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// The next `count` calls fail with a transient error
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TtsRepository for StubTts {
    async fn synthesize(&self, _text: &str, _voice: &VoiceConfig) -> Result<Vec<u8>, TtsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TtsError::Transient("stub engine unavailable".to_string()));
        }

        Ok(mp3_frames(FRAMES_PER_CHUNK))
    }
}
