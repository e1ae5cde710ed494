use std::io::Cursor;

/// Narration pace used when the audio itself cannot be measured
pub const WORDS_PER_MINUTE: f64 = 150.0;

/// One way of measuring playback length from encoded bytes
pub trait DurationProbe: Send + Sync {
    fn name(&self) -> &'static str;

    /// Seconds of audio, or `None` when this probe cannot read the encoding
    fn probe(&self, audio: &[u8]) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub seconds: f64,
    pub source: &'static str,
}

/// Runs probes in order and falls back to a word-count estimate
pub struct DurationEstimator {
    probes: Vec<Box<dyn DurationProbe>>,
}

impl DurationEstimator {
    pub fn new(probes: Vec<Box<dyn DurationProbe>>) -> Self {
        Self { probes }
    }

    /// Symphonia demuxing for every supported encoding, MP3 included
    pub fn standard() -> Self {
        Self::new(vec![Box::new(ContainerProbe)])
    }

    pub fn measure(&self, audio: &[u8], word_count: usize) -> Measurement {
        for probe in &self.probes {
            match probe.probe(audio) {
                Some(seconds) if seconds.is_finite() && seconds > 0.0 => {
                    return Measurement {
                        seconds,
                        source: probe.name(),
                    };
                }
                _ => {
                    tracing::debug!(probe = probe.name(), "Duration probe could not measure audio");
                }
            }
        }

        let seconds = estimate_from_words(word_count);
        tracing::warn!(
            word_count = word_count,
            estimated_seconds = seconds,
            "Falling back to word-count duration estimate"
        );
        Measurement {
            seconds,
            source: "word-estimate",
        }
    }
}

pub fn estimate_from_words(word_count: usize) -> f64 {
    (word_count as f64 / WORDS_PER_MINUTE * 60.0).ceil()
}

/// Demuxes the buffer with symphonia and sums packet durations.
///
/// Concatenated MP3 responses stay a valid stream, so this also measures
/// assembled audiobooks.
pub struct ContainerProbe;

impl DurationProbe for ContainerProbe {
    fn name(&self) -> &'static str {
        "container"
    }

    fn probe(&self, audio: &[u8]) -> Option<f64> {
        use symphonia::core::errors::Error as SymphoniaError;
        use symphonia::core::formats::FormatOptions;
        use symphonia::core::io::MediaSourceStream;
        use symphonia::core::meta::MetadataOptions;
        use symphonia::core::probe::Hint;
        use symphonia::default::get_probe;

        let media_source =
            MediaSourceStream::new(Box::new(Cursor::new(audio.to_vec())), Default::default());
        let probed = get_probe()
            .format(
                &Hint::new(),
                media_source,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .ok()?;

        let mut format = probed.format;
        let track = format.default_track()?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
            if rate > 0 && frames > 0 {
                return Some(frames as f64 / rate as f64);
            }
        }

        let time_base = params.time_base?;
        let mut total_ts = 0u64;
        loop {
            match format.next_packet() {
                Ok(packet) if packet.track_id() == track_id => total_ts += packet.dur,
                Ok(_) => continue,
                Err(SymphoniaError::IoError(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(_) => break,
            }
        }

        let time = time_base.calc_time(total_ts);
        Some(time.seconds as f64 + time.frac)
    }
}
