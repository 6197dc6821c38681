use nopause_protocol::protocol::{
    self, AudioConfig, DualStreamConfig, Handshake, ModelConfig, DEFAULT_LANGUAGE,
    DEFAULT_MODEL_NAME, DEFAULT_SAMPLE_RATE, DEFAULT_VOICE_ID,
};
use nopause_protocol::ProtocolError;

/// The service always emits mono audio
pub const DEFAULT_CHANNELS: u16 = 1;

/// Voice and audio settings fixed for the lifetime of a synthesizer
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub voice_id: String,
    pub model_name: String,
    pub language: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub dual_stream: DualStreamConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            voice_id: DEFAULT_VOICE_ID.to_string(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            dual_stream: DualStreamConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = voice_id.into();
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn handshake(&self) -> Handshake {
        Handshake {
            config: ModelConfig {
                voice_id: self.voice_id.clone(),
                model_name: self.model_name.clone(),
                language: self.language.clone(),
                dual_stream: self.dual_stream,
            },
            audio_config: AudioConfig {
                sample_rate: self.sample_rate,
            },
        }
    }

    /// Wire text of the handshake frame
    pub fn handshake_text(&self) -> Result<String, ProtocolError> {
        protocol::encode(&self.handshake())
    }
}

/// One decoded piece of synthesized 16-bit little-endian PCM
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub chunk_id: i64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Real-time factor reported by the service for this chunk
    pub rtf: f64,
    pub chunk_size_us: i64,
    pub is_last_chunk: bool,
}

impl AudioChunk {
    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.chunk_size_us as f64 / 1e6
    }

    pub fn n_samples(&self) -> usize {
        self.data.len() / 2
    }

    pub fn samples_i16(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(data: Vec<u8>) -> AudioChunk {
        AudioChunk {
            data,
            chunk_id: 0,
            sample_rate: 24000,
            channels: 1,
            rtf: 0.2,
            chunk_size_us: 250_000,
            is_last_chunk: false,
        }
    }

    #[test]
    fn test_default_handshake() {
        let handshake = SessionConfig::default().handshake();
        assert_eq!(handshake.config.voice_id, "Zoe");
        assert_eq!(handshake.config.model_name, "nopause-en-beta");
        assert_eq!(handshake.audio_config.sample_rate, 24000);
        assert!(handshake.config.dual_stream.stream_in);
    }

    #[test]
    fn test_builder_overrides() {
        let config = SessionConfig::default()
            .with_voice("Max")
            .with_sample_rate(16000);
        let text = config.handshake_text().unwrap();
        assert!(text.contains(r#""voice_id":"Max""#));
        assert!(text.contains(r#""sample_rate_hertz":16000"#));
    }

    #[test]
    fn test_chunk_measurements() {
        let chunk = chunk(vec![0x01, 0x00, 0xff, 0xff, 0x07]);
        assert_eq!(chunk.n_samples(), 2);
        assert_eq!(chunk.samples_i16(), vec![1, -1]);
        assert!((chunk.duration_secs() - 0.25).abs() < f64::EPSILON);
    }
}
