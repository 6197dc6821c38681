use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub const DEFAULT_VOICE_ID: &str = "Zoe";
pub const DEFAULT_MODEL_NAME: &str = "nopause-en-beta";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// Whether text input and audio output are streamed incrementally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DualStreamConfig {
    pub stream_in: bool,
    pub stream_out: bool,
}

impl Default for DualStreamConfig {
    fn default() -> Self {
        Self {
            stream_in: true,
            stream_out: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub voice_id: String,
    pub model_name: String,
    pub language: String,
    pub dual_stream: DualStreamConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(rename = "sample_rate_hertz")]
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Beginning-of-stream frame, sent once right after the connection opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub config: ModelConfig,
    pub audio_config: AudioConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
    pub is_end: bool,
}

/// One fragment of input text. The empty fragment with `is_end` set is the EOS frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFrame {
    pub content: TextContent,
}

impl TextFrame {
    pub fn fragment(text: impl Into<String>) -> Self {
        Self {
            content: TextContent {
                text: text.into(),
                is_end: false,
            },
        }
    }

    pub fn eos() -> Self {
        Self {
            content: TextContent {
                text: String::new(),
                is_end: true,
            },
        }
    }

    pub fn is_eos(&self) -> bool {
        self.content.is_end && self.content.text.is_empty()
    }
}

/// Anything a client may put on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientFrame {
    Handshake(Handshake),
    Text(TextFrame),
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub chunk_id: i64,
    pub rtf: f64,
    pub chunk_size_us: i64,
}

/// Server → client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    pub code: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub audio_content: Option<String>,
    #[serde(default)]
    pub tts_response_chunk_meta: Option<ChunkMeta>,
    #[serde(default)]
    pub is_end: bool,
}

impl ServerFrame {
    /// A successful frame carrying PCM audio
    pub fn audio_chunk(pcm: &[u8], meta: ChunkMeta, is_end: bool) -> Self {
        Self {
            code: 0,
            status: "ok".to_string(),
            audio_content: Some(BASE64.encode(pcm)),
            tts_response_chunk_meta: Some(meta),
            is_end,
        }
    }

    /// A successful frame without audio
    pub fn empty(is_end: bool) -> Self {
        Self {
            code: 0,
            status: "ok".to_string(),
            audio_content: Some(String::new()),
            tts_response_chunk_meta: Some(ChunkMeta::default()),
            is_end,
        }
    }

    pub fn error(code: i64, status: impl Into<String>) -> Self {
        Self {
            code,
            status: status.into(),
            audio_content: None,
            tts_response_chunk_meta: None,
            is_end: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Decoded audio payload, `None` when the frame carries no audio
    pub fn audio(&self) -> Result<Option<Vec<u8>>, ProtocolError> {
        match self.audio_content.as_deref() {
            Some(content) if !content.is_empty() => Ok(Some(BASE64.decode(content)?)),
            _ => Ok(None),
        }
    }

    pub fn meta(&self) -> ChunkMeta {
        self.tts_response_chunk_meta.unwrap_or_default()
    }
}

/// Serialize a frame to its wire text
pub fn encode<T: Serialize>(frame: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

pub fn decode_server(text: &str) -> Result<ServerFrame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

pub fn decode_client(text: &str) -> Result<ClientFrame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
