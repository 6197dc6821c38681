//! # NoPause Protocol
//!
//! Wire frames for the NoPause dual-stream synthesis WebSocket API.
//!
//! This crate provides:
//! - Frame definitions and JSON encoding/decoding (handshake, text, server frames)
//! - A blocking mock server speaking the protocol, for tests and local development
//!
//! ## Example Usage
//!
//! ```rust
//! use nopause_protocol::protocol::{self, ServerFrame, TextFrame};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let wire = protocol::encode(&TextFrame::fragment("Hello"))?;
//! assert_eq!(wire, r#"{"content":{"text":"Hello","is_end":false}}"#);
//!
//! let frame = protocol::decode_server(r#"{"code":0,"status":"ok","audio_content":"","is_end":true}"#)?;
//! assert!(frame.is_end);
//! assert_eq!(frame.audio()?, None);
//! # Ok(())
//! # }
//! ```

pub mod mock_server;
pub mod protocol;

// Re-export commonly used types
pub use mock_server::{MockServerConfig, MockServerHandle, MockTtsServer, RecordedFrame};
pub use protocol::{
    AudioConfig, ChunkMeta, ClientFrame, DualStreamConfig, Handshake, ModelConfig, ProtocolError,
    ServerFrame, TextContent, TextFrame,
};
