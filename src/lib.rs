//! Streaming text-to-speech client for the NoPause dual-stream WebSocket API.
//!
//! Text goes up fragment by fragment while synthesized audio comes back in
//! chunks on the same connection. [`synthesis`] runs on tokio, [`blocking`]
//! uses a sender thread.

pub mod audio;
pub mod blocking;
pub mod config;
pub mod error;
pub mod session;
pub mod synthesis;
pub mod transport;

pub use audio::{AudioChunk, SessionConfig};
pub use config::{ApiSettings, ConfigError, SettingsOverrides};
pub use error::{Result, SynthesisError};
pub use session::{Pull, SessionState};
pub use synthesis::{AudioReceiver, Synthesizer};
