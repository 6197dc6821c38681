use crate::config::ConfigError;
use crate::transport::TransportError;
use nopause_protocol::ProtocolError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SynthesisError>;

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection could not be opened or broke while a request was running
    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        #[source]
        source: Option<TransportError>,
    },

    /// The service answered with a non-zero status code
    #[error("NoPause API error (code {code}): {status}")]
    Api { code: i64, status: String },

    #[error("Malformed server frame: {0}")]
    Format(#[from] ProtocolError),

    #[error("More than one synthesis request must not run on the same connection")]
    AlreadyInUse,

    #[error("Text sender stopped without reporting a result")]
    SenderPanicked,
}

impl SynthesisError {
    pub fn invalid_request(message: impl Into<String>, source: Option<TransportError>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            source,
        }
    }
}
