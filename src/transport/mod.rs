//! Duplex text-frame connections to the synthesis endpoint.

pub mod ws;

pub use ws::{WsConnection, WsConnector};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::client::Request;
use tungstenite::http::HeaderValue;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const SDK_VERSION_HEADER: &str = "nopause-rust-sdk-version";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value for header {0}")]
    InvalidHeader(&'static str),

    #[error("Connection closed")]
    Closed,
}

/// One open connection. Sending and receiving may run concurrently from
/// different tasks; each direction has a single user at a time.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Next text frame, `None` once the peer closed the connection
    async fn receive(&self) -> Result<Option<String>, TransportError>;

    /// Liveness check that does not consume incoming frames
    async fn probe(&self) -> bool;

    /// Best effort; closing twice is fine
    async fn close(&self);
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Transport + 'static;

    async fn open(
        &self,
        endpoint: &str,
        api_key: &SecretString,
    ) -> Result<Self::Connection, TransportError>;
}

/// Upgrade request carrying the credential and client version headers
pub fn build_request(endpoint: &str, api_key: &SecretString) -> Result<Request, TransportError> {
    let mut request = endpoint.into_client_request()?;
    let key = HeaderValue::from_str(api_key.expose_secret())
        .map_err(|_| TransportError::InvalidHeader(API_KEY_HEADER))?;

    let headers = request.headers_mut();
    headers.insert(API_KEY_HEADER, key);
    headers.insert(
        SDK_VERSION_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    Ok(request)
}

/// Errors that only mean the socket is already gone
pub(crate) fn is_closed_error(error: &tungstenite::Error) -> bool {
    matches!(
        error,
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
    )
}
