use super::{build_request, is_closed_error, Connector, Transport, TransportError};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use secrecy::SecretString;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `tokio-tungstenite` connections
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Connection = WsConnection;

    async fn open(
        &self,
        endpoint: &str,
        api_key: &SecretString,
    ) -> Result<WsConnection, TransportError> {
        let request = build_request(endpoint, api_key)?;
        let (ws_stream, response) = connect_async(request).await?;
        info!("✅ WebSocket connected ({})", response.status());

        let (write, read) = ws_stream.split();
        Ok(WsConnection {
            write: Mutex::new(write),
            read: Mutex::new(read),
            closed: AtomicBool::new(false),
        })
    }
}

/// Split WebSocket; each half has its own lock so reads never block writes
pub struct WsConnection {
    write: Mutex<SplitSink<WsStream, Message>>,
    read: Mutex<SplitStream<WsStream>>,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for WsConnection {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut write = self.write.lock().await;
        write.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<String>, TransportError> {
        let mut read = self.read.lock().await;
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    debug!("Ignoring {} byte binary frame", data.len());
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("🔌 Server closed the connection: {:?}", frame);
                    self.closed.store(true, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) if is_closed_error(&e) => {
                    self.closed.store(true, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    self.closed.store(true, Ordering::SeqCst);
                    return Ok(None);
                }
            }
        }
    }

    async fn probe(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut write = self.write.lock().await;
        match write.send(Message::Ping(Vec::new())).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Ping failed: {}", e);
                self.closed.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut write = self.write.lock().await;
        match write.close().await {
            Ok(()) => debug!("🔌 WebSocket closed"),
            Err(e) if is_closed_error(&e) => {}
            Err(e) => warn!("⚠️ Error while closing WebSocket: {}", e),
        }
    }
}
