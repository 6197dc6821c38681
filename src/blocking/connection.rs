use crate::transport::{build_request, is_closed_error, TransportError};
use log::{debug, info, warn};
use secrecy::SecretString;
use std::io::ErrorKind;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

/// How long a read holds the socket before giving the writer a turn
const READ_POLL: Duration = Duration::from_millis(25);

/// Blocking counterpart of [`crate::transport::Transport`]
pub trait BlockingTransport: Send + Sync {
    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Next text frame, `None` once the peer closed the connection
    fn receive(&self) -> Result<Option<String>, TransportError>;

    fn probe(&self) -> bool;

    fn close(&self);
}

pub trait BlockingConnector: Send + Sync + 'static {
    type Connection: BlockingTransport + 'static;

    fn open(&self, endpoint: &str, api_key: &SecretString)
        -> Result<Self::Connection, TransportError>;
}

/// Opens plain `tungstenite` sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl BlockingConnector for TungsteniteConnector {
    type Connection = TungsteniteConnection;

    fn open(
        &self,
        endpoint: &str,
        api_key: &SecretString,
    ) -> Result<TungsteniteConnection, TransportError> {
        let request = build_request(endpoint, api_key)?;
        let (ws, response) = tungstenite::connect(request)?;
        info!("✅ WebSocket connected ({})", response.status());

        if let Some(tcp) = tcp_stream(ws.get_ref()) {
            tcp.set_read_timeout(Some(READ_POLL))?;
        }

        Ok(TungsteniteConnection {
            ws: Mutex::new(ws),
            waiting_writers: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }
}

fn tcp_stream(stream: &MaybeTlsStream<TcpStream>) -> Option<&TcpStream> {
    match stream {
        MaybeTlsStream::Plain(tcp) => Some(tcp),
        MaybeTlsStream::NativeTls(tls) => Some(tls.get_ref()),
        _ => None,
    }
}

/// One socket shared by the sender thread and the reading thread.
///
/// Reads use a short timeout and drop the lock between attempts, so a pending
/// read never keeps a writer waiting for long.
pub struct TungsteniteConnection {
    ws: Mutex<WebSocket<MaybeTlsStream<TcpStream>>>,
    waiting_writers: AtomicUsize,
    closed: AtomicBool,
}

impl TungsteniteConnection {
    fn lock(&self) -> MutexGuard<'_, WebSocket<MaybeTlsStream<TcpStream>>> {
        self.ws.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_for_write(&self) -> MutexGuard<'_, WebSocket<MaybeTlsStream<TcpStream>>> {
        self.waiting_writers.fetch_add(1, Ordering::SeqCst);
        let ws = self.lock();
        self.waiting_writers.fetch_sub(1, Ordering::SeqCst);
        ws
    }
}

impl BlockingTransport for TungsteniteConnection {
    fn send(&self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.lock_for_write().send(Message::Text(text))?;
        Ok(())
    }

    fn receive(&self) -> Result<Option<String>, TransportError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            while self.waiting_writers.load(Ordering::SeqCst) > 0 {
                thread::sleep(Duration::from_millis(1));
            }

            let result = self.lock().read();
            match result {
                Ok(Message::Text(text)) => return Ok(Some(text)),
                Ok(Message::Close(frame)) => {
                    debug!("🔌 Server closed the connection: {:?}", frame);
                    self.closed.store(true, Ordering::SeqCst);
                    return Ok(None);
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) if is_closed_error(&e) => {
                    self.closed.store(true, Ordering::SeqCst);
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn probe(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        match self.lock_for_write().send(Message::Ping(Vec::new())) {
            Ok(()) => true,
            Err(e) => {
                debug!("Ping failed: {}", e);
                self.closed.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut ws = self.lock_for_write();
        match ws.close(None) {
            Ok(()) => {
                let _ = ws.flush();
                debug!("🔌 WebSocket closed");
            }
            Err(e) if is_closed_error(&e) => {}
            Err(e) => warn!("⚠️ Error while closing WebSocket: {}", e),
        }
        if let Some(tcp) = tcp_stream(ws.get_ref()) {
            let _ = tcp.shutdown(Shutdown::Both);
        }
    }
}
