use crate::protocol::{self, ChunkMeta, ClientFrame, ServerFrame, DEFAULT_SAMPLE_RATE};
use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::{Message, WebSocket};

const API_KEY_HEADER: &str = "x-api-key";
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for the mock dual-stream server
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Address to bind to (use "127.0.0.1:0" for a random port)
    pub bind_address: String,
    /// Required `X-API-KEY` value; `None` accepts any non-empty key
    pub api_key: Option<String>,
    /// Pause before every reply frame
    pub reply_delay: Duration,
    /// Follow every audio frame with an empty, non-final frame
    pub empty_frames: bool,
    /// Put a short burst of audio into the final frame instead of leaving it empty
    pub audio_on_final: bool,
    /// Answer the first text fragment of each request with this error code and status
    pub fail_with: Option<(i64, String)>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            api_key: None,
            reply_delay: Duration::ZERO,
            empty_frames: false,
            audio_on_final: false,
            fail_with: None,
        }
    }
}

/// A client frame as received by the mock, tagged with the connection it arrived on
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFrame {
    pub connection: usize,
    pub frame: ClientFrame,
}

#[derive(Default)]
struct ServerState {
    frames: Mutex<Vec<RecordedFrame>>,
    connections: AtomicUsize,
    rejected: AtomicUsize,
    should_stop: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock NoPause server: echoes one audio frame per text fragment and a final
/// frame after the EOS fragment.
pub struct MockTtsServer {
    config: MockServerConfig,
    state: Arc<ServerState>,
}

impl MockTtsServer {
    pub fn new(config: MockServerConfig) -> Self {
        info!("🎵 Mock TTS server configured:");
        info!("  ⏱️ Reply delay: {:?}", config.reply_delay);
        info!("  🕳️ Empty frames: {}", config.empty_frames);
        if let Some((code, status)) = &config.fail_with {
            info!("  ❌ Failing requests with {} ({})", code, status);
        }

        Self {
            config,
            state: Arc::new(ServerState::default()),
        }
    }

    /// Bind and start accepting connections; returns a handle that stops the server on drop
    pub fn start_background(self) -> std::io::Result<MockServerHandle> {
        let listener = TcpListener::bind(&self.config.bind_address)?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();

        info!("🎵 Mock TTS server listening on 127.0.0.1:{}", port);

        let state = Arc::clone(&self.state);
        let config = self.config.clone();
        thread::spawn(move || Self::accept_loop(listener, config, state));

        Ok(MockServerHandle {
            port,
            state: self.state,
        })
    }

    fn accept_loop(listener: TcpListener, config: MockServerConfig, state: Arc<ServerState>) {
        let next_client_id = AtomicUsize::new(1);

        while !state.should_stop.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    let client_id = next_client_id.fetch_add(1, Ordering::Relaxed);
                    info!("📡 Client {} connected from {}", client_id, addr);

                    let config = config.clone();
                    let state = Arc::clone(&state);
                    thread::spawn(move || {
                        if let Err(e) = Self::handle_client(stream, client_id, &config, &state) {
                            debug!("Client {} ended: {}", client_id, e);
                        }
                        info!("🔌 Client {} disconnected", client_id);
                    });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    error!("Accept error: {}", e);
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }

        info!("🛑 Mock TTS server stopped");
    }

    fn handle_client(
        stream: TcpStream,
        client_id: usize,
        config: &MockServerConfig,
        state: &ServerState,
    ) -> Result<(), tungstenite::Error> {
        stream.set_nonblocking(false)?;

        let expected_key = config.api_key.clone();
        let check_key = move |request: &Request, response: Response| {
            let provided = request
                .headers()
                .get(API_KEY_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default();
            let accepted = match &expected_key {
                Some(expected) => provided == expected,
                None => !provided.is_empty(),
            };
            if accepted {
                Ok(response)
            } else {
                let mut rejection = ErrorResponse::new(Some("invalid api key".to_string()));
                *rejection.status_mut() = StatusCode::FORBIDDEN;
                Err(rejection)
            }
        };

        let mut ws = match tungstenite::accept_hdr(stream, check_key) {
            Ok(ws) => ws,
            Err(e) => {
                warn!("🚫 Client {} rejected: {}", client_id, e);
                state.rejected.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
        };
        state.connections.fetch_add(1, Ordering::SeqCst);
        ws.get_ref().set_read_timeout(Some(Duration::from_millis(100)))?;

        let mut session = ClientSession::new(client_id);

        loop {
            if state.should_stop.load(Ordering::Relaxed) {
                let _ = ws.close(None);
                return Ok(());
            }

            let text = match ws.read() {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => {
                    let _ = ws.flush();
                    return Ok(());
                }
                Ok(_) => continue,
                Err(tungstenite::Error::Io(e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            };

            let frame = match protocol::decode_client(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("⚠️ Client {} sent an undecodable frame: {}", client_id, e);
                    let rejection = ServerFrame::error(40000, "malformed frame");
                    session.reply(&mut ws, config, &rejection)?;
                    continue;
                }
            };

            lock(&state.frames).push(RecordedFrame {
                connection: client_id,
                frame: frame.clone(),
            });

            session.respond(&mut ws, config, frame)?;
        }
    }
}

/// Per-connection protocol state of the mock
struct ClientSession {
    client_id: usize,
    sample_rate: Option<u32>,
    next_chunk_id: i64,
    failed: bool,
}

impl ClientSession {
    fn new(client_id: usize) -> Self {
        Self {
            client_id,
            sample_rate: None,
            next_chunk_id: 0,
            failed: false,
        }
    }

    fn respond(
        &mut self,
        ws: &mut WebSocket<TcpStream>,
        config: &MockServerConfig,
        frame: ClientFrame,
    ) -> Result<(), tungstenite::Error> {
        let text = match frame {
            ClientFrame::Handshake(handshake) => {
                debug!(
                    "🤝 Client {} handshake: voice={} rate={}",
                    self.client_id, handshake.config.voice_id, handshake.audio_config.sample_rate
                );
                self.sample_rate = Some(handshake.audio_config.sample_rate);
                return Ok(());
            }
            ClientFrame::Text(text) => text,
        };

        let Some(sample_rate) = self.sample_rate else {
            return self.reply(ws, config, &ServerFrame::error(40001, "handshake required"));
        };

        if text.content.is_end {
            let last = if config.audio_on_final && !self.failed {
                let pcm = vec![0u8; 4];
                ServerFrame::audio_chunk(&pcm, self.meta(2, sample_rate), true)
            } else {
                ServerFrame::empty(true)
            };
            self.next_chunk_id = 0;
            self.failed = false;
            return self.reply(ws, config, &last);
        }

        if self.failed {
            return Ok(());
        }
        if let Some((code, status)) = &config.fail_with {
            self.failed = true;
            return self.reply(ws, config, &ServerFrame::error(*code, status.clone()));
        }

        if text.content.text.is_empty() {
            return self.reply(ws, config, &ServerFrame::empty(false));
        }

        let pcm: Vec<u8> = text
            .content
            .text
            .chars()
            .flat_map(|c| (c as u32 as i16).to_le_bytes())
            .collect();
        let meta = self.meta(pcm.len() / 2, sample_rate);
        self.reply(ws, config, &ServerFrame::audio_chunk(&pcm, meta, false))?;

        if config.empty_frames {
            self.reply(ws, config, &ServerFrame::empty(false))?;
        }
        Ok(())
    }

    fn meta(&mut self, samples: usize, sample_rate: u32) -> ChunkMeta {
        let chunk_id = self.next_chunk_id;
        self.next_chunk_id += 1;
        let rate = if sample_rate == 0 {
            DEFAULT_SAMPLE_RATE
        } else {
            sample_rate
        };
        ChunkMeta {
            chunk_id,
            rtf: 0.1,
            chunk_size_us: (samples as i64 * 1_000_000) / rate as i64,
        }
    }

    fn reply(
        &self,
        ws: &mut WebSocket<TcpStream>,
        config: &MockServerConfig,
        frame: &ServerFrame,
    ) -> Result<(), tungstenite::Error> {
        if !config.reply_delay.is_zero() {
            thread::sleep(config.reply_delay);
        }
        // Frames built from plain structs always serialize
        let text = protocol::encode(frame).unwrap_or_default();
        debug!("📤 Client {} <- {}", self.client_id, text);
        ws.send(Message::Text(text))
    }
}

/// Handle for a mock server running in the background
pub struct MockServerHandle {
    pub port: u16,
    state: Arc<ServerState>,
}

impl MockServerHandle {
    /// `host:port`, suitable as an API base
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Every client frame received so far, in arrival order
    pub fn frames(&self) -> Vec<RecordedFrame> {
        lock(&self.state.frames).clone()
    }

    /// Frames received on one connection
    pub fn frames_on(&self, connection: usize) -> Vec<ClientFrame> {
        lock(&self.state.frames)
            .iter()
            .filter(|recorded| recorded.connection == connection)
            .map(|recorded| recorded.frame.clone())
            .collect()
    }

    /// Number of accepted WebSocket connections
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Number of handshakes refused because of a bad or missing key
    pub fn rejected(&self) -> usize {
        self.state.rejected.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.state.should_stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for MockServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
