//! Thread-based dual-stream synthesis over blocking `tungstenite`.
//!
//! Same state machine as [`crate::synthesis`]: the text is written by a
//! background thread while the calling thread pulls audio.

mod connection;
mod receiver;
mod sender;

pub use connection::{BlockingConnector, BlockingTransport, TungsteniteConnection, TungsteniteConnector};
pub use receiver::AudioReceiver;

use crate::audio::SessionConfig;
use crate::config::ApiSettings;
use crate::error::Result;
use crate::session::{SessionCore, SessionState, Ticket};
use log::info;
use sender::SenderThread;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};

pub(crate) type Core<C> = SessionCore<<C as BlockingConnector>::Connection, Arc<AtomicBool>>;

pub(crate) struct Shared<C: BlockingConnector> {
    core: Core<C>,
    connector: C,
    connect_lock: Mutex<()>,
}

impl<C: BlockingConnector> Shared<C> {
    fn connect(&self) -> Result<Arc<C::Connection>> {
        let _serial = self.connect_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(connection) = self.core.current() {
            if connection.probe() {
                return Ok(connection);
            }
            info!("🔄 Connection is no longer alive, reconnecting");
            self.core.detach(&connection);
            connection.close();
        }

        self.core.connecting();
        let settings = &self.core.settings;
        let connection = self
            .connector
            .open(settings.endpoint(), settings.api_key())
            .map(Arc::new)
            .map_err(|e| self.core.connect_failed(e))?;

        if let Err(e) = connection.send(self.core.handshake.clone()) {
            connection.close();
            return Err(self.core.connect_failed(e));
        }

        self.core.connected(Arc::clone(&connection));
        Ok(connection)
    }
}

/// Blocking synthesizer; clones share the connection and the usage guard.
pub struct Synthesizer<C: BlockingConnector = TungsteniteConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: BlockingConnector> Clone for Synthesizer<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Synthesizer<TungsteniteConnector> {
    pub fn new(config: SessionConfig, settings: &ApiSettings) -> Result<Self> {
        Self::with_connector(config, settings, TungsteniteConnector)
    }

    pub fn from_env(config: SessionConfig) -> Result<Self> {
        let settings = ApiSettings::from_env()?;
        Self::new(config, &settings)
    }

    /// Connect, run one request and close the connection when it ends
    pub fn one_shot<I>(
        config: SessionConfig,
        settings: &ApiSettings,
        text: I,
    ) -> Result<AudioReceiver<TungsteniteConnector>>
    where
        I: IntoIterator + Send + 'static,
        I::Item: Into<String>,
    {
        Self::new(config, settings)?.into_one_shot(text)
    }
}

impl<C: BlockingConnector> Synthesizer<C> {
    pub fn with_connector(config: SessionConfig, settings: &ApiSettings, connector: C) -> Result<Self> {
        Ok(Self {
            shared: Arc::new(Shared {
                core: SessionCore::new(config, settings)?,
                connector,
                connect_lock: Mutex::new(()),
            }),
        })
    }

    pub fn connect(&self) -> Result<()> {
        self.shared.connect().map(|_| ())
    }

    /// Start a request; `text` may block between fragments
    pub fn synthesize<I>(&self, text: I) -> Result<AudioReceiver<C>>
    where
        I: IntoIterator + Send + 'static,
        I::Item: Into<String>,
    {
        self.start(text, false)
    }

    pub fn into_one_shot<I>(self, text: I) -> Result<AudioReceiver<C>>
    where
        I: IntoIterator + Send + 'static,
        I::Item: Into<String>,
    {
        self.start(text, true)
    }

    fn start<I>(&self, text: I, one_shot: bool) -> Result<AudioReceiver<C>>
    where
        I: IntoIterator + Send + 'static,
        I::Item: Into<String>,
    {
        let core = &self.shared.core;
        let lease = core.acquire()?;

        let connection = match self.shared.connect() {
            Ok(connection) => connection,
            Err(e) => {
                core.abandon(lease);
                return Err(e);
            }
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let request = core.activate(lease, Arc::clone(&cancel));
        let sender = match SenderThread::spawn(
            Arc::clone(&connection),
            text,
            Arc::clone(&cancel),
            core.state_cell(),
            request.clone(),
        ) {
            Ok(sender) => sender,
            Err(e) => {
                core.end_request(lease, SessionState::Idle);
                return Err(e);
            }
        };

        Ok(AudioReceiver::new(
            Arc::clone(&self.shared),
            Ticket::new(connection, cancel, lease, request, one_shot),
            sender,
        ))
    }

    pub fn close(&self) {
        if let Some(connection) = self.shared.core.close() {
            connection.close();
            info!("🔌 Connection closed");
        }
    }

    pub fn interrupt(&self) -> Result<()> {
        self.close();
        self.connect()
    }

    pub fn state(&self) -> SessionState {
        self.shared.core.state()
    }

    pub fn in_use(&self) -> bool {
        self.shared.core.in_use()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.core.current().is_some()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.core.config
    }

    pub fn endpoint(&self) -> &str {
        self.shared.core.settings.endpoint()
    }

    pub fn settings_description(&self) -> String {
        self.shared.core.settings.describe(None)
    }
}
