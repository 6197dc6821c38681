//! Async dual-stream synthesis on tokio.
//!
//! A [`Synthesizer`] owns one connection and runs one request at a time. Each
//! request spawns a task that streams the caller's text while the caller pulls
//! audio from the returned [`AudioReceiver`].

mod receiver;
mod sender;

pub use receiver::AudioReceiver;

use crate::audio::SessionConfig;
use crate::config::ApiSettings;
use crate::error::Result;
use crate::session::{SessionCore, SessionState, Ticket};
use crate::transport::{Connector, Transport, WsConnector};
use futures_util::Stream;
use log::info;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) type Core<C> = SessionCore<<C as Connector>::Connection, CancellationToken>;

pub(crate) struct Shared<C: Connector> {
    core: Core<C>,
    connector: C,
    connect_lock: tokio::sync::Mutex<()>,
}

impl<C: Connector> Shared<C> {
    async fn connect(&self) -> Result<Arc<C::Connection>> {
        let _serial = self.connect_lock.lock().await;

        if let Some(connection) = self.core.current() {
            if connection.probe().await {
                return Ok(connection);
            }
            info!("🔄 Connection is no longer alive, reconnecting");
            self.core.detach(&connection);
            connection.close().await;
        }

        self.core.connecting();
        let settings = &self.core.settings;
        let connection = match self.connector.open(settings.endpoint(), settings.api_key()).await {
            Ok(connection) => Arc::new(connection),
            Err(e) => return Err(self.core.connect_failed(e)),
        };

        if let Err(e) = connection.send(self.core.handshake.clone()).await {
            connection.close().await;
            return Err(self.core.connect_failed(e));
        }

        self.core.connected(Arc::clone(&connection));
        Ok(connection)
    }
}

/// Handle for dual-stream synthesis with one voice configuration.
///
/// Clones share the connection and the usage guard.
pub struct Synthesizer<C: Connector = WsConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for Synthesizer<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Synthesizer<WsConnector> {
    pub fn new(config: SessionConfig, settings: &ApiSettings) -> Result<Self> {
        Self::with_connector(config, settings, WsConnector)
    }

    /// Resolve settings from `.env` and the environment; fails before any I/O without a key
    pub fn from_env(config: SessionConfig) -> Result<Self> {
        let settings = ApiSettings::from_env()?;
        Self::new(config, &settings)
    }

    /// Connect, run a single request and close the connection when it ends
    pub async fn one_shot<S, F>(
        config: SessionConfig,
        settings: &ApiSettings,
        text: S,
    ) -> Result<AudioReceiver<WsConnector>>
    where
        S: Stream<Item = F> + Send + 'static,
        F: Into<String> + Send + 'static,
    {
        Self::new(config, settings)?.into_one_shot(text).await
    }
}

impl<C: Connector> Synthesizer<C> {
    pub fn with_connector(config: SessionConfig, settings: &ApiSettings, connector: C) -> Result<Self> {
        Ok(Self {
            shared: Arc::new(Shared {
                core: SessionCore::new(config, settings)?,
                connector,
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Open the connection and send the handshake. A live connection is kept as is.
    pub async fn connect(&self) -> Result<()> {
        self.shared.connect().await.map(|_| ())
    }

    /// Start a request on this handle's connection
    pub async fn synthesize<S, F>(&self, text: S) -> Result<AudioReceiver<C>>
    where
        S: Stream<Item = F> + Send + 'static,
        F: Into<String> + Send + 'static,
    {
        self.start(text, false).await
    }

    /// [`synthesize`](Self::synthesize) for text that is already in memory
    pub async fn synthesize_iter<I>(&self, fragments: I) -> Result<AudioReceiver<C>>
    where
        I: IntoIterator + Send + 'static,
        I::IntoIter: Send + 'static,
        I::Item: Into<String> + Send + 'static,
    {
        self.start(tokio_stream::iter(fragments), false).await
    }

    /// Run a single request and close the connection once it ends
    pub async fn into_one_shot<S, F>(self, text: S) -> Result<AudioReceiver<C>>
    where
        S: Stream<Item = F> + Send + 'static,
        F: Into<String> + Send + 'static,
    {
        self.start(text, true).await
    }

    async fn start<S, F>(&self, text: S, one_shot: bool) -> Result<AudioReceiver<C>>
    where
        S: Stream<Item = F> + Send + 'static,
        F: Into<String> + Send + 'static,
    {
        let core = &self.shared.core;
        let lease = core.acquire()?;

        let connection = match self.shared.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                core.abandon(lease);
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let request = core.activate(lease, cancel.clone());
        let sender = tokio::spawn(sender::send_text(
            Arc::clone(&connection),
            text,
            cancel.clone(),
            core.state_cell(),
            request.clone(),
        ));

        Ok(AudioReceiver::new(
            Arc::clone(&self.shared),
            Ticket::new(connection, cancel, lease, request, one_shot),
            sender,
        ))
    }

    /// Close the connection, cancel any running sender and release the guard
    pub async fn close(&self) {
        if let Some(connection) = self.shared.core.close() {
            connection.close().await;
            info!("🔌 Connection closed");
        }
    }

    /// Drop whatever is in flight and reconnect
    pub async fn interrupt(&self) -> Result<()> {
        self.close().await;
        self.connect().await
    }

    pub fn state(&self) -> SessionState {
        self.shared.core.state()
    }

    pub fn in_use(&self) -> bool {
        self.shared.core.in_use()
    }

    /// Whether a connection is currently held; does not probe it
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
