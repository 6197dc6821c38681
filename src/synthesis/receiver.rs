use super::Shared;
use crate::audio::AudioChunk;
use crate::error::{Result, SynthesisError};
use crate::session::{Ending, FrameOutcome, Pull, Ticket, SENDER_GRACE};
use crate::transport::{Connector, Transport, TransportError, WsConnector};
use futures_util::Stream;
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Audio of one synthesis request, pulled in arrival order.
///
/// The sequence ends after the frame the service marks as final. Dropping the
/// receiver early cancels the request and discards the connection.
pub struct AudioReceiver<C: Connector = WsConnector> {
    shared: Arc<Shared<C>>,
    ticket: Ticket<C::Connection, CancellationToken>,
    sender: Option<JoinHandle<Result<()>>>,
}

impl<C: Connector> AudioReceiver<C> {
    pub(super) fn new(
        shared: Arc<Shared<C>>,
        ticket: Ticket<C::Connection, CancellationToken>,
        sender: JoinHandle<Result<()>>,
    ) -> Self {
        Self {
            shared,
            ticket,
            sender: Some(sender),
        }
    }

    pub fn request_id(&self) -> &str {
        self.ticket.request()
    }

    /// True once the final frame was seen or the request was terminated
    pub fn is_finished(&self) -> bool {
        self.ticket.is_done()
    }

    /// Wait for the next chunk. After the end of the stream every pull returns
    /// [`Pull::EndOfStream`].
    pub async fn pull(&mut self) -> Result<Pull> {
        if self.ticket.is_done() {
            return Ok(Pull::EndOfStream);
        }

        loop {
            let text = match self.ticket.connection().receive().await {
                Ok(Some(text)) => text,
                Ok(None) => {
                    return Err(self
                        .fail_transport("Connection closed before the final frame", TransportError::Closed)
                        .await)
                }
                Err(e) => return Err(self.fail_transport("Failed to receive audio", e).await),
            };

            match self.ticket.frame(&self.shared.core, &text) {
                Ok(FrameOutcome::Chunk(chunk)) => return Ok(Pull::Chunk(chunk)),
                Ok(FrameOutcome::Skip) => continue,
                Ok(FrameOutcome::Final(last)) => {
                    // The audio already arrived; a late sender fault must not hide it
                    if let Err(e) = self.end(Ending::Finished).await {
                        warn!("[{}] ⚠️ Sender failed before the final frame: {}", self.request_id(), e);
                    }
                    return Ok(last.map_or(Pull::EndOfStream, Pull::Chunk));
                }
                Err(e) => {
                    self.abort().await;
                    return Err(e);
                }
            }
        }
    }

    /// Pull every remaining chunk
    pub async fn collect(mut self) -> Result<Vec<AudioChunk>> {
        let mut chunks = Vec::new();
        while let Pull::Chunk(chunk) = self.pull().await? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<AudioChunk>> {
        async_stream::stream! {
            let mut receiver = self;
            loop {
                match receiver.pull().await {
                    Ok(Pull::Chunk(chunk)) => yield Ok(chunk),
                    Ok(Pull::EndOfStream) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }

    /// Cancel the request: stop the sender, close the connection, release the
    /// guard. Returns an error the sender hit while writing, if any.
    pub async fn terminate(&mut self) -> Result<()> {
        if self.ticket.is_done() {
            return Ok(());
        }
        info!("[{}] 🛑 Terminating synthesis", self.request_id());
        self.end(Ending::Terminated).await
    }

    /// Terminate, then reconnect so the synthesizer is ready for the next request
    pub async fn interrupt(&mut self) -> Result<()> {
        let terminated = self.terminate().await;
        self.shared.connect().await?;
        terminated
    }

    async fn end(&mut self, ending: Ending) -> Result<()> {
        self.ticket.stop();
        let sent = self.join_sender().await;
        if let Some(connection) = self.ticket.settle(&self.shared.core, ending) {
            connection.close().await;
        }
        sent
    }

    async fn abort(&mut self) {
        if let Err(e) = self.end(Ending::Terminated).await {
            debug!("[{}] Sender also failed: {}", self.request_id(), e);
        }
    }

    async fn fail_transport(&mut self, context: &str, e: TransportError) -> SynthesisError {
        let failure = self
            .shared
            .core
            .transport_failure(self.ticket.request(), context, e);
        self.abort().await;
        failure
    }

    /// A sender stuck inside a write is aborted after the grace period
    async fn join_sender(&mut self) -> Result<()> {
        let Some(mut handle) = self.sender.take() else {
            return Ok(());
        };
        match tokio::time::timeout(SENDER_GRACE, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("[{}] ❌ Sender task failed: {}", self.request_id(), e);
                Err(SynthesisError::SenderPanicked)
            }
            Err(_) => {
                warn!(
                    "[{}] ⏳ Sender still writing after {:?}, aborting it",
                    self.request_id(),
                    SENDER_GRACE
                );
                handle.abort();
                Ok(())
            }
        }
    }
}

impl<C: Connector> fmt::Debug for AudioReceiver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioReceiver")
            .field("request", &self.ticket.request())
            .field("finished", &self.ticket.is_done())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Drop for AudioReceiver<C> {
    fn drop(&mut self) {
        let Some(connection) = self.ticket.abandon(&self.shared.core) else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { connection.close().await });
        }
    }
}
