use super::connection::{BlockingConnector, BlockingTransport};
use super::sender::SenderThread;
use super::{Shared, TungsteniteConnector};
use crate::audio::AudioChunk;
use crate::error::{Result, SynthesisError};
use crate::session::{Ending, FrameOutcome, Pull, Ticket, SENDER_GRACE};
use crate::transport::TransportError;
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Blocking audio of one synthesis request; also an [`Iterator`] over chunks.
pub struct AudioReceiver<C: BlockingConnector = TungsteniteConnector> {
    shared: Arc<Shared<C>>,
    ticket: Ticket<C::Connection, Arc<AtomicBool>>,
    sender: SenderThread,
}

impl<C: BlockingConnector> AudioReceiver<C> {
    pub(super) fn new(
        shared: Arc<Shared<C>>,
        ticket: Ticket<C::Connection, Arc<AtomicBool>>,
        sender: SenderThread,
    ) -> Self {
        Self {
            shared,
            ticket,
            sender,
        }
    }

    pub fn request_id(&self) -> &str {
        self.ticket.request()
    }

    pub fn is_finished(&self) -> bool {
        self.ticket.is_done()
    }

    /// Block until the next chunk or the end of the stream
    pub fn pull(&mut self) -> Result<Pull> {
        if self.ticket.is_done() {
            return Ok(Pull::EndOfStream);
        }

        loop {
            let text = match self.ticket.connection().receive() {
                Ok(Some(text)) => text,
                Ok(None) => {
                    return Err(self.fail_transport(
                        "Connection closed before the final frame",
                        TransportError::Closed,
                    ))
                }
                Err(e) => return Err(self.fail_transport("Failed to receive audio", e)),
            };

            match self.ticket.frame(&self.shared.core, &text) {
                Ok(FrameOutcome::Chunk(chunk)) => return Ok(Pull::Chunk(chunk)),
                Ok(FrameOutcome::Skip) => continue,
                Ok(FrameOutcome::Final(last)) => {
                    if let Err(e) = self.end(Ending::Finished) {
                        warn!("[{}] ⚠️ Sender failed before the final frame: {}", self.request_id(), e);
                    }
                    return Ok(last.map_or(Pull::EndOfStream, Pull::Chunk));
                }
                Err(e) => {
                    self.abort();
                    return Err(e);
                }
            }
        }
    }

    pub fn collect_chunks(mut self) -> Result<Vec<AudioChunk>> {
        let mut chunks = Vec::new();
        while let Pull::Chunk(chunk) = self.pull()? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    /// Stop the sender, close the connection and release the guard
    pub fn terminate(&mut self) -> Result<()> {
        if self.ticket.is_done() {
            return Ok(());
        }
        info!("[{}] 🛑 Terminating synthesis", self.request_id());
        self.end(Ending::Terminated)
    }

    pub fn interrupt(&mut self) -> Result<()> {
        let terminated = self.terminate();
        self.shared.connect()?;
        terminated
    }

    fn end(&mut self, ending: Ending) -> Result<()> {
        self.ticket.stop();
        let sent = self.sender.join(SENDER_GRACE);
        if let Some(connection) = self.ticket.settle(&self.shared.core, ending) {
            connection.close();
        }
        sent
    }

    fn abort(&mut self) {
        if let Err(e) = self.end(Ending::Terminated) {
            debug!("[{}] Sender also failed: {}", self.request_id(), e);
        }
    }

    fn fail_transport(&mut self, context: &str, e: TransportError) -> SynthesisError {
        let failure = self
            .shared
            .core
            .transport_failure(self.ticket.request(), context, e);
        self.abort();
        failure
    }
}

impl<C: BlockingConnector> Iterator for AudioReceiver<C> {
    type Item = Result<AudioChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ticket.is_done() {
            return None;
        }
        self.pull().map(Pull::into_chunk).transpose()
    }
}

impl<C: BlockingConnector> fmt::Debug for AudioReceiver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioReceiver")
            .field("request", &self.ticket.request())
            .field("finished", &self.ticket.is_done())
            .finish_non_exhaustive()
    }
}

impl<C: BlockingConnector> Drop for AudioReceiver<C> {
    fn drop(&mut self) {
        if let Some(connection) = self.ticket.abandon(&self.shared.core) {
            connection.close();
        }
    }
}
