//! Request bookkeeping common to both synthesizers. The backends only add the
//! I/O: opening connections, sending, receiving and joining the sender.

use super::{classify, request_id, FrameOutcome, Lease, SessionState, StateCell, UsageGuard};
use crate::audio::SessionConfig;
use crate::config::ApiSettings;
use crate::error::{Result, SynthesisError};
use crate::transport::TransportError;
use log::{debug, error, info, warn};
use nopause_protocol::protocol::{self, TextFrame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long ending a request waits for its sender before leaving it behind
pub(crate) const SENDER_GRACE: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stop signal handed to a request's sender
pub(crate) trait CancelSignal: Clone + Send + Sync + 'static {
    fn cancel(&self);
    fn is_cancelled(&self) -> bool;
}

impl CancelSignal for CancellationToken {
    fn cancel(&self) {
        CancellationToken::cancel(self);
    }

    fn is_cancelled(&self) -> bool {
        CancellationToken::is_cancelled(self)
    }
}

impl CancelSignal for Arc<AtomicBool> {
    fn cancel(&self) {
        self.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

/// State one synthesizer shares between its handle clones and receivers
pub(crate) struct SessionCore<K, S> {
    pub(crate) config: SessionConfig,
    pub(crate) settings: ApiSettings,
    pub(crate) handshake: String,
    connection: Mutex<Option<Arc<K>>>,
    active: Mutex<Option<(Lease, S)>>,
    guard: UsageGuard,
    state: Arc<StateCell>,
}

impl<K, S: CancelSignal> SessionCore<K, S> {
    pub(crate) fn new(config: SessionConfig, settings: &ApiSettings) -> Result<Self> {
        let handshake = config.handshake_text()?;
        Ok(Self {
            config,
            settings: settings.clone(),
            handshake,
            connection: Mutex::new(None),
            active: Mutex::new(None),
            guard: UsageGuard::new(),
            state: Arc::new(StateCell::default()),
        })
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state.get()
    }

    pub(crate) fn state_cell(&self) -> Arc<StateCell> {
        Arc::clone(&self.state)
    }

    pub(crate) fn in_use(&self) -> bool {
        self.guard.is_held()
    }

    pub(crate) fn current(&self) -> Option<Arc<K>> {
        lock(&self.connection).clone()
    }

    /// Forget `connection` if it is still the current one
    pub(crate) fn detach(&self, connection: &Arc<K>) {
        let mut slot = lock(&self.connection);
        if slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, connection))
        {
            *slot = None;
        }
    }

    pub(crate) fn connecting(&self) {
        self.state.set(SessionState::Connecting);
        info!("🔌 Connecting to {}", self.settings.endpoint());
    }

    /// Keep a connection whose handshake went out
    pub(crate) fn connected(&self, connection: Arc<K>) {
        *lock(&self.connection) = Some(connection);
        self.state.set(SessionState::Active);
    }

    pub(crate) fn connect_failed(&self, e: TransportError) -> SynthesisError {
        self.state.set(SessionState::Idle);
        error!("❌ Failed to connect to {}: {}", self.settings.endpoint(), e);
        SynthesisError::invalid_request(self.settings.describe(Some(&e.to_string())), Some(e))
    }

    /// Claim the synthesizer before any I/O happens
    pub(crate) fn acquire(&self) -> Result<Lease> {
        self.guard.acquire()
    }

    /// Undo [`acquire`](Self::acquire) when the request never started
    pub(crate) fn abandon(&self, lease: Lease) {
        self.guard.release_lease(lease);
    }

    /// Record the running request so `close` can cancel it; returns its log id
    pub(crate) fn activate(&self, lease: Lease, cancel: S) -> String {
        let request = request_id();
        *lock(&self.active) = Some((lease, cancel));
        self.state.set(SessionState::Active);
        info!(
            "[{}] 🎙️ Synthesis started (voice={}, {} Hz)",
            request, self.config.voice_id, self.config.sample_rate
        );
        request
    }

    /// Release the guard for `lease` and move to `next` if the request was still current
    pub(crate) fn end_request(&self, lease: Lease, next: SessionState) {
        {
            let mut active = lock(&self.active);
            if active.as_ref().is_some_and(|(current, _)| *current == lease) {
                *active = None;
            }
        }
        if self.guard.release_lease(lease) {
            self.state.set(next);
        }
    }

    /// Cancel the running request, if any, and hand back the connection to close.
    /// A cancelled request leaves the session `Terminated`, otherwise `Idle`.
    pub(crate) fn close(&self) -> Option<Arc<K>> {
        let cancelled = match lock(&self.active).take() {
            Some((_, cancel)) => {
                cancel.cancel();
                true
            }
            None => false,
        };
        let connection = lock(&self.connection).take();
        self.guard.release();
        self.state.set(if cancelled {
            SessionState::Terminated
        } else {
            SessionState::Idle
        });
        connection
    }

    pub(crate) fn transport_failure(
        &self,
        request: &str,
        context: &str,
        e: TransportError,
    ) -> SynthesisError {
        error!("[{}] ❌ {}: {}", request, context, e);
        SynthesisError::invalid_request(
            format!("{} from {}: {}", context, self.settings.endpoint(), e),
            Some(e),
        )
    }
}

/// How a request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ending {
    /// The service sent its final frame
    Finished,
    /// Cancelled by the caller or broken by an error
    Terminated,
}

/// One in-flight request as seen by its receiver
pub(crate) struct Ticket<K, S> {
    connection: Arc<K>,
    cancel: S,
    lease: Lease,
    request: String,
    one_shot: bool,
    done: bool,
}

impl<K, S: CancelSignal> Ticket<K, S> {
    pub(crate) fn new(connection: Arc<K>, cancel: S, lease: Lease, request: String, one_shot: bool) -> Self {
        Self {
            connection,
            cancel,
            lease,
            request,
            one_shot,
            done: false,
        }
    }

    pub(crate) fn connection(&self) -> &Arc<K> {
        &self.connection
    }

    pub(crate) fn request(&self) -> &str {
        &self.request
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    /// Decode one frame from the service, logging data chunks
    pub(crate) fn frame(&self, core: &SessionCore<K, S>, text: &str) -> Result<FrameOutcome> {
        let outcome = classify(text, core.config.sample_rate, core.config.channels);
        match &outcome {
            Ok(FrameOutcome::Chunk(chunk)) => debug!(
                "[{}] 🔊 Chunk {} ({} samples, rtf {:.3})",
                self.request,
                chunk.chunk_id,
                chunk.n_samples(),
                chunk.rtf
            ),
            Err(e) => error!("[{}] ❌ {}", self.request, e),
            _ => {}
        }
        outcome
    }

    /// Mark the request over and signal its sender. Join the sender next, then
    /// call [`settle`](Self::settle).
    pub(crate) fn stop(&mut self) {
        self.done = true;
        self.cancel.cancel();
    }

    /// Release the guard once the sender is joined. Returns the connection when
    /// the caller must close it.
    pub(crate) fn settle(&self, core: &SessionCore<K, S>, ending: Ending) -> Option<Arc<K>> {
        let discard = ending == Ending::Terminated || self.one_shot;
        if discard {
            core.detach(&self.connection);
        }
        match ending {
            Ending::Finished => {
                core.end_request(self.lease, SessionState::Idle);
                info!("[{}] ✅ Synthesis finished", self.request);
            }
            Ending::Terminated => core.end_request(self.lease, SessionState::Terminated),
        }
        discard.then(|| Arc::clone(&self.connection))
    }

    /// Cleanup for a receiver dropped mid-stream; the sender is not joined
    pub(crate) fn abandon(&mut self, core: &SessionCore<K, S>) -> Option<Arc<K>> {
        if self.done {
            return None;
        }
        warn!("[{}] ⚠️ Receiver dropped before the end of the stream", self.request);
        self.stop();
        core.detach(&self.connection);
        core.end_request(self.lease, SessionState::Terminated);
        Some(Arc::clone(&self.connection))
    }
}

/// Frame building for a request's text sender. Once cancelled it yields
/// nothing more, so EOS is never sent for a cancelled request.
pub(crate) struct Outgoing<'a, S> {
    cancel: &'a S,
    state: &'a StateCell,
    request: &'a str,
    sent: usize,
}

impl<'a, S: CancelSignal> Outgoing<'a, S> {
    pub(crate) fn new(cancel: &'a S, state: &'a StateCell, request: &'a str) -> Self {
        Self {
            cancel,
            state,
            request,
            sent: 0,
        }
    }

    pub(crate) fn cancelled(&self) {
        debug!("[{}] ✋ Sender cancelled after {} fragments", self.request, self.sent);
    }

    /// Wire text for `fragment`, `None` once cancelled
    pub(crate) fn fragment(&mut self, fragment: impl Into<String>) -> Result<Option<String>> {
        if self.cancel.is_cancelled() {
            self.cancelled();
            return Ok(None);
        }
        self.sent += 1;
        Ok(Some(protocol::encode(&TextFrame::fragment(fragment))?))
    }

    pub(crate) fn eos(&self) -> Result<Option<String>> {
        if self.cancel.is_cancelled() {
            self.cancelled();
            return Ok(None);
        }
        Ok(Some(protocol::encode(&TextFrame::eos())?))
    }

    /// EOS is out; the session now only waits for audio
    pub(crate) fn drained(&self) {
        self.state.transition(&[SessionState::Active], SessionState::Draining);
        debug!("[{}] 📤 Sent {} fragments and EOS", self.request, self.sent);
    }
}

pub(crate) fn fragment_failed(e: TransportError) -> SynthesisError {
    SynthesisError::invalid_request("Failed to send text frame", Some(e))
}

pub(crate) fn eos_failed(e: TransportError) -> SynthesisError {
    SynthesisError::invalid_request("Failed to send end of stream", Some(e))
}
