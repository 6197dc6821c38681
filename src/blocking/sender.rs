use super::connection::BlockingTransport;
use crate::error::{Result, SynthesisError};
use crate::session::{eos_failed, fragment_failed, Outgoing, StateCell};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{error, warn};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Background thread streaming text frames for one request
pub(crate) struct SenderThread {
    done: Receiver<Result<()>>,
    thread: Option<JoinHandle<()>>,
    request: String,
}

impl SenderThread {
    pub(crate) fn spawn<T, I>(
        connection: Arc<T>,
        text: I,
        cancel: Arc<AtomicBool>,
        state: Arc<StateCell>,
        request: String,
    ) -> Result<Self>
    where
        T: BlockingTransport + ?Sized + 'static,
        I: IntoIterator + Send + 'static,
        I::Item: Into<String>,
    {
        let (done_tx, done) = bounded(1);

        let thread = {
            let request = request.clone();
            thread::Builder::new()
                .name(format!("nopause-sender-{}", request))
                .spawn(move || {
                    let result = send_text(&*connection, text, &cancel, &state, &request);
                    let _ = done_tx.send(result);
                })
                .map_err(|e| {
                    SynthesisError::invalid_request("Failed to start the text sender", Some(e.into()))
                })?
        };

        Ok(Self {
            done,
            thread: Some(thread),
            request,
        })
    }

    /// Wait up to `grace` for the thread to report. A thread stuck on its
    /// upstream iterator is detached; it sends nothing once it wakes up.
    pub(crate) fn join(&mut self, grace: Duration) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        match self.done.recv_timeout(grace) {
            Ok(result) => {
                let _ = thread.join();
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "[{}] ⏳ Sender still waiting on its input after {:?}, detaching",
                    self.request, grace
                );
                Ok(())
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = thread.join();
                error!("[{}] ❌ Sender thread died", self.request);
                Err(SynthesisError::SenderPanicked)
            }
        }
    }
}

fn send_text<T, I>(
    connection: &T,
    text: I,
    cancel: &Arc<AtomicBool>,
    state: &StateCell,
    request: &str,
) -> Result<()>
where
    T: BlockingTransport + ?Sized,
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut outgoing = Outgoing::new(cancel, state, request);

    // The upstream iterator may block; the flag is checked once it yields
    for fragment in text {
        let Some(wire) = outgoing.fragment(fragment)? else {
            return Ok(());
        };
        connection.send(wire).map_err(fragment_failed)?;
    }

    let Some(eos) = outgoing.eos()? else {
        return Ok(());
    };
    connection.send(eos).map_err(eos_failed)?;
    outgoing.drained();
    Ok(())
}
