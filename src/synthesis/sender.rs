use crate::error::Result;
use crate::session::{eos_failed, fragment_failed, Outgoing, StateCell};
use crate::transport::Transport;
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Stream every fragment as a text frame, then the EOS frame.
///
/// Waiting on the upstream stream races the cancellation token, so a cancelled
/// request stops even while the producer is stalled. Cancellation suppresses EOS.
pub(crate) async fn send_text<T, S, F>(
    connection: Arc<T>,
    text: S,
    cancel: CancellationToken,
    state: Arc<StateCell>,
    request: String,
) -> Result<()>
where
    T: Transport + ?Sized,
    S: Stream<Item = F> + Send,
    F: Into<String>,
{
    tokio::pin!(text);
    let mut outgoing = Outgoing::new(&cancel, &state, &request);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                outgoing.cancelled();
                return Ok(());
            }
            next = text.next() => next,
        };
        let Some(fragment) = next else {
            break;
        };
        let Some(wire) = outgoing.fragment(fragment)? else {
            return Ok(());
        };
        connection.send(wire).await.map_err(fragment_failed)?;
    }

    let Some(eos) = outgoing.eos()? else {
        return Ok(());
    };
    connection.send(eos).await.map_err(eos_failed)?;
    outgoing.drained();
    Ok(())
}
