//! Workers moving payloads between the queues and the current connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::connection::{ConnectionManager, LinkReceiver};
use super::traits::{Connection as _, Transport};

/// Single consumer of the outbound queue.
///
/// Each message is retried in place until it is written or the client shuts down: a failed send
/// marks the link disconnected and the same message goes out again once reconnected, ahead of
/// anything queued after it. Delivery is therefore at least once; a message whose bytes reached
/// the wire just before the failure was noticed is sent twice.
pub(crate) async fn outbound<T: Transport>(
    manager: Arc<ConnectionManager<T>>,
    mut queue: mpsc::Receiver<Vec<u8>>,
) {
    let token = manager.token().clone();
    let write_timeout = manager.timeouts().write;
    let mut link_rx = manager.subscribe();

    loop {
        let message = tokio::select! {
            biased;

            () = token.cancelled() => break,
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if !deliver(&manager, &mut link_rx, &message, write_timeout).await {
            break;
        }
    }

    // Producers already fail fast on the cancelled token, closing makes it permanent.
    queue.close();

    #[cfg(feature = "tracing")]
    tracing::debug!("Outbound pump stopped");
}

/// Returns `false` if shutdown interrupted delivery.
async fn deliver<T: Transport>(
    manager: &ConnectionManager<T>,
    link_rx: &mut LinkReceiver<T::Connection>,
    message: &[u8],
    write_timeout: Duration,
) -> bool {
    loop {
        let Some((epoch, handle)) = manager.wait_connected(link_rx).await else {
            return false;
        };

        let sent = tokio::select! {
            biased;

            () = manager.token().cancelled() => return false,
            sent = handle.send(message, write_timeout) => sent,
        };

        match sent {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(epoch, len = message.len(), "Sent WebSocket message");
                return true;
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, epoch, "Write error, retrying after reconnect");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                manager.mark_disconnected(epoch);
            }
        }
    }
}

/// Single producer into the inbound queue.
///
/// A read pending on a connection that was marked disconnected or replaced is dropped, and the
/// pump moves on to the next connection without waiting for the old socket to fail.
///
/// Dropping `queue` on exit closes the inbound queue; the application drains what is buffered
/// and then sees the end of the stream.
pub(crate) async fn inbound<T: Transport>(
    manager: Arc<ConnectionManager<T>>,
    queue: mpsc::Sender<Vec<u8>>,
) {
    let token = manager.token().clone();
    let mut link_rx = manager.subscribe();

    while let Some((epoch, handle)) = manager.wait_connected(&mut link_rx).await {
        let received = tokio::select! {
            biased;

            () = token.cancelled() => break,
            () = manager.wait_superseded(&mut link_rx, epoch) => {
                // A half-open socket may never fail the pending read, abandon it.
                #[cfg(feature = "tracing")]
                tracing::debug!(epoch, "Connection superseded, leaving pending read");
                continue;
            }
            received = handle.receive() => received,
        };

        match received {
            Ok(payload) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(epoch, len = payload.len(), "Received WebSocket message");

                let published = tokio::select! {
                    biased;

                    () = token.cancelled() => break,
                    published = queue.send(payload) => published,
                };

                if published.is_err() {
                    // Nobody is listening, keep reading so control frames are still handled.
                    #[cfg(feature = "tracing")]
                    tracing::trace!(epoch, "Inbound receiver dropped, discarding frame");
                }
            }
            Err(e) => {
                if token.is_cancelled() {
                    break;
                }

                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, epoch, "Read error, waiting for reconnect");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                manager.mark_disconnected(epoch);
            }
        }
    }

    drop(queue);

    #[cfg(feature = "tracing")]
    tracing::debug!("Inbound pump stopped");
}
