use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::error::{Error, QueueFull};

/// Producer handle for the outbound queue.
///
/// Cheap to clone; every clone feeds the same FIFO queue drained by the client's outbound pump.
/// Once the client is stopped every push fails immediately with a [`crate::error::Kind::Shutdown`]
/// error instead of blocking.
#[derive(Clone, Debug)]
pub struct Outbound {
    tx: mpsc::Sender<Vec<u8>>,
    token: CancellationToken,
}

impl Outbound {
    pub(crate) fn new(tx: mpsc::Sender<Vec<u8>>, token: CancellationToken) -> Self {
        Self { tx, token }
    }

    /// Queue `payload`, waiting for room if the queue is full.
    pub async fn send<P: Into<Vec<u8>>>(&self, payload: P) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::shutdown());
        }

        tokio::select! {
            biased;

            () = self.token.cancelled() => Err(Error::shutdown()),
            sent = self.tx.send(payload.into()) => sent.map_err(|_closed| Error::shutdown()),
        }
    }

    /// Queue `payload` without waiting.
    pub fn try_send<P: Into<Vec<u8>>>(&self, payload: P) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::shutdown());
        }

        match self.tx.try_send(payload.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(QueueFull {
                capacity: self.tx.max_capacity(),
            }
            .into()),
            Err(TrySendError::Closed(_)) => Err(Error::shutdown()),
        }
    }

    /// Number of additional messages the queue can take right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    /// Whether the queue no longer accepts messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }
}
