//! In-memory [`Transport`] whose failures are scripted by the test.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Timeouts;
use super::error::WsError;
use super::traits::{Connection, Transport};

/// Knobs and observations shared by a transport and every connection it dials.
#[derive(Default)]
pub(crate) struct Script {
    /// Number of upcoming dials that fail
    pub(crate) dial_failures: AtomicU32,
    /// Number of dials attempted so far
    pub(crate) dial_attempts: AtomicU32,
    /// Number of upcoming sends that fail
    pub(crate) send_failures: AtomicU32,
    /// Number of upcoming pings that fail
    pub(crate) probe_failures: AtomicU32,
    /// Whether connections reflect every sent payload back as an inbound frame
    pub(crate) echo: AtomicBool,
    /// Whether closing a connection leaves its pending reads hanging, as on a half-open socket
    pub(crate) half_open: AtomicBool,
    dial_delay: Mutex<Duration>,
    /// `(connection id, payload)` for every successful send
    sent: Mutex<Vec<(usize, Vec<u8>)>>,
    dialed: Mutex<Vec<Arc<Peer>>>,
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

enum Frame {
    Data(Vec<u8>),
    Fail,
}

/// The far end of one scripted connection.
pub(crate) struct Peer {
    pub(crate) id: usize,
    frames: mpsc::UnboundedSender<Frame>,
    /// Wakes pending reads, unless the connection is half-open
    read_cancelled: CancellationToken,
    closed: AtomicBool,
    close_calls: AtomicU32,
}

impl Peer {
    /// Deliver `payload` to the client as an inbound frame.
    pub(crate) fn push(&self, payload: &[u8]) {
        drop(self.frames.send(Frame::Data(payload.to_vec())));
    }

    /// Make the next receive on this connection fail.
    pub(crate) fn fail_read(&self) {
        drop(self.frames.send(Frame::Fail));
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    pub(crate) script: Arc<Script>,
}

impl ScriptedTransport {
    pub(crate) fn set_dial_delay(&self, delay: Duration) {
        *self
            .script
            .dial_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Every connection dialed so far, oldest first.
    pub(crate) fn connections(&self) -> Vec<Arc<Peer>> {
        self.script
            .dialed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recently dialed connection.
    pub(crate) fn latest(&self) -> Option<Arc<Peer>> {
        self.connections().pop()
    }

    /// Payloads successfully sent so far, with the id of the connection that carried them.
    pub(crate) fn sent(&self) -> Vec<(usize, Vec<u8>)> {
        self.script
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.sent().into_iter().map(|(_, payload)| payload).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Connection = ScriptedConnection;

    async fn dial(
        &self,
        _url: &Url,
        _headers: &HeaderMap,
        _timeouts: &Timeouts,
    ) -> Result<Self::Connection, WsError> {
        self.script.dial_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self
            .script
            .dial_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if take_one(&self.script.dial_failures) {
            return Err(WsError::Dial(Box::new(WsError::ConnectionClosed)));
        }

        let (frames, inbound) = mpsc::unbounded_channel();
        let mut dialed = self
            .script
            .dialed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let peer = Arc::new(Peer {
            id: dialed.len(),
            frames,
            read_cancelled: CancellationToken::new(),
            closed: AtomicBool::new(false),
            close_calls: AtomicU32::new(0),
        });
        dialed.push(Arc::clone(&peer));

        Ok(ScriptedConnection {
            peer,
            inbound: AsyncMutex::new(inbound),
            script: Arc::clone(&self.script),
        })
    }
}

pub(crate) struct ScriptedConnection {
    peer: Arc<Peer>,
    inbound: AsyncMutex<mpsc::UnboundedReceiver<Frame>>,
    script: Arc<Script>,
}

impl ScriptedConnection {
    pub(crate) fn is_closed(&self) -> bool {
        self.peer.is_closed()
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn send(&self, payload: &[u8], _deadline: Duration) -> Result<(), WsError> {
        if self.peer.is_closed() {
            return Err(WsError::Send(Box::new(WsError::ConnectionClosed)));
        }
        if take_one(&self.script.send_failures) {
            return Err(WsError::Send(Box::new(WsError::ConnectionClosed)));
        }

        self.script
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((self.peer.id, payload.to_vec()));
        if self.script.echo.load(Ordering::SeqCst) {
            self.peer.push(payload);
        }
        Ok(())
    }

    async fn ping(&self, _deadline: Duration) -> Result<(), WsError> {
        if self.peer.is_closed() || take_one(&self.script.probe_failures) {
            return Err(WsError::Probe(Box::new(WsError::ConnectionClosed)));
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<u8>, WsError> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;

            () = self.peer.read_cancelled.cancelled() => Err(WsError::ConnectionClosed),
            frame = inbound.recv() => match frame {
                Some(Frame::Data(payload)) => Ok(payload),
                Some(Frame::Fail) => Err(WsError::Receive(Box::new(WsError::ConnectionClosed))),
                None => Err(WsError::ConnectionClosed),
            },
        }
    }

    async fn close(&self) -> Result<(), WsError> {
        self.peer.close_calls.fetch_add(1, Ordering::SeqCst);
        self.peer.closed.store(true, Ordering::SeqCst);
        if !self.script.half_open.load(Ordering::SeqCst) {
            self.peer.read_cancelled.cancel();
        }
        Ok(())
    }
}
