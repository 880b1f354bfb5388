use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_stream::stream;
use bon::bon;
use futures::Stream;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;

use crate::Result;
use crate::error::Error;
use crate::queue::Outbound;
use crate::ws::config::{Config, Timeouts};
use crate::ws::connection::{
    ConnectedHook, ConnectionManager, ConnectionState, Link, LinkSender, Target, begin_shutdown,
    close_quietly, mark_stopped,
};
use crate::ws::tungstenite::TungsteniteTransport;
use crate::ws::traits::Transport;
use crate::ws::{liveness, pump};

/// Self-healing WebSocket client.
///
/// The client owns two bounded queues. Payloads pushed into the outbound queue (through
/// [`Client::send`] or an [`Outbound`] handle) are written to the peer, and frames received from
/// the peer are published to the inbound queue (read with [`Client::recv`] or
/// [`Client::incoming`]). Between the two, the client keeps a connection alive: it probes it
/// periodically, notices read and write failures, and redials with a fixed backoff until it
/// succeeds or [`Client::stop`] is called. Network errors are never returned from steady-state
/// operations; observe them through [`Client::is_connected`] and [`Client::state_changes`].
///
/// Delivery is at least once. A message whose write fails is resent on the next connection
/// ahead of later messages, so it may reach the peer twice if the failure was noticed after its
/// bytes were already on the wire.
///
/// [`Client`] is cheap to clone and thread-safe. A client can be started once; construct a new
/// one to connect again after [`Client::stop`].
///
/// ```rust,no_run
/// use resilient_ws::Client;
/// use resilient_ws::ws::config::Timeouts;
/// use resilient_ws::ws::HeaderMap;
///
/// #[tokio::main]
/// async fn main() -> resilient_ws::Result<()> {
///     let client = Client::default();
///     client
///         .start("wss://echo.example.com", HeaderMap::new(), Timeouts::default())
///         .await?;
///
///     client.send("hello").await?;
///     if let Some(reply) = client.recv().await {
///         println!("{}", String::from_utf8_lossy(&reply));
///     }
///
///     client.stop().await;
///     Ok(())
/// }
/// ```
pub struct Client<T: Transport = TungsteniteTransport> {
    inner: Arc<ClientInner<T>>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("active_workers", &self.active_workers())
            .finish_non_exhaustive()
    }
}

struct ClientInner<T: Transport> {
    config: Config,
    transport: Arc<T>,
    on_connected: Option<ConnectedHook>,
    /// Shared connection state, see [`Link`]
    link: LinkSender<T::Connection>,
    /// Observed by every worker and every blocked push
    token: CancellationToken,
    /// Tracks the workers spawned by [`Client::start`]
    tracker: TaskTracker,
    started: AtomicBool,
    stopped: AtomicBool,
    outbound: Outbound,
    inbound: AsyncMutex<mpsc::Receiver<Vec<u8>>>,
    /// Worker ends of both queues until [`Client::start`] hands them out
    pending: Mutex<Option<WorkerQueues>>,
}

struct WorkerQueues {
    outbound_rx: mpsc::Receiver<Vec<u8>>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
}

impl<T: Transport> Drop for ClientInner<T> {
    fn drop(&mut self) {
        // Workers only hold the connection manager, stop them once the last client is gone.
        self.token.cancel();
    }
}

impl Default for Client<TungsteniteTransport> {
    fn default() -> Self {
        Self::builder().transport(TungsteniteTransport).build()
    }
}

impl Client<TungsteniteTransport> {
    /// A client using the default `tokio-tungstenite` transport.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self::builder()
            .transport(TungsteniteTransport)
            .config(config)
            .build()
    }
}

#[bon]
impl<T: Transport> Client<T> {
    /// Create a client. Both queues are allocated here, before any connection exists.
    #[builder]
    pub fn new(
        /// Dials the endpoint once [`Client::start`] is called
        transport: T,
        /// Probe, backoff and queue settings
        #[builder(default)]
        config: Config,
        /// Invoked after every successful (re)connect, including the first
        #[builder(into)]
        on_connected: Option<ConnectedHook>,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (link, _) = watch::channel(Link::new());
        let token = CancellationToken::new();

        Self {
            inner: Arc::new(ClientInner {
                config,
                transport: Arc::new(transport),
                on_connected,
                link,
                outbound: Outbound::new(outbound_tx, token.clone()),
                token,
                tracker: TaskTracker::new(),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                inbound: AsyncMutex::new(inbound_rx),
                pending: Mutex::new(Some(WorkerQueues {
                    outbound_rx,
                    inbound_tx,
                })),
            }),
        }
    }

    /// Connect to `endpoint` and start the background workers.
    ///
    /// Blocks until the first connection is established, retrying failed dials indefinitely.
    /// Returns once the liveness monitor and both pumps are running.
    ///
    /// # Errors
    ///
    /// - [`crate::error::Kind::InvalidEndpoint`] if `endpoint` is not an absolute `ws`/`wss`
    ///   URL. Nothing else happens in that case.
    /// - [`crate::error::Kind::Validation`] if the client was already started.
    /// - [`crate::error::Kind::Shutdown`] if [`Client::stop`] was called before or while the
    ///   first connection was being established.
    pub async fn start(&self, endpoint: &str, headers: HeaderMap, timeouts: Timeouts) -> Result<()> {
        let url = parse_endpoint(endpoint)?;

        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(Error::shutdown());
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(Error::validation("client has already been started"));
        }

        let Some(queues) = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            // `stop` got to the queues first.
            return Err(Error::shutdown());
        };

        let manager = Arc::new(ConnectionManager::new(
            Arc::clone(&self.inner.transport),
            Target {
                url,
                headers,
                timeouts,
            },
            self.inner.config.reconnect.clone(),
            self.inner.link.clone(),
            self.inner.on_connected.clone(),
            self.inner.token.clone(),
        ));

        if manager.connect().await.is_none() || self.inner.token.is_cancelled() {
            // Dropping the worker ends closes both queues.
            drop(queues);
            mark_stopped(&self.inner.link);
            return Err(Error::shutdown());
        }

        let tracker = &self.inner.tracker;
        tracker.spawn(liveness::run(
            Arc::clone(&manager),
            self.inner.config.probe_interval,
            self.inner.config.probe_timeout,
        ));
        tracker.spawn(pump::outbound(Arc::clone(&manager), queues.outbound_rx));
        tracker.spawn(pump::inbound(manager, queues.inbound_tx));
        tracker.close();

        // Waits on the tracker, so it cannot be tracked by it. Not counted by `active_workers`.
        let link = self.inner.link.clone();
        let workers = tracker.clone();
        tokio::spawn(async move {
            workers.wait().await;
            mark_stopped(&link);
        });

        #[cfg(feature = "tracing")]
        tracing::info!(%endpoint, "Client started");

        Ok(())
    }

    /// Stop the client.
    ///
    /// Signals every worker, closes the current connection and makes further pushes fail. The
    /// outbound queue is not drained; whatever is still queued is discarded. Messages already
    /// received stay readable from the inbound queue, after which it reports end of stream.
    ///
    /// Returns without waiting for the workers to exit, see [`Client::wait_stopped`]. Calling it
    /// again, or from several tasks at once, is a no-op.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Stopping client");

        self.inner.token.cancel();
        let handle = begin_shutdown(&self.inner.link);

        let never_started = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        self.inner.tracker.close();

        if let Some(handle) = handle {
            close_quietly(handle.as_ref()).await;
        }
        if never_started {
            mark_stopped(&self.inner.link);
        }
    }

    /// Wait until [`Client::stop`] has been called and every worker has exited.
    pub async fn wait_stopped(&self) {
        self.inner.token.cancelled().await;
        self.inner.tracker.wait().await;
        mark_stopped(&self.inner.link);
    }

    /// Number of background workers still running: the liveness monitor and the two pumps.
    ///
    /// A small watcher that moves the state to [`ConnectionState::Stopped`] once they exit is
    /// not included; it finishes right after the last worker does.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Whether a connection is currently usable.
    ///
    /// `true` only if a dial succeeded more recently than the last detected failure.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.link.borrow().state.is_connected()
    }

    /// The current [`ConnectionState`].
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.link.borrow().state
    }

    /// Stream of state transitions, starting with the current state and ending after
    /// [`ConnectionState::Stopped`].
    pub fn state_changes(&self) -> impl Stream<Item = ConnectionState> + Send + use<T> {
        let mut link_rx = self.inner.link.subscribe();

        stream! {
            let mut last = None;
            loop {
                let state = link_rx.borrow_and_update().state;
                if last != Some(state) {
                    last = Some(state);
                    yield state;
                }
                if state == ConnectionState::Stopped || link_rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    /// A producer handle for the outbound queue.
    #[must_use]
    pub fn outbound(&self) -> Outbound {
        self.inner.outbound.clone()
    }

    /// Queue `payload` for sending, waiting while the outbound queue is full.
    ///
    /// Succeeds once the payload is queued, not once it is written. Fails immediately with
    /// [`crate::error::Kind::Shutdown`] after [`Client::stop`].
    pub async fn send<P: Into<Vec<u8>>>(&self, payload: P) -> Result<()> {
        self.inner.outbound.send(payload).await
    }

    /// Next payload from the inbound queue, or `None` once the client is stopped and every
    /// buffered payload has been read.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.inner.inbound.lock().await.recv().await
    }

    /// The inbound queue as a [`Stream`].
    ///
    /// Several streams may exist at once; each payload goes to exactly one of them.
    pub fn incoming(&self) -> impl Stream<Item = Vec<u8>> + Send + use<T> {
        let inner = Arc::clone(&self.inner);

        stream! {
            loop {
                let next = {
                    let mut inbound = inner.inbound.lock().await;
                    inbound.recv().await
                };
                match next {
                    Some(payload) => yield payload,
                    None => break,
                }
            }
        }
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint).map_err(|e| Error::invalid_endpoint(endpoint, e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(Error::invalid_endpoint(
                endpoint,
                format!("unsupported scheme `{other}`, expected `ws` or `wss`"),
            ));
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::invalid_endpoint(endpoint, "missing host"));
    }

    Ok(url)
}
