#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::{ReconnectConfig, Timeouts};
use super::error::WsError;
use super::traits::{Connection, Transport};

/// Upper bound on how long a worker waits for a connected-state change before re-checking.
const RECHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Connection state tracking.
///
/// `Created -> Connecting -> Connected <-> Connecting -> ShuttingDown -> Stopped`
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, [`crate::Client::start`] not called yet
    Created,
    /// Dialing the endpoint. `attempt` is zero while a failure is waiting to be picked up.
    Connecting {
        /// Current dial attempt number
        attempt: u32,
    },
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// [`crate::Client::stop`] was called, workers are winding down
    ShuttingDown,
    /// Every worker has exited
    Stopped,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Check if the client has begun or finished shutting down.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Stopped)
    }
}

/// Callback invoked after every successful (re)connect, including the first.
///
/// It runs on the task that performed the dial and outside of any lock, so it may freely call
/// back into the client, but it should not block.
#[derive(Clone)]
pub struct ConnectedHook(Arc<dyn Fn() + Send + Sync>);

impl<F> From<F> for ConnectedHook
where
    F: Fn() + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        Self(Arc::new(f))
    }
}

impl std::fmt::Debug for ConnectedHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConnectedHook")
    }
}

/// Everything the workers share about the current connection.
///
/// Lives inside a single [`watch`] channel: every read goes through `borrow` and every write
/// through `send_if_modified`, so `state`, `handle` and `epoch` are never observed torn, and every
/// transition wakes whoever is waiting on it.
pub(crate) struct Link<C> {
    pub(crate) state: ConnectionState,
    handle: Option<Arc<C>>,
    /// Incremented each time a new handle is installed.
    epoch: u64,
    shutting_down: bool,
}

impl<C> Link<C> {
    pub(crate) fn new() -> Self {
        Self {
            state: ConnectionState::Created,
            handle: None,
            epoch: 0,
            shutting_down: false,
        }
    }
}

pub(crate) type LinkSender<C> = watch::Sender<Link<C>>;
pub(crate) type LinkReceiver<C> = watch::Receiver<Link<C>>;

/// Flag the link as shutting down and take the current handle out of it.
///
/// After this returns no handle can be installed any more, so the returned one (if any) is the
/// last the caller has to close.
pub(crate) fn begin_shutdown<C>(link: &LinkSender<C>) -> Option<Arc<C>> {
    let mut handle = None;
    link.send_if_modified(|link| {
        if link.shutting_down {
            return false;
        }
        link.shutting_down = true;
        link.state = ConnectionState::ShuttingDown;
        handle = link.handle.take();
        true
    });
    handle
}

/// Move a shut down link into its final state.
pub(crate) fn mark_stopped<C>(link: &LinkSender<C>) {
    link.send_if_modified(|link| {
        if link.state == ConnectionState::ShuttingDown {
            link.state = ConnectionState::Stopped;
            true
        } else {
            false
        }
    });
}

/// Close a connection, logging instead of failing.
pub(crate) async fn close_quietly<C: Connection>(connection: &C) {
    if let Err(e) = connection.close().await {
        #[cfg(feature = "tracing")]
        tracing::debug!(error = %e, "Error on closing connection");
        #[cfg(not(feature = "tracing"))]
        let _ = &e;
    }
}

/// Where and how to connect. Fixed for the lifetime of a started client.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) timeouts: Timeouts,
}

/// Owns the current connection and is the only place a connection is dialed or replaced.
///
/// Workers borrow the handle for a single call through [`ConnectionManager::current`] and report
/// failures back through [`ConnectionManager::mark_disconnected`] together with the epoch they
/// borrowed, so a failure on an old connection never tears down a newer one.
pub(crate) struct ConnectionManager<T: Transport> {
    transport: Arc<T>,
    target: Target,
    reconnect: ReconnectConfig,
    link: LinkSender<T::Connection>,
    on_connected: Option<ConnectedHook>,
    token: CancellationToken,
}

impl<T: Transport> ConnectionManager<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        target: Target,
        reconnect: ReconnectConfig,
        link: LinkSender<T::Connection>,
        on_connected: Option<ConnectedHook>,
        token: CancellationToken,
    ) -> Self {
        Self {
            transport,
            target,
            reconnect,
            link,
            on_connected,
            token,
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn timeouts(&self) -> &Timeouts {
        &self.target.timeouts
    }

    pub(crate) fn subscribe(&self) -> LinkReceiver<T::Connection> {
        self.link.subscribe()
    }

    /// Dial until a connection is installed or shutdown is signaled.
    ///
    /// Returns the epoch of the installed connection, or `None` if the client is shutting down,
    /// in which case the caller must not proceed.
    pub(crate) async fn connect(&self) -> Option<u64> {
        let mut backoff: ExponentialBackoff = self.reconnect.clone().into();
        let mut attempt = 0_u32;

        loop {
            attempt = attempt.saturating_add(1);
            if !self.set_connecting(attempt) {
                return None;
            }

            #[cfg(feature = "tracing")]
            tracing::info!(endpoint = %self.target.url, attempt, "Building new connection");

            let handshake = self.target.timeouts.handshake;
            let dialed = tokio::select! {
                biased;

                () = self.token.cancelled() => return None,
                dialed = timeout(
                    handshake,
                    self.transport.dial(&self.target.url, &self.target.headers, &self.target.timeouts),
                ) => dialed,
            };

            let error = match dialed {
                Ok(Ok(connection)) => return self.install(connection).await,
                Ok(Err(e)) => e,
                Err(_elapsed) => WsError::Dial(Box::new(WsError::Timeout(handshake))),
            };

            #[cfg(feature = "tracing")]
            tracing::warn!(error = %error, attempt, "Error on building new connection");
            #[cfg(not(feature = "tracing"))]
            let _ = &error;

            let delay = backoff
                .next_backoff()
                .unwrap_or(self.reconnect.max_backoff);

            tokio::select! {
                biased;

                () = self.token.cancelled() => return None,
                () = sleep(delay) => {}
            }
        }
    }

    /// Returns `false` once shutdown has begun.
    fn set_connecting(&self, attempt: u32) -> bool {
        let mut open = false;
        self.link.send_if_modified(|link| {
            if link.shutting_down {
                return false;
            }
            open = true;
            link.state = ConnectionState::Connecting { attempt };
            true
        });
        open
    }

    async fn install(&self, connection: T::Connection) -> Option<u64> {
        let connection = Arc::new(connection);
        let mut previous = None;
        let mut installed = None;

        self.link.send_if_modified(|link| {
            if link.shutting_down {
                return false;
            }
            link.epoch = link.epoch.wrapping_add(1);
            previous = link.handle.replace(Arc::clone(&connection));
            link.state = ConnectionState::Connected {
                since: Instant::now(),
            };
            installed = Some(link.epoch);
            true
        });

        let Some(epoch) = installed else {
            // Shutdown won the race, this connection never became current.
            close_quietly(connection.as_ref()).await;
            return None;
        };

        if let Some(previous) = previous {
            close_quietly(previous.as_ref()).await;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %self.target.url, epoch, "Connection established");

        if let Some(hook) = &self.on_connected {
            (hook.0)();
        }

        Some(epoch)
    }

    /// The current handle and its epoch, if connected.
    pub(crate) fn current(&self) -> Option<(u64, Arc<T::Connection>)> {
        let link = self.link.borrow();
        if !link.state.is_connected() {
            return None;
        }
        link.handle
            .as_ref()
            .map(|handle| (link.epoch, Arc::clone(handle)))
    }

    /// Report that the connection of `epoch` failed.
    ///
    /// Has no effect if a newer connection has been installed in the meantime or the link is
    /// already disconnected. Returns whether the state changed.
    pub(crate) fn mark_disconnected(&self, epoch: u64) -> bool {
        self.link.send_if_modified(|link| {
            if link.epoch == epoch && link.state.is_connected() {
                link.state = ConnectionState::Connecting { attempt: 0 };
                true
            } else {
                false
            }
        })
    }

    /// Wait until connected, returning the handle to use, or `None` on shutdown.
    pub(crate) async fn wait_connected(
        &self,
        link_rx: &mut LinkReceiver<T::Connection>,
    ) -> Option<(u64, Arc<T::Connection>)> {
        loop {
            if self.token.is_cancelled() {
                return None;
            }
            if let Some(current) = self.current() {
                return Some(current);
            }

            // The borrowed `Ref` must not outlive the arm, `current` takes the lock again.
            let link_gone = tokio::select! {
                biased;

                () = self.token.cancelled() => return None,
                woken = timeout(
                    RECHECK_INTERVAL,
                    link_rx.wait_for(|link| link.state.is_connected() || link.shutting_down),
                ) => matches!(woken, Ok(Err(_))),
            };

            if link_gone {
                return None;
            }
        }
    }

    /// Wait until the connection of `epoch` stops being the usable one: it was marked
    /// disconnected, a newer connection replaced it, or shutdown began.
    pub(crate) async fn wait_superseded(
        &self,
        link_rx: &mut LinkReceiver<T::Connection>,
        epoch: u64,
    ) {
        drop(
            link_rx
                .wait_for(|link| {
                    link.epoch != epoch || link.shutting_down || !link.state.is_connected()
                })
                .await,
        );
    }

    /// Wait until the link is no longer connected. Returns `false` if the link is gone.
    pub(crate) async fn wait_disconnected(&self, link_rx: &mut LinkReceiver<T::Connection>) -> bool {
        link_rx
            .wait_for(|link| !link.state.is_connected())
            .await
            .is_ok()
    }
}
