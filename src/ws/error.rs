#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Boxed error produced by a [`crate::ws::Transport`] or [`crate::ws::Connection`]
/// implementation.
pub type TransportError = Box<dyn StdError + Send + Sync + 'static>;

/// WebSocket error variants.
///
/// Every variant other than [`WsError::ConnectionClosed`] wraps the transport's own error.
/// None of these are surfaced to callers of [`crate::Client`] during steady state; they are
/// handled by the reconnect loop and reported through `tracing` when that feature is enabled.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Dialing the endpoint or completing the handshake failed
    Dial(TransportError),
    /// The liveness probe could not be written
    Probe(TransportError),
    /// An outbound message could not be written
    Send(TransportError),
    /// Reading the next inbound frame failed
    Receive(TransportError),
    /// Closing a connection failed
    Close(TransportError),
    /// The peer closed the connection or the stream ended
    ConnectionClosed,
    /// Operation did not complete within its deadline
    Timeout(Duration),
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dial(e) => write!(f, "WebSocket dial error: {e}"),
            Self::Probe(e) => write!(f, "WebSocket liveness probe failed: {e}"),
            Self::Send(e) => write!(f, "WebSocket send failed: {e}"),
            Self::Receive(e) => write!(f, "WebSocket receive failed: {e}"),
            Self::Close(e) => write!(f, "WebSocket close failed: {e}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Timeout(after) => write!(f, "WebSocket operation timed out after {after:?}"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Dial(e) | Self::Probe(e) | Self::Send(e) | Self::Receive(e) | Self::Close(e) => {
                Some(e.as_ref())
            }
            Self::ConnectionClosed | Self::Timeout(_) => None,
        }
    }
}

impl WsError {
    /// Whether the failure was a deadline expiring rather than an I/O error.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Dial(e) | Self::Probe(e) | Self::Send(e) | Self::Receive(e) | Self::Close(e) => {
                e.downcast_ref::<WsError>().is_some_and(WsError::is_timeout)
            }
            Self::ConnectionClosed => false,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(
            crate::error::Kind::WebSocket,
            WsError::Dial(Box::new(e)),
        )
    }
}
