//! Transport seam for the connection core.
//!
//! The core never touches sockets directly. It dials through a [`Transport`] and then drives the
//! resulting [`Connection`] from several tasks at once: the outbound pump sends, the inbound pump
//! receives and the liveness monitor probes, all through `&self`. Implementations are expected to
//! keep their read and write halves independent so a blocked receive never stalls a send.
//!
//! # Example
//!
//! ```ignore
//! struct Loopback;
//!
//! #[async_trait]
//! impl Transport for Loopback {
//!     type Connection = LoopbackConnection;
//!
//!     async fn dial(&self, url: &Url, headers: &HeaderMap, timeouts: &Timeouts)
//!         -> Result<Self::Connection, WsError> {
//!         Ok(LoopbackConnection::default())
//!     }
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio_tungstenite::tungstenite::http::HeaderMap;
use url::Url;

use super::config::Timeouts;
use super::error::WsError;

/// Establishes new connections to an endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    /// Open a connection to `url`, sending `headers` with the handshake.
    ///
    /// The caller abandons the attempt once `timeouts.handshake` has elapsed. `timeouts.read`
    /// is the transport's to enforce on every [`Connection::receive`] of the new connection.
    async fn dial(
        &self,
        url: &Url,
        headers: &HeaderMap,
        timeouts: &Timeouts,
    ) -> Result<Self::Connection, WsError>;
}

/// One live connection.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Write one message frame carrying `payload`, failing if it takes longer than `deadline`.
    async fn send(&self, payload: &[u8], deadline: Duration) -> Result<(), WsError>;

    /// Write a zero-length control probe, failing if it takes longer than `deadline`.
    async fn ping(&self, deadline: Duration) -> Result<(), WsError>;

    /// Wait for the next data frame.
    ///
    /// Control frames are consumed internally. Returns [`WsError::ConnectionClosed`] once the
    /// peer has closed the connection.
    async fn receive(&self) -> Result<Vec<u8>, WsError>;

    /// Close the connection. Closing an already closed connection should not panic.
    async fn close(&self) -> Result<(), WsError>;
}
