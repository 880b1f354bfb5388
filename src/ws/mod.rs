//! WebSocket plumbing behind [`crate::Client`].
//!
//! The connection logic is written against the [`Transport`] and [`Connection`] traits so it can
//! run over any WebSocket implementation. [`TungsteniteTransport`] is the one used by default.
//!
//! # Architecture
//!
//! - `connection`: the shared link state, dialing with backoff and reconnect bookkeeping
//! - `liveness`: periodic probes, and the task that drives every reconnect after start
//! - `pump`: the outbound and inbound workers moving payloads between queues and the connection

pub mod config;
pub mod connection;
pub mod error;
pub(crate) mod liveness;
pub(crate) mod pump;
#[cfg(test)]
pub(crate) mod testing;
pub mod traits;
pub mod tungstenite;

pub use connection::ConnectionState;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use tokio_tungstenite::tungstenite::http::HeaderMap;
pub use traits::*;
pub use tungstenite::{TungsteniteConnection, TungsteniteTransport};
