#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub mod error;
pub mod queue;
pub mod ws;

pub use client::Client;
pub use error::Error;
pub use queue::Outbound;
pub use ws::config::{Config, ReconnectConfig, Timeouts};
pub use ws::connection::{ConnectedHook, ConnectionState};

pub type Result<T> = std::result::Result<T, Error>;

/// Capacity of each of the client's queues unless configured otherwise
pub const DEFAULT_QUEUE_CAPACITY: usize = ws::config::DEFAULT_QUEUE_CAPACITY;
