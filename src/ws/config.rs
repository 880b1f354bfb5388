#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

const DEFAULT_PROBE_INTERVAL_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_PROBE_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_HANDSHAKE_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_WRITE_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_RECONNECT_INTERVAL_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.0;
const DEFAULT_BACKOFF_JITTER: f64 = 0.0;

/// Capacity of both the outbound and the inbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Configuration for client behavior that does not change between connections.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval between liveness probes (WebSocket PING frames)
    pub probe_interval: Duration,
    /// Deadline for writing a single liveness probe
    pub probe_timeout: Duration,
    /// Capacity of the outbound and inbound queues
    pub queue_capacity: usize,
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            probe_interval: DEFAULT_PROBE_INTERVAL_DURATION,
            probe_timeout: DEFAULT_PROBE_TIMEOUT_DURATION,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration for the delay between dial attempts.
///
/// Dialing is retried until it succeeds or the client is stopped; there is no attempt limit.
/// The defaults produce a fixed one second delay. Raising `max_backoff` and
/// `backoff_multiplier` turns it into an exponential backoff.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on the delay between retries
    pub max_backoff: Duration,
    /// Factor applied to the delay after each failed attempt
    pub backoff_multiplier: f64,
    /// Randomization factor in `[0, 1]` applied to each delay
    pub jitter: f64,
}

impl ReconnectConfig {
    /// A constant delay of `interval` between attempts.
    #[must_use]
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_backoff: interval,
            max_backoff: interval,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: DEFAULT_BACKOFF_JITTER,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_INTERVAL_DURATION)
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_randomization_factor(config.jitter)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Per-connection deadlines passed to [`crate::Client::start`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Bound on a single dial, TCP/TLS connect plus WebSocket handshake
    pub handshake: Duration,
    /// Bound on writing a single outbound message
    pub write: Duration,
    /// Bound on the gap between two inbound frames. `None` waits indefinitely.
    ///
    /// Control frames count, so with liveness probes enabled an idle but healthy connection
    /// sees a PONG every probe interval.
    pub read: Option<Duration>,
}

impl Timeouts {
    #[must_use]
    pub fn new(handshake: Duration, write: Duration, read: Option<Duration>) -> Self {
        Self {
            handshake,
            write,
            read,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: DEFAULT_HANDSHAKE_TIMEOUT_DURATION,
            write: DEFAULT_WRITE_TIMEOUT_DURATION,
            read: None,
        }
    }
}
