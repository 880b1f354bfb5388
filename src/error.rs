use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Error related to invalid input or client misuse
    Validation,
    /// The endpoint is not an absolute `ws` or `wss` URL
    InvalidEndpoint,
    /// Error related to the WebSocket transport
    WebSocket,
    /// The client has been stopped and no longer accepts work
    Shutdown,
    /// A bounded queue had no room for a non-blocking push
    QueueFull,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn invalid_endpoint<E: Into<String>, R: Into<String>>(endpoint: E, reason: R) -> Self {
        InvalidEndpoint {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
        .into()
    }

    #[must_use]
    pub fn shutdown() -> Self {
        ShutdownInProgress.into()
    }

    /// Whether this error was produced because the client is shutting down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.kind == Kind::Shutdown
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

/// The endpoint handed to [`crate::Client::start`] could not be used.
#[non_exhaustive]
#[derive(Debug)]
pub struct InvalidEndpoint {
    pub endpoint: String,
    pub reason: String,
}

impl fmt::Display for InvalidEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid endpoint `{}`: {}", self.endpoint, self.reason)
    }
}

impl StdError for InvalidEndpoint {}

#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct ShutdownInProgress;

impl fmt::Display for ShutdownInProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client is shutting down or has been stopped")
    }
}

impl StdError for ShutdownInProgress {}

/// A non-blocking push found the queue at capacity.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct QueueFull {
    pub capacity: usize,
}

impl fmt::Display for QueueFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is full ({} messages)", self.capacity)
    }
}

impl StdError for QueueFull {}

impl From<QueueFull> for Error {
    fn from(err: QueueFull) -> Self {
        Error::with_source(Kind::QueueFull, err)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<InvalidEndpoint> for Error {
    fn from(err: InvalidEndpoint) -> Self {
        Error::with_source(Kind::InvalidEndpoint, err)
    }
}

impl From<ShutdownInProgress> for Error {
    fn from(err: ShutdownInProgress) -> Self {
        Error::with_source(Kind::Shutdown, err)
    }
}
