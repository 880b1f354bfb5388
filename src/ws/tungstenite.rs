//! [`Transport`] implementation on top of `tokio-tungstenite`.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::config::Timeouts;
use super::error::WsError;
use super::traits::{Connection, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on sending the close frame during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Dials `ws://` and `wss://` endpoints with `tokio-tungstenite`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

#[async_trait]
impl Transport for TungsteniteTransport {
    type Connection = TungsteniteConnection;

    async fn dial(
        &self,
        url: &Url,
        headers: &HeaderMap,
        timeouts: &Timeouts,
    ) -> Result<Self::Connection, WsError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| WsError::Dial(Box::new(e)))?;
        for (name, value) in headers {
            request.headers_mut().append(name.clone(), value.clone());
        }

        let (ws_stream, _response) = connect_async(request)
            .await
            .map_err(|e| WsError::Dial(Box::new(e)))?;

        Ok(TungsteniteConnection::new(ws_stream, timeouts.read))
    }
}

/// A live `tokio-tungstenite` connection.
///
/// The socket is split so that sends and receives never wait on each other. Each half sits
/// behind its own mutex, which also serializes [`Connection::close`] with in-flight sends.
pub struct TungsteniteConnection {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    read_timeout: Option<Duration>,
}

impl TungsteniteConnection {
    fn new(ws_stream: WsStream, read_timeout: Option<Duration>) -> Self {
        let (sink, stream) = ws_stream.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            read_timeout,
        }
    }

    async fn write(&self, message: Message, deadline: Duration) -> Result<(), TransportFailure> {
        timeout(deadline, async {
            let mut sink = self.sink.lock().await;
            sink.send(message).await
        })
        .await
        .map_err(|_elapsed| TransportFailure::Timeout(deadline))?
        .map_err(TransportFailure::Io)
    }
}

/// Failure of a single write, before it is attributed to a send or a probe.
enum TransportFailure {
    Timeout(Duration),
    Io(tungstenite::Error),
}

impl TransportFailure {
    fn into_boxed(self) -> super::error::TransportError {
        match self {
            Self::Timeout(after) => Box::new(WsError::Timeout(after)),
            Self::Io(e) => Box::new(e),
        }
    }
}

/// Valid UTF-8 goes out as a text frame, anything else as a binary frame.
fn frame(payload: &[u8]) -> Message {
    match String::from_utf8(payload.to_vec()) {
        Ok(text) => Message::Text(text.into()),
        Err(e) => Message::Binary(e.into_bytes().into()),
    }
}

#[async_trait]
impl Connection for TungsteniteConnection {
    async fn send(&self, payload: &[u8], deadline: Duration) -> Result<(), WsError> {
        self.write(frame(payload), deadline)
            .await
            .map_err(|e| WsError::Send(e.into_boxed()))
    }

    async fn ping(&self, deadline: Duration) -> Result<(), WsError> {
        self.write(Message::Ping(Vec::new().into()), deadline)
            .await
            .map_err(|e| WsError::Probe(e.into_boxed()))
    }

    async fn receive(&self) -> Result<Vec<u8>, WsError> {
        let mut stream = self.stream.lock().await;

        loop {
            let next = match self.read_timeout {
                Some(limit) => timeout(limit, stream.next())
                    .await
                    .map_err(|_elapsed| WsError::Receive(Box::new(WsError::Timeout(limit))))?,
                None => stream.next().await,
            };

            match next {
                Some(Ok(Message::Text(text))) => return Ok(text.as_bytes().to_vec()),
                Some(Ok(Message::Binary(bytes))) => return Ok(bytes.to_vec()),
                Some(Ok(Message::Close(_))) | None => return Err(WsError::ConnectionClosed),
                Some(Ok(message)) => {
                    // PING replies are queued by tungstenite itself; PONGs only refresh the
                    // read deadline.
                    #[cfg(feature = "tracing")]
                    tracing::trace!(?message, "Received WebSocket control frame");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &message;
                }
                Some(Err(e)) => return Err(WsError::Receive(Box::new(e))),
            }
        }
    }

    async fn close(&self) -> Result<(), WsError> {
        let closed = timeout(CLOSE_TIMEOUT, async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        })
        .await
        .map_err(|_elapsed| WsError::Close(Box::new(WsError::Timeout(CLOSE_TIMEOUT))))?;

        match closed {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(WsError::Close(Box::new(e))),
        }
    }
}
