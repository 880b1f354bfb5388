//! Echo round trip against a public WebSocket echo server.
//!
//! Pushes a handful of messages, prints whatever comes back and watches the connection state
//! while doing so. Kill your network for a few seconds to see the client reconnect.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=resilient_ws=debug,echo=info cargo run --example echo --features tracing -- wss://echo.websocket.org
//! ```

use std::time::Duration;

use futures::StreamExt as _;
use resilient_ws::ws::HeaderMap;
use resilient_ws::{Client, Config, Timeouts};
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_ENDPOINT: &str = "wss://echo.websocket.org";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned());

    let mut config = Config::default();
    config.probe_interval = Duration::from_secs(5);

    let client = Client::builder()
        .transport(resilient_ws::ws::TungsteniteTransport::default())
        .config(config)
        .on_connected(|| info!("Connected"))
        .build();

    let states = client.state_changes();
    tokio::spawn(async move {
        let mut states = Box::pin(states);
        while let Some(state) = states.next().await {
            info!(state = ?state, "Connection state changed");
        }
    });

    client
        .start(&endpoint, HeaderMap::new(), Timeouts::default())
        .await?;

    let outbound = client.outbound();
    tokio::spawn(async move {
        for n in 0..10 {
            if let Err(e) = outbound.send(format!("message {n}")).await {
                warn!(error = %e, "Push rejected");
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });

    let mut incoming = Box::pin(client.incoming());
    while let Ok(Some(payload)) = timeout(Duration::from_secs(15), incoming.next()).await {
        info!(payload = %String::from_utf8_lossy(&payload), "Received");
    }

    client.stop().await;
    client.wait_stopped().await;
    info!(state = ?client.state(), "Done");

    Ok(())
}
