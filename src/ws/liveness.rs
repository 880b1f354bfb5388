//! Liveness monitor: periodic probes and the only place reconnects are driven from once a client
//! is running.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::connection::ConnectionManager;
use super::traits::{Connection as _, Transport};

/// Probe the current connection every `probe_interval` and reconnect when it is dead.
///
/// Besides failed probes, a reconnect is also started as soon as one of the pumps marks the link
/// disconnected. Because the reconnect runs on this task, no probe is ever sent while a dial is
/// in progress and dials never overlap.
pub(crate) async fn run<T: Transport>(
    manager: Arc<ConnectionManager<T>>,
    probe_interval: Duration,
    probe_timeout: Duration,
) {
    let token = manager.token().clone();
    let mut link_rx = manager.subscribe();
    let mut ticker = interval_at(Instant::now() + probe_interval, probe_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let alive = tokio::select! {
            biased;

            () = token.cancelled() => break,
            changed = manager.wait_disconnected(&mut link_rx) => {
                if !changed {
                    break;
                }
                false
            }
            _ = ticker.tick() => probe(&manager, probe_timeout).await,
        };

        if alive {
            continue;
        }
        if manager.connect().await.is_none() {
            break;
        }
        ticker.reset();
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Liveness monitor stopped");
}

/// Returns whether the connection is usable. A failed probe marks the link disconnected.
async fn probe<T: Transport>(manager: &ConnectionManager<T>, probe_timeout: Duration) -> bool {
    let Some((epoch, handle)) = manager.current() else {
        return false;
    };

    let probed = tokio::select! {
        biased;

        // The caller's loop observes the cancellation on its next iteration.
        () = manager.token().cancelled() => return true,
        probed = handle.ping(probe_timeout) => probed,
    };

    match probed {
        Ok(()) => {
            #[cfg(feature = "tracing")]
            tracing::trace!(epoch, "Liveness probe succeeded");
            true
        }
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, epoch, "Liveness probe failed, rebuilding connection");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
            manager.mark_disconnected(epoch);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::sync::watch;
    use tokio::time::sleep;
    use tokio_tungstenite::tungstenite::http::HeaderMap;
    use tokio_util::sync::CancellationToken;
    use url::Url;

    use super::*;
    use crate::ws::config::{ReconnectConfig, Timeouts};
    use crate::ws::connection::{Link, Target};
    use crate::ws::testing::ScriptedTransport;

    async fn connected_manager(
        transport: &ScriptedTransport,
        token: &CancellationToken,
    ) -> Arc<ConnectionManager<ScriptedTransport>> {
        let (link, _rx) = watch::channel(Link::new());
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(transport.clone()),
            Target {
                url: Url::parse("ws://scripted.test").unwrap(),
                headers: HeaderMap::new(),
                timeouts: Timeouts::default(),
            },
            ReconnectConfig::default(),
            link,
            None,
            token.clone(),
        ));
        manager.connect().await.unwrap();
        manager
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_triggers_reconnect() {
        let transport = ScriptedTransport::default();
        let token = CancellationToken::new();
        let manager = connected_manager(&transport, &token).await;
        transport.script.probe_failures.store(1, Ordering::SeqCst);

        let monitor = tokio::spawn(run(
            Arc::clone(&manager),
            Duration::from_secs(10),
            Duration::from_secs(10),
        ));

        sleep(Duration::from_millis(10_500)).await;
        assert_eq!(transport.connections().len(), 2, "should have redialed");
        assert_eq!(manager.current().unwrap().0, 2);

        token.cancel();
        monitor.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_probe_keeps_connection() {
        let transport = ScriptedTransport::default();
        let token = CancellationToken::new();
        let manager = connected_manager(&transport, &token).await;

        let monitor = tokio::spawn(run(
            Arc::clone(&manager),
            Duration::from_secs(10),
            Duration::from_secs(10),
        ));

        sleep(Duration::from_secs(35)).await;
        assert_eq!(transport.connections().len(), 1, "no redial expected");

        token.cancel();
        monitor.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pump_failure_wakes_monitor_before_next_tick() {
        let transport = ScriptedTransport::default();
        let token = CancellationToken::new();
        let manager = connected_manager(&transport, &token).await;

        let monitor = tokio::spawn(run(
            Arc::clone(&manager),
            Duration::from_secs(10),
            Duration::from_secs(10),
        ));
        sleep(Duration::from_millis(100)).await;

        assert!(manager.mark_disconnected(1), "epoch 1 is current");
        sleep(Duration::from_millis(100)).await;

        assert_eq!(transport.connections().len(), 2, "should redial immediately");
        assert!(manager.current().is_some(), "should be connected again");

        token.cancel();
        monitor.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_exits_during_endless_reconnect_on_cancel() {
        let transport = ScriptedTransport::default();
        let token = CancellationToken::new();
        let manager = connected_manager(&transport, &token).await;
        transport.script.dial_failures.store(u32::MAX, Ordering::SeqCst);

        let monitor = tokio::spawn(run(
            Arc::clone(&manager),
            Duration::from_secs(10),
            Duration::from_secs(10),
        ));
        manager.mark_disconnected(1);
        sleep(Duration::from_secs(5)).await;

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), monitor)
            .await
            .expect("monitor should exit promptly")
            .unwrap();
    }
}
