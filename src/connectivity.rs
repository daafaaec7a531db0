//! Connectivity signal, health probe and the background sync monitor.
//!
//! The monitor triggers a sync every [`crate::sync::SYNC_INTERVAL`] while
//! online and immediately on each offline -> online transition.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::ApiClient;
use crate::sync::{SyncEngine, TriggerOutcome};

/// Interval between health probes against the remote store.
pub const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Shared online/offline flag. Cloning shares the underlying channel.
#[derive(Clone)]
pub struct ConnectivitySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receivers are only notified when the value actually changes.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                info!("Network restored; resuming queued sync");
            } else {
                info!("Network offline; deferring sync");
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Probe `HEAD {base}/health` every `interval` and publish the result.
pub fn spawn_health_probe(
    api: ApiClient,
    signal: ConnectivitySignal,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let online = api.health().await;
                    signal.set_online(online);
                }
            }
        }
        debug!("health probe stopped");
    })
}

/// Handle to the running sync monitor. Dropping it stops the monitor.
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop the timer and wait for any in-flight cycle to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_trigger(engine: &SyncEngine, reason: &'static str) {
    match engine.trigger().await {
        TriggerOutcome::Skipped(skip) => debug!(reason, ?skip, "sync trigger skipped"),
        TriggerOutcome::Ran { flush, pull } => {
            debug!(reason, ?flush, ?pull, "sync cycle finished")
        }
    }
}

pub fn start_monitor(
    engine: Arc<SyncEngine>,
    signal: ConnectivitySignal,
    interval: Duration,
) -> MonitorHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let mut rx = signal.subscribe();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut was_online = *rx.borrow_and_update();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if signal.is_online() {
                        run_trigger(&engine, "interval").await;
                    }
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *rx.borrow_and_update();
                    if online && !was_online {
                        run_trigger(&engine, "reconnect").await;
                    }
                    was_online = online;
                }
            }
        }
        debug!("sync monitor stopped");
    });

    MonitorHandle {
        cancel,
        task: Some(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::remote::{MemoryRemoteStore, RemoteStore};
    use crate::store::test_store;
    use crate::sync::SYNC_INTERVAL;

    fn setup(online: bool) -> (Arc<SyncEngine>, Arc<MemoryRemoteStore>, ConnectivitySignal) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let signal = ConnectivitySignal::new(online);
        let engine = Arc::new(SyncEngine::new(
            Arc::new(test_store()),
            Some(remote.clone() as Arc<dyn RemoteStore>),
            signal.clone(),
        ));
        catalog::create_category(engine.store(), "Snacks").unwrap();
        (engine, remote, signal)
    }

    #[test]
    fn test_signal_notifies_only_on_change() {
        let signal = ConnectivitySignal::new(false);
        let mut rx = signal.subscribe();
        signal.set_online(false);
        assert!(!rx.has_changed().unwrap());
        signal.set_online(true);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        assert!(signal.clone().is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_triggers_while_online() {
        let (engine, remote, signal) = setup(true);
        let monitor = start_monitor(engine.clone(), signal, SYNC_INTERVAL);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(remote.write_calls(), 0);

        tokio::time::sleep(SYNC_INTERVAL).await;
        assert_eq!(remote.write_calls(), 1);
        assert_eq!(engine.store().outbox_len(), 0);
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_triggers_immediately() {
        let (engine, remote, signal) = setup(false);
        let monitor = start_monitor(engine.clone(), signal.clone(), SYNC_INTERVAL);

        tokio::time::sleep(SYNC_INTERVAL * 2).await;
        assert_eq!(remote.total_calls(), 0);

        signal.set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(remote.write_calls(), 1);
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_triggers() {
        let (engine, remote, signal) = setup(false);
        let monitor = start_monitor(engine, signal.clone(), SYNC_INTERVAL);
        monitor.shutdown().await;

        signal.set_online(true);
        tokio::time::sleep(SYNC_INTERVAL * 2).await;
        assert_eq!(remote.total_calls(), 0);
    }
}
