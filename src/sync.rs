//! Outbox sync engine.
//!
//! `flush` replays outbox entries against the remote store in insertion order,
//! removing each entry as soon as its remote write is acknowledged. `pull`
//! fetches the remote collections and replaces each non-empty one locally.
//! `trigger` runs both back to back, skipping the pull when the flush failed.
//! Collections with queued local writes are never replaced. A single
//! in-flight flag keeps timer, reconnect and manual triggers from
//! overlapping; a trigger that finds a cycle running is dropped.

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::connectivity::ConnectivitySignal;
use crate::error::{PosError, PosResult};
use crate::models::{Category, CollectionName, EntityType, OutboxEntry, Product, Sale};
use crate::outbox::{self, RemoteWrite};
use crate::remote::RemoteStore;
use crate::store::PosStore;

/// Interval between timer-driven sync attempts while online.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(15);

const LAST_PULL_KEY: &str = "last_pull_at";

// ---------------------------------------------------------------------------
// Status and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Pulling,
    Error,
}

/// Why a sync entry point did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No remote store configured.
    Disabled,
    /// `Settings.mode` is `offline`.
    OfflineMode,
    /// Connectivity signal reports offline.
    DeviceOffline,
    EmptyOutbox,
    /// Another flush/pull cycle is in flight.
    AlreadyRunning,
    /// The flush of the same cycle failed.
    FlushFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    Skipped(SkipReason),
    Completed { sent: usize },
    Failed { sent: usize, error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    Skipped(SkipReason),
    /// `rejected` lists collections whose snapshot did not decode; they were
    /// left untouched.
    Completed {
        replaced: Vec<CollectionName>,
        rejected: Vec<CollectionName>,
    },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Skipped(SkipReason),
    Ran { flush: FlushOutcome, pull: PullOutcome },
}

/// Point-in-time view of the engine for status indicators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub status: SyncStatus,
    pub enabled: bool,
    pub online: bool,
    pub pending: usize,
    pub last_sync: Option<String>,
    pub last_pull: Option<String>,
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// In-flight guard
// ---------------------------------------------------------------------------

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SyncEngine {
    store: Arc<PosStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    connectivity: ConnectivitySignal,
    status: watch::Sender<SyncStatus>,
    in_flight: AtomicBool,
    last_sync: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
}

impl SyncEngine {
    /// `remote == None` disables sync entirely.
    pub fn new(
        store: Arc<PosStore>,
        remote: Option<Arc<dyn RemoteStore>>,
        connectivity: ConnectivitySignal,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            store,
            remote,
            connectivity,
            status,
            in_flight: AtomicBool::new(false),
            last_sync: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<PosStore> {
        &self.store
    }

    pub fn is_enabled(&self) -> bool {
        self.remote.is_some()
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn report(&self) -> SyncReport {
        SyncReport {
            status: self.status(),
            enabled: self.is_enabled(),
            online: self.connectivity.is_online(),
            pending: self.store.outbox_len(),
            last_sync: self.last_sync.lock().ok().and_then(|g| g.clone()),
            last_pull: self.store.get_meta(LAST_PULL_KEY),
            last_error: self.last_error.lock().ok().and_then(|g| g.clone()),
        }
    }

    fn set_status(&self, next: SyncStatus) {
        let prev = self.status.send_replace(next);
        if prev != next {
            info!(from = ?prev, to = ?next, "sync status changed");
        }
    }

    fn record_success(&self) {
        if let Ok(mut guard) = self.last_sync.lock() {
            *guard = Some(now_rfc3339());
        }
    }

    fn record_error(&self, error: &str) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(error.to_string());
        }
        self.set_status(SyncStatus::Error);
    }

    /// Common gate for every network entry point.
    fn network_gate(&self) -> Result<&Arc<dyn RemoteStore>, SkipReason> {
        let remote = self.remote.as_ref().ok_or(SkipReason::Disabled)?;
        if !self.store.settings().mode.allows_network() {
            return Err(SkipReason::OfflineMode);
        }
        if !self.connectivity.is_online() {
            return Err(SkipReason::DeviceOffline);
        }
        Ok(remote)
    }

    // -- flush ---------------------------------------------------------------

    /// Replay the outbox against the remote store.
    pub async fn flush(&self) -> FlushOutcome {
        let remote = match self.network_gate() {
            Ok(r) => r,
            Err(reason) => return FlushOutcome::Skipped(reason),
        };
        if self.store.outbox_len() == 0 {
            return FlushOutcome::Skipped(SkipReason::EmptyOutbox);
        }
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            return FlushOutcome::Skipped(SkipReason::AlreadyRunning);
        };
        self.flush_inner(remote.as_ref()).await
    }

    async fn flush_inner(&self, remote: &dyn RemoteStore) -> FlushOutcome {
        let entries = self.store.outbox();
        if entries.is_empty() {
            return FlushOutcome::Skipped(SkipReason::EmptyOutbox);
        }

        self.set_status(SyncStatus::Syncing);
        info!(pending = entries.len(), "flushing outbox");

        let mut sent = 0;
        for entry in &entries {
            let delivered = match self.replay_entry(remote, entry).await {
                Ok(()) => self.store.remove_outbox_entry(&entry.id).map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = delivered {
                let error = e.to_string();
                if matches!(e, PosError::Storage(_)) {
                    error!(entry_id = %entry.id, error = %error, "outbox flush aborted");
                } else {
                    warn!(
                        entry_id = %entry.id,
                        entity_type = ?entry.entity_type,
                        action = ?entry.action,
                        error = %error,
                        "outbox flush aborted"
                    );
                }
                self.record_error(&error);
                return FlushOutcome::Failed { sent, error };
            }
            sent += 1;
        }

        info!(sent, "outbox flushed");
        self.record_success();
        self.set_status(SyncStatus::Idle);
        FlushOutcome::Completed { sent }
    }

    async fn replay_entry(&self, remote: &dyn RemoteStore, entry: &OutboxEntry) -> PosResult<()> {
        let writes = match outbox::plan(entry) {
            Ok(writes) => writes,
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "dropping malformed outbox entry");
                return Ok(());
            }
        };
        if writes.is_empty() {
            warn!(
                entry_id = %entry.id,
                action = ?entry.action,
                "sale entries only replay creations; dropping"
            );
        }
        for write in writes {
            match write {
                RemoteWrite::Upsert {
                    collection,
                    id,
                    doc,
                } => {
                    debug!(collection, id = %id, "remote upsert");
                    remote
                        .upsert(collection, &id, &doc)
                        .await
                        .map_err(PosError::Remote)?;
                }
                RemoteWrite::Delete { collection, id } => {
                    debug!(collection, id = %id, "remote delete");
                    remote
                        .delete(collection, &id)
                        .await
                        .map_err(PosError::Remote)?;
                }
            }
        }
        Ok(())
    }

    // -- pull ----------------------------------------------------------------

    /// Fetch the remote collections and replace every non-empty one locally.
    pub async fn pull(&self) -> PullOutcome {
        let remote = match self.network_gate() {
            Ok(r) => r,
            Err(reason) => return PullOutcome::Skipped(reason),
        };
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            return PullOutcome::Skipped(SkipReason::AlreadyRunning);
        };
        self.pull_inner(remote.as_ref()).await
    }

    async fn pull_inner(&self, remote: &dyn RemoteStore) -> PullOutcome {
        self.set_status(SyncStatus::Pulling);

        let fetched = async {
            let categories = remote.fetch_all(EntityType::Category.remote_collection()).await?;
            let products = remote.fetch_all(EntityType::Product.remote_collection()).await?;
            let sales = remote.fetch_all(EntityType::Sale.remote_collection()).await?;
            Ok::<_, String>((categories, products, sales))
        }
        .await;

        let (categories, products, sales) = match fetched {
            Ok(v) => v,
            Err(e) => {
                let error = PosError::Remote(e).to_string();
                warn!(error = %error, "remote pull failed");
                self.record_error(&error);
                return PullOutcome::Failed { error };
            }
        };

        // Collections with undelivered local writes are ahead of the snapshot.
        let pending: Vec<CollectionName> = self
            .store
            .outbox()
            .iter()
            .flat_map(outbox::pending_collections)
            .collect();
        let mut rejected = Vec::new();
        let categories: Option<Vec<Category>> =
            take_snapshot(CollectionName::Categories, categories, &pending, &mut rejected);
        let products: Option<Vec<Product>> =
            take_snapshot(CollectionName::Products, products, &pending, &mut rejected);
        let sales: Option<Vec<Sale>> =
            take_snapshot(CollectionName::Sales, sales, &pending, &mut rejected);

        let replaced = match self
            .store
            .replace_remote_collections(categories, products, sales)
        {
            Ok(replaced) => replaced,
            Err(e) => {
                let error = e.to_string();
                error!(error = %error, "remote pull failed");
                self.record_error(&error);
                return PullOutcome::Failed { error };
            }
        };

        let pulled_at = now_rfc3339();
        if let Err(e) = self.store.set_meta(LAST_PULL_KEY, &pulled_at) {
            warn!(error = %e, "failed to record pull timestamp");
        }
        if let Some((_, error)) = rejected.last() {
            if let Ok(mut guard) = self.last_error.lock() {
                *guard = Some(error.clone());
            }
        }
        let rejected: Vec<CollectionName> = rejected.into_iter().map(|(name, _)| name).collect();
        info!(replaced = ?replaced, rejected = ?rejected, "remote pull complete");
        self.record_success();
        self.set_status(SyncStatus::Idle);
        PullOutcome::Completed { replaced, rejected }
    }

    // -- trigger -------------------------------------------------------------

    /// Flush, then pull. The pull only runs after a flush that did not fail,
    /// so a snapshot never lands on top of undelivered local changes.
    pub async fn trigger(&self) -> TriggerOutcome {
        let remote = match self.network_gate() {
            Ok(r) => r,
            Err(reason) => return TriggerOutcome::Skipped(reason),
        };
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!("sync already in flight; dropping trigger");
            return TriggerOutcome::Skipped(SkipReason::AlreadyRunning);
        };

        let flush = self.flush_inner(remote.as_ref()).await;
        let pull = if matches!(flush, FlushOutcome::Failed { .. }) {
            debug!("flush failed; skipping pull until the outbox drains");
            PullOutcome::Skipped(SkipReason::FlushFailed)
        } else {
            self.pull_inner(remote.as_ref()).await
        };
        TriggerOutcome::Ran { flush, pull }
    }
}

/// Snapshot to apply for `name`, or `None` to keep the local copy.
fn take_snapshot<T: DeserializeOwned>(
    name: CollectionName,
    docs: Vec<Value>,
    pending: &[CollectionName],
    rejected: &mut Vec<(CollectionName, String)>,
) -> Option<Vec<T>> {
    if pending.contains(&name) {
        if !docs.is_empty() {
            debug!(collection = %name, "local writes pending; keeping local copy");
        }
        return None;
    }
    match decode_snapshot(name, docs) {
        Ok(records) => records,
        Err(e) => {
            warn!(collection = %name, error = %e, "remote snapshot rejected");
            rejected.push((name, e));
            None
        }
    }
}

/// Decode one remote collection. An empty snapshot is not yet authoritative
/// and yields `None`, so it never replaces local data.
fn decode_snapshot<T: DeserializeOwned>(
    name: CollectionName,
    docs: Vec<Value>,
) -> Result<Option<Vec<T>>, String> {
    if docs.is_empty() {
        return Ok(None);
    }
    docs.into_iter()
        .map(|doc| serde_json::from_value(doc).map_err(|e| format!("decode remote {name}: {e}")))
        .collect::<Result<Vec<T>, String>>()
        .map(Some)
}

// ===========================================================================
// Tests
// ===========================================================================
