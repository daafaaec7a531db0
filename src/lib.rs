//! Hybrid POS - offline-first point-of-sale core.
//!
//! Every operation commits to the local SQLite store first and queues an
//! outbox entry; the sync engine replays the outbox against the remote
//! document store whenever the terminal is online.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod api;
pub mod cart;
pub mod catalog;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod outbox;
pub mod remote;
pub mod sales;
pub mod storage;
pub mod store;
pub mod sync;

pub use cart::{Cart, CartItemPatch};
pub use catalog::{CatalogSnapshot, Confirm};
pub use connectivity::{ConnectivitySignal, MonitorHandle};
pub use error::{PosError, PosResult};
pub use models::{
    CartItem, Category, OutboxAction, OutboxEntry, Product, ProductForm, Sale, SaleItem, Settings,
    SettingsPatch, SyncMode,
};
pub use remote::{HttpRemoteStore, MemoryRemoteStore, RemoteStore};
pub use store::{PosStore, StoreEvent};
pub use sync::{SyncEngine, SyncReport, SyncStatus, TriggerOutcome};

// ============================================================================
// App entry point
// ============================================================================

/// Start the terminal core and run until Ctrl-C.
pub fn run() -> anyhow::Result<()> {
    let data_dir = storage::data_dir();
    let _log_guard = logging::init_logging(&data_dir).map_err(anyhow::Error::msg)?;

    info!("Starting Hybrid POS v{}", env!("CARGO_PKG_VERSION"));

    // The core is single-threaded cooperative; sync interleaves at awaits.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(serve(data_dir))
}

async fn serve(data_dir: PathBuf) -> anyhow::Result<()> {
    let db = db::init(&data_dir).map_err(anyhow::Error::msg)?;
    let store = Arc::new(PosStore::open(db)?);
    catalog::seed_default_categories(&store)?;

    let signal = ConnectivitySignal::new(false);
    let probe_cancel = CancellationToken::new();

    let remote: Option<Arc<dyn RemoteStore>> = match storage::remote_config() {
        Some(cfg) => {
            let api = api::ApiClient::new(&cfg.url, cfg.api_key).map_err(anyhow::Error::msg)?;
            info!(remote = api.base_url(), "remote document store configured");
            signal.set_online(api.health().await);
            connectivity::spawn_health_probe(
                api.clone(),
                signal.clone(),
                connectivity::HEALTH_PROBE_INTERVAL,
                probe_cancel.clone(),
            );
            Some(Arc::new(HttpRemoteStore::new(api)) as Arc<dyn RemoteStore>)
        }
        None => {
            warn!("No remote store configured; running local-only");
            None
        }
    };

    let engine = Arc::new(SyncEngine::new(store.clone(), remote, signal.clone()));
    let monitor = connectivity::start_monitor(engine.clone(), signal, sync::SYNC_INTERVAL);

    let mut status = engine.subscribe_status();
    let status_engine = engine.clone();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            if current == SyncStatus::Error {
                let report = status_engine.report();
                warn!(
                    pending = report.pending,
                    error = report.last_error.as_deref().unwrap_or(""),
                    "sync error; will retry"
                );
            }
        }
    });

    info!(
        pending = store.outbox_len(),
        enabled = engine.is_enabled(),
        "terminal ready"
    );

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("Shutting down");
    probe_cancel.cancel();
    monitor.shutdown().await;
    Ok(())
}
