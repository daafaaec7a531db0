//! Write-through state store.
//!
//! Holds the current value of every collection in memory and mirrors each
//! change to SQLite before it becomes visible. A mutation runs against a draft
//! copy; the draft replaces the live state only after the snapshots of the
//! collections it touched have been committed in one transaction, so a storage
//! failure leaves both memory and disk untouched.

use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::models::{
    Category, CollectionName, OutboxEntry, Product, Sale, Settings, SettingsPatch,
};

const EVENT_CAPACITY: usize = 64;

/// Current value of every local collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    pub categories: Vec<Category>,
    pub products: Vec<Product>,
    pub sales: Vec<Sale>,
    pub outbox: Vec<OutboxEntry>,
    pub settings: Settings,
}

impl StoreState {
    fn snapshot_of(&self, name: CollectionName) -> Result<Value, String> {
        let value = match name {
            CollectionName::Categories => to_value(&self.categories),
            CollectionName::Products => to_value(&self.products),
            CollectionName::Sales => to_value(&self.sales),
            CollectionName::Outbox => to_value(&self.outbox),
            CollectionName::Settings => to_value(&self.settings),
        };
        value.map_err(|e| format!("serialize {name}: {e}"))
    }
}

fn to_value<T: Serialize>(v: &T) -> serde_json::Result<Value> {
    serde_json::to_value(v)
}

/// Fired after a change to `collection` has been committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreEvent {
    pub collection: CollectionName,
}

pub struct PosStore {
    db: DbState,
    state: Mutex<StoreState>,
    events: broadcast::Sender<StoreEvent>,
}

impl PosStore {
    /// Load every collection from `db`. Absent collections start empty and
    /// absent settings start from defaults.
    pub fn open(db: DbState) -> PosResult<Self> {
        let state = {
            let conn = db.conn.lock().map_err(|e| PosError::Storage(e.to_string()))?;
            let settings = match db::load_collection(&conn, CollectionName::Settings)
                .map_err(PosError::Storage)?
            {
                Value::Null => Settings::default(),
                value => serde_json::from_value(value)
                    .map_err(|e| PosError::Storage(format!("decode settings: {e}")))?,
            };
            StoreState {
                categories: db::load_records(&conn, CollectionName::Categories)
                    .map_err(PosError::Storage)?,
                products: db::load_records(&conn, CollectionName::Products)
                    .map_err(PosError::Storage)?,
                sales: db::load_records(&conn, CollectionName::Sales).map_err(PosError::Storage)?,
                outbox: db::load_records(&conn, CollectionName::Outbox)
                    .map_err(PosError::Storage)?,
                settings,
            }
        };
        debug!(
            categories = state.categories.len(),
            products = state.products.len(),
            sales = state.sales.len(),
            outbox = state.outbox.len(),
            "local store loaded"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            db,
            state: Mutex::new(state),
            events,
        })
    }

    // -- reads ---------------------------------------------------------------

    fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        match self.state.lock() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    pub fn snapshot(&self) -> StoreState {
        self.read(|s| s.clone())
    }

    pub fn categories(&self) -> Vec<Category> {
        self.read(|s| s.categories.clone())
    }

    pub fn products(&self) -> Vec<Product> {
        self.read(|s| s.products.clone())
    }

    pub fn sales(&self) -> Vec<Sale> {
        self.read(|s| s.sales.clone())
    }

    pub fn outbox(&self) -> Vec<OutboxEntry> {
        self.read(|s| s.outbox.clone())
    }

    pub fn outbox_len(&self) -> usize {
        self.read(|s| s.outbox.len())
    }

    pub fn settings(&self) -> Settings {
        self.read(|s| s.settings.clone())
    }

    /// Receive a [`StoreEvent`] for every committed collection change.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    // -- writes --------------------------------------------------------------

    /// Apply `f` to a draft of the state and commit the `touched` collections.
    ///
    /// If `f` fails nothing is written. If persistence fails the draft is
    /// discarded and `PosError::Storage` is returned.
    pub(crate) fn mutate<R>(
        &self,
        touched: &[CollectionName],
        f: impl FnOnce(&mut StoreState) -> PosResult<R>,
    ) -> PosResult<R> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| PosError::Storage(format!("state lock poisoned: {e}")))?;
        let mut draft = guard.clone();
        let result = f(&mut draft)?;

        let mut snapshots = Vec::with_capacity(touched.len());
        for name in touched {
            snapshots.push((*name, draft.snapshot_of(*name).map_err(PosError::Storage)?));
        }
        self.persist(&snapshots)?;

        *guard = draft;
        drop(guard);

        for name in touched {
            let _ = self.events.send(StoreEvent { collection: *name });
        }
        Ok(result)
    }

    fn persist(&self, snapshots: &[(CollectionName, Value)]) -> PosResult<()> {
        let mut conn = self
            .db
            .conn
            .lock()
            .map_err(|e| PosError::Storage(e.to_string()))?;
        db::save_collections(&mut conn, snapshots).map_err(|e| {
            error!(error = %e, "failed to persist local collections");
            PosError::Storage(e)
        })
    }

    /// Remove one outbox entry by id. Returns `false` when it was already gone.
    pub fn remove_outbox_entry(&self, entry_id: &str) -> PosResult<bool> {
        self.mutate(&[CollectionName::Outbox], |state| {
            let before = state.outbox.len();
            state.outbox.retain(|e| e.id != entry_id);
            Ok(state.outbox.len() != before)
        })
    }

    /// Wholesale replacement used by pull. `None` leaves a collection as is.
    pub fn replace_remote_collections(
        &self,
        categories: Option<Vec<Category>>,
        products: Option<Vec<Product>>,
        sales: Option<Vec<Sale>>,
    ) -> PosResult<Vec<CollectionName>> {
        let mut touched = Vec::new();
        if categories.is_some() {
            touched.push(CollectionName::Categories);
        }
        if products.is_some() {
            touched.push(CollectionName::Products);
        }
        if sales.is_some() {
            touched.push(CollectionName::Sales);
        }
        if touched.is_empty() {
            return Ok(touched);
        }

        self.mutate(&touched, |state| {
            if let Some(c) = categories {
                state.categories = c;
            }
            if let Some(p) = products {
                state.products = p;
            }
            if let Some(s) = sales {
                state.sales = s;
            }
            Ok(())
        })?;
        Ok(touched)
    }

    /// Apply a settings patch. Settings are device-local and never queued.
    pub fn update_settings(&self, patch: SettingsPatch) -> PosResult<Settings> {
        self.mutate(&[CollectionName::Settings], |state| {
            state.settings.apply(patch);
            Ok(state.settings.clone())
        })
    }

    // -- engine metadata -----------------------------------------------------

    pub fn get_meta(&self, key: &str) -> Option<String> {
        let conn = self.db.conn.lock().ok()?;
        db::get_setting(&conn, "sync", key)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> PosResult<()> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| PosError::Storage(e.to_string()))?;
        db::set_setting(&conn, "sync", key, value).map_err(PosError::Storage)
    }
}

#[cfg(test)]
pub(crate) fn test_store() -> PosStore {
    PosStore::open(db::test_db()).expect("open test store")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncMode;

    fn category(id: &str) -> Category {
        Category {
            id: id.to_string(),
            name: id.to_string(),
            collapsed: true,
        }
    }

    #[test]
    fn test_open_empty_store_uses_defaults() {
        let store = test_store();
        assert!(store.categories().is_empty());
        assert_eq!(store.outbox_len(), 0);
        assert_eq!(store.settings().mode, SyncMode::Auto);
    }

    #[test]
    fn test_mutate_is_write_through() {
        let store = test_store();
        store
            .mutate(&[CollectionName::Categories], |s| {
                s.categories.push(category("C_1"));
                Ok(())
            })
            .unwrap();

        let conn = store.db.conn.lock().unwrap();
        let stored: Vec<Category> = db::load_records(&conn, CollectionName::Categories).unwrap();
        assert_eq!(stored, vec![category("C_1")]);
    }

    #[test]
    fn test_failed_mutation_leaves_state_untouched() {
        let store = test_store();
        let err = store
            .mutate(&[CollectionName::Categories], |s| -> PosResult<()> {
                s.categories.push(category("C_1"));
                Err(PosError::validation("nope"))
            })
            .unwrap_err();
        assert_eq!(err, PosError::validation("nope"));
        assert!(store.categories().is_empty());
    }

    #[test]
    fn test_storage_failure_discards_draft() {
        let store = test_store();
        {
            let conn = store.db.conn.lock().unwrap();
            conn.execute_batch("DROP TABLE collections;").unwrap();
        }
        let err = store
            .mutate(&[CollectionName::Categories], |s| {
                s.categories.push(category("C_1"));
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, PosError::Storage(_)));
        assert!(store.categories().is_empty());
    }

    #[test]
    fn test_subscribers_see_committed_changes() {
        let store = test_store();
        let mut rx = store.subscribe();
        store
            .mutate(&[CollectionName::Categories, CollectionName::Outbox], |s| {
                s.categories.push(category("C_1"));
                Ok(())
            })
            .unwrap();
        assert_eq!(rx.try_recv().unwrap().collection, CollectionName::Categories);
        assert_eq!(rx.try_recv().unwrap().collection, CollectionName::Outbox);
    }

    #[test]
    fn test_replace_remote_collections_skips_none() {
        let store = test_store();
        store
            .mutate(&[CollectionName::Categories], |s| {
                s.categories.push(category("C_local"));
                Ok(())
            })
            .unwrap();

        let touched = store
            .replace_remote_collections(None, Some(vec![]), None)
            .unwrap();
        assert_eq!(touched, vec![CollectionName::Products]);
        assert_eq!(store.categories(), vec![category("C_local")]);
    }

    #[test]
    fn test_update_settings_persists_without_outbox() {
        let store = test_store();
        let updated = store
            .update_settings(SettingsPatch {
                mode: Some(SyncMode::Offline),
                cashier: Some("Ana".into()),
                ..SettingsPatch::default()
            })
            .unwrap();
        assert_eq!(updated.mode, SyncMode::Offline);
        assert_eq!(updated.contact, "0999-999-9999");
        assert_eq!(store.outbox_len(), 0);

        let conn = store.db.conn.lock().unwrap();
        let stored = db::load_collection(&conn, CollectionName::Settings).unwrap();
        assert_eq!(stored["mode"], "offline");
        assert_eq!(stored["cashier"], "Ana");
    }

    #[test]
    fn test_meta_round_trip() {
        let store = test_store();
        assert_eq!(store.get_meta("last_pull_at"), None);
        store.set_meta("last_pull_at", "2026-01-01T00:00:00Z").unwrap();
        assert_eq!(
            store.get_meta("last_pull_at").as_deref(),
            Some("2026-01-01T00:00:00Z")
        );
    }
}
