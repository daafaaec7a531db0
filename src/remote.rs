//! Remote document store boundary.
//!
//! The sync engine only needs three operations per collection: upsert by id,
//! delete by id and fetch all. Both are idempotent, which is what makes
//! at-least-once outbox replay safe.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::api::{percent_encode, ApiClient};

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Write `doc` under `id`, replacing any existing document.
    async fn upsert(&self, collection: &str, id: &str, doc: &Value) -> Result<(), String>;

    /// Remove the document. Removing a missing document succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), String>;

    /// Every document of the collection.
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Value>, String>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// REST document store:
/// `PUT|DELETE {base}/collections/{c}/documents/{id}`,
/// `GET {base}/collections/{c}/documents`.
pub struct HttpRemoteStore {
    api: ApiClient,
}

impl HttpRemoteStore {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    fn document_path(collection: &str, id: &str) -> String {
        format!(
            "/collections/{}/documents/{}",
            percent_encode(collection),
            percent_encode(id)
        )
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn upsert(&self, collection: &str, id: &str, doc: &Value) -> Result<(), String> {
        self.api
            .send(Method::PUT, &Self::document_path(collection, id), Some(doc), false)
            .await
            .map(|_| ())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), String> {
        self.api
            .send(Method::DELETE, &Self::document_path(collection, id), None, true)
            .await
            .map(|_| ())
    }

    async fn fetch_all(&self, collection: &str) -> Result<Vec<Value>, String> {
        let path = format!("/collections/{}/documents", percent_encode(collection));
        let body = self.api.send(Method::GET, &path, None, false).await?;
        document_list(collection, body)
    }
}

/// Accept a bare array or a `{ documents: [...] }` wrapper; an empty body is
/// an empty collection.
fn document_list(collection: &str, body: Option<Value>) -> Result<Vec<Value>, String> {
    match body {
        None => Ok(Vec::new()),
        Some(Value::Array(docs)) => Ok(docs),
        Some(other) => match other.get("documents") {
            Some(Value::Array(docs)) => Ok(docs.clone()),
            _ => Err(format!("fetch {collection}: response is not a document list")),
        },
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// In-process document store with call counting and failure injection.
#[derive(Default)]
pub struct MemoryRemoteStore {
    collections: Mutex<HashMap<String, Vec<(String, Value)>>>,
    writes: AtomicUsize,
    fetches: AtomicUsize,
    /// 1-based index (counted from the last reset) of the write that fails.
    fail_write_at: Mutex<Option<usize>>,
    writes_since_arm: AtomicUsize,
    fail_fetches: AtomicBool,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`th write from now fail (once).
    pub fn fail_write_number(&self, n: usize) {
        self.writes_since_arm.store(0, Ordering::SeqCst);
        if let Ok(mut guard) = self.fail_write_at.lock() {
            *guard = Some(n);
        }
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Number of upsert/delete calls attempted.
    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.write_calls() + self.fetch_calls()
    }

    /// Documents of `collection` in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .map(|c| {
                c.get(collection)
                    .map(|docs| docs.iter().map(|(_, d)| d.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Seed a document without counting it as a write.
    pub fn insert_document(&self, collection: &str, id: &str, doc: Value) {
        if let Ok(mut c) = self.collections.lock() {
            put(c.entry(collection.to_string()).or_default(), id, doc);
        }
    }

    fn check_write(&self) -> Result<(), String> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let n = self.writes_since_arm.fetch_add(1, Ordering::SeqCst) + 1;
        let mut guard = self
            .fail_write_at
            .lock()
            .map_err(|e| format!("remote lock poisoned: {e}"))?;
        if *guard == Some(n) {
            *guard = None;
            return Err(format!("injected failure on write #{n}"));
        }
        Ok(())
    }
}

fn put(docs: &mut Vec<(String, Value)>, id: &str, doc: Value) {
    match docs.iter_mut().find(|(existing, _)| existing == id) {
        Some(slot) => slot.1 = doc,
        None => docs.push((id.to_string(), doc)),
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn upsert(&self, collection: &str, id: &str, doc: &Value) -> Result<(), String> {
        self.check_write()?;
        let mut c = self
            .collections
            .lock()
            .map_err(|e| format!("remote lock poisoned: {e}"))?;
        put(c.entry(collection.to_string()).or_default(), id, doc.clone());
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), String> {
        self.check_write()?;
        let mut c = self
            .collections
            .lock()
            .map_err(|e| format!("remote lock poisoned: {e}"))?;
        if let Some(docs) = c.get_mut(collection) {
            docs.retain(|(existing, _)| existing != id);
        }
        Ok(())
    }

    async fn fetch_all(&self, collection: &str) -> Result<Vec<Value>, String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(format!("injected fetch failure for {collection}"));
        }
        Ok(self.documents(collection))
    }
}
