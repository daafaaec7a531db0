//! Local SQLite database layer for the POS.
//!
//! Uses rusqlite with WAL mode. Each logical collection (categories, products,
//! sales, outbox, settings) is stored as one full JSON snapshot row in the
//! `collections` table; `local_settings` holds engine metadata such as the
//! last pull timestamp.

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::models::CollectionName;

/// Database connection shared by the store and the sync engine.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Initialize the database at `{data_dir}/pos.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("pos.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    // Fail fast on a corrupt file so `init` can recreate it.
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .map_err(|e| format!("sqlite probe: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Migration v1: collection snapshots and local settings.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS local_settings (
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (setting_category, setting_key)
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| format!("migrate_v1: {e}"))?;

    info!("Applied migration v1");
    Ok(())
}

// ---------------------------------------------------------------------------
// Collection snapshots
// ---------------------------------------------------------------------------

/// Read the raw snapshot of a collection. Returns `Value::Null` when the
/// collection has never been saved.
pub fn load_collection(conn: &Connection, name: CollectionName) -> Result<Value, String> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT data FROM collections WHERE name = ?1",
            params![name.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| format!("load collection[{name}]: {e}"))?;

    match raw {
        Some(s) => serde_json::from_str(&s).map_err(|e| format!("parse collection[{name}]: {e}")),
        None => Ok(Value::Null),
    }
}

/// Read a collection as a typed sequence of records (empty if absent).
pub fn load_records<T: DeserializeOwned>(
    conn: &Connection,
    name: CollectionName,
) -> Result<Vec<T>, String> {
    match load_collection(conn, name)? {
        Value::Null => Ok(Vec::new()),
        value => serde_json::from_value(value).map_err(|e| format!("decode collection[{name}]: {e}")),
    }
}

/// Overwrite the snapshot of a single collection.
pub fn save_collection(conn: &Connection, name: CollectionName, data: &Value) -> Result<(), String> {
    let json = serde_json::to_string(data).map_err(|e| format!("serialize {name}: {e}"))?;
    conn.execute(
        "INSERT INTO collections (name, data, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(name) DO UPDATE SET
            data = excluded.data,
            updated_at = excluded.updated_at",
        params![name.as_str(), json],
    )
    .map_err(|e| format!("save collection[{name}]: {e}"))?;
    Ok(())
}

/// Overwrite several snapshots in one transaction. Either every snapshot is
/// written or none is.
pub fn save_collections(conn: &mut Connection, snapshots: &[(CollectionName, Value)]) -> Result<(), String> {
    let tx = conn
        .transaction()
        .map_err(|e| format!("begin transaction: {e}"))?;
    for (name, data) in snapshots {
        save_collection(&tx, *name, data)?;
    }
    tx.commit().map_err(|e| format!("commit transaction: {e}"))
}

// ---------------------------------------------------------------------------
// Local settings
// ---------------------------------------------------------------------------

pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

/// Open an in-memory database with migrations applied.
#[cfg(test)]
pub fn test_db() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations(&conn).expect("run_migrations should succeed in test");
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
