//! Local storage for saved queries and other non-secret state.
//!
//! Values are JSON documents under string keys. [`LocalStorage`] keeps them in
//! SQLite; [`MemoryStore`] keeps them in memory. Secrets never go here, see
//! [`crate::services::credentials`].
//!
//! # Data Directory Locations
//!
//! - **macOS**: `~/Library/Application Support/dev.pgbrowse.PgBrowse`
//! - **Windows**: `%APPDATA%\pgbrowse`
//! - **Linux**: `~/.local/share/pgbrowse`
//! - **Debug builds**: `./pgbrowse_data` in the current directory

use crate::error::{BrowseError, BrowseResult};
use crate::models::SavedQuery;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Key of the saved query list.
pub const QUERIES_KEY: &str = "postgresql.queries";

/// Default data directory for this platform and build type.
pub fn default_data_dir() -> PathBuf {
    #[cfg(debug_assertions)]
    {
        PathBuf::from("./pgbrowse_data")
    }

    #[cfg(not(debug_assertions))]
    {
        dirs::data_dir()
            .map(|d| {
                #[cfg(target_os = "macos")]
                {
                    d.join("dev.pgbrowse.PgBrowse")
                }
                #[cfg(not(target_os = "macos"))]
                {
                    d.join("pgbrowse")
                }
            })
            .unwrap_or_else(|| PathBuf::from("./pgbrowse_data"))
    }
}

/// Create the data directory if needed.
pub fn init_data_dir(path: &Path) -> BrowseResult<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(BrowseError::storage(
                format!("Data path exists but is not a directory: {}", path.display()),
                Some("Select a different location or remove the existing file"),
            ));
        }
        return Ok(());
    }

    std::fs::create_dir_all(path).map_err(|e| {
        BrowseError::storage(
            format!("Failed to create data directory '{}': {}", path.display(), e),
            Some("Check permissions or select a different location"),
        )
    })?;

    tracing::info!(path = %path.display(), "Created data directory");
    Ok(())
}

/// JSON documents under string keys.
pub trait KeyValueStore: Send + Sync {
    /// Insert or replace a value.
    fn save_value(&self, key: &str, value: &JsonValue) -> BrowseResult<()>;

    /// Load a value.
    fn load_value(&self, key: &str) -> BrowseResult<Option<JsonValue>>;

    /// Delete a value. Deleting a missing key succeeds.
    fn delete_value(&self, key: &str) -> BrowseResult<()>;
}

// ============================================================================
// LocalStorage
// ============================================================================

/// SQLite-backed store.
///
/// Thread-safe via an internal mutex. Uses WAL mode.
pub struct LocalStorage {
    connection: Mutex<Connection>,
    data_dir: PathBuf,
}

impl LocalStorage {
    /// Open or create `pgbrowse.db` in `data_dir`.
    pub fn open(data_dir: PathBuf) -> BrowseResult<Self> {
        init_data_dir(&data_dir)?;
        let db_path = data_dir.join("pgbrowse.db");
        Self::open_with_path(db_path, data_dir)
    }

    /// Open a database file at a specific path.
    pub fn open_with_path(db_path: PathBuf, data_dir: PathBuf) -> BrowseResult<Self> {
        let connection = Connection::open(&db_path).map_err(|e| {
            BrowseError::storage(
                format!("Failed to open database '{}': {}", db_path.display(), e),
                Some("The database file may be corrupted. Try deleting it to start fresh."),
            )
        })?;

        Self::configure_connection(&connection)?;

        let storage = Self { connection: Mutex::new(connection), data_dir };
        storage.run_migrations()?;

        tracing::info!(path = %db_path.display(), "Local storage opened");
        Ok(storage)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> BrowseResult<Self> {
        let connection = Connection::open_in_memory()?;
        let storage = Self { connection: Mutex::new(connection), data_dir: PathBuf::new() };
        storage.run_migrations()?;
        Ok(storage)
    }

    fn configure_connection(conn: &Connection) -> BrowseResult<()> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
            ",
        )
        .map_err(|e| BrowseError::storage(format!("Failed to configure database: {e}"), None))
    }

    fn run_migrations(&self) -> BrowseResult<()> {
        const DOMAIN: &str = "core";
        let conn = self.connection.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS migrations (
                domain TEXT NOT NULL,
                step INTEGER NOT NULL,
                migration TEXT NOT NULL,
                PRIMARY KEY(domain, step)
            ) STRICT",
            [],
        )
        .map_err(|e| BrowseError::storage(format!("Failed to create migrations table: {e}"), None))?;

        let current_step: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(step), 0) FROM migrations WHERE domain = ?",
                [DOMAIN],
                |row| row.get(0),
            )
            .map_err(|e| BrowseError::storage(format!("Failed to read migrations: {e}"), None))?;

        if current_step < 1 {
            conn.execute_batch(
                "
                CREATE TABLE app_state (
                    key TEXT PRIMARY KEY,
                    value_json TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
                ) STRICT;
                ",
            )
            .map_err(|e| BrowseError::storage(format!("Migration 1 failed: {e}"), None))?;

            conn.execute(
                "INSERT INTO migrations (domain, step, migration) VALUES (?, 1, 'app_state')",
                [DOMAIN],
            )
            .map_err(|e| BrowseError::storage(format!("Failed to record migration: {e}"), None))?;

            tracing::info!("Applied migration 1: app_state");
        }

        Ok(())
    }

    /// Directory holding the database file.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl KeyValueStore for LocalStorage {
    fn save_value(&self, key: &str, value: &JsonValue) -> BrowseResult<()> {
        let json = serde_json::to_string(value)?;
        let conn = self.connection.lock();
        conn.execute(
            "INSERT INTO app_state (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at",
            params![key, json, Utc::now().to_rfc3339()],
        )
        .map_err(|e| BrowseError::storage(format!("Failed to save '{key}': {e}"), None))?;
        Ok(())
    }

    fn load_value(&self, key: &str) -> BrowseResult<Option<JsonValue>> {
        let stored: Option<String> = {
            let conn = self.connection.lock();
            conn.query_row("SELECT value_json FROM app_state WHERE key = ?", [key], |row| row.get(0))
                .optional()
                .map_err(|e| BrowseError::storage(format!("Failed to load '{key}': {e}"), None))?
        };

        stored
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| {
                    BrowseError::storage(format!("Invalid JSON stored under '{key}': {e}"), None)
                })
            })
            .transpose()
    }

    fn delete_value(&self, key: &str) -> BrowseResult<()> {
        let conn = self.connection.lock();
        conn.execute("DELETE FROM app_state WHERE key = ?", [key])
            .map_err(|e| BrowseError::storage(format!("Failed to delete '{key}': {e}"), None))?;
        Ok(())
    }
}

impl std::fmt::Debug for LocalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStorage").field("data_dir", &self.data_dir).finish()
    }
}

/// In-memory store, for tests and sessions without a data directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, JsonValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn save_value(&self, key: &str, value: &JsonValue) -> BrowseResult<()> {
        self.values.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn load_value(&self, key: &str) -> BrowseResult<Option<JsonValue>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn delete_value(&self, key: &str) -> BrowseResult<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// SavedQueryStore
// ============================================================================

/// The user's saved query library.
pub struct SavedQueryStore {
    store: Arc<dyn KeyValueStore>,
}

impl SavedQueryStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// All saved queries, in insertion order. Unreadable data reads as empty.
    pub fn all_queries(&self) -> Vec<SavedQuery> {
        let value = match self.store.load_value(QUERIES_KEY) {
            Ok(Some(value)) => value,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load saved queries");
                return Vec::new();
            }
        };

        serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring unreadable saved queries");
            Vec::new()
        })
    }

    fn write(&self, queries: &[SavedQuery]) -> BrowseResult<()> {
        self.store.save_value(QUERIES_KEY, &serde_json::to_value(queries)?)
    }

    /// Append a query to the library.
    pub fn save_query(&self, query: SavedQuery) -> BrowseResult<SavedQuery> {
        let mut queries = self.all_queries();
        queries.push(query.clone());
        self.write(&queries)?;
        tracing::debug!(query_id = %query.id, "Query saved");
        Ok(query)
    }

    /// Replace the query with the same id. Returns `false` if none matched.
    pub fn update_query(&self, query: SavedQuery) -> BrowseResult<bool> {
        let mut queries = self.all_queries();
        let Some(existing) = queries.iter_mut().find(|q| q.id == query.id) else {
            return Ok(false);
        };
        *existing = query;
        self.write(&queries)?;
        Ok(true)
    }

    /// Remove a query. Unknown ids are ignored.
    pub fn delete_query(&self, id: &str) -> BrowseResult<()> {
        let mut queries = self.all_queries();
        queries.retain(|q| q.id != id);
        self.write(&queries)?;
        tracing::debug!(query_id = id, "Query deleted");
        Ok(())
    }

    /// Stamp a query as just executed.
    pub fn mark_executed(&self, id: &str) -> BrowseResult<Option<SavedQuery>> {
        self.modify(id, |query| query.last_executed = Some(Utc::now()))
    }

    /// Flip the favorite flag of a query.
    pub fn toggle_favorite(&self, id: &str) -> BrowseResult<Option<SavedQuery>> {
        self.modify(id, |query| query.is_favorite = Some(!query.is_favorite()))
    }

    fn modify(
        &self,
        id: &str,
        change: impl FnOnce(&mut SavedQuery),
    ) -> BrowseResult<Option<SavedQuery>> {
        let mut queries = self.all_queries();
        let Some(query) = queries.iter_mut().find(|q| q.id == id) else {
            return Ok(None);
        };
        change(query);
        let updated = query.clone();
        self.write(&queries)?;
        Ok(Some(updated))
    }
}

impl std::fmt::Debug for SavedQueryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SavedQueryStore").finish_non_exhaustive()
    }
}
