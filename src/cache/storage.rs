//! Cache storage trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{CacheError, Result};
use crate::net::{Headers, ResponseType};

use super::types::{ResourceKey, Snapshot, StoreName};

/// Trait for cache storage backends.
///
/// Keys are unique per store; `put` replaces whatever was stored before.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open_store(&self, store: &StoreName) -> Result<()>;

  /// Get a snapshot, `Ok(None)` if the key was never stored.
  fn get(&self, store: &StoreName, key: &ResourceKey) -> Result<Option<Snapshot>>;

  /// Store a snapshot, replacing any previous one for the key.
  fn put(&self, store: &StoreName, key: &ResourceKey, snapshot: &Snapshot) -> Result<()>;

  /// All keys in a store, sorted.
  fn keys(&self, store: &StoreName) -> Result<Vec<ResourceKey>>;

  /// All store names, sorted.
  fn store_names(&self) -> Result<Vec<StoreName>>;

  /// Delete a store and its snapshots. Returns `true` if it existed.
  fn delete_store(&self, store: &StoreName) -> Result<bool>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn open_store(&self, _store: &StoreName) -> Result<()> {
    Ok(())
  }

  fn get(&self, _store: &StoreName, _key: &ResourceKey) -> Result<Option<Snapshot>> {
    Ok(None) // Always miss
  }

  fn put(&self, _store: &StoreName, _key: &ResourceKey, _snapshot: &Snapshot) -> Result<()> {
    Ok(()) // Discard
  }

  fn keys(&self, _store: &StoreName) -> Result<Vec<ResourceKey>> {
    Ok(Vec::new())
  }

  fn store_names(&self) -> Result<Vec<StoreName>> {
    Ok(Vec::new())
  }

  fn delete_store(&self, _store: &StoreName) -> Result<bool> {
    Ok(false)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open (or create) the database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        CacheError::StoreUnavailable(format!("Failed to create cache directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      CacheError::StoreUnavailable(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// Private database that lives as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory().map_err(|e| {
      CacheError::StoreUnavailable(format!("Failed to open in-memory database: {}", e))
    })?;

    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        CacheError::StoreUnavailable("Could not determine data directory".to_string())
      })?;

    Ok(data_dir.join("shellcache").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| CacheError::StoreUnavailable(format!("Failed to run cache migrations: {}", e)))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::StoreUnavailable(format!("Lock poisoned: {}", e)))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per versioned store
CREATE TABLE IF NOT EXISTS stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots, at most one per key per store
CREATE TABLE IF NOT EXISTS snapshots (
    store_name TEXT NOT NULL,
    resource_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    response_type TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (store_name, resource_key),
    FOREIGN KEY (store_name) REFERENCES stores(name) ON DELETE CASCADE
);
"#;

impl CacheStorage for SqliteStorage {
  fn open_store(&self, store: &StoreName) -> Result<()> {
    self
      .lock()?
      .execute(
        "INSERT OR IGNORE INTO stores (name) VALUES (?)",
        params![store.as_str()],
      )
      .map_err(|e| CacheError::StoreUnavailable(format!("Failed to create store {}: {}", store, e)))?;

    Ok(())
  }

  fn get(&self, store: &StoreName, key: &ResourceKey) -> Result<Option<Snapshot>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| CacheError::CacheLookupFailed(format!("Lock poisoned: {}", e)))?;

    let row: Option<(u16, String, String, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, status_text, response_type, headers, body, cached_at FROM snapshots
         WHERE store_name = ? AND resource_key = ?",
        params![store.as_str(), key.as_str()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| CacheError::CacheLookupFailed(format!("Failed to read {}: {}", key, e)))?;

    let Some((status, status_text, response_type, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let response_type = response_type
      .parse::<ResponseType>()
      .map_err(CacheError::CacheLookupFailed)?;
    let headers: Headers = serde_json::from_str(&headers).map_err(|e| {
      CacheError::CacheLookupFailed(format!("Failed to parse headers for {}: {}", key, e))
    })?;
    let cached_at = parse_datetime(&cached_at)?;

    Ok(Some(Snapshot {
      status,
      status_text,
      response_type,
      headers,
      body,
      cached_at,
    }))
  }

  fn put(&self, store: &StoreName, key: &ResourceKey, snapshot: &Snapshot) -> Result<()> {
    let headers = serde_json::to_string(&snapshot.headers)
      .map_err(|e| CacheError::StoreUnavailable(format!("Failed to serialize headers: {}", e)))?;

    self
      .lock()?
      .execute(
        "INSERT OR REPLACE INTO snapshots
           (store_name, resource_key, status, status_text, response_type, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          store.as_str(),
          key.as_str(),
          snapshot.status,
          snapshot.status_text,
          snapshot.response_type.as_str(),
          headers,
          snapshot.body,
          snapshot.cached_at.to_rfc3339(),
        ],
      )
      .map_err(|e| CacheError::StoreUnavailable(format!("Failed to store {}: {}", key, e)))?;

    Ok(())
  }

  fn keys(&self, store: &StoreName) -> Result<Vec<ResourceKey>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT resource_key FROM snapshots WHERE store_name = ? ORDER BY resource_key",
      )
      .map_err(|e| CacheError::CacheLookupFailed(format!("Failed to prepare query: {}", e)))?;

    let keys = stmt
      .query_map(params![store.as_str()], |row| row.get::<_, String>(0))
      .map_err(|e| CacheError::CacheLookupFailed(format!("Failed to list keys: {}", e)))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| CacheError::CacheLookupFailed(format!("Failed to list keys: {}", e)))?;

    Ok(keys.into_iter().map(ResourceKey::from_stored).collect())
  }

  fn store_names(&self) -> Result<Vec<StoreName>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM stores ORDER BY name")
      .map_err(|e| CacheError::CacheLookupFailed(format!("Failed to prepare query: {}", e)))?;

    let names = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| CacheError::CacheLookupFailed(format!("Failed to list stores: {}", e)))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| CacheError::CacheLookupFailed(format!("Failed to list stores: {}", e)))?;

    Ok(names.into_iter().map(StoreName::new).collect())
  }

  fn delete_store(&self, store: &StoreName) -> Result<bool> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| CacheError::StoreUnavailable(format!("Failed to begin transaction: {}", e)))?;

    tx.execute(
      "DELETE FROM snapshots WHERE store_name = ?",
      params![store.as_str()],
    )
    .map_err(|e| CacheError::StoreUnavailable(format!("Failed to delete snapshots: {}", e)))?;

    let removed = tx
      .execute("DELETE FROM stores WHERE name = ?", params![store.as_str()])
      .map_err(|e| CacheError::StoreUnavailable(format!("Failed to delete store: {}", e)))?;

    tx.commit()
      .map_err(|e| CacheError::StoreUnavailable(format!("Failed to commit transaction: {}", e)))?;

    Ok(removed > 0)
  }
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| CacheError::CacheLookupFailed(format!("Failed to parse datetime '{}': {}", s, e)))
}
