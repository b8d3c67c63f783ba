//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

use super::scope::Scope;

/// A single cached payload.
#[derive(Debug, Clone)]
pub struct CachedPayload {
  /// The stored value
  pub payload: Value,
  /// When the value was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Every entry is partitioned by owner identity. Writes are last-write-wins.
pub trait CacheStore: Send + Sync {
  /// Read the entry for `(owner, scope)`.
  fn read(&self, owner: &str, scope: &Scope) -> Result<Option<CachedPayload>>;

  /// Replace the entry for `(owner, scope)`.
  fn write(&self, owner: &str, scope: &Scope, payload: &Value) -> Result<()>;

  /// All scopes stored for `owner` whose logical name is `name`.
  fn list_scopes(&self, owner: &str, name: &str) -> Result<Vec<Scope>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Create an in-memory cache (for testing).
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    owner_id TEXT NOT NULL,
    scope TEXT NOT NULL,
    scope_name TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (owner_id, scope)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_name
    ON cache_entries(owner_id, scope_name);
"#;

impl CacheStore for SqliteStorage {
  fn read(&self, owner: &str, scope: &Scope) -> Result<Option<CachedPayload>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, cached_at FROM cache_entries WHERE owner_id = ? AND scope = ?",
        params![owner, scope.as_str()],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", scope, e))?;

    match row {
      Some((data, cached_at)) => {
        let payload = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cache entry {}: {}", scope, e))?;
        Ok(Some(CachedPayload {
          payload,
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn write(&self, owner: &str, scope: &Scope, payload: &Value) -> Result<()> {
    let data =
      serde_json::to_vec(payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (owner_id, scope, scope_name, data, cached_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          owner,
          scope.as_str(),
          scope.name(),
          data,
          Utc::now().to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", scope, e))?;

    Ok(())
  }

  fn list_scopes(&self, owner: &str, name: &str) -> Result<Vec<Scope>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT scope FROM cache_entries WHERE owner_id = ? AND scope_name = ? ORDER BY scope")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let scopes = stmt
      .query_map(params![owner, name], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list scopes: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read scope row: {}", e))?;

    Ok(scopes.into_iter().map(Scope::from_key).collect())
  }
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
