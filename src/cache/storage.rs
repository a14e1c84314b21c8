//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::key::RequestKey;
use super::traits::{BodyEncoding, CacheEntry, CachedResponse, StoredResponse};
use crate::http::Headers;

/// Trait for cache storage backends.
///
/// A backend holds any number of named namespaces, each mapping request keys
/// to stored responses.
pub trait CacheStore: Send + Sync {
  /// Create the namespace if it does not exist yet.
  fn open(&self, namespace: &str) -> Result<()>;

  /// Look up a single entry.
  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Insert or replace one entry.
  fn put(&self, namespace: &str, entry: &CacheEntry) -> Result<()>;

  /// Insert or replace a batch of entries. Either all are written or none.
  fn put_all(&self, namespace: &str, entries: &[CacheEntry]) -> Result<()>;

  /// Names of every existing namespace.
  fn keys(&self) -> Result<Vec<String>>;

  /// Drop a namespace and all its entries. Returns whether it existed.
  fn delete(&self, namespace: &str) -> Result<bool>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteCacheStore {
  conn: Mutex<Connection>,
}

impl SqliteCacheStore {
  /// Open (or create) the cache database at `path`.
  pub fn open_path(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
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
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_namespaces (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    encoding TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, request_key)
);
"#;

fn insert_entry(conn: &Connection, namespace: &str, entry: &CacheEntry) -> Result<()> {
  let headers = serde_json::to_string(&entry.response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (namespace, request_key, method, url, status, headers, body, encoding, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        namespace,
        entry.key.as_str(),
        entry.method.as_str(),
        entry.url.as_str(),
        entry.response.status,
        headers,
        entry.response.body,
        entry.response.encoding.as_str(),
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry for {}: {}", entry.url, e))?;

  Ok(())
}

fn ensure_namespace(conn: &Connection, namespace: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_namespaces (name) VALUES (?)",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to open cache namespace '{}': {}", namespace, e))?;
  Ok(())
}

impl CacheStore for SqliteCacheStore {
  fn open(&self, namespace: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    ensure_namespace(&conn, namespace)
  }

  fn get(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String, String)> = conn
      .query_row(
        "SELECT status, headers, body, encoding, cached_at FROM cache_entries
         WHERE namespace = ? AND request_key = ?",
        params![namespace, key.as_str()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    let Some((status, headers, body, encoding, cached_at)) = row else {
      return Ok(None);
    };

    let headers: Headers = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
    let encoding = BodyEncoding::parse(&encoding)
      .ok_or_else(|| eyre!("Unknown body encoding '{}' in cache entry", encoding))?;

    Ok(Some(CachedResponse {
      response: StoredResponse {
        status,
        headers,
        body,
        encoding,
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, namespace: &str, entry: &CacheEntry) -> Result<()> {
    self.put_all(namespace, std::slice::from_ref(entry))
  }

  fn put_all(&self, namespace: &str, entries: &[CacheEntry]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_namespace(&tx, namespace)?;
    for entry in entries {
      insert_entry(&tx, namespace, entry)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_namespaces ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache namespace: {}", e))?;

    Ok(names)
  }

  fn delete(&self, namespace: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE namespace = ?",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to delete entries of '{}': {}", namespace, e))?;

    let removed = tx
      .execute(
        "DELETE FROM cache_namespaces WHERE name = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete cache namespace '{}': {}", namespace, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
