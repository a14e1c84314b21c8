//! Durable store for requests captured while offline.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// A write captured while offline, waiting for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
  /// Monotonic, assigned by the store; defines replay order
  pub id: i64,
  pub url: String,
  pub auth_header: Option<String>,
  pub payload: String,
}

/// Fields of a record before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueuedRequest {
  pub url: String,
  pub auth_header: Option<String>,
  pub payload: String,
}

impl From<&QueuedRequest> for NewQueuedRequest {
  fn from(record: &QueuedRequest) -> Self {
    Self {
      url: record.url.clone(),
      auth_header: record.auth_header.clone(),
      payload: record.payload.clone(),
    }
  }
}

/// Trait for durable queue backends.
///
/// Writes are serialized by the backend at record level.
pub trait QueueStore: Send + Sync {
  /// Append a record and return its id. Ids only ever grow.
  fn add(&self, record: &NewQueuedRequest) -> Result<i64>;

  /// Every record, oldest first.
  fn get_all(&self) -> Result<Vec<QueuedRequest>>;

  fn delete(&self, id: i64) -> Result<()>;

  /// Move a record to the tail: drop `record.id` (if still present) and append
  /// a copy under a fresh id, in one transaction.
  fn requeue(&self, record: &QueuedRequest) -> Result<i64>;
}

/// SQLite-backed queue. Records live in the `postrequest` table.
pub struct SqliteQueueStore {
  conn: Mutex<Connection>,
}

/// AUTOINCREMENT keeps ids monotonic even after the newest row is deleted.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS postrequest (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    auth_header TEXT,
    payload TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteQueueStore {
  /// Open (or create) the queue database at `path`.
  pub fn open_path(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory queue database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

fn insert(conn: &Connection, record: &NewQueuedRequest) -> Result<i64> {
  conn
    .execute(
      "INSERT INTO postrequest (url, auth_header, payload) VALUES (?, ?, ?)",
      params![record.url, record.auth_header, record.payload],
    )
    .map_err(|e| eyre!("Failed to queue request for {}: {}", record.url, e))?;
  Ok(conn.last_insert_rowid())
}

impl QueueStore for SqliteQueueStore {
  fn add(&self, record: &NewQueuedRequest) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    insert(&conn, record)
  }

  fn get_all(&self) -> Result<Vec<QueuedRequest>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT id, url, auth_header, payload FROM postrequest ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let records = stmt
      .query_map([], |row| {
        Ok(QueuedRequest {
          id: row.get(0)?,
          url: row.get(1)?,
          auth_header: row.get(2)?,
          payload: row.get(3)?,
        })
      })
      .map_err(|e| eyre!("Failed to read queued requests: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read queued request: {}", e))?;

    Ok(records)
  }

  fn delete(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM postrequest WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete queued request {}: {}", id, e))?;
    Ok(())
  }

  fn requeue(&self, record: &QueuedRequest) -> Result<i64> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    tx.execute("DELETE FROM postrequest WHERE id = ?", params![record.id])
      .map_err(|e| eyre!("Failed to delete queued request {}: {}", record.id, e))?;
    let id = insert(&tx, &NewQueuedRequest::from(record))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(id)
  }
}
