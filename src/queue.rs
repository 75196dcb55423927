//! Durable retry queue for mutating requests that failed to reach the network.
//!
//! Entries are totally ordered by creation (the rowid) and are only ever
//! touched by the drainer: attempts increment in place, successful replays
//! delete. Enqueue commits before returning so a process kill after the
//! public boundary never loses the action.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::sync::Arc;

use crate::http::{Headers, Method, Request};
use crate::store::Database;

/// A failed mutating request awaiting replay.
#[derive(Debug, Clone)]
pub struct QueuedAction {
  pub id: i64,
  pub url: String,
  pub method: Method,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub created_at: DateTime<Utc>,
  pub attempts: u32,
}

impl QueuedAction {
  /// Rebuild the original request for replay.
  pub fn to_request(&self) -> Request {
    Request::new(self.method, self.url.clone(), self.headers.clone(), self.body.clone())
  }
}

/// Trait for durable retry queue backends.
pub trait RetryQueue: Send + Sync {
  /// Append a failed request at the tail. Durable before this returns.
  fn enqueue(&self, request: &Request) -> Result<QueuedAction>;

  /// All pending actions, oldest first.
  fn oldest_first(&self) -> Result<Vec<QueuedAction>>;

  /// Remove an action after a successful replay.
  fn remove(&self, id: i64) -> Result<()>;

  /// Increment an action's attempt counter after a failed replay.
  fn record_attempt(&self, id: i64) -> Result<u32>;

  /// Number of pending actions.
  fn len(&self) -> Result<u64>;

  fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

/// SQLite-backed retry queue.
pub struct SqliteRetryQueue {
  db: Arc<Database>,
}

impl SqliteRetryQueue {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl RetryQueue for SqliteRetryQueue {
  fn enqueue(&self, request: &Request) -> Result<QueuedAction> {
    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT INTO retry_queue (url, method, headers, body, created_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![request.url, request.method.as_str(), headers, request.body],
      )
      .map_err(|e| eyre!("Failed to enqueue {} {}: {}", request.method, request.url, e))?;

    let id = conn.last_insert_rowid();
    let created_at: String = conn
      .query_row(
        "SELECT created_at FROM retry_queue WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read back queued action: {}", e))?;

    Ok(QueuedAction {
      id,
      url: request.url.clone(),
      method: request.method,
      headers: request.headers.clone(),
      body: request.body.clone(),
      created_at: parse_datetime(&created_at)?,
      attempts: 0,
    })
  }

  fn oldest_first(&self) -> Result<Vec<QueuedAction>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT id, url, method, headers, body, created_at, attempts
         FROM retry_queue ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare queue scan: {}", e))?;

    let rows: Vec<(i64, String, String, String, Vec<u8>, String, u32)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })
      .map_err(|e| eyre!("Failed to scan retry queue: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut actions = Vec::with_capacity(rows.len());
    for (id, url, method, headers, body, created_at, attempts) in rows {
      actions.push(QueuedAction {
        id,
        url,
        method: method.parse()?,
        headers: serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize queued headers: {}", e))?,
        body,
        created_at: parse_datetime(&created_at)?,
        attempts,
      });
    }

    Ok(actions)
  }

  fn remove(&self, id: i64) -> Result<()> {
    self
      .db
      .conn()?
      .execute("DELETE FROM retry_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued action {}: {}", id, e))?;
    Ok(())
  }

  fn record_attempt(&self, id: i64) -> Result<u32> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "UPDATE retry_queue SET attempts = attempts + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to record attempt for action {}: {}", id, e))?;

    let attempts: u32 = conn
      .query_row(
        "SELECT attempts FROM retry_queue WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read attempts for action {}: {}", id, e))?;

    Ok(attempts)
  }

  fn len(&self) -> Result<u64> {
    let count: u64 = self
      .db
      .conn()?
      .query_row("SELECT COUNT(*) FROM retry_queue", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count retry queue: {}", e))?;
    Ok(count)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
