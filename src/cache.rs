//! Versioned cache store: response snapshots keyed by request identity.
//!
//! Namespaces are versioned buckets (`app-cache-v1.0.0`); writing a key
//! overwrites in place, so at most one entry exists per identity per
//! namespace. Purging a superseded namespace drops all of its entries.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tracing::warn;

use crate::http::{Headers, Request, Response};
use crate::store::Database;

/// Whether a store write failure may be swallowed.
///
/// Precache writes are `Critical` (a broken deployment must never
/// activate); opportunistic writes on the request path are `BestEffort`
/// (a failed cache write never blocks the response).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
  Critical,
  BestEffort,
}

/// An immutable stored response snapshot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub url: String,
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn into_response(self) -> Response {
    Response::new(self.status, self.headers, self.body)
  }
}

/// Trait for versioned cache storage backends.
pub trait CacheStore: Send + Sync {
  /// Register a namespace. Idempotent; creates it if absent.
  fn open_namespace(&self, namespace: &str) -> Result<()>;

  /// Upsert a response snapshot for the request's identity.
  fn put(
    &self,
    namespace: &str,
    request: &Request,
    response: &Response,
    criticality: Criticality,
  ) -> Result<()>;

  /// Exact identity lookup; no partial matching.
  fn get(&self, namespace: &str, request: &Request) -> Result<Option<CacheEntry>>;

  /// Delete every namespace (and its entries) other than the current one.
  /// Returns the number of namespaces removed.
  fn purge_except(&self, current: &str) -> Result<usize>;

  /// All known namespaces.
  fn namespaces(&self) -> Result<Vec<String>>;

  /// Number of entries in a namespace.
  fn entry_count(&self, namespace: &str) -> Result<u64>;
}

/// SQLite-backed cache store.
pub struct SqliteCacheStore {
  db: Arc<Database>,
}

impl SqliteCacheStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  fn write_entry(&self, namespace: &str, request: &Request, response: &Response) -> Result<()> {
    let identity = request.cache_identity()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_namespaces (namespace) VALUES (?)",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to register namespace {}: {}", namespace, e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (namespace, identity, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![namespace, identity, request.url, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store cache entry for {}: {}", request.url, e))?;

    Ok(())
  }
}

impl CacheStore for SqliteCacheStore {
  fn open_namespace(&self, namespace: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_namespaces (namespace) VALUES (?)",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to open namespace {}: {}", namespace, e))?;
    Ok(())
  }

  fn put(
    &self,
    namespace: &str,
    request: &Request,
    response: &Response,
    criticality: Criticality,
  ) -> Result<()> {
    match self.write_entry(namespace, request, response) {
      Ok(()) => Ok(()),
      Err(e) => match criticality {
        Criticality::Critical => Err(e),
        Criticality::BestEffort => {
          warn!(url = %request.url, "Cache write failed, continuing: {}", e);
          Ok(())
        }
      },
    }
  }

  fn get(&self, namespace: &str, request: &Request) -> Result<Option<CacheEntry>> {
    let identity = request.cache_identity()?;
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT url, status, headers, body, cached_at FROM cache_entries
         WHERE namespace = ? AND identity = ?",
      )
      .map_err(|e| eyre!("Failed to prepare cache lookup: {}", e))?;

    // optional() keeps no-rows as a miss while a real read failure
    // propagates to the caller's log-and-degrade policy
    let row: Option<(String, u16, String, Vec<u8>, String)> = stmt
      .query_row(params![namespace, identity], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry for {}: {}", request.url, e))?;

    match row {
      Some((url, status, headers, body, cached_at)) => {
        let headers: Headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
        Ok(Some(CacheEntry {
          url,
          status,
          headers,
          body,
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn purge_except(&self, current: &str) -> Result<usize> {
    let conn = self.db.conn()?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE namespace != ?",
        params![current],
      )
      .map_err(|e| eyre!("Failed to purge stale cache entries: {}", e))?;

    let purged = conn
      .execute(
        "DELETE FROM cache_namespaces WHERE namespace != ?",
        params![current],
      )
      .map_err(|e| eyre!("Failed to purge stale namespaces: {}", e))?;

    Ok(purged)
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare("SELECT namespace FROM cache_namespaces ORDER BY namespace")
      .map_err(|e| eyre!("Failed to prepare namespace query: {}", e))?;

    let namespaces = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(namespaces)
  }

  fn entry_count(&self, namespace: &str) -> Result<u64> {
    let conn = self.db.conn()?;

    let count: u64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE namespace = ?",
        params![namespace],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;

    Ok(count)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
