//! Key-value storage interface and its SQLite implementation.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

/// Number of keys returned per `list` page by default.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Storage error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Options for a single `put`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Time after which the key disappears from the store.
    pub ttl: Option<Duration>,
}

impl PutOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Pass back to `list` to fetch the next page; `None` when exhausted.
    pub cursor: Option<String>,
}

/// An eventually consistent key-value store with per-key expiry.
///
/// Listing order is not part of the contract. There are no transactions;
/// concurrent puts to the same key are last-write-wins.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &str, value: &[u8], options: PutOptions) -> Result<(), StoreError>;

    fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<ListPage, StoreError>;

    /// Physically remove expired keys, returning how many were dropped.
    fn purge_expired(&self) -> Result<usize, StoreError>;
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn expiry_ms(options: &PutOptions) -> Option<i64> {
    options
        .ttl
        .map(|ttl| now_ms().saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64))
}

/// Thread-safe SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    page_size: usize,
}

impl SqliteStore {
    /// Open (or create) a store at the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            page_size: DEFAULT_PAGE_SIZE,
        };
        store.init()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| StoreError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now_ms()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &[u8], options: PutOptions) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value, expires_at=excluded.expires_at",
            params![key, value, expiry_ms(&options)],
        )?;
        Ok(())
    }

    fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<ListPage, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key FROM kv
             WHERE substr(key, 1, ?1) = ?2 AND key > ?3
               AND (expires_at IS NULL OR expires_at > ?4)
             ORDER BY key LIMIT ?5",
        )?;

        let keys = stmt
            .query_map(
                params![
                    prefix.chars().count() as i64,
                    prefix,
                    cursor.unwrap_or(""),
                    now_ms(),
                    self.page_size as i64,
                ],
                |row| row.get::<_, String>(0),
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        let cursor = if keys.len() == self.page_size {
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage { keys, cursor })
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now_ms()],
        )?;
        Ok(removed)
    }
}
