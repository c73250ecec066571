//! In-memory store with the same expiry and paging behaviour as SQLite.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use super::store::{expiry_ms, now_ms, KvStore, ListPage, PutOptions, StoreError, DEFAULT_PAGE_SIZE};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<i64>,
}

impl Entry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Process-local store. Data is lost on restart.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Entry>>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    #[cfg(test)]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Entry>>, StoreError> {
        self.entries.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.lock()?;
        let now = now_ms();
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    fn put(&self, key: &str, value: &[u8], options: PutOptions) -> Result<(), StoreError> {
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: expiry_ms(&options),
            },
        );
        Ok(())
    }

    fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<ListPage, StoreError> {
        let entries = self.lock()?;
        let now = now_ms();

        let lower = match cursor {
            Some(c) => Bound::Excluded(c.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let keys: Vec<String> = entries
            .range((lower, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .take(self.page_size)
            .collect();

        let cursor = if keys.len() == self.page_size {
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage { keys, cursor })
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        let mut entries = self.lock()?;
        let now = now_ms();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok(before - entries.len())
    }
}
