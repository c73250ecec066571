//! Read paths over the store: latest status and bounded history.

use std::collections::BTreeMap;

use super::models::{keys, ProbeRecord};
use super::store::{KvStore, StoreError};

/// Maximum number of history entries returned for one target.
pub const HISTORY_LIMIT: usize = 100;

/// Latest record per target name, `None` when absent or unreadable.
pub type StatusMap = BTreeMap<String, Option<ProbeRecord>>;

/// Read the current slot of every named target.
///
/// A missing or corrupt slot maps to `None` without affecting other
/// targets. Store errors are returned as-is.
pub fn get_status<'a, I>(store: &dyn KvStore, targets: I) -> Result<StatusMap, StoreError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut status = StatusMap::new();

    for name in targets {
        let record = match store.get(&keys::current(name))? {
            Some(bytes) => match ProbeRecord::decode(&bytes) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(target_name = name, "Unreadable current status: {}", e);
                    None
                }
            },
            None => None,
        };
        status.insert(name.to_string(), record);
    }

    Ok(status)
}

/// Return up to [`HISTORY_LIMIT`] history records for a target, newest first.
pub fn get_history(store: &dyn KvStore, target: &str) -> Result<Vec<ProbeRecord>, StoreError> {
    let prefix = keys::history_prefix(target);

    let mut history_keys = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store.list(&prefix, cursor.as_deref())?;
        history_keys.extend(page.keys);
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    let mut records = Vec::with_capacity(history_keys.len());
    for key in &history_keys {
        // Entries can expire between list and get.
        let Some(bytes) = store.get(key)? else {
            continue;
        };
        match ProbeRecord::decode(&bytes) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(%key, "Skipping unreadable history entry: {}", e),
        }
    }

    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    records.truncate(HISTORY_LIMIT);

    Ok(records)
}
