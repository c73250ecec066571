//! Retention manager for removing expired keys.

use crate::db::KvStore;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How often expired keys are purged.
pub const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Manager for physically deleting keys past their TTL.
///
/// Expired keys are already invisible to reads; this only reclaims space.
pub struct RetentionManager {
    store: Arc<dyn KvStore>,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the retention manager background task.
    ///
    /// The stop channel is installed before this returns, so a `stop` issued
    /// right after always reaches the task.
    pub async fn start(&self) -> JoinHandle<()> {
        let (tx, mut rx) = tokio::sync::broadcast::channel(1);
        *self.stop.lock().await = Some(tx);

        let store = self.store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        process_retention(store.as_ref());
                    }
                }
            }
        })
    }

    /// Stop the retention manager.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

fn process_retention(store: &dyn KvStore) -> usize {
    match store.purge_expired() {
        Ok(0) => 0,
        Ok(removed) => {
            tracing::debug!("RetentionManager: Purged {} expired keys", removed);
            removed
        }
        Err(e) => {
            tracing::error!("RetentionManager: Failed to purge expired keys: {}", e);
            0
        }
    }
}
