//! Scheduler module for running probe cycles and recording their results.

mod retention;
mod sampler;

pub use retention::*;
pub use sampler::*;

use crate::db::{KvStore, Target};
use crate::probe::Prober;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// The main scheduler that orchestrates probe cycles.
pub struct Scheduler {
    store: Arc<dyn KvStore>,
    targets: Arc<[Target]>,
    prober: Prober,
    policy: SamplingPolicy,
    interval: Duration,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
    retention_manager: RetentionManager,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn KvStore>,
        targets: Arc<[Target]>,
        prober: Prober,
        policy: SamplingPolicy,
        interval: Duration,
    ) -> Self {
        let retention_manager = RetentionManager::new(store.clone());

        Self {
            store,
            targets,
            prober,
            policy,
            interval,
            stop: Arc::new(Mutex::new(None)),
            retention_manager,
        }
    }

    /// Start probing every `interval` and purging expired history.
    pub async fn start(&self) {
        tracing::info!(
            "Starting scheduler with {} targets every {:?}",
            self.targets.len(),
            self.interval
        );

        let (stop_tx, mut stop_rx) = tokio::sync::broadcast::channel(1);
        *self.stop.lock().await = Some(stop_tx);

        let store = self.store.clone();
        let targets = self.targets.clone();
        let prober = self.prober.clone();
        let policy = self.policy;
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = interval.tick() => {
                        run_cycle(&store, &prober, &targets, policy).await;
                    }
                }
            }
        });

        self.retention_manager.start().await;
    }

    /// Stop scheduling new cycles. A cycle already in flight runs to completion.
    pub async fn stop(&self) {
        if let Some(tx) = self.stop.lock().await.as_ref() {
            let _ = tx.send(());
        }
        self.retention_manager.stop().await;
    }
}

/// Probe every target concurrently and record each result.
///
/// Returns once every check has finished. A failing target is logged and
/// never affects the others.
pub async fn run_cycle(
    store: &Arc<dyn KvStore>,
    prober: &Prober,
    targets: &[Target],
    policy: SamplingPolicy,
) {
    let mut checks = JoinSet::new();

    for target in targets {
        let store = store.clone();
        let prober = prober.clone();
        let target = target.clone();

        checks.spawn(async move {
            let record = prober.check(&target).await;
            let result = policy.record(store.as_ref(), &target.name, &record);
            (target.name, result)
        });
    }

    let mut failed = 0;
    while let Some(joined) = checks.join_next().await {
        match joined {
            Ok((_, Ok(_))) => {}
            Ok((name, Err(e))) => {
                failed += 1;
                tracing::error!("Failed to record probe for {}: {}", name, e);
            }
            Err(e) => {
                failed += 1;
                tracing::error!("Probe task aborted: {}", e);
            }
        }
    }

    tracing::debug!(
        "Probe cycle complete: {} targets, {} failed to record",
        targets.len(),
        failed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        get_history, get_status, keys, ListPage, MemoryStore, ProbeStatus, PutOptions, StoreError,
    };
    use crate::probe::testing::{closed_addr, spawn_server};

    /// Store whose writes fail for one target.
    struct FailingFor {
        inner: MemoryStore,
        target: &'static str,
    }

    impl KvStore for FailingFor {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &[u8], options: PutOptions) -> Result<(), StoreError> {
            if key == keys::current(self.target) {
                return Err(StoreError::Poisoned);
            }
            self.inner.put(key, value, options)
        }

        fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<ListPage, StoreError> {
            self.inner.list(prefix, cursor)
        }

        fn purge_expired(&self) -> Result<usize, StoreError> {
            self.inner.purge_expired()
        }
    }

    fn targets(addr: std::net::SocketAddr, dead: std::net::SocketAddr) -> Arc<[Target]> {
        vec![
            Target::new("good", &format!("http://{}/ok", addr), Duration::from_secs(2)),
            Target::new("broken", &format!("http://{}/fail", addr), Duration::from_secs(2)),
            Target::new("slow", &format!("http://{}/slow", addr), Duration::from_millis(200)),
            Target::new("dead", &format!("http://{}/", dead), Duration::from_secs(2)),
        ]
        .into()
    }

    fn single_target(addr: std::net::SocketAddr) -> Arc<[Target]> {
        let url = format!("http://{}/ok", addr);
        vec![Target::new("good", &url, Duration::from_secs(2))].into()
    }

    #[tokio::test]
    async fn test_cycle_records_every_target() {
        let addr = spawn_server().await;
        let dead = closed_addr().await;
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let targets = targets(addr, dead);

        run_cycle(&store, &Prober::new().unwrap(), &targets, SamplingPolicy::default()).await;

        let status = get_status(store.as_ref(), targets.iter().map(|t| t.name.as_str())).unwrap();
        assert_eq!(status["good"].as_ref().unwrap().status, ProbeStatus::Up);
        assert_eq!(status["broken"].as_ref().unwrap().status_code, Some(500));
        assert!(status["slow"].as_ref().unwrap().error.is_some());
        assert!(status["dead"].as_ref().unwrap().error.is_some());

        for target in targets.iter() {
            assert_eq!(get_history(store.as_ref(), &target.name).unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_isolated() {
        let addr = spawn_server().await;
        let dead = closed_addr().await;
        let store: Arc<dyn KvStore> = Arc::new(FailingFor {
            inner: MemoryStore::new(),
            target: "good",
        });
        let targets = targets(addr, dead);

        run_cycle(&store, &Prober::new().unwrap(), &targets, SamplingPolicy::default()).await;

        let status = get_status(store.as_ref(), targets.iter().map(|t| t.name.as_str())).unwrap();
        assert!(status["good"].is_none());
        assert!(get_history(store.as_ref(), "good").unwrap().is_empty());
        assert!(status["broken"].is_some());
        assert!(status["dead"].is_some());
    }

    #[tokio::test]
    async fn test_repeated_cycles_are_sampled() {
        let addr = spawn_server().await;
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let targets = single_target(addr);
        let prober = Prober::new().unwrap();

        for _ in 0..3 {
            run_cycle(&store, &prober, &targets, SamplingPolicy::default()).await;
        }

        assert_eq!(get_history(store.as_ref(), "good").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_start_runs_first_cycle() {
        let addr = spawn_server().await;
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let targets = single_target(addr);

        let scheduler = Scheduler::new(
            store.clone(),
            targets,
            Prober::new().unwrap(),
            SamplingPolicy::default(),
            Duration::from_secs(3600),
        );
        scheduler.start().await;

        let mut recorded = false;
        for _ in 0..100 {
            if store.get(&keys::current("good")).unwrap().is_some() {
                recorded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        scheduler.stop().await;
        assert!(recorded);
    }
}
