//! upwatch - HTTP uptime monitor
//!
//! Probes a fixed set of sites on a timer, keeps a sampled status history
//! in a key-value store and serves both over a small JSON API.

mod config;
mod db;
mod probe;
mod scheduler;
mod web;

use config::{ServerConfig, StoreBackend};
use db::{KvStore, MemoryStore, SqliteStore, Target};
use probe::Prober;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("upwatch=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting upwatch on port {}...", cfg.http_port);

    let targets: Arc<[Target]> = cfg.load_targets()?.into();
    for target in targets.iter() {
        tracing::info!(
            "Monitoring {} at {} (timeout {:?})",
            target.name,
            target.url,
            target.timeout
        );
    }

    // Initialize storage
    let store: Arc<dyn KvStore> = match cfg.store {
        StoreBackend::Sqlite => {
            tracing::info!("Using database at {}", cfg.db_path);
            Arc::new(SqliteStore::new(&cfg.db_path)?)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; history is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    // Start scheduler
    let scheduler = Scheduler::new(
        store.clone(),
        targets.clone(),
        Prober::new()?,
        cfg.sampling_policy(),
        cfg.probe_interval,
    );
    scheduler.start().await;

    // Start web server
    let server = Server::new(cfg, store, targets);
    let result = server.start().await;

    scheduler.stop().await;
    result
}
