//! Configuration module for upwatch.
//!
//! Server settings come from environment variables with sensible defaults.
//! The monitored site list is read once at startup and never changes.

use crate::db::Target;
use crate::scheduler::{SamplingPolicy, HISTORY_RETENTION, SAMPLE_INTERVAL};

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Probe deadline used when a site does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read sites file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid sites JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid site {name:?}: {reason}")]
    InvalidSite { name: String, reason: String },
    #[error("duplicate site name {0:?}")]
    DuplicateSite(String),
    #[error("no sites configured")]
    Empty,
}

/// Which key-value backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Storage backend (default: SQLite)
    pub store: StoreBackend,
    /// Path to the SQLite database file (default: "upwatch.db")
    pub db_path: String,
    /// Time between probe cycles (default: 60s)
    pub probe_interval: Duration,
    /// Maximum gap between history entries of a stable site (default: 2h)
    pub sample_interval: Duration,
    /// Lifetime of a history entry (default: 7 days)
    pub history_retention: Duration,
    /// Optional JSON file listing the sites to monitor
    pub sites_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            store: StoreBackend::Sqlite,
            db_path: "upwatch.db".to_string(),
            probe_interval: Duration::from_secs(60),
            sample_interval: SAMPLE_INTERVAL,
            history_retention: HISTORY_RETENTION,
            sites_file: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `UPWATCH_STORE`: `sqlite` or `memory` (default: sqlite)
    /// - `UPWATCH_DB_PATH`: Database file path (default: "upwatch.db")
    /// - `UPWATCH_PROBE_INTERVAL_SECS`: Seconds between probe cycles (default: 60)
    /// - `UPWATCH_SAMPLE_INTERVAL_SECS`: History refresh interval (default: 7200)
    /// - `UPWATCH_HISTORY_RETENTION_SECS`: History TTL (default: 604800)
    /// - `UPWATCH_SITES_FILE`: JSON site list (default: built-in sample sites)
    pub fn load() -> Self {
        Self::load_from(|key| env::var(key).ok())
    }

    fn load_from<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = lookup("UPWATCH_HTTP_PORT").and_then(|s| s.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(store) = lookup("UPWATCH_STORE") {
            match store.to_ascii_lowercase().as_str() {
                "memory" => cfg.store = StoreBackend::Memory,
                "sqlite" => cfg.store = StoreBackend::Sqlite,
                other => tracing::warn!("Unknown store backend {:?}, using sqlite", other),
            }
        }

        if let Some(db_path) = lookup("UPWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(secs) = parse_secs(lookup("UPWATCH_PROBE_INTERVAL_SECS")) {
            cfg.probe_interval = secs;
        }
        if let Some(secs) = parse_secs(lookup("UPWATCH_SAMPLE_INTERVAL_SECS")) {
            cfg.sample_interval = secs;
        }
        if let Some(secs) = parse_secs(lookup("UPWATCH_HISTORY_RETENTION_SECS")) {
            cfg.history_retention = secs;
        }

        cfg.sites_file = lookup("UPWATCH_SITES_FILE").filter(|s| !s.is_empty());

        cfg
    }

    pub fn sampling_policy(&self) -> SamplingPolicy {
        SamplingPolicy {
            sample_interval: self.sample_interval,
            history_retention: self.history_retention,
        }
    }

    /// Resolve the monitored sites: the sites file if set, else the defaults.
    pub fn load_targets(&self) -> Result<Vec<Target>, ConfigError> {
        match &self.sites_file {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                parse_targets(&json)
            }
            None => Ok(default_targets()),
        }
    }
}

/// Largest number of seconds whose millisecond count still fits in an `i64`.
const MAX_SECS: u64 = i64::MAX as u64 / 1000;

fn parse_secs(value: Option<String>) -> Option<Duration> {
    value
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(|secs| Duration::from_secs(secs.min(MAX_SECS)))
}

/// One entry of the sites file.
#[derive(Debug, Deserialize)]
struct SiteConfig {
    name: String,
    url: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// Sites monitored when no sites file is given.
pub fn default_targets() -> Vec<Target> {
    vec![
        Target::new("example", "https://example.com", DEFAULT_TIMEOUT),
        Target::new("google", "https://www.google.com", DEFAULT_TIMEOUT),
    ]
}

/// Parse and validate a JSON site list.
pub fn parse_targets(json: &str) -> Result<Vec<Target>, ConfigError> {
    let sites: Vec<SiteConfig> = serde_json::from_str(json)?;
    if sites.is_empty() {
        return Err(ConfigError::Empty);
    }

    let mut seen = HashSet::new();
    let mut targets = Vec::with_capacity(sites.len());

    for site in sites {
        validate_site(&site)?;
        if !seen.insert(site.name.clone()) {
            return Err(ConfigError::DuplicateSite(site.name));
        }

        let timeout = site
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);
        targets.push(Target {
            name: site.name,
            url: site.url,
            timeout,
        });
    }

    Ok(targets)
}

fn validate_site(site: &SiteConfig) -> Result<(), ConfigError> {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    let name_re = NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap());

    let invalid = |reason: &str| ConfigError::InvalidSite {
        name: site.name.clone(),
        reason: reason.to_string(),
    };

    // Names become key segments, so no separators allowed.
    if !name_re.is_match(&site.name) {
        return Err(invalid("name must be non-empty and use only letters, digits, '_', '-' or '.'"));
    }
    if !(site.url.starts_with("http://") || site.url.starts_with("https://")) {
        return Err(invalid("url must start with http:// or https://"));
    }
    if site.timeout_ms == Some(0) {
        return Err(invalid("timeout_ms must be greater than zero"));
    }

    Ok(())
}
