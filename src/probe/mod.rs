//! Probe module for endpoint monitoring.
//!
//! Runs one bounded HTTP check against a target and turns the outcome,
//! success or failure, into a [`ProbeRecord`].

mod http;

pub use http::*;

use crate::db::{now_ms, ProbeRecord, Target};

use std::time::{Duration, Instant};
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Executes probes with a shared HTTP client.
#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
}

impl Prober {
    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self {
            client: build_client()?,
        })
    }

    /// Probe a target once. Never fails: errors become `down` records.
    pub async fn check(&self, target: &Target) -> ProbeRecord {
        // Fixed before the request so every key written for this probe
        // carries the initiation time.
        let timestamp = now_ms();
        let start = Instant::now();

        let result = run_http_probe(&self.client, &target.url, target.timeout).await;
        let response_time = start.elapsed().as_millis() as u64;

        match result {
            Ok(code) => ProbeRecord::response(code.as_u16(), is_ok(code), response_time, timestamp),
            Err(e) => {
                tracing::debug!("Probe failed for {}: {}", target.name, e);
                ProbeRecord::failure(e.to_string(), response_time, timestamp)
            }
        }
    }
}
