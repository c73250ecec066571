//! Record and target types shared by the probe, sampler and readers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A monitored endpoint, fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Unique identifier, also used as the storage key prefix.
    pub name: String,
    pub url: String,
    /// Deadline for a single probe.
    pub timeout: Duration,
}

impl Target {
    pub fn new(name: &str, url: &str, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            timeout,
        }
    }
}

/// Binary up/down classification of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Up,
    Down,
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Up => f.write_str("up"),
            ProbeStatus::Down => f.write_str("down"),
        }
    }
}

/// Errors raised when a stored value is not a well-formed record.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid record: {0}")]
    Invalid(&'static str),
}

/// The outcome of one probe, as stored and served.
///
/// Exactly one of `status_code` and `error` is present. Absent fields are
/// omitted from the JSON rather than written as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProbeRecord {
    pub status: ProbeStatus,
    /// Milliseconds from probe start to response or failure.
    pub response_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milliseconds since the Unix epoch at probe start.
    pub timestamp: i64,
}

impl ProbeRecord {
    /// Record for a probe that obtained an HTTP response.
    pub fn response(status_code: u16, ok: bool, response_time: u64, timestamp: i64) -> Self {
        Self {
            status: if ok { ProbeStatus::Up } else { ProbeStatus::Down },
            response_time,
            status_code: Some(status_code),
            error: None,
            timestamp,
        }
    }

    /// Record for a probe that failed before a response arrived.
    pub fn failure(error: impl Into<String>, response_time: u64, timestamp: i64) -> Self {
        Self {
            status: ProbeStatus::Down,
            response_time,
            status_code: None,
            error: Some(error.into()),
            timestamp,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == ProbeStatus::Up
    }

    /// Decode and validate a record read back from the store.
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        let record: ProbeRecord = serde_json::from_slice(bytes)?;
        record.validate()?;
        Ok(record)
    }

    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn validate(&self) -> Result<(), RecordError> {
        match (&self.status_code, &self.error) {
            (Some(_), Some(_)) => Err(RecordError::Invalid("both statusCode and error present")),
            (None, None) => Err(RecordError::Invalid("neither statusCode nor error present")),
            (None, Some(_)) if self.is_up() => {
                Err(RecordError::Invalid("failed probe recorded as up"))
            }
            _ => Ok(()),
        }
    }
}

/// Storage key layout. Every key of a target starts with a role prefix and
/// the target name, so roles and targets never share a key.
pub mod keys {
    pub fn current(target: &str) -> String {
        format!("status:{}", target)
    }

    pub fn last_seen(target: &str) -> String {
        format!("last_seen:{}", target)
    }

    pub fn history(target: &str, timestamp: i64) -> String {
        format!("{}{}", history_prefix(target), timestamp)
    }

    /// Prefix covering exactly one target's history entries. The trailing
    /// separator keeps `t1` from matching `t10`.
    pub fn history_prefix(target: &str) -> String {
        format!("history:{}:", target)
    }
}
