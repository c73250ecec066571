//! HTTP probe implementation.

use reqwest::StatusCode;
use std::error::Error as _;
use std::time::Duration;

use super::ProbeError;

/// Identifying header sent with every probe.
pub const USER_AGENT: &str = concat!("upwatch/", env!("CARGO_PKG_VERSION"));

/// Build the client shared by all probes.
pub fn build_client() -> Result<reqwest::Client, ProbeError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ProbeError::Config(describe(&e)))
}

/// Issue a GET against `url`, bounded by `timeout`.
///
/// The request future is dropped when the deadline passes, which aborts
/// the in-flight request. Only the response head is awaited.
pub async fn run_http_probe(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<StatusCode, ProbeError> {
    let response = tokio::time::timeout(timeout, client.get(url).send())
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Network(describe(&e))
            }
        })?;

    Ok(response.status())
}

/// Whether a response status counts as the target being up.
pub fn is_ok(status: StatusCode) -> bool {
    status.is_success() || status.is_redirection()
}

/// Flatten an error and its sources into one readable line.
fn describe(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::closed_addr;

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let client = build_client().unwrap();
        let result =
            run_http_probe(&client, "http://256.256.256.256", Duration::from_millis(100)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_http_probe_connection_refused() {
        let addr = closed_addr().await;
        let client = build_client().unwrap();
        let url = format!("http://{}/", addr);
        let result = run_http_probe(&client, &url, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ProbeError::Network(_))));
    }

    #[test]
    fn test_is_ok() {
        assert!(is_ok(StatusCode::OK));
        assert!(is_ok(StatusCode::NO_CONTENT));
        assert!(is_ok(StatusCode::NOT_MODIFIED));
        assert!(!is_ok(StatusCode::NOT_FOUND));
        assert!(!is_ok(StatusCode::SERVICE_UNAVAILABLE));
    }
}
