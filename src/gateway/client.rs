//! OrchestratorClient - Gateway side of the process boundary
//!
//! ## Responsibilities
//!
//! - Forward capture/settings/results requests to the Orchestrator host
//! - Turn transport faults into `Error::Transport`
//! - Turn structured failures into `Error::Upstream` with the original status
//!
//! Capture and settings writes are single-attempt. Reads may be retried
//! (`read_attempts`) on transport faults only.

use crate::error::{Error, Result};
use crate::models::{CaptureReport, FailureBody, SettingsResponse};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Upper bound on read attempts, whatever the configuration asks for
pub const MAX_READ_ATTEMPTS: u32 = 10;
const BACKOFF_BASE_MS: u64 = 100;
const BACKOFF_MAX_MS: u64 = 30_000;

/// Orchestrator host client
pub struct OrchestratorClient {
    client: reqwest::Client,
    base_url: String,
    read_attempts: u32,
}

impl OrchestratorClient {
    /// Create new client with a request timeout
    pub fn new(base_url: &str, timeout: Duration, read_attempts: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            read_attempts: read_attempts.clamp(1, MAX_READ_ATTEMPTS),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Trigger one capture cycle
    pub async fn capture(&self) -> Result<CaptureReport> {
        let url = format!("{}/capture", self.base_url);
        tracing::info!(url = %url, "Forwarding request to backend");

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| transport(&url, e))?;
        decode(resp).await
    }

    pub async fn get_settings(&self) -> Result<SettingsResponse> {
        self.get_json("/settings").await
    }

    /// Forward a settings update body as-is; validation happens upstream
    pub async fn update_settings(&self, body: &serde_json::Value) -> Result<SettingsResponse> {
        let url = format!("{}/settings", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport(&url, e))?;
        decode(resp).await
    }

    pub async fn results(&self, limit: Option<u32>) -> Result<serde_json::Value> {
        match limit {
            Some(limit) => self.get_json(&format!("/results?limit={}", limit)).await,
            None => self.get_json("/results").await,
        }
    }

    pub async fn result(&self, id: i64) -> Result<serde_json::Value> {
        self.get_json(&format!("/results/{}", id)).await
    }

    /// Orchestrator host health document
    pub async fn health(&self) -> Result<serde_json::Value> {
        self.get_json("/healthz").await
    }

    /// GET with retry on transport faults
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = None;

        for attempt in 0..self.read_attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            match self.client.get(&url).send().await {
                Ok(resp) => return decode(resp).await,
                Err(e) => {
                    tracing::warn!(url = %url, attempt = attempt + 1, error = %e, "Backend read failed");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => transport(&url, e),
            None => Error::Transport(format!("{}: no attempt made", url)),
        })
    }
}

/// Exponential backoff before retry `attempt`, capped
fn backoff_delay(attempt: u32) -> Duration {
    let ms = BACKOFF_BASE_MS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(BACKOFF_MAX_MS);
    Duration::from_millis(ms)
}

fn transport(url: &str, e: reqwest::Error) -> Error {
    Error::Transport(format!("{}: {}", url, e))
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| Error::Transport(format!("reading response: {}", e)))?;

    if status.is_success() {
        return serde_json::from_slice(&bytes)
            .map_err(|e| Error::Transport(format!("invalid backend response: {}", e)));
    }

    let message = match serde_json::from_slice::<FailureBody>(&bytes) {
        Ok(body) => body.error,
        Err(_) => format!("Backend returned {}", status),
    };
    Err(Error::Upstream {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client =
            OrchestratorClient::new("http://127.0.0.1:5001/", Duration::from_secs(1), 0).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:5001");
        assert_eq!(client.read_attempts, 1);

        let client =
            OrchestratorClient::new("http://127.0.0.1:5001", Duration::from_secs(1), u32::MAX)
                .unwrap();
        assert_eq!(client.read_attempts, MAX_READ_ATTEMPTS);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        assert_eq!(backoff_delay(1), Duration::from_millis(200));
        assert_eq!(backoff_delay(2), Duration::from_millis(400));
        assert_eq!(backoff_delay(9), Duration::from_millis(30_000));
        assert_eq!(backoff_delay(64), Duration::from_millis(30_000));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn test_closed_port_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            OrchestratorClient::new(&format!("http://{}", addr), Duration::from_secs(2), 2)
                .unwrap();
        assert!(matches!(client.capture().await, Err(Error::Transport(_))));
        assert!(matches!(client.get_settings().await, Err(Error::Transport(_))));
    }
}
