//! HTTP client for the memory service the governed write pipeline delivers
//! into.
//!
//! Retry scope is intentionally narrow: network errors and 5xx are retried
//! up to `max_client_retries` times with exponential backoff and jitter; a
//! 4xx is never retried; deciding whether to try again later is the durable
//! outbox's job, not this client's.

use std::time::Duration;

use async_trait::async_trait;
use engram_config::MemoryServiceConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryClientError {
    #[error("memory service unreachable: {0}")]
    Connection(String),
    #[error("memory service returned {status}: {body}")]
    Api { status: u16, body: String },
}

impl MemoryClientError {
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, MemoryClientError::Connection(_))
        || matches!(self, MemoryClientError::Api { status,.. } if *status >= 500)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AddMemoryRequest {
    pub content: String,
    pub user_id: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct AddMemoryWireResponse {
    success: bool,
    data: Option<AddMemoryResponseData>,
}

#[derive(Debug, Clone, Deserialize)]
struct AddMemoryResponseData {
    id: String,
}

#[derive(Debug, Clone)]
pub struct AddMemoryResponse {
    pub id: String,
}

#[async_trait]
pub trait MemoryServiceClient: Send + Sync {
    async fn add_memory(&self, request: AddMemoryRequest) -> Result<AddMemoryResponse, MemoryClientError>;
}

pub struct HttpMemoryServiceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_client_retries: u32,
}

impl HttpMemoryServiceClient {
    pub fn new(cfg: &MemoryServiceConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self {
                http,
                base_url: cfg.base_url.clone(),
                api_key: cfg.api_key.clone(),
                max_client_retries: cfg.max_client_retries,
        })
    }

    fn add_memory_url(&self) -> String {
        format!("{}/memory/add", self.base_url)
    }

    fn is_retryable(&self, attempt_err: &MemoryClientError) -> bool {
        attempt_err.is_dependency_failure()
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = 0.5_f64;
        let max = 10.0_f64;
        let delay = (base * 2f64.powi(attempt as i32)).min(max);
        let jitter_range = delay * 0.25;
        let jitter: f64 = rand::random::<f64>() * (2.0 * jitter_range) - jitter_range;
        Duration::from_secs_f64((delay + jitter).max(0.1))
    }
}

#[async_trait]
impl MemoryServiceClient for HttpMemoryServiceClient {
    async fn add_memory(&self, request: AddMemoryRequest) -> Result<AddMemoryResponse, MemoryClientError> {
        let mut last_err = None;

        for attempt in 0..=self.max_client_retries {
            let mut req = self.http.post(self.add_memory_url()).json(&request);
            if let Some(api_key) = &self.api_key {
                req = req.bearer_auth(api_key);
            }

            let result = req.send().await;

            let err = match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let wire: AddMemoryWireResponse = resp
                        .json()
                        .await
                        .map_err(|e| MemoryClientError::Connection(e.to_string()))?;
                        return match wire.data {
                            Some(data) if wire.success => Ok(AddMemoryResponse { id: data.id }),
                            _ => Err(MemoryClientError::Api { status: status.as_u16(), body: "success=false or missing data.id".to_string() }),
                        };
                    }
                    let body = resp.text().await.unwrap_or_default();
                    MemoryClientError::Api { status: status.as_u16(), body }
                }
                Err(e) => MemoryClientError::Connection(e.to_string()),
            };

            let retryable = self.is_retryable(&err);
            last_err = Some(err);

            if !retryable || attempt == self.max_client_retries {
                break;
            }

            tracing::warn!(attempt, "memory service request failed, retrying");
            tokio::time::sleep(self.backoff_delay(attempt)).await;
        }

        Err(last_err.expect("loop runs at least once"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_failure_covers_network_and_5xx_only() {
        assert!(MemoryClientError::Connection("boom".into()).is_dependency_failure());
        assert!(MemoryClientError::Api { status: 503, body: String::new() }.is_dependency_failure());
        assert!(!MemoryClientError::Api { status: 404, body: String::new() }.is_dependency_failure());
    }
}
