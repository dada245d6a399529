use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use eddn_core::SendError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where finished payloads are POSTed. Abstracted so delivery logic can be
/// exercised against a scripted endpoint in tests.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// POST one wire body to its versioned schema endpoint.
    async fn post(&self, schema_ref: &str, body: &Value) -> Result<(), SendError>;
}

/// Real HTTP(S) endpoint. The schema reference doubles as the POST URL.
pub struct HttpEndpoint {
    client: Client,
}

impl HttpEndpoint {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
        }
    }
}

impl Default for HttpEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Endpoint for HttpEndpoint {
    async fn post(&self, schema_ref: &str, body: &Value) -> Result<(), SendError> {
        let resp = self
            .client
            .post(schema_ref)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SendError::Timeout(REQUEST_TIMEOUT)
                } else {
                    SendError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body_text = resp.text().await.unwrap_or_default();

        Err(SendError::from_status(status.as_u16(), body_text, retry_after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_constants() {
        assert_eq!(CONNECT_TIMEOUT, Duration::from_secs(10));
        assert_eq!(REQUEST_TIMEOUT, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let endpoint = HttpEndpoint::new();
        let err = endpoint
            .post(
                "http://127.0.0.1:1/schemas/journal/1",
                &serde_json::json!({}),
            )
            .await
            .unwrap_err();
        assert!(err.is_transient(), "got: {err:?}");
    }
}
