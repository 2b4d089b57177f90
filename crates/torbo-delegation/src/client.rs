//! HTTP client for peer nodes, with retry.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use torbo_crypto::{CryptoError, CryptoResult, PeerKeyResolver, decode_public_key};
use torbo_protocol::{
    DelegatedTask, DelegatedTaskResult, GatewayError, GatewayResult, NodeCapabilities,
    ResultResponse, SubmitResponse,
};
use tracing::{debug, warn};

/// Timeout for capability fetches; peer POSTs use the configured timeout.
const CAPABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thin wrapper over one shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    request_timeout: Duration,
}

impl PeerClient {
    pub fn new(peer_request_timeout_seconds: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            request_timeout: Duration::from_secs(peer_request_timeout_seconds),
        }
    }

    /// Submit a task to a peer. Non-2xx responses become
    /// [`GatewayError::PeerRejected`] carrying the body.
    pub async fn submit(
        &self,
        host: &str,
        port: u16,
        task: &DelegatedTask,
    ) -> GatewayResult<SubmitResponse> {
        let url = format!("http://{host}:{port}/delegation/submit");
        let response = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(task)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::PeerRejected(body));
        }
        response
            .json::<SubmitResponse>()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    /// Deliver a result back to the origin node.
    pub async fn deliver_result(
        &self,
        host: &str,
        port: u16,
        result: &DelegatedTaskResult,
    ) -> GatewayResult<ResultResponse> {
        let url = format!("http://{host}:{port}/delegation/result");
        let response = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(result)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::PeerRejected(body));
        }
        response
            .json::<ResultResponse>()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    /// Fetch a peer's capability document.
    pub async fn capabilities(&self, host: &str, port: u16) -> GatewayResult<NodeCapabilities> {
        let url = format!("http://{host}:{port}/delegation/capabilities");
        let response = self
            .http
            .post(&url)
            .timeout(CAPABILITY_TIMEOUT)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::Transport(format!(
                "capabilities fetch from {url} returned {}",
                response.status()
            )));
        }
        response
            .json::<NodeCapabilities>()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct IdentityDocument {
    public_key: String,
}

/// Key discovery against a peer's `/community/identity` endpoint.
#[derive(Debug, Clone)]
pub struct HttpPeerKeyResolver {
    http: reqwest::Client,
}

impl HttpPeerKeyResolver {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpPeerKeyResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerKeyResolver for HttpPeerKeyResolver {
    async fn public_key(&self, host: &str, port: u16) -> CryptoResult<Option<[u8; 32]>> {
        let url = format!("http://{host}:{port}/community/identity");
        let response = self
            .http
            .get(&url)
            .timeout(CAPABILITY_TIMEOUT)
            .send()
            .await
            .map_err(|e| CryptoError::Io(e.to_string()))?;
        if !response.status().is_success() {
            debug!(url, status = %response.status(), "peer identity unavailable");
            return Ok(None);
        }
        let doc = response
            .json::<IdentityDocument>()
            .await
            .map_err(|e| CryptoError::Io(e.to_string()))?;
        Ok(Some(decode_public_key(&doc.public_key)?))
    }
}

/// Run `op` up to `attempts` times with exponential backoff, retrying
/// transport errors and peer rejections (non-2xx). Anything else fails
/// immediately.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let mut delay = base_delay;
    let mut last_error = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error @ (GatewayError::Transport(_) | GatewayError::PeerRejected(_))) => {
                warn!(%error, attempt, "peer request failed");
                last_error = Some(error);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
            Err(error) => return Err(error),
        }
    }
    Err(last_error.unwrap_or_else(|| GatewayError::Transport("retries exhausted".to_owned())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_returns_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_with_backoff(3, Duration::from_millis(1), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 1 {
                    Err(GatewayError::Transport("down".to_owned()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_gives_up_after_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: GatewayResult<()> = retry_with_backoff(3, Duration::from_millis(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::PeerRejected("busy".to_owned()))
            }
        })
        .await;
        assert!(matches!(result, Err(GatewayError::PeerRejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_does_not_repeat_non_retriable_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: GatewayResult<()> = retry_with_backoff(3, Duration::from_millis(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::InvalidSignature("bad".to_owned()))
            }
        })
        .await;
        assert!(matches!(result, Err(GatewayError::InvalidSignature(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
