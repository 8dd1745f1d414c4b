use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use tracing::{error, info, warn};

use crate::error::{BackoffError, TransportError};
use crate::gemini::loggable;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Status and body of one HTTP exchange, whatever the status.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One JSON POST. Implementations do not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<TransportResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| TransportError(e.to_string()))?;
        Ok(TransportResponse { status, body })
    }
}

/// Delay before retry number `attempt + 1`: `2^attempt * base` plus up to `max_jitter`.
pub fn backoff_delay(attempt: u32, base: Duration, jitter: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).saturating_add(jitter)
}

/// Generic JSON-over-HTTP caller with bounded, jittered exponential backoff.
#[derive(Clone)]
pub struct BackoffClient {
    transport: Arc<dyn Transport>,
    base_delay: Duration,
    max_jitter: Duration,
}

impl BackoffClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport, base_delay: Duration::from_millis(1000), max_jitter: Duration::from_millis(1000) }
    }

    pub fn with_delays(mut self, base_delay: Duration, max_jitter: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_jitter = max_jitter;
        self
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..jitter_ms) };
        backoff_delay(attempt, self.base_delay, Duration::from_millis(jitter))
    }

    /// POSTs `body` to `endpoint` up to `max_attempts` times and returns the
    /// first successful response parsed as JSON.
    pub async fn execute(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
        max_attempts: u32,
    ) -> Result<serde_json::Value, BackoffError> {
        let max_attempts = max_attempts.max(1);
        let target = redact_key(endpoint);
        info!("📤 POST {} body: {}", target, loggable(body));

        let mut last_error = String::new();
        for attempt in 0..max_attempts {
            match self.transport.post_json(endpoint, body).await {
                Ok(resp) if resp.is_success() => match serde_json::from_str::<serde_json::Value>(&resp.body) {
                    Ok(parsed) => {
                        info!("📥 {} succeeded on attempt {}/{}", target, attempt + 1, max_attempts);
                        return Ok(parsed);
                    }
                    Err(e) => last_error = format!("unparseable response body: {e}"),
                },
                Ok(resp) => last_error = format!("status={} body={}", resp.status, resp.body),
                Err(e) => last_error = e.to_string(),
            }

            if attempt + 1 == max_attempts {
                break;
            }
            let delay = self.next_delay(attempt);
            warn!(
                "🔄 Attempt {}/{} to {} failed ({}), retrying in {:?}",
                attempt + 1,
                max_attempts,
                target,
                last_error,
                delay
            );
            tokio::time::sleep(delay).await;
        }

        error!("❌ {} failed after {} attempt(s): {}", target, max_attempts, last_error);
        Err(BackoffError::RequestFailed { attempts: max_attempts, last_error })
    }
}

/// Replaces the value of a `key=` query parameter with `***`.
pub fn redact_key(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };
    let query = query
        .split('&')
        .map(|pair| if pair.starts_with("key=") { "key=***" } else { pair })
        .collect::<Vec<_>>()
        .join("&");
    format!("{base}?{query}")
}
