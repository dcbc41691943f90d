//! Outbound API transport.
//!
//! Every entity maps to one endpoint. Requests are
//! `POST <base_url><endpoint>?client_id=<id>[&force_clear=true][&append=true]`
//! with a JSON array body. 200 and 201 are success; anything else, or a
//! transport error, is failure.

mod retry;

pub use retry::{parse_retry_after, RetryPolicy, BACKOFF_MAX};

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use crate::batch::Batch;
use crate::config::ApiConfig;
use crate::entity::EntitySpec;
use crate::error::{Result, SyncError};

/// Outcome of a successful request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub status: u16,
    /// `message` field of the JSON response body, when present.
    pub message: Option<String>,
}

/// Remote side of the sync.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Ask the API to discard its data for `entity` (empty payload,
    /// `force_clear=true`).
    async fn clear_remote(&self, entity: &EntitySpec) -> Result<Delivery>;

    /// Send one batch. Non-first batches carry `append=true` so the API
    /// does not clear again.
    async fn send_batch(
        &self,
        entity: &EntitySpec,
        batch: &Batch<'_>,
        is_first: bool,
        timeout: Duration,
    ) -> Result<Delivery>;
}

/// reqwest-backed transport with connection reuse and status retries.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    default_timeout: Duration,
    retry: RetryPolicy,
}

impl HttpTransport {
    /// Create a transport from the API configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is malformed or the HTTP client
    /// cannot be built (e.g., TLS initialisation failed).
    pub fn new(api: &ApiConfig) -> Result<Self> {
        Url::parse(&api.base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .user_agent(api.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            client_id: api.client_id.clone(),
            default_timeout: api.timeout(),
            retry: RetryPolicy::from_config(api),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Build the request URL for an entity with the given extra flags.
    pub fn request_url(&self, entity: &EntitySpec, flags: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, entity.endpoint))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("client_id", &self.client_id);
            for (key, value) in flags {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Check that the API host answers at all. Any HTTP status counts.
    pub async fn probe(&self) -> Result<u16> {
        let response = self
            .client
            .get(&self.base_url)
            .timeout(self.default_timeout)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }

    /// POST `body` to `url`, retrying on retryable statuses.
    async fn post(
        &self,
        entity: &EntitySpec,
        url: Url,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<Delivery> {
        let mut retries = 0u32;

        loop {
            debug!(
                "{}: POST {} ({} bytes, timeout {}s, attempt {})",
                entity.name(),
                url,
                body.len(),
                timeout.as_secs(),
                retries + 1
            );

            let response = self
                .client
                .post(url.clone())
                .body(body.clone())
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| classify(entity, timeout, e))?;

            let status = response.status();
            if status == StatusCode::OK || status == StatusCode::CREATED {
                let text = response.text().await.unwrap_or_default();
                return Ok(Delivery {
                    status: status.as_u16(),
                    message: response_field(&text, "message"),
                });
            }

            if self.retry.should_retry(status.as_u16(), retries) {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| parse_retry_after(v, Utc::now()));
                drop(response);
                retries += 1;
                let delay = self.retry.delay_with_hint(retries, retry_after);
                debug!(
                    "{}: status {}, retry {}/{} in {:?}",
                    entity.name(),
                    status.as_u16(),
                    retries,
                    self.retry.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            warn!(
                "{}: API returned status {}: {}",
                entity.name(),
                status.as_u16(),
                body
            );
            let message = response_field(&body, "error").unwrap_or_else(|| body.clone());
            return Err(SyncError::Rejected {
                entity: entity.name().to_string(),
                status: status.as_u16(),
                message,
                body,
            });
        }
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn clear_remote(&self, entity: &EntitySpec) -> Result<Delivery> {
        let url = self.request_url(entity, &[("force_clear", "true")])?;
        self.post(entity, url, b"[]".to_vec(), self.default_timeout)
            .await
    }

    async fn send_batch(
        &self,
        entity: &EntitySpec,
        batch: &Batch<'_>,
        is_first: bool,
        timeout: Duration,
    ) -> Result<Delivery> {
        let url = if is_first {
            self.request_url(entity, &[])?
        } else {
            self.request_url(entity, &[("append", "true")])?
        };
        let body = serde_json::to_vec(batch.records)?;
        self.post(entity, url, body, timeout).await
    }
}

/// Map a reqwest error to the sync error taxonomy.
fn classify(entity: &EntitySpec, timeout: Duration, err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout {
            entity: entity.name().to_string(),
            secs: timeout.as_secs(),
        }
    } else if err.is_connect() {
        SyncError::transport(entity.name(), format!("connection failed: {}", err))
    } else {
        SyncError::transport(entity.name(), err.to_string())
    }
}

/// Extract a string field from a JSON object body, if the body is one.
fn response_field(body: &str, field: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get(field)?
        .as_str()
        .map(str::to_string)
}
