//! Rate-limited request client for the analytics API.
//!
//! Retries 429 and 502/503/504 (plus transport failures) with bounded
//! attempts. A 429 waits for the server hint (`Retry-After`, then the
//! vendor reset headers, then a fixed default). Other transient errors
//! use `min(max_backoff, 2^attempt)` seconds. Any other non-success status
//! is returned immediately.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::ExponentialBackoff;

use crate::auth::{AuthError, TokenProvider};
use crate::config::RetryConfig;
use crate::models::RateLimitSnapshot;
use crate::ratelimit::rate_limit_wait;

/// Error bodies are cut to this many characters.
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication rejected ({status}): {body}")]
    Unauthorized { status: u16, body: String },

    #[error("API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("All {attempts} attempts failed (last status {status:?}): {body}")]
    RetryExhausted {
        attempts: usize,
        status: Option<u16>,
        body: String,
    },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Last HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { status, .. } | ApiError::Status { status, .. } => Some(*status),
            ApiError::RetryExhausted { status, .. } => *status,
            ApiError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Credential problems abort the whole run regardless of chunk policy.
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. } | ApiError::Auth(_))
    }
}

/// Timed wait used for backoff and job polling.
#[async_trait]
pub trait Pause: Send + Sync {
    async fn pause(&self, duration: Duration);
}

/// Production pause backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPause;

#[async_trait]
impl Pause for TokioPause {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub default_rate_limit_wait: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            default_rate_limit_wait: Duration::from_secs(config.default_rate_limit_wait_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }

    /// `min(max_backoff, 2^attempt)` seconds for a 1-based attempt.
    pub fn transient_backoff(&self, attempt: usize) -> Duration {
        ExponentialBackoff::from_millis(2)
            .factor(1000)
            .max_delay(self.max_backoff)
            .nth(attempt.saturating_sub(1))
            .unwrap_or(self.max_backoff)
    }
}

pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

pub fn truncate_for_error(body: &str, limit: usize) -> String {
    if body.chars().count() <= limit {
        return body.to_string();
    }
    let mut cut: String = body.chars().take(limit).collect();
    cut.push_str("...");
    cut
}

/// HTTP client carrying the explicit request context: base URL, token
/// source and retry policy.
#[derive(Clone)]
pub struct RequestClient {
    http: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    policy: RetryPolicy,
    pause: Arc<dyn Pause>,
}

impl RequestClient {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            policy,
            pause: Arc::new(TokioPause),
        })
    }

    /// Swap the wait implementation (tests record waits instead of sleeping).
    pub fn with_pause(mut self, pause: Arc<dyn Pause>) -> Self {
        self.pause = pause;
        self
    }

    pub fn pause_handle(&self) -> Arc<dyn Pause> {
        Arc::clone(&self.pause)
    }

    /// Absolute URL for an API path such as `/api/v2/analytics/...`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ApiError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_status: Option<u16> = None;
        let mut last_body = String::new();

        for attempt in 1..=max_attempts {
            let token = self.tokens.bearer_token().await?;
            let mut request = self
                .http
                .request(method.clone(), url)
                .bearer_auth(&token.value)
                .header(ACCEPT, "application/json");
            if let Some(body) = body {
                request = request.json(body);
            }

            let wait = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let snapshot = RateLimitSnapshot::from_headers(response.headers());
                    tracing::info!(
                        method = %method,
                        url = %url,
                        attempt,
                        status = status.as_u16(),
                        remaining = ?snapshot.remaining,
                        limit = ?snapshot.limit,
                        "analytics request"
                    );

                    if status.is_success() {
                        return Ok(response);
                    }

                    let code = status.as_u16();
                    let wait = if code == 429 {
                        rate_limit_wait(
                            response.headers(),
                            Utc::now(),
                            self.policy.default_rate_limit_wait,
                        )
                    } else {
                        self.policy.transient_backoff(attempt)
                    };
                    let text = response.text().await.unwrap_or_default();
                    let body = truncate_for_error(&text, ERROR_BODY_LIMIT);

                    if code == 401 || code == 403 {
                        return Err(ApiError::Unauthorized { status: code, body });
                    }
                    if !is_transient_status(code) {
                        return Err(ApiError::Status { status: code, body });
                    }

                    last_status = Some(code);
                    last_body = body;
                    wait
                }
                Err(error) => {
                    if !is_retryable_transport_error(&error) {
                        return Err(ApiError::Http(error));
                    }
                    tracing::warn!(method = %method, url = %url, attempt, error = %error, "transport failure");
                    last_status = None;
                    last_body = truncate_for_error(&error.to_string(), ERROR_BODY_LIMIT);
                    self.policy.transient_backoff(attempt)
                }
            };

            if attempt < max_attempts {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    status = ?last_status,
                    wait_secs = wait.as_secs_f64(),
                    "retrying after backoff"
                );
                self.pause.pause(wait).await;
            }
        }

        tracing::error!(attempts = max_attempts, status = ?last_status, "request retries exhausted");
        Err(ApiError::RetryExhausted {
            attempts: max_attempts,
            status: last_status,
            body: last_body,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self.execute(Method::GET, url, None).await?;
        decode(response).await
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, ApiError> {
        let response = self.execute(Method::POST, url, Some(body)).await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        ApiError::Decode(format!("{e}: {}", truncate_for_error(&text, ERROR_BODY_LIMIT)))
    })
}

// ============================================================================
// TESTS
// ============================================================================
