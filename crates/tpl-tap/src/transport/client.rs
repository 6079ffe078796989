//! HTTP client for the 3PL Central API
//!
//! Authenticates with the client-credentials grant, caches the access token,
//! and GETs JSON resources relative to the configured base URL.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tpl_common::{Result, TapError, TransportError};
use tracing::{debug, info, warn};

use super::{QueryParams, RateLimiter, Transport};
use crate::config::TapConfig;

// ============================================================================
// Client Constants
// ============================================================================

/// Attempts per request, including the first
pub const DEFAULT_MAX_TRIES: u32 = 5;

/// Delay before the first retry; doubles with every further attempt.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

const HAL_JSON: &str = "application/hal+json";

/// Retry and timeout knobs
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub max_tries: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            backoff: DEFAULT_BACKOFF,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ClientSettings {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// 3PL Central API client
pub struct TplClient {
    http: Client,
    base_url: String,
    auth_path: String,
    client_id: String,
    client_secret: String,
    tpl_key: String,
    user_login_id: String,
    user_agent: String,
    settings: ClientSettings,
    limiter: RateLimiter,
    token: Mutex<Option<String>>,
}

impl TplClient {
    pub fn new(config: &TapConfig) -> Result<Self> {
        Self::with_settings(config, ClientSettings::default(), RateLimiter::default())
    }

    pub fn with_settings(
        config: &TapConfig,
        settings: ClientSettings,
        limiter: RateLimiter,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| TapError::from(TransportError::Network(e.to_string())))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_path: config.auth_path.trim_start_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            tpl_key: config.tpl_key.clone(),
            user_login_id: config.user_login_id.clone(),
            user_agent: config.user_agent.clone(),
            settings,
            limiter,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Cached `"<token_type> <access_token>"`, requested on first use
    async fn authorization(&self) -> std::result::Result<String, TransportError> {
        let mut token = self.token.lock().await;
        if let Some(value) = token.as_ref() {
            return Ok(value.clone());
        }
        let value = self.request_token().await?;
        *token = Some(value.clone());
        Ok(value)
    }

    async fn clear_token(&self) {
        *self.token.lock().await = None;
    }

    async fn request_token(&self) -> std::result::Result<String, TransportError> {
        let url = self.url(&self.auth_path);
        let basic = BASE64.encode(format!("{}:{}", self.client_id, self.client_secret));
        let body = json!({
            "grant_type": "client_credentials",
            "tpl": format!("{{{}}}", self.tpl_key),
            "user_login_id": self.user_login_id,
        });

        info!(url = %url, "Requesting access token");
        let payload = self
            .execute(|| {
                self.http
                    .post(&url)
                    .header(AUTHORIZATION, format!("Basic {}", basic))
                    .header(CONTENT_TYPE, "application/json")
                    .header(USER_AGENT, &self.user_agent)
                    .json(&body)
            })
            .await
            .map_err(|e| match e {
                TransportError::ApiFault { status, message } if status < 500 => {
                    TransportError::Unauthorized(format!("token request rejected ({}): {}", status, message))
                },
                other => other,
            })?;

        let token: TokenResponse = serde_json::from_value(payload).map_err(|e| {
            TransportError::Unauthorized(format!("unexpected token response: {}", e))
        })?;
        Ok(format!("{} {}", token.token_type, token.access_token))
    }

    fn get(&self, url: &str, query: &QueryParams, authorization: &str) -> RequestBuilder {
        self.http
            .get(url)
            .query(query)
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, HAL_JSON)
            .header(USER_AGENT, &self.user_agent)
    }

    /// Send with rate limiting, retrying connection failures and 5xx faults
    async fn execute<F>(&self, build: F) -> std::result::Result<Value, TransportError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            self.limiter.acquire().await;
            let result = match build().send().await {
                Ok(response) => read_response(response).await,
                Err(e) => Err(TransportError::Network(e.to_string())),
            };
            match result {
                Err(e) if e.is_retryable() && attempt < self.settings.max_tries => {
                    let delay = self.settings.delay(attempt);
                    warn!(
                        attempt,
                        max_tries = self.settings.max_tries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Request failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                other => return other,
            }
        }
    }
}

#[async_trait]
impl Transport for TplClient {
    async fn fetch(
        &self,
        path: &str,
        query: &QueryParams,
    ) -> std::result::Result<Value, TransportError> {
        let url = self.url(path);
        debug!(url = %url, query = ?query, "GET");

        let authorization = self.authorization().await?;
        match self.execute(|| self.get(&url, query, &authorization)).await {
            Err(TransportError::Unauthorized(message)) => {
                warn!(url = %url, message = %message, "Access token rejected, refreshing once");
                self.clear_token().await;
                let authorization = self.authorization().await?;
                self.execute(|| self.get(&url, query, &authorization)).await
            },
            other => other,
        }
    }
}

fn status_label(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        412 => "Precondition failed",
        428 => "Precondition required",
        500 => "Internal Server Error",
        _ => "Unknown error",
    }
}

async fn read_response(response: Response) -> std::result::Result<Value, TransportError> {
    let status = response.status();
    if status.is_success() {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        return serde_json::from_slice(&bytes)
            .map_err(|e| TransportError::Network(format!("invalid JSON body: {}", e)));
    }

    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(TransportError::RateLimited),
        StatusCode::UNAUTHORIZED => Err(TransportError::Unauthorized(body)),
        _ => {
            let label = status_label(status);
            let message = if body.is_empty() {
                label.to_string()
            } else {
                format!("{}: {}", label, body)
            };
            Err(TransportError::ApiFault {
                status: status.as_u16(),
                message,
            })
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let settings = ClientSettings {
            backoff: Duration::from_secs(2),
            ..Default::default()
        };
        assert_eq!(settings.delay(1), Duration::from_secs(2));
        assert_eq!(settings.delay(2), Duration::from_secs(4));
        assert_eq!(settings.delay(4), Duration::from_secs(16));
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(status_label(StatusCode::NOT_FOUND), "Not Found");
        assert_eq!(status_label(StatusCode::PRECONDITION_REQUIRED), "Precondition required");
        assert_eq!(status_label(StatusCode::IM_A_TEAPOT), "Unknown error");
    }
}
