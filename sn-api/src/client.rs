//! HTTP client for the social network REST API.
//!
//! Handles session cookie authentication, timeout management, exponential
//! backoff retry, and request/response lifecycle.

use std::time::Duration;

use reqwest::header::{HeaderValue, COOKIE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use sn_core::config::{AppConfig, ServerConfig};
use sn_core::constants;
use sn_core::error::{SnError, SnResult};

/// Retry configuration for HTTP requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay between retries (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// HTTP status codes that trigger a retry.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            retryable_statuses: vec![502, 503, 504],
        }
    }
}

/// HTTP client for the social network backend.
///
/// Wraps reqwest::Client with cookie authentication, retry logic, and
/// error classification.
#[derive(Clone)]
pub struct ApiClient {
    inner: Client,
    /// Base URL for the API (e.g. "https://example.com/api").
    api_root: String,
    /// Server origin (scheme + host, no path).
    origin: String,
    /// `Cookie` header carrying the session token.
    session_cookie: Option<HeaderValue>,
    /// Default request timeout.
    timeout: Duration,
    retry_config: RetryConfig,
}

impl ApiClient {
    /// Create a new ApiClient from server configuration.
    pub fn new(config: &ServerConfig) -> SnResult<Self> {
        let sanitized_address = AppConfig::sanitize_server_address(&config.address);
        if sanitized_address.is_empty() {
            return Err(SnError::MissingConfig("server address".into()));
        }

        let mut builder = Client::builder()
            .timeout(Duration::from_millis(config.api_timeout_ms))
            .connect_timeout(Duration::from_secs(15))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30));

        if config.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let inner = builder
            .build()
            .map_err(|e| SnError::Http(format!("failed to build HTTP client: {e}")))?;

        let session_cookie = config
            .session_cookie()
            .map(|cookie| {
                HeaderValue::from_str(&cookie)
                    .map_err(|e| SnError::AuthFailed(format!("invalid session token: {e}")))
            })
            .transpose()?;

        let origin = derive_origin(&sanitized_address);
        let api_root = format!("{origin}{}", constants::API_PREFIX);

        Ok(Self {
            inner,
            api_root,
            origin,
            session_cookie,
            timeout: Duration::from_millis(config.api_timeout_ms),
            retry_config: RetryConfig::default(),
        })
    }

    /// Set custom retry configuration.
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn is_authenticated(&self) -> bool {
        self.session_cookie.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_root)
    }

    fn build_request(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> RequestBuilder {
        let mut builder = self.inner.request(method, url).timeout(self.timeout);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(cookie) = &self.session_cookie {
            builder = builder.header(COOKIE, cookie.clone());
        }
        if let Some(b) = body {
            builder = builder.json(b);
        }
        builder
    }

    /// Execute a request with exponential backoff retry.
    async fn request_with_retry(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> SnResult<Response> {
        let url = self.url(path);
        debug!("{} {}", method, path);

        let mut last_error: Option<SnError> = None;

        for attempt in 0..=self.retry_config.max_retries {
            if attempt > 0 {
                let delay = self.calculate_retry_delay(attempt - 1);
                warn!(
                    "retrying {} {} (attempt {}/{}) after {:.1}s",
                    method,
                    path,
                    attempt + 1,
                    self.retry_config.max_retries + 1,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }

            let builder = self.build_request(method.clone(), &url, query, body);

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();

                    if self
                        .retry_config
                        .retryable_statuses
                        .contains(&status.as_u16())
                        && attempt < self.retry_config.max_retries
                    {
                        warn!("retryable status {} from {}", status.as_u16(), path);
                        last_error = Some(SnError::ServerError {
                            status: status.as_u16(),
                            message: format!("retryable status {status}"),
                        });
                        continue;
                    }

                    return Self::check_status(response).await;
                }
                Err(e) => {
                    let is_retryable = e.is_timeout() || e.is_connect();
                    let err = Self::classify_error(e);

                    if is_retryable && attempt < self.retry_config.max_retries {
                        warn!("retryable error on {}: {}", path, err);
                        last_error = Some(err);
                        continue;
                    }

                    return Err(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SnError::Http("max retries exceeded".into())))
    }

    /// Calculate retry delay with exponential backoff.
    fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.retry_config.base_delay.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        let max_ms = self.retry_config.max_delay.as_millis() as u64;
        Duration::from_millis(delay_ms.min(max_ms))
    }

    // --- Public HTTP methods ---

    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> SnResult<Response> {
        self.request_with_retry(Method::GET, path, query, None).await
    }

    pub async fn post(&self, path: &str, body: &serde_json::Value) -> SnResult<Response> {
        self.request_with_retry(Method::POST, path, &[], Some(body))
            .await
    }

    pub async fn put(&self, path: &str) -> SnResult<Response> {
        self.request_with_retry(Method::PUT, path, &[], None).await
    }

    // --- Response helpers ---

    /// Deserialize a JSON response body.
    pub async fn parse_response<T: DeserializeOwned>(response: Response) -> SnResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| SnError::Serialization(format!("failed to parse response: {e}")))
    }

    /// Convenience: GET + parse.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> SnResult<T> {
        let resp = self.get(path, query).await?;
        Self::parse_response(resp).await
    }

    /// Convenience: POST + parse.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> SnResult<T> {
        let resp = self.post(path, body).await?;
        Self::parse_response(resp).await
    }

    /// Check the HTTP status code and convert to SnError if needed.
    async fn check_status(response: Response) -> SnResult<Response> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(SnError::AuthFailed(format!(
                "server returned {status}: {}",
                body.trim()
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SnError::ServerError {
                status: status.as_u16(),
                message: body.trim().to_string(),
            });
        }

        Ok(response)
    }

    /// Classify a reqwest error into a SnError variant.
    fn classify_error(e: reqwest::Error) -> SnError {
        if e.is_timeout() {
            SnError::Timeout(e.to_string())
        } else if e.is_connect() {
            SnError::Http(format!("connection failed: {e}"))
        } else {
            SnError::Http(e.to_string())
        }
    }
}

/// Derive the origin (scheme + host + optional port) from a server address.
fn derive_origin(address: &str) -> String {
    if let Ok(url) = reqwest::Url::parse(address) {
        let host = url.host_str().unwrap_or("localhost");
        match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        }
    } else {
        address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServerConfig {
        ServerConfig {
            address: "http://localhost:8080".into(),
            session_token: "abc".into(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_derive_origin() {
        assert_eq!(
            derive_origin("https://social.example.com/api"),
            "https://social.example.com"
        );
        assert_eq!(
            derive_origin("http://192.168.1.100:8080"),
            "http://192.168.1.100:8080"
        );
    }

    #[test]
    fn test_api_root() {
        let client = ApiClient::new(&test_config()).unwrap();
        assert_eq!(client.api_root(), "http://localhost:8080/api");
        assert_eq!(client.origin(), "http://localhost:8080");
        assert!(client.is_authenticated());
    }

    #[test]
    fn test_missing_address() {
        let config = ServerConfig::default();
        assert!(matches!(
            ApiClient::new(&config),
            Err(SnError::MissingConfig(_))
        ));
    }

    #[test]
    fn test_retry_delay_calculation() {
        let client = ApiClient::new(&test_config()).unwrap();
        assert_eq!(client.calculate_retry_delay(0), Duration::from_secs(1));
        assert_eq!(client.calculate_retry_delay(1), Duration::from_secs(2));
        assert_eq!(client.calculate_retry_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_retry_delay_capped() {
        let client = ApiClient::new(&test_config()).unwrap();
        assert!(client.calculate_retry_delay(10) <= Duration::from_secs(4));
        assert!(client.calculate_retry_delay(80) <= Duration::from_secs(4));
    }
}
