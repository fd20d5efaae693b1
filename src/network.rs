use reqwest::header::{ACCEPT, COOKIE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::timeout;

use crate::backoff::RetryPolicy;
use crate::config::Config;

/// HTTP client shared by the platform collaborators.
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout_duration: Duration,
    max_content_size: usize,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout_secs: u64, cookie: Option<&str>) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/html;q=0.9, */*;q=0.8"),
        );
        if let Some(cookie) = cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| FetchError::Client(format!("invalid cookie header: {}", e)))?;
            headers.insert(COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            timeout_duration: Duration::from_secs(timeout_secs),
            max_content_size: Config::MAX_CONTENT_SIZE,
            retry: RetryPolicy::new(Config::MAX_RETRIES, Config::RETRY_BACKOFF_MS, 5_000),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetches `url`, retrying transient failures per the retry policy.
    pub async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        let mut retry = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && self.retry.allows(retry + 1) => {
                    retry += 1;
                    let delay = self.retry.delay(retry);
                    tracing::debug!(url, retry, delay_ms = delay.as_millis() as u64, error = %e, "Retrying request");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let result = self.fetch(url).await?;
        serde_json::from_str(&result.content).map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchResult, FetchError> {
        let response = timeout(self.timeout_duration, self.client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(Self::classify_error)?;

        let status_code = response.status().as_u16();
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(status_code));
        }

        if let Some(length) = response.content_length()
            && length as usize > self.max_content_size
        {
            return Err(FetchError::ContentTooLarge(length as usize, self.max_content_size));
        }

        let content = timeout(self.timeout_duration, response.text())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::BodyError(e.to_string()))?;

        if content.len() > self.max_content_size {
            return Err(FetchError::ContentTooLarge(content.len(), self.max_content_size));
        }

        Ok(FetchResult {
            content,
            status_code,
        })
    }

    fn classify_error(error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            return FetchError::Timeout;
        }
        if error.is_builder() {
            return FetchError::Client(error.to_string());
        }

        let error_msg = error.to_string().to_lowercase();
        if error_msg.contains("connection refused") {
            return FetchError::ConnectionRefused;
        }
        if error_msg.contains("dns") || error_msg.contains("name resolution") {
            return FetchError::DnsError;
        }
        FetchError::NetworkError(error.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub content: String,
    pub status_code: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection refused - server not accepting connections")]
    ConnectionRefused,

    #[error("DNS resolution failed")]
    DnsError,

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("Failed to read response body: {0}")]
    BodyError(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Content too large: {0} bytes (max: {1} bytes)")]
    ContentTooLarge(usize, usize),

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl FetchError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout => true,
            FetchError::HttpStatus(status) => *status >= 500,
            FetchError::NetworkError(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("timeout")
                    || msg_lower.contains("broken pipe")
                    || msg_lower.contains("connection reset")
                    || msg_lower.contains("temporary")
            }
            FetchError::ConnectionRefused
            | FetchError::DnsError
            | FetchError::BodyError(_)
            | FetchError::Decode(_)
            | FetchError::ContentTooLarge(_, _)
            | FetchError::Client(_) => false,
        }
    }

    /// The platform answers throttled clients with one of these.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::HttpStatus(403 | 418 | 429))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_invalid_url() {
        let client = HttpClient::new("TestBot/1.0", 5, None)
            .unwrap()
            .with_retry(RetryPolicy::none());
        assert!(client.fetch("not-a-url").await.is_err());
    }

    #[test]
    fn test_invalid_cookie_is_rejected() {
        let result = HttpClient::new("TestBot/1.0", 5, Some("bad\ncookie"));
        assert!(matches!(result, Err(FetchError::Client(_))));
    }

    #[test]
    fn test_retry_classification() {
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::HttpStatus(503).is_retryable());
        assert!(!FetchError::HttpStatus(404).is_retryable());
        assert!(!FetchError::HttpStatus(429).is_retryable());
        assert!(FetchError::HttpStatus(418).is_rate_limited());
        assert!(!FetchError::Decode("eof".to_string()).is_retryable());
    }
}
