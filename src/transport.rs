use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use std::time::Duration;

use super::config::EftsConfig;
use super::error::{EftsError, Result};
use super::traits::HttpGet;

/// `reqwest`-backed [`HttpGet`].
///
/// Makes exactly one attempt per call. Retrying is the caller's business: a 429 comes back as
/// [`EftsError::RateLimited`] with the `Retry-After` value, or the configured default when the
/// header is missing, and every other failure is returned as-is.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    default_retry_after: Duration,
}

impl HttpTransport {
    /// Builds the HTTP client with the user agent as a default header and the configured
    /// total-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `EftsError::ConfigError` if the user agent is not a valid header value or the
    /// client cannot be built.
    pub fn new(config: &EftsConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| EftsError::ConfigError(format!("Invalid user agent: {}", e)))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| EftsError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            default_retry_after: config.default_retry_after,
        })
    }
}

#[async_trait]
impl HttpGet for HttpTransport {
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(EftsError::RequestError)?;

        match response.status() {
            reqwest::StatusCode::TOO_MANY_REQUESTS => Err(EftsError::RateLimited {
                url: url.to_string(),
                retry_after: parse_retry_after(response.headers())
                    .unwrap_or(self.default_retry_after),
            }),
            reqwest::StatusCode::NOT_FOUND => Err(EftsError::NotFound(url.to_string())),
            status if status.is_success() => response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(EftsError::RequestError),
            other_status => {
                let error_body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Failed to read error body".to_string());

                Err(EftsError::InvalidResponse(format!(
                    "Unexpected status code: {} for URL: {}. Response preview: {}",
                    other_status,
                    url,
                    error_body.chars().take(200).collect::<String>()
                )))
            }
        }
    }
}

/// Reads a `Retry-After` header given in whole seconds.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
