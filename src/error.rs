use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EftsError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    /// HTTP 429. Never surfaced by `query`/`stream`; the unit is retried after `retry_after`.
    #[error("Rate limited by {url}, retry after {retry_after:?}")]
    RateLimited { url: String, retry_after: Duration },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid date: {0}")]
    InvalidDate(#[from] chrono::ParseError),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Query encoding error: {0}")]
    EncodeError(#[from] serde_urlencoded::ser::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, EftsError>;
