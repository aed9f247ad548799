use std::time::Duration;

use super::error::{EftsError, Result};

/// Configuration for the EFTS client.
///
/// Passed by value into [`Efts::with_config`](crate::Efts::with_config); nothing in the crate
/// reads process-wide state.
#[derive(Debug, Clone)]
pub struct EftsConfig {
    /// User agent string for HTTP requests (SEC.gov requires a contact address)
    pub user_agent: String,
    /// Requests per second shared by every request the client makes
    pub requests_per_second: f64,
    /// Total-request timeout of the underlying HTTP client
    pub timeout: Duration,
    /// Maximum number of requests in flight at once
    pub max_connections: usize,
    /// Workers draining planned search pages
    pub fetch_workers: usize,
    /// Workers downloading filing documents when streaming
    pub document_workers: usize,
    /// Backoff used when a 429 response carries no `Retry-After` header
    pub default_retry_after: Duration,
    /// Suppress progress reporting and planner chatter
    pub quiet: bool,
    /// Planner thresholds
    pub limits: PlannerLimits,
    /// Base URLs for the search and archive services
    pub base_urls: EftsUrls,
}

/// Thresholds that drive query splitting.
///
/// `hard_cap` and `page_size` mirror the EFTS API. `split_margin` and `max_depth` are empirical
/// and should be revisited if the API's count reporting changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerLimits {
    /// Maximum hits the API will report or page through for one query
    pub hard_cap: u64,
    /// Rows per page, at most 100
    pub page_size: u32,
    /// Maximum pages registered for a single leaf query
    pub max_pages: u32,
    /// Target ceiling for a form group's summed bucket counts
    pub split_margin: u64,
    /// Maximum recursion depth before a query is accepted as-is
    pub max_depth: u32,
    /// Sub-ranges produced by one date bisection
    pub date_splits: usize,
    /// Sub-ranges produced by one date bisection of a negation sweep
    pub negation_date_splits: usize,
}

/// Base URLs for the EDGAR services used by the engine
#[derive(Debug, Clone)]
pub struct EftsUrls {
    /// Full-text search endpoint
    pub search: String,
    /// Base URL for EDGAR archives
    pub archives: String,
}

impl Default for PlannerLimits {
    fn default() -> Self {
        Self {
            hard_cap: 10_000,
            page_size: 100,
            max_pages: 100,
            split_margin: 9_000,
            max_depth: 4,
            date_splits: 4,
            negation_date_splits: 10,
        }
    }
}

impl Default for EftsUrls {
    fn default() -> Self {
        Self {
            search: "https://efts.sec.gov/LATEST/search-index".to_string(),
            archives: "https://www.sec.gov/Archives/edgar".to_string(),
        }
    }
}

impl Default for EftsConfig {
    fn default() -> Self {
        Self {
            user_agent: "eftskit/0.1.0".to_string(),
            requests_per_second: 5.0,
            timeout: Duration::from_secs(30),
            max_connections: 5,
            fetch_workers: 5,
            document_workers: 5,
            default_retry_after: Duration::from_secs(601),
            quiet: false,
            limits: PlannerLimits::default(),
            base_urls: EftsUrls::default(),
        }
    }
}

impl EftsConfig {
    /// Creates a config with the given user agent and rate, everything else defaulted.
    ///
    /// # Basic usage
    ///
    /// ```rust
    /// use eftskit::EftsConfig;
    ///
    /// let config = EftsConfig::new("YourAppName contact@example.com", 5.0).with_quiet(true);
    /// assert_eq!(config.fetch_workers, 5);
    /// ```
    pub fn new(user_agent: impl Into<String>, requests_per_second: f64) -> Self {
        Self {
            user_agent: user_agent.into(),
            requests_per_second,
            ..Self::default()
        }
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_limits(mut self, limits: PlannerLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_base_urls(mut self, base_urls: EftsUrls) -> Self {
        self.base_urls = base_urls;
        self
    }

    pub fn with_workers(mut self, fetch_workers: usize, document_workers: usize) -> Self {
        self.fetch_workers = fetch_workers;
        self.document_workers = document_workers;
        self
    }

    /// Checks the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.user_agent.trim().is_empty() {
            return Err(EftsError::ConfigError(
                "User agent must not be empty".to_string(),
            ));
        }
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(EftsError::ConfigError(format!(
                "Requests per second must be positive, got {}",
                self.requests_per_second
            )));
        }
        if self.max_connections == 0 || self.fetch_workers == 0 || self.document_workers == 0 {
            return Err(EftsError::ConfigError(
                "Connection and worker counts must be greater than zero".to_string(),
            ));
        }

        let limits = &self.limits;
        if limits.page_size == 0 || limits.page_size > 100 {
            return Err(EftsError::ConfigError(format!(
                "Page size must be between 1 and 100, got {}",
                limits.page_size
            )));
        }
        if u64::from(limits.page_size) * u64::from(limits.max_pages) < limits.hard_cap {
            return Err(EftsError::ConfigError(format!(
                "{} pages of {} cannot reach the hard cap {}",
                limits.max_pages, limits.page_size, limits.hard_cap
            )));
        }
        if limits.split_margin == 0 || limits.split_margin > limits.hard_cap {
            return Err(EftsError::ConfigError(format!(
                "Split margin {} must be between 1 and the hard cap {}",
                limits.split_margin, limits.hard_cap
            )));
        }
        if limits.date_splits < 2 || limits.negation_date_splits < 2 {
            return Err(EftsError::ConfigError(
                "Date splits must produce at least two ranges".to_string(),
            ));
        }
        Ok(())
    }
}
