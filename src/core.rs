use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use super::config::{EftsConfig, EftsUrls, PlannerLimits};
use super::error::{EftsError, Result};
use super::rate::{RateLimiter, RateMonitor, Throughput};
use super::search::{EntityMatch, EntitySearchResponse, SearchParams, SearchResponse};
use super::traits::{HttpGet, NameResolver};
use super::transport::HttpTransport;

/// Client for the EDGAR full-text search API.
///
/// `Efts` owns one external quota: a single [`RateLimiter`] and a single connection gate shared
/// by every request made through it, including planner probes, page fetches and document
/// downloads. Cloning is cheap and clones share that quota.
///
/// # Rate Limiting
///
/// The SEC asks automated clients to stay well under 10 requests per second. Requests are
/// spaced evenly rather than burst:
///
/// ```text
/// acquire ──►|<── 1/rate ──>|<── 1/rate ──>|
///            grant          grant          grant
/// ```
///
/// On top of pacing, at most `max_connections` requests are in flight at any moment.
///
/// # Examples
///
/// ```rust
/// # use eftskit::Efts;
/// let efts = Efts::new("my_app/1.0 (my@email.com)")?;
/// # Ok::<(), eftskit::EftsError>(())
/// ```
#[derive(Clone)]
pub struct Efts {
    pub(crate) transport: Arc<dyn HttpGet>,
    pub(crate) resolver: Option<Arc<dyn NameResolver>>,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) monitor: Arc<RateMonitor>,
    pub(crate) connections: Arc<Semaphore>,
    pub(crate) config: EftsConfig,
}

impl std::fmt::Debug for Efts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Efts")
            .field("limiter", &self.limiter)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Efts {
    /// Creates a client with default settings: 5 requests per second, 5 concurrent
    /// connections, a 30-second timeout and the public SEC.gov endpoints.
    ///
    /// # Arguments
    ///
    /// * `user_agent` - Identifies your application to the SEC, following the format
    ///   "AppName/Version (contact@email.com)".
    pub fn new(user_agent: &str) -> Result<Self> {
        Self::with_config(EftsConfig::new(user_agent, 5.0))
    }

    /// Creates a client over the default `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns `EftsError::ConfigError` if the config is invalid or the HTTP client cannot be
    /// built.
    pub fn with_config(config: EftsConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Creates a client that sends every request through `transport`.
    pub fn with_transport(config: EftsConfig, transport: Arc<dyn HttpGet>) -> Result<Self> {
        config.validate()?;
        let limiter = RateLimiter::new(config.requests_per_second)?;

        Ok(Efts {
            transport,
            resolver: None,
            limiter: Arc::new(limiter),
            monitor: Arc::new(RateMonitor::default()),
            connections: Arc::new(Semaphore::new(config.max_connections)),
            config,
        })
    }

    /// Replaces the built-in name lookup with another resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Single GET through the connection gate and the rate limiter.
    ///
    /// A 429 is returned as [`EftsError::RateLimited`]; nothing is retried here.
    pub async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<Vec<u8>> {
        let _permit = self
            .connections
            .acquire()
            .await
            .map_err(|_| EftsError::ConfigError("Connection gate closed".to_string()))?;
        self.limiter.acquire().await;

        let body = self.transport.get(url, headers).await?;
        self.monitor.record(body.len());
        Ok(body)
    }

    /// Like [`fetch`](Self::fetch), but sleeps through rate-limit signals until the request
    /// goes through or fails for another reason.
    pub(crate) async fn fetch_until_admitted(&self, url: &str, headers: &HeaderMap) -> Result<Vec<u8>> {
        loop {
            match self.fetch(url, headers).await {
                Err(EftsError::RateLimited { retry_after, .. }) => {
                    tracing::warn!(
                        "Rate limit hit (429) for {}. Waiting for {:?} before retry.",
                        url,
                        retry_after
                    );
                    sleep(retry_after).await;
                }
                other => return other,
            }
        }
    }

    /// Fetches one page of search results.
    pub async fn search_page(
        &self,
        params: &SearchParams,
        from: u32,
        size: u32,
    ) -> Result<SearchResponse> {
        let url = self.page_url(params, from, size)?;
        let body = self.fetch(&url, &json_headers()).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Page-size-1 request used to learn the total and the form breakdown of `params`.
    /// Rate-limit signals are waited out.
    pub async fn probe(&self, params: &SearchParams) -> Result<SearchResponse> {
        let url = self.page_url(params, 0, 1)?;
        let body = self.fetch_until_admitted(&url, &json_headers()).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Looks up companies by name through the `keysTyped` endpoint, best match first.
    pub async fn search_name(&self, name: &str) -> Result<Vec<EntityMatch>> {
        let query = serde_urlencoded::to_string([("keysTyped", name)])?;
        let url = format!("{}?{}", self.search_url(), query);
        let body = self.fetch_until_admitted(&url, &json_headers()).await?;
        let response: EntitySearchResponse = serde_json::from_slice(&body)?;

        let matches: Vec<EntityMatch> = response.hits.hits.into_iter().map(Into::into).collect();
        if !self.config.quiet && !matches.is_empty() {
            let shown: Vec<String> = matches
                .iter()
                .take(5)
                .map(|m| format!("{} [{}]", m.entity, m.id))
                .collect();
            tracing::info!(
                "Name matches: {}{}",
                shown.join(", "),
                if matches.len() > 5 {
                    format!(" ...and {} more", matches.len() - 5)
                } else {
                    String::new()
                }
            );
        }
        Ok(matches)
    }

    /// Resolves `name` to CIKs using the configured resolver, or the built-in lookup.
    /// Only the best match is used.
    pub(crate) async fn resolve_ciks(&self, name: &str) -> Result<Vec<u64>> {
        let matches = match self.resolver {
            Some(ref resolver) => resolver.resolve_name(name).await?,
            None => self.search_name(name).await?,
        };

        let Some(best) = matches.into_iter().next() else {
            return Ok(Vec::new());
        };
        let cik = best.id.trim().parse::<u64>().map_err(|e| {
            EftsError::InvalidResponse(format!("Entity id {:?} is not a CIK: {}", best.id, e))
        })?;

        if !self.config.quiet {
            tracing::info!("Using CIK {} for {}", cik, best.entity);
        }
        Ok(vec![cik])
    }

    fn page_url(&self, params: &SearchParams, from: u32, size: u32) -> Result<String> {
        Ok(format!("{}?{}", self.search_url(), params.page_query(from, size)?))
    }

    /// Current throughput over the monitor's trailing window.
    pub fn rates(&self) -> Throughput {
        self.monitor.current_rates()
    }

    pub fn config(&self) -> &EftsConfig {
        &self.config
    }

    pub fn limits(&self) -> &PlannerLimits {
        &self.config.limits
    }

    pub fn urls(&self) -> &EftsUrls {
        &self.config.base_urls
    }

    /// Returns the base URL for EDGAR search.
    pub fn search_url(&self) -> &str {
        &self.config.base_urls.search
    }

    /// Returns the base URL for EDGAR archives.
    pub fn archives_url(&self) -> &str {
        &self.config.base_urls.archives
    }
}

#[async_trait]
impl NameResolver for Efts {
    async fn resolve_name(&self, name: &str) -> Result<Vec<EntityMatch>> {
        self.search_name(name).await
    }
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}
