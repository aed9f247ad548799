//! Trait definitions for the engine's collaborators.
//!
//! The engine only needs a handful of narrow capabilities from the outside world: an HTTP GET,
//! a way to turn a company name into CIKs, and callbacks that receive search hits and filing
//! documents as they arrive. Each is a trait so that tests and embedders can provide their own
//! implementation.
//!
//! Callbacks are also implemented for plain async closures, so the common case needs no
//! wrapper type:
//!
//! ```rust
//! use std::sync::Arc;
//! use eftskit::{Hit, HitCallback};
//!
//! let callback: Arc<dyn HitCallback> = Arc::new(|hits: Vec<Hit>| async move {
//!     println!("received {} hits", hits.len());
//! });
//! ```

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::future::Future;

use super::error::Result;
use super::search::{EntityMatch, Hit};
#[cfg(feature = "stream")]
use super::stream::FilingDocument;

/// Async GET with per-request headers and a full-body read.
///
/// Implementations must report HTTP 429 as [`EftsError::RateLimited`](crate::EftsError), carrying
/// the server-directed backoff.
#[async_trait]
pub trait HttpGet: Send + Sync {
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<Vec<u8>>;
}

/// Resolves a company name to candidate entities, best match first.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve_name(&self, name: &str) -> Result<Vec<EntityMatch>>;
}

/// Receives each successfully fetched page of hits, in API order within the page.
#[async_trait]
pub trait HitCallback: Send + Sync {
    async fn on_hits(&self, hits: Vec<Hit>);
}

/// Receives each downloaded filing, held in memory.
#[cfg(feature = "stream")]
#[async_trait]
pub trait DocumentCallback: Send + Sync {
    async fn on_document(&self, document: FilingDocument);
}

#[async_trait]
impl<F, Fut> HitCallback for F
where
    F: Fn(Vec<Hit>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_hits(&self, hits: Vec<Hit>) {
        (self)(hits).await
    }
}

#[cfg(feature = "stream")]
#[async_trait]
impl<F, Fut> DocumentCallback for F
where
    F: Fn(FilingDocument) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_document(&self, document: FilingDocument) {
        (self)(document).await
    }
}
