//! # EftsKit - Complete retrieval from the SEC EDGAR full-text search API
//!
//! EDGAR full-text search (EFTS) answers at most 10,000 hits per query, 100 rows per page.
//! EftsKit hides that ceiling: any filter, however broad, is planned into a gap-free set of
//! sub-queries that each fit under the cap, and every page is fetched by a small pool of
//! rate-limited workers.
//!
//! ## Features
//!
//! - **Adaptive planning** - Over-limit filters are split by form-type buckets or by date,
//!   recursively, with a negation sweep for forms the API's aggregation leaves out
//! - **Rate-limited fetching** - One pacing budget and one connection gate per client,
//!   honoring server-directed `Retry-After` backoffs without dropping work
//! - **Document streaming** - Download every matched filing in memory with bounded backlog
//!   (`stream` feature, on by default)
//! - **Pluggable collaborators** - Bring your own HTTP transport, name resolver and callbacks
//!
//! ## Requirements
//!
//! EftsKit is an async-first library and requires the [tokio](https://tokio.rs) runtime.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use chrono::NaiveDate;
//! use eftskit::{Efts, QueryFilter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Initialize with a proper user agent (required by SEC.gov)
//!     let efts = Efts::new("YourAppName contact@example.com")?;
//!
//!     // Every 8-K filed during 2023, however many there are
//!     let filter = QueryFilter::new().with_form_type("8-K").with_date_range(
//!         NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
//!         NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
//!     );
//!
//!     let report = efts.query_with_report(&filter, None).await?;
//!     println!("{} of {} hits", report.hits.len(), report.true_total);
//!
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod filter;
mod planner;
mod pool;
mod progress;
mod query;
mod rate;
mod search;
#[cfg(feature = "stream")]
mod stream;
mod submission;
mod traits;
mod transport;

pub use config::{EftsConfig, EftsUrls, PlannerLimits};
pub use core::Efts;
pub use error::{EftsError, Result};

pub use filter::{DateFilter, PRIMARY_DOCUMENTS, QueryFilter, amendment_exclusion, earliest_filing_date};
pub use planner::{
    LeafOrigin, Plan, PlanLeaf, QueryPlanner, SplitStrategy, exceeds_cap, form_groups,
    split_date_range,
};
pub use pool::{PlannedPage, WorkQueue};
pub use progress::{Progress, ProgressSnapshot};
pub use query::QueryReport;
pub use rate::{RateLimiter, RateMonitor, Throughput};
pub use search::{
    Aggregations, Bucket, BucketAggregation, EntityMatch, Hit, Hits, SearchParams,
    SearchResponse, Source, TotalHits,
};
pub use submission::SubmissionReference;
pub use transport::{HttpTransport, parse_retry_after};

#[cfg(feature = "stream")]
pub use stream::{FilingDocument, StreamOptions, StreamReport, Streamer};

pub use traits::{HitCallback, HttpGet, NameResolver};
#[cfg(feature = "stream")]
pub use traits::DocumentCallback;

/// Current crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
