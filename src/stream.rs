//! Document streaming on top of the query engine.
//!
//! [`Streamer`] runs a query and downloads the full submission of every distinct accession it
//! returns, handing each one to a [`DocumentCallback`] in memory.
//!
//! Backlog is bounded by batch-level backpressure. When a page of hits arrives, the streamer
//! raises a shared "active batches" counter, queues the page's downloads and waits for the
//! document queue to drain. Fetch workers do not dequeue another page while the counter is
//! non-zero, so at most one page worth of downloads is ever outstanding:
//!
//! ```text
//! fetch page ──► queue its documents ──► drain ──► fetch next page
//! ```
//!
//! Document downloads go through the same client as the search requests and share its rate
//! limiter and connection gate.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::Efts;
use super::error::{EftsError, Result};
use super::filter::QueryFilter;
use super::pool::{WorkQueue, backoff, shutdown};
use super::progress::Progress;
use super::query::{QueryReport, RunContext};
use super::search::Hit;
use super::submission::SubmissionReference;
use super::traits::{DocumentCallback, HitCallback};

/// A downloaded filing, held in memory.
#[derive(Debug, Clone)]
pub struct FilingDocument {
    /// The hit that led to this filing
    pub hit: Hit,
    pub content: Vec<u8>,
    /// CIK without leading zeros
    pub cik: String,
    pub accession_number: String,
    pub url: String,
}

/// Accession filters applied before anything is queued for download.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Download only these accession numbers
    pub allowed_accessions: Option<HashSet<String>>,
    /// Never download these accession numbers
    pub skipped_accessions: Option<HashSet<String>>,
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allowed_accessions<I, S>(mut self, accessions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_accessions = Some(accessions.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_skipped_accessions<I, S>(mut self, accessions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skipped_accessions = Some(accessions.into_iter().map(Into::into).collect());
        self
    }

    fn admits(&self, accession_number: &str) -> bool {
        let allowed = self
            .allowed_accessions
            .as_ref()
            .is_none_or(|allowed| allowed.contains(accession_number));
        let skipped = self
            .skipped_accessions
            .as_ref()
            .is_some_and(|skipped| skipped.contains(accession_number));
        allowed && !skipped
    }
}

/// Outcome of one [`Streamer::stream`] run.
#[derive(Debug, Clone, Default)]
pub struct StreamReport {
    pub query: QueryReport,
    pub documents_downloaded: usize,
    pub documents_failed: usize,
    /// Hits rejected by the accession filters
    pub documents_skipped: usize,
    /// Hits whose accession had already been queued
    pub duplicate_documents: usize,
    /// Most download tasks waiting at once
    pub peak_queued_documents: usize,
}

/// Runs a query and downloads every matched filing.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use eftskit::{Efts, FilingDocument, QueryFilter, Streamer};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let efts = Efts::new("my_app/1.0 (my@email.com)")?;
/// let streamer = Streamer::new(
///     efts,
///     Arc::new(|doc: FilingDocument| async move {
///         println!("{} ({} bytes)", doc.accession_number, doc.content.len());
///     }),
/// );
///
/// let report = streamer.stream(&QueryFilter::new().with_cik(320193).with_form_type("10-K")).await?;
/// println!("{} filings", report.documents_downloaded);
/// # Ok(())
/// # }
/// ```
pub struct Streamer {
    efts: Efts,
    callback: Arc<dyn DocumentCallback>,
    options: StreamOptions,
}

impl Streamer {
    pub fn new(efts: Efts, callback: Arc<dyn DocumentCallback>) -> Self {
        Self {
            efts,
            callback,
            options: StreamOptions::default(),
        }
    }

    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    /// Runs `filter` and returns once every derived download has been processed.
    ///
    /// # Errors
    ///
    /// Returns `EftsError::InvalidFilter` for an invalid filter or an empty allow-list, and
    /// otherwise the same errors as [`Efts::query`].
    pub async fn stream(&self, filter: &QueryFilter) -> Result<StreamReport> {
        if matches!(self.options.allowed_accessions, Some(ref allowed) if allowed.is_empty()) {
            return Err(EftsError::InvalidFilter(
                "Accession allow-list is empty".to_string(),
            ));
        }
        filter.validate()?;

        let (pause_tx, pause_rx) = watch::channel(0usize);
        let progress = Arc::new(Progress::default());
        let documents = Arc::new(WorkQueue::new());

        let mut workers = JoinSet::new();
        for _ in 0..self.efts.config().document_workers {
            workers.spawn(document_worker(
                self.efts.clone(),
                Arc::clone(&documents),
                Arc::clone(&self.callback),
                Arc::clone(&progress),
            ));
        }

        let router = Arc::new(BatchRouter {
            archives_url: self.efts.archives_url().to_string(),
            options: self.options.clone(),
            queue: Arc::clone(&documents),
            pause: pause_tx,
            gate: tokio::sync::Mutex::new(()),
            seen: Mutex::new(HashSet::new()),
            progress: Arc::clone(&progress),
        });

        let context = RunContext {
            progress: Arc::clone(&progress),
            pause: Some(pause_rx),
            documents: true,
        };
        let result = self
            .efts
            .run_query(filter, Some(router as Arc<dyn HitCallback>), context)
            .await;

        documents.join().await;
        shutdown(workers).await;
        let query = result?;

        let counts = progress.snapshot();
        let report = StreamReport {
            query,
            documents_downloaded: counts.documents_completed,
            documents_failed: counts.documents_failed,
            documents_skipped: counts.documents_skipped,
            duplicate_documents: counts.duplicate_documents,
            peak_queued_documents: documents.high_water(),
        };

        let summary = format!(
            "Stream complete: {} documents downloaded, {} failed, {} skipped, {} duplicates | {}",
            report.documents_downloaded,
            report.documents_failed,
            report.documents_skipped,
            report.duplicate_documents,
            self.efts.rates()
        );
        if self.efts.config().quiet {
            debug!("{}", summary);
        } else {
            info!("{}", summary);
        }
        Ok(report)
    }
}

struct DocumentTask {
    hit: Hit,
    reference: SubmissionReference,
}

enum Admission {
    Queue(Box<DocumentTask>),
    Skip,
    Duplicate,
    Unresolvable(EftsError),
}

/// Page callback that turns each batch of hits into download tasks and holds the batch open
/// until they have drained.
struct BatchRouter {
    archives_url: String,
    options: StreamOptions,
    queue: Arc<WorkQueue<DocumentTask>>,
    pause: watch::Sender<usize>,
    gate: tokio::sync::Mutex<()>,
    seen: Mutex<HashSet<String>>,
    progress: Arc<Progress>,
}

impl BatchRouter {
    fn admit(&self, hit: Hit) -> Admission {
        let accession_number = hit.accession_number();
        if !self.options.admits(accession_number) {
            return Admission::Skip;
        }

        let reference = match SubmissionReference::from_hit(&hit, &self.archives_url) {
            Ok(reference) => reference,
            Err(e) => return Admission::Unresolvable(e),
        };

        let first = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.accession_number.clone());
        if !first {
            return Admission::Duplicate;
        }
        Admission::Queue(Box::new(DocumentTask { hit, reference }))
    }
}

/// Keeps the fetch workers paused while alive.
struct ActiveBatch<'a>(&'a watch::Sender<usize>);

impl<'a> ActiveBatch<'a> {
    fn enter(pause: &'a watch::Sender<usize>) -> Self {
        pause.send_modify(|active| *active += 1);
        Self(pause)
    }
}

impl Drop for ActiveBatch<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|active| *active = active.saturating_sub(1));
    }
}

#[async_trait]
impl HitCallback for BatchRouter {
    async fn on_hits(&self, hits: Vec<Hit>) {
        let _active = ActiveBatch::enter(&self.pause);
        let _gate = self.gate.lock().await;

        let mut queued = 0;
        for hit in hits {
            match self.admit(hit) {
                Admission::Queue(task) => {
                    self.queue.push(*task);
                    queued += 1;
                }
                Admission::Skip => self.progress.document_skipped(),
                Admission::Duplicate => self.progress.duplicate_document(),
                Admission::Unresolvable(e) => {
                    warn!("Cannot locate filing for hit: {}", e);
                    self.progress.document_failed();
                }
            }
        }

        if queued > 0 {
            debug!(queued, "Waiting for document batch to drain");
            self.queue.join().await;
        }
    }
}

async fn document_worker(
    efts: Efts,
    queue: Arc<WorkQueue<DocumentTask>>,
    callback: Arc<dyn DocumentCallback>,
    progress: Arc<Progress>,
) {
    let headers = HeaderMap::new();
    loop {
        let task = queue.pop().await;

        match efts.fetch(&task.reference.url, &headers).await {
            Ok(content) => {
                let DocumentTask { hit, reference } = task;
                callback
                    .on_document(FilingDocument {
                        hit,
                        content,
                        cik: reference.cik,
                        accession_number: reference.accession_number,
                        url: reference.url,
                    })
                    .await;
                progress.document_completed();
            }
            Err(EftsError::RateLimited { retry_after, .. }) => {
                warn!(
                    "Rate limit hit (429) for {}. Waiting for {:?} before retry.",
                    task.reference.url, retry_after
                );
                sleep(backoff(retry_after)).await;
                queue.push(task);
            }
            Err(e) => {
                error!("Failed to download {}: {}", task.reference.url, e);
                progress.document_failed();
            }
        }
        queue.task_done();
    }
}
