use async_trait::async_trait;
use chrono::Local;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::Efts;
use super::error::Result;
use super::filter::QueryFilter;
use super::planner::{LeafOrigin, Plan, QueryPlanner};
use super::pool::{PlannedPage, WorkQueue, page_worker, shutdown};
use super::progress::{Progress, spawn_reporter};
use super::search::Hit;
use super::traits::HitCallback;

/// Outcome of one [`Efts::query_with_report`] run.
#[derive(Debug, Clone, Default)]
pub struct QueryReport {
    /// Every unique hit received, in arrival order
    pub hits: Vec<Hit>,
    /// Sum of the root probes' aggregated totals
    pub true_total: u64,
    /// Hits the plan expected to page through
    pub planned_hits: u64,
    pub planned_pages: usize,
    pub leaf_queries: usize,
    /// Leaves produced by negation sweeps
    pub negation_leaves: usize,
    /// Deepest split level any leaf was planned at
    pub max_leaf_depth: u32,
    /// Forms handed to form-split sub-queries, in the order they were consumed
    pub consumed_forms: Vec<String>,
    pub negation_sweeps: usize,
    /// Leaves accepted while still over the hit cap
    pub exhausted_queries: usize,
    pub failed_probes: usize,
    pub pages_failed: usize,
    /// Hits whose `_id` had already been received
    pub duplicates_dropped: usize,
}

impl QueryReport {
    /// True when nothing was knowingly lost: no exhausted leaf, failed probe or dropped page.
    pub fn is_complete(&self) -> bool {
        self.exhausted_queries == 0 && self.failed_probes == 0 && self.pages_failed == 0
    }
}

/// Per-run wiring shared with the streamer.
pub(crate) struct RunContext {
    pub progress: Arc<Progress>,
    /// Non-zero while fetch workers must hold off dequeuing
    pub pause: Option<watch::Receiver<usize>>,
    /// Include document counters in progress lines
    pub documents: bool,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            progress: Arc::new(Progress::default()),
            pause: None,
            documents: false,
        }
    }
}

#[derive(Default)]
struct Collected {
    ids: HashSet<String>,
    hits: Vec<Hit>,
    duplicates: usize,
}

/// Aggregates every page into the run's hit list and forwards the raw page to the caller.
struct Collector {
    collected: Mutex<Collected>,
    forward: Option<Arc<dyn HitCallback>>,
}

impl Collector {
    fn new(forward: Option<Arc<dyn HitCallback>>) -> Self {
        Self {
            collected: Mutex::new(Collected::default()),
            forward,
        }
    }

    fn take(&self) -> Collected {
        std::mem::take(&mut *self.collected.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl HitCallback for Collector {
    async fn on_hits(&self, hits: Vec<Hit>) {
        {
            let mut collected = self
                .collected
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for hit in &hits {
                if collected.ids.insert(hit.id.clone()) {
                    collected.hits.push(hit.clone());
                } else {
                    collected.duplicates += 1;
                }
            }
        }
        if let Some(ref forward) = self.forward {
            forward.on_hits(hits).await;
        }
    }
}

impl Efts {
    /// Runs `filter` to completion and returns every unique hit.
    ///
    /// Over-limit filters are planned into sub-queries that each stay under the API's hit cap,
    /// then every page is fetched by the worker pool. `callback`, if any, receives each page as
    /// it arrives, before this method returns.
    ///
    /// Failures of individual pages are logged and leave a gap in the result rather than
    /// failing the run; use [`query_with_report`](Self::query_with_report) to see them.
    ///
    /// # Errors
    ///
    /// Returns `EftsError::InvalidFilter` before any request for a contradictory filter, or
    /// the error of a root probe that could not be completed.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use eftskit::{Efts, QueryFilter};
    /// # use chrono::NaiveDate;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let efts = Efts::new("my_app/1.0 (my@email.com)")?;
    /// let day = NaiveDate::from_ymd_opt(2023, 1, 3).unwrap();
    /// let filter = QueryFilter::new().with_form_type("8-K").with_date(day);
    ///
    /// let hits = efts.query(&filter, None).await?;
    /// println!("{} hits", hits.len());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn query(
        &self,
        filter: &QueryFilter,
        callback: Option<Arc<dyn HitCallback>>,
    ) -> Result<Vec<Hit>> {
        Ok(self.query_with_report(filter, callback).await?.hits)
    }

    /// Like [`query`](Self::query), returning the planning and fetch statistics too.
    pub async fn query_with_report(
        &self,
        filter: &QueryFilter,
        callback: Option<Arc<dyn HitCallback>>,
    ) -> Result<QueryReport> {
        self.run_query(filter, callback, RunContext::default()).await
    }

    pub(crate) async fn run_query(
        &self,
        filter: &QueryFilter,
        callback: Option<Arc<dyn HitCallback>>,
        context: RunContext,
    ) -> Result<QueryReport> {
        filter.validate()?;

        let resolved = match filter.name {
            Some(ref name) => {
                let ciks = self.resolve_ciks(name).await?;
                if ciks.is_empty() {
                    warn!("No company found matching {:?}", name);
                    return Ok(QueryReport::default());
                }
                Some(ciks)
            }
            None => None,
        };

        let roots = filter.to_search_params(resolved.as_deref(), Local::now().date_naive())?;
        let planner = QueryPlanner::new(self);
        let mut plan = Plan::default();
        for root in roots {
            planner.plan_into(root, &mut plan).await?;
        }

        let limits = self.limits();
        let collector = Arc::new(Collector::new(callback));
        let queue = Arc::new(WorkQueue::new());
        for leaf in &plan.leaves {
            for (from, size) in leaf.page_offsets(limits) {
                queue.push(PlannedPage {
                    params: Arc::clone(&leaf.params),
                    from,
                    size,
                    callback: Arc::clone(&collector) as Arc<dyn HitCallback>,
                });
            }
        }

        let planned_pages = queue.len();
        let planned_hits = plan.planned_hits(limits);
        self.log_summary(format_args!(
            "Planned {} pages over {} sub-queries ({} hits, {} negation sweeps)",
            planned_pages,
            plan.leaves.len(),
            planned_hits,
            plan.negation_sweeps
        ));

        if planned_pages > 0 {
            let reporter = spawn_reporter(
                self,
                Arc::clone(&context.progress),
                planned_pages,
                context.documents,
            );

            let mut workers = JoinSet::new();
            for _ in 0..self.config.fetch_workers {
                workers.spawn(page_worker(
                    self.clone(),
                    Arc::clone(&queue),
                    Arc::clone(&context.progress),
                    context.pause.clone(),
                ));
            }
            queue.join().await;
            shutdown(workers).await;

            if let Some(reporter) = reporter {
                reporter.abort();
            }
        }

        let collected = collector.take();
        let progress = context.progress.snapshot();
        let report = QueryReport {
            hits: collected.hits,
            true_total: plan.true_total,
            planned_hits,
            planned_pages,
            leaf_queries: plan.leaves.len(),
            negation_leaves: plan
                .leaves
                .iter()
                .filter(|leaf| leaf.origin == LeafOrigin::Negation)
                .count(),
            max_leaf_depth: plan.leaves.iter().map(|leaf| leaf.depth).max().unwrap_or(0),
            consumed_forms: plan.consumed_forms,
            negation_sweeps: plan.negation_sweeps,
            exhausted_queries: plan.exhausted.len(),
            failed_probes: plan.failed_probes,
            pages_failed: progress.pages_failed,
            duplicates_dropped: collected.duplicates,
        };

        self.log_summary(format_args!(
            "Query complete: {} unique hits of {} reported ({} pages failed, {} duplicates) | {}",
            report.hits.len(),
            report.true_total,
            report.pages_failed,
            report.duplicates_dropped,
            self.rates()
        ));
        if report.exhausted_queries > 0 {
            warn!(
                "{} sub-queries stayed over the hit cap; results may be incomplete",
                report.exhausted_queries
            );
        }
        Ok(report)
    }

    fn log_summary(&self, message: std::fmt::Arguments<'_>) {
        if self.config.quiet {
            debug!("{}", message);
        } else {
            info!("{}", message);
        }
    }
}
