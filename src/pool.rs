//! FIFO work queue and the page-fetch worker pool.
//!
//! [`WorkQueue`] follows the familiar "join" queue contract: every `push` adds one unit of
//! unfinished work, every popped item must be acknowledged with [`WorkQueue::task_done`], and
//! [`WorkQueue::join`] resolves once the unfinished count returns to zero. A requeue is a `push`
//! followed by the `task_done` of the original pop, so `join` can never observe zero while a
//! rate-limited page is sleeping.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, warn};

use super::Efts;
use super::error::EftsError;
use super::progress::Progress;
use super::search::SearchParams;
use super::traits::HitCallback;

/// Upper bound of the random delay added to a server-directed backoff.
const BACKOFF_JITTER_MS: u64 = 250;

/// One page of one planned sub-query.
#[derive(Clone)]
pub struct PlannedPage {
    pub params: Arc<SearchParams>,
    pub from: u32,
    pub size: u32,
    pub callback: Arc<dyn HitCallback>,
}

impl std::fmt::Debug for PlannedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedPage")
            .field("params", &self.params)
            .field("from", &self.from)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    unfinished: usize,
    high_water: usize,
}

/// Unbounded FIFO queue with task accounting.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    item_ready: Notify,
    all_done: Notify,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                unfinished: 0,
                high_water: 0,
            }),
            item_ready: Notify::new(),
            all_done: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        {
            let mut state = self.lock();
            state.items.push_back(item);
            state.unfinished += 1;
            state.high_water = state.high_water.max(state.items.len());
        }
        self.item_ready.notify_one();
    }

    /// Waits for the next item.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.item_ready.notified().await;
        }
    }

    fn try_pop(&self) -> Option<T> {
        let mut state = self.lock();
        let item = state.items.pop_front()?;
        if !state.items.is_empty() {
            // a single stored permit may stand for several pushes
            self.item_ready.notify_one();
        }
        Some(item)
    }

    /// Marks one popped item as finished.
    pub fn task_done(&self) {
        let mut state = self.lock();
        state.unfinished = state.unfinished.saturating_sub(1);
        if state.unfinished == 0 {
            self.all_done.notify_waiters();
        }
    }

    /// Waits until every pushed item has been marked finished.
    pub async fn join(&self) {
        loop {
            let mut done = pin!(self.all_done.notified());
            done.as_mut().enable();
            if self.lock().unfinished == 0 {
                return;
            }
            done.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most items ever waiting in the queue at once.
    pub fn high_water(&self) -> usize {
        self.lock().high_water
    }
}

/// Server-directed backoff plus a little jitter so sleeping workers do not wake in lockstep.
pub(crate) fn backoff(retry_after: Duration) -> Duration {
    retry_after + Duration::from_millis(fastrand::u64(0..=BACKOFF_JITTER_MS))
}

/// Fetch worker: pops pages until aborted.
///
/// With a `pause` receiver the worker holds off dequeuing while the counter is non-zero. A
/// rate-limited page is requeued unchanged after this worker alone sleeps out the backoff; any
/// other failure drops the page.
pub(crate) async fn page_worker(
    efts: Efts,
    queue: Arc<WorkQueue<PlannedPage>>,
    progress: Arc<Progress>,
    mut pause: Option<watch::Receiver<usize>>,
) {
    loop {
        if let Some(ref mut pause) = pause {
            let _ = pause.wait_for(|active| *active == 0).await;
        }
        let page = queue.pop().await;

        match efts.search_page(&page.params, page.from, page.size).await {
            Ok(response) => {
                let hits = response.hits.hits;
                progress.page_completed(hits.len());
                page.callback.on_hits(hits).await;
            }
            Err(EftsError::RateLimited { retry_after, .. }) => {
                warn!(
                    "Rate limit hit (429) for page {} of {}. Waiting for {:?} before retry.",
                    page.from / page.size.max(1),
                    page.params,
                    retry_after
                );
                sleep(backoff(retry_after)).await;
                queue.push(page);
            }
            Err(e) => {
                error!(
                    "Dropping page at offset {} of {}: {}",
                    page.from, page.params, e
                );
                progress.page_failed();
            }
        }
        queue.task_done();
    }
}

/// Cancels every worker and waits for them to stop. Cancellations are expected and ignored.
pub(crate) async fn shutdown(mut workers: JoinSet<()>) {
    workers.abort_all();
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            if !e.is_cancelled() {
                error!("Worker task failed: {}", e);
            }
        }
    }
}
