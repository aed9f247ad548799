use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::info;

use super::Efts;

/// How often the live progress line is logged.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Counters shared by every worker of one run.
#[derive(Debug, Default)]
pub struct Progress {
    pages_completed: AtomicUsize,
    pages_failed: AtomicUsize,
    hits_received: AtomicU64,
    documents_completed: AtomicUsize,
    documents_failed: AtomicUsize,
    documents_skipped: AtomicUsize,
    duplicate_documents: AtomicUsize,
}

/// Point-in-time copy of [`Progress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub pages_completed: usize,
    pub pages_failed: usize,
    pub hits_received: u64,
    pub documents_completed: usize,
    pub documents_failed: usize,
    pub documents_skipped: usize,
    pub duplicate_documents: usize,
}

impl Progress {
    pub fn page_completed(&self, hits: usize) {
        self.pages_completed.fetch_add(1, Ordering::Relaxed);
        self.hits_received.fetch_add(hits as u64, Ordering::Relaxed);
    }

    pub fn page_failed(&self) {
        self.pages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn document_completed(&self) {
        self.documents_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn document_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn document_skipped(&self) {
        self.documents_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate_document(&self) {
        self.duplicate_documents.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            pages_completed: self.pages_completed.load(Ordering::Relaxed),
            pages_failed: self.pages_failed.load(Ordering::Relaxed),
            hits_received: self.hits_received.load(Ordering::Relaxed),
            documents_completed: self.documents_completed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            documents_skipped: self.documents_skipped.load(Ordering::Relaxed),
            duplicate_documents: self.duplicate_documents.load(Ordering::Relaxed),
        }
    }
}

/// Spawns the periodic progress logger, or nothing in quiet mode. Abort the handle when the
/// run ends.
pub(crate) fn spawn_reporter(
    efts: &Efts,
    progress: Arc<Progress>,
    total_pages: usize,
    documents: bool,
) -> Option<JoinHandle<()>> {
    if efts.config().quiet {
        return None;
    }

    let efts = efts.clone();
    Some(tokio::spawn(async move {
        let mut ticker = interval(PROGRESS_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let s = progress.snapshot();
            if documents {
                info!(
                    "Progress: pages {}/{} ({} failed) | documents {} done, {} failed, {} skipped | {}",
                    s.pages_completed,
                    total_pages,
                    s.pages_failed,
                    s.documents_completed,
                    s.documents_failed,
                    s.documents_skipped,
                    efts.rates()
                );
            } else {
                info!(
                    "Progress: pages {}/{} ({} failed) | {} hits | {}",
                    s.pages_completed,
                    total_pages,
                    s.pages_failed,
                    s.hits_received,
                    efts.rates()
                );
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let progress = Progress::default();
        progress.page_completed(100);
        progress.page_completed(42);
        progress.page_failed();
        progress.document_skipped();

        let s = progress.snapshot();
        assert_eq!(s.pages_completed, 2);
        assert_eq!(s.pages_failed, 1);
        assert_eq!(s.hits_received, 142);
        assert_eq!(s.documents_skipped, 1);
        assert_eq!(s.documents_completed, 0);
    }
}
