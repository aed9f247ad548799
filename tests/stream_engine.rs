#![cfg(feature = "stream")]

mod common;

use common::{ARCHIVES_URL, FakeEfts, day, efts};
use eftskit::{DocumentCallback, EftsError, FilingDocument, QueryFilter, StreamOptions, Streamer};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn collecting_callback() -> (Arc<dyn DocumentCallback>, Arc<Mutex<Vec<FilingDocument>>>) {
    let documents = Arc::new(Mutex::new(Vec::new()));
    let collected = Arc::clone(&documents);
    let callback = move |document: FilingDocument| {
        let collected = Arc::clone(&collected);
        async move {
            collected.lock().unwrap().push(document);
        }
    };
    (Arc::new(callback), documents)
}

fn ten_k_filter() -> QueryFilter {
    QueryFilter::new()
        .with_form_type("10-K")
        .with_date(day(2023, 1, 1))
}

#[tokio::test]
async fn streams_every_filing_with_bounded_backlog() {
    let fake = Arc::new(FakeEfts::new().with_docs(320193, "10-K", 250, day(2023, 1, 1), 1));
    let (callback, documents) = collecting_callback();
    let streamer = Streamer::new(efts(Arc::clone(&fake)), callback);

    let report = streamer.stream(&ten_k_filter()).await.unwrap();

    assert_eq!(report.query.hits.len(), 250);
    assert_eq!(report.documents_downloaded, 250);
    assert_eq!(report.documents_failed, 0);
    assert!(report.peak_queued_documents <= 100);
    assert!(report.peak_queued_documents > 0);

    let documents = documents.lock().unwrap();
    assert_eq!(documents.len(), 250);
    let first = &documents[0];
    assert_eq!(first.cik, "320193");
    assert!(first.url.starts_with(ARCHIVES_URL));
    assert_eq!(
        first.content,
        format!("<SEC-DOCUMENT>{}.txt</SEC-DOCUMENT>", first.accession_number).into_bytes()
    );
}

#[tokio::test]
async fn allow_list_excluding_every_hit_downloads_nothing() {
    let fake = Arc::new(FakeEfts::new().with_docs(320193, "10-K", 3, day(2023, 1, 1), 1));
    let (callback, documents) = collecting_callback();
    let streamer = Streamer::new(efts(Arc::clone(&fake)), callback)
        .with_options(StreamOptions::new().with_allowed_accessions(["0000000001-23-999999"]));

    let report = streamer.stream(&ten_k_filter()).await.unwrap();

    assert_eq!(report.documents_skipped, 3);
    assert_eq!(report.documents_failed, 0);
    assert_eq!(report.documents_downloaded, 0);
    assert!(documents.lock().unwrap().is_empty());
    assert!(fake.document_requests().is_empty());
}

#[tokio::test]
async fn skip_list_is_applied() {
    let fake = FakeEfts::new().with_docs(320193, "10-K", 3, day(2023, 1, 1), 1);
    let skipped = fake.docs()[1].accession.clone();
    let fake = Arc::new(fake);
    let (callback, documents) = collecting_callback();
    let streamer = Streamer::new(efts(Arc::clone(&fake)), callback)
        .with_options(StreamOptions::new().with_skipped_accessions([skipped.clone()]));

    let report = streamer.stream(&ten_k_filter()).await.unwrap();

    assert_eq!(report.documents_skipped, 1);
    assert_eq!(report.documents_downloaded, 2);
    assert!(
        documents
            .lock()
            .unwrap()
            .iter()
            .all(|d| d.accession_number != skipped)
    );
}

#[tokio::test]
async fn failed_download_is_counted_not_fatal() {
    let fake = FakeEfts::new().with_docs(320193, "10-K", 3, day(2023, 1, 1), 1);
    let failing = fake.docs()[0].accession.clone();
    let fake = Arc::new(fake.with_failing_accession(&failing));
    let (callback, documents) = collecting_callback();
    let streamer = Streamer::new(efts(Arc::clone(&fake)), callback);

    let report = streamer.stream(&ten_k_filter()).await.unwrap();

    assert_eq!(report.documents_downloaded, 2);
    assert_eq!(report.documents_failed, 1);
    assert_eq!(documents.lock().unwrap().len(), 2);
    assert_eq!(fake.document_requests().len(), 3, "failures are not retried");
}

#[tokio::test(start_paused = true)]
async fn rate_limited_download_is_requeued_after_backoff() {
    let fake = Arc::new(
        FakeEfts::new()
            .with_docs(320193, "10-K", 3, day(2023, 1, 1), 1)
            .with_rate_limit_once(ARCHIVES_URL, Duration::from_secs(5)),
    );
    let (callback, documents) = collecting_callback();
    let streamer = Streamer::new(efts(Arc::clone(&fake)), callback);

    let report = streamer.stream(&ten_k_filter()).await.unwrap();

    assert_eq!(report.documents_downloaded, 3);
    assert_eq!(report.documents_failed, 0);
    assert_eq!(documents.lock().unwrap().len(), 3);

    let attempts = fake.document_requests();
    assert_eq!(attempts.len(), 4);
    let limited = &attempts[0].url;
    let retry = attempts[1..]
        .iter()
        .find(|r| &r.url == limited)
        .expect("rate-limited document should be requested again");
    assert!(retry.at.duration_since(attempts[0].at) >= Duration::from_secs(5));
}

#[tokio::test]
async fn each_accession_is_downloaded_once() {
    let base = FakeEfts::new().with_docs(320193, "10-K", 1, day(2023, 1, 1), 1);
    let mut exhibit = base.docs()[0].clone();
    exhibit.file_name = "ex21.htm".to_string();
    let fake = Arc::new(base.with_doc(exhibit));
    let (callback, documents) = collecting_callback();
    let streamer = Streamer::new(efts(Arc::clone(&fake)), callback);

    let report = streamer.stream(&ten_k_filter()).await.unwrap();

    assert_eq!(report.query.hits.len(), 2);
    assert_eq!(report.documents_downloaded, 1);
    assert_eq!(report.duplicate_documents, 1);
    assert_eq!(documents.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn empty_allow_list_is_rejected() {
    let fake = Arc::new(FakeEfts::new());
    let (callback, _) = collecting_callback();
    let streamer = Streamer::new(efts(Arc::clone(&fake)), callback)
        .with_options(StreamOptions::new().with_allowed_accessions(Vec::<String>::new()));

    let result = streamer.stream(&ten_k_filter()).await;

    assert!(matches!(result, Err(EftsError::InvalidFilter(_))));
    assert!(fake.requests().is_empty());
}
