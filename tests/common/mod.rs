#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use eftskit::{Efts, EftsConfig, EftsError, EftsUrls, HttpGet};
use reqwest::header::HeaderMap;
use serde_json::{Value, json};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::time::Instant;

pub const SEARCH_URL: &str = "https://efts.test/LATEST/search-index";
pub const ARCHIVES_URL: &str = "https://archives.test/Archives/edgar";

const HARD_CAP: usize = 10_000;

pub fn fixture_path(relative: impl AsRef<Path>) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(relative)
}

pub fn read_fixture(relative: impl AsRef<Path>) -> String {
    fs::read_to_string(fixture_path(relative)).expect("fixture file should be readable")
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// One indexed document of the fake search service.
#[derive(Debug, Clone)]
pub struct FakeDoc {
    pub accession: String,
    pub file_name: String,
    pub cik: String,
    pub form: String,
    pub date: NaiveDate,
}

impl FakeDoc {
    pub fn id(&self) -> String {
        format!("{}:{}", self.accession, self.file_name)
    }
}

/// A request seen by the fake, stamped with tokio's clock.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub at: Instant,
}

/// In-memory stand-in for EFTS and the EDGAR archives.
///
/// Form matching follows the live service: a positive term `F` matches `F` and `F/A`, a negated
/// term excludes one exact form, and `-0` excludes nothing here. Totals stop at 10,000 with a
/// `gte` relation and pages past the cap come back empty.
#[derive(Default)]
pub struct FakeEfts {
    docs: Vec<FakeDoc>,
    entities: Vec<(String, String)>,
    top_buckets: usize,
    rate_limited: Mutex<HashMap<String, Duration>>,
    failing_accessions: HashSet<String>,
    requests: Mutex<Vec<Request>>,
}

impl FakeEfts {
    pub fn new() -> Self {
        Self {
            top_buckets: 10,
            ..Default::default()
        }
    }

    /// Adds `count` documents of `form` for `cik`, spread round-robin over `days` days
    /// starting at `start`. Every document gets its own accession number.
    pub fn with_docs(mut self, cik: u64, form: &str, count: usize, start: NaiveDate, days: u64) -> Self {
        let offset = self.docs.len();
        for i in 0..count {
            let n = offset + i;
            self.docs.push(FakeDoc {
                accession: format!("{:010}-{:02}-{:06}", cik, 23, n),
                file_name: format!("doc{}.htm", n),
                cik: format!("{:010}", cik),
                form: form.to_string(),
                date: start + Days::new(i as u64 % days.max(1)),
            });
        }
        self
    }

    pub fn with_doc(mut self, doc: FakeDoc) -> Self {
        self.docs.push(doc);
        self
    }

    pub fn with_entity(mut self, name: &str, cik: &str) -> Self {
        self.entities.push((name.to_string(), cik.to_string()));
        self
    }

    /// Number of buckets the form aggregation reports before folding the rest into
    /// `sum_other_doc_count`.
    pub fn with_top_buckets(mut self, top_buckets: usize) -> Self {
        self.top_buckets = top_buckets;
        self
    }

    /// The first request whose URL contains `pattern` gets a 429 with `retry_after`.
    pub fn with_rate_limit_once(self, pattern: &str, retry_after: Duration) -> Self {
        self.rate_limited
            .lock()
            .unwrap()
            .insert(pattern.to_string(), retry_after);
        self
    }

    pub fn with_failing_accession(mut self, accession: &str) -> Self {
        self.failing_accessions.insert(accession.to_string());
        self
    }

    pub fn docs(&self) -> &[FakeDoc] {
        &self.docs
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_matching(&self, pattern: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.contains(pattern))
            .collect()
    }

    pub fn search_requests(&self) -> Vec<Request> {
        self.requests_matching(SEARCH_URL)
    }

    pub fn document_requests(&self) -> Vec<Request> {
        self.requests_matching(ARCHIVES_URL)
    }

    fn search(&self, query: &str) -> Value {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap();
        let params: HashMap<String, String> = pairs.into_iter().collect();

        if let Some(typed) = params.get("keysTyped") {
            return self.entity_search(typed);
        }

        let matching: Vec<&FakeDoc> = self
            .docs
            .iter()
            .filter(|doc| matches(doc, &params))
            .collect();

        let from: usize = params.get("from").map_or(0, |v| v.parse().unwrap());
        let size: usize = params.get("size").map_or(100, |v| v.parse().unwrap());
        let end = (from + size).min(matching.len()).min(HARD_CAP);
        let page: Vec<Value> = matching
            .get(from.min(end)..end)
            .unwrap_or_default()
            .iter()
            .map(|doc| hit_json(doc))
            .collect();

        let mut counts: HashMap<&str, u64> = HashMap::new();
        for doc in &matching {
            *counts.entry(doc.form.as_str()).or_default() += 1;
        }
        let mut buckets: Vec<(&str, u64)> = counts.into_iter().collect();
        buckets.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        let shown = buckets.len().min(self.top_buckets);
        let sum_other: u64 = buckets[shown..].iter().map(|b| b.1).sum();

        let total = matching.len();
        json!({
            "took": 3,
            "timed_out": false,
            "hits": {
                "total": {
                    "value": total.min(HARD_CAP),
                    "relation": if total > HARD_CAP { "gte" } else { "eq" }
                },
                "max_score": null,
                "hits": page
            },
            "aggregations": {
                "form_filter": {
                    "doc_count_error_upper_bound": 0,
                    "sum_other_doc_count": sum_other,
                    "buckets": buckets[..shown]
                        .iter()
                        .map(|(key, count)| json!({"key": key, "doc_count": count}))
                        .collect::<Vec<_>>()
                }
            }
        })
    }

    fn entity_search(&self, typed: &str) -> Value {
        let typed = typed.to_lowercase();
        let hits: Vec<Value> = self
            .entities
            .iter()
            .filter(|(name, _)| name.to_lowercase().contains(&typed))
            .map(|(name, cik)| {
                json!({"_id": cik, "_source": {"entity": name, "tickers": ""}})
            })
            .collect();
        json!({"hits": {"total": {"value": hits.len()}, "hits": hits}})
    }

    fn document(&self, url: &str) -> eftskit::Result<Vec<u8>> {
        let accession = url
            .rsplit('/')
            .next()
            .and_then(|name| name.strip_suffix(".txt"))
            .unwrap_or_default();

        if self.failing_accessions.contains(accession) {
            return Err(EftsError::InvalidResponse(format!(
                "Unexpected status code: 500 Internal Server Error for URL: {}",
                url
            )));
        }
        if !self.docs.iter().any(|doc| doc.accession == accession) {
            return Err(EftsError::NotFound(url.to_string()));
        }
        Ok(format!("<SEC-DOCUMENT>{}.txt</SEC-DOCUMENT>", accession).into_bytes())
    }
}

#[async_trait]
impl HttpGet for FakeEfts {
    async fn get(&self, url: &str, _headers: &HeaderMap) -> eftskit::Result<Vec<u8>> {
        self.requests.lock().unwrap().push(Request {
            url: url.to_string(),
            at: Instant::now(),
        });

        let limited = {
            let mut rate_limited = self.rate_limited.lock().unwrap();
            let pattern = rate_limited.keys().find(|p| url.contains(p.as_str())).cloned();
            pattern.and_then(|p| rate_limited.remove(&p))
        };
        if let Some(retry_after) = limited {
            return Err(EftsError::RateLimited {
                url: url.to_string(),
                retry_after,
            });
        }

        if let Some(query) = url.strip_prefix(SEARCH_URL).and_then(|rest| rest.strip_prefix('?')) {
            return Ok(serde_json::to_vec(&self.search(query)).unwrap());
        }
        if url.starts_with(ARCHIVES_URL) {
            return self.document(url);
        }
        Err(EftsError::NotFound(url.to_string()))
    }
}

fn matches(doc: &FakeDoc, params: &HashMap<String, String>) -> bool {
    if let Some(ciks) = params.get("ciks") {
        if !ciks.split(',').any(|cik| cik == doc.cik) {
            return false;
        }
    }
    if let Some(start) = params.get("startdt") {
        if doc.date < NaiveDate::parse_from_str(start, "%Y-%m-%d").unwrap() {
            return false;
        }
    }
    if let Some(end) = params.get("enddt") {
        if doc.date > NaiveDate::parse_from_str(end, "%Y-%m-%d").unwrap() {
            return false;
        }
    }
    if let Some(forms) = params.get("forms") {
        let mut positives = Vec::new();
        for term in forms.split(',') {
            match term.strip_prefix('-') {
                Some("0") => {}
                Some(excluded) if excluded == doc.form => return false,
                Some(_) => {}
                None => positives.push(term),
            }
        }
        if !positives.is_empty()
            && !positives
                .iter()
                .any(|p| doc.form == *p || doc.form == format!("{}/A", p))
        {
            return false;
        }
    }
    true
}

fn hit_json(doc: &FakeDoc) -> Value {
    json!({
        "_index": "edgar_file",
        "_id": doc.id(),
        "_score": null,
        "_source": {
            "ciks": [doc.cik],
            "display_names": [format!("Company {}  (CIK {})", doc.cik, doc.cik)],
            "sequence": "1",
            "root_forms": [doc.form],
            "file_date": doc.date.to_string(),
            "form": doc.form,
            "adsh": doc.accession,
            "file_type": doc.form
        }
    })
}

/// Client over `fake` with pacing fast enough to be irrelevant and no progress output.
pub fn efts(fake: Arc<FakeEfts>) -> Efts {
    Efts::with_transport(config(), fake).unwrap()
}

pub fn config() -> EftsConfig {
    EftsConfig::new("test_agent example@example.com", 1_000_000.0)
        .with_quiet(true)
        .with_base_urls(EftsUrls {
            search: SEARCH_URL.to_string(),
            archives: ARCHIVES_URL.to_string(),
        })
}
