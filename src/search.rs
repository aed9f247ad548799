//! Response model and request parameters for the EDGAR full-text search API.
//!
//! [`SearchResponse`] mirrors the Elasticsearch-shaped JSON returned by EFTS, including the
//! `form_filter` aggregation the planner uses to split oversized queries. [`SearchParams`] is
//! the concrete, already-expanded filter that one request (or one planned page) is issued for.
//!
//! # Examples
//!
//! ```rust
//! use chrono::NaiveDate;
//! use eftskit::SearchParams;
//!
//! let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
//! let params = SearchParams::new(day, day).with_forms(vec!["8-K".to_string()]);
//!
//! let pairs = params.to_query_params();
//! assert!(pairs.contains(&("forms".to_string(), "8-K".to_string())));
//! assert!(pairs.contains(&("startdt".to_string(), "2024-01-02".to_string())));
//! ```

use chrono::NaiveDate;
use serde::Deserialize;
use std::fmt;

use super::error::Result;

/// Response from the EDGAR search API
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    /// Time taken to execute the search in milliseconds
    #[serde(default)]
    pub took: u32,
    /// Whether the search timed out
    #[serde(default)]
    pub timed_out: bool,
    /// Search results containing matched documents
    pub hits: Hits,
    /// Bucketed counts, present for filing searches
    #[serde(default)]
    pub aggregations: Option<Aggregations>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hits {
    pub total: TotalHits,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TotalHits {
    pub value: u64,
    /// `eq` for an exact count, `gte` when the API stopped counting at its cap
    #[serde(default = "exact_relation")]
    pub relation: String,
}

fn exact_relation() -> String {
    "eq".to_string()
}

/// One matched document within a filing.
#[derive(Debug, Clone, Deserialize)]
pub struct Hit {
    #[serde(rename = "_index", default)]
    pub index: String,
    /// `accession_number:file_name`
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score", default)]
    pub score: Option<f64>,
    #[serde(rename = "_source", default)]
    pub source: Source,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Source {
    pub ciks: Vec<String>,
    pub period_ending: Option<String>,
    pub file_num: Option<Vec<String>>,
    pub display_names: Vec<String>,
    pub xsl: Option<String>,
    #[serde(deserialize_with = "deserialize_sequence")]
    pub sequence: u32,
    pub root_forms: Vec<String>,
    pub file_date: String,
    pub biz_states: Vec<String>,
    pub sics: Vec<String>,
    pub form: String,
    pub adsh: String,
    pub film_num: Vec<String>,
    pub biz_locations: Vec<String>,
    pub file_type: String,
    pub file_description: Option<String>,
    pub inc_states: Vec<String>,
    pub items: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Aggregations {
    #[serde(default)]
    pub form_filter: Option<BucketAggregation>,
}

/// Top buckets of a terms aggregation. Everything past the top buckets is folded into
/// `sum_other_doc_count`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BucketAggregation {
    #[serde(default)]
    pub buckets: Vec<Bucket>,
    #[serde(default)]
    pub sum_other_doc_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Bucket {
    pub key: String,
    pub doc_count: u64,
}

/// Custom deserializer for sequence field that can be either u32 or string
fn deserialize_sequence<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct SequenceVisitor;

    impl<'de> serde::de::Visitor<'de> for SequenceVisitor {
        type Value = u32;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("an integer or a string containing an integer")
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value as u32)
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            value.parse().map_err(serde::de::Error::custom)
        }
    }

    deserializer.deserialize_any(SequenceVisitor)
}

impl SearchResponse {
    /// Hit count as reported by the API, capped by the API at its hard limit.
    pub fn total_hits(&self) -> u64 {
        self.hits.total.value
    }

    /// True when the reported total is only a lower bound.
    pub fn is_lower_bound(&self) -> bool {
        self.hits.total.relation.eq_ignore_ascii_case("gte")
    }

    pub fn form_buckets(&self) -> Option<&BucketAggregation> {
        self.aggregations.as_ref()?.form_filter.as_ref()
    }

    /// True total from the form aggregation (buckets plus the "other" count), falling back to the
    /// reported hit total when no aggregation came back.
    pub fn aggregated_total(&self) -> u64 {
        match self.form_buckets() {
            Some(agg) => {
                agg.buckets.iter().map(|b| b.doc_count).sum::<u64>() + agg.sum_other_doc_count
            }
            None => self.total_hits(),
        }
    }
}

impl Hit {
    /// Dashed accession number, the part of `_id` before the colon.
    pub fn accession_number(&self) -> &str {
        self.id.split(':').next().unwrap_or_default()
    }

    /// Matched document's file name, the part of `_id` after the colon.
    pub fn file_name(&self) -> Option<&str> {
        self.id.split_once(':').map(|(_, name)| name)
    }

    pub fn primary_cik(&self) -> Option<&str> {
        self.source.ciks.first().map(String::as_str)
    }

    pub fn form(&self) -> &str {
        &self.source.form
    }

    pub fn filing_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.source.file_date, "%Y-%m-%d").ok()
    }
}

/// Response of the `keysTyped` entity lookup
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EntitySearchResponse {
    pub hits: EntityHits,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EntityHits {
    #[serde(default)]
    pub hits: Vec<EntityHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EntityHit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: EntitySource,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct EntitySource {
    pub entity: String,
    pub tickers: Option<String>,
}

/// A company matched by name lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMatch {
    pub entity: String,
    /// CIK as returned by the API
    pub id: String,
    pub tickers: Option<String>,
}

impl From<EntityHit> for EntityMatch {
    fn from(hit: EntityHit) -> Self {
        EntityMatch {
            entity: hit.source.entity,
            id: hit.id,
            tickers: hit.source.tickers.filter(|t| !t.is_empty()),
        }
    }
}

/// Concrete parameters of one search request.
///
/// Values are never mutated once planning starts: narrowing always builds a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    /// Full-text phrase (`q`)
    pub query: Option<String>,
    /// Zero-padded 10-digit CIKs
    pub ciks: Vec<String>,
    /// Form terms; a leading `-` negates a term
    pub forms: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub location_codes: Vec<String>,
}

impl SearchParams {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            query: None,
            ciks: Vec::new(),
            forms: Vec::new(),
            start_date,
            end_date,
            location_codes: Vec::new(),
        }
    }

    /// Copy of these parameters restricted to `forms`.
    pub fn with_forms(&self, forms: Vec<String>) -> Self {
        Self {
            forms,
            ..self.clone()
        }
    }

    /// Copy of these parameters restricted to `[start_date, end_date]`.
    pub fn with_date_range(&self, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            ..self.clone()
        }
    }

    /// Negated form terms (`-0`, `-10-K/A`, ...)
    pub fn negated_forms(&self) -> impl Iterator<Item = &str> {
        self.forms
            .iter()
            .map(String::as_str)
            .filter(|f| f.starts_with('-'))
    }

    /// True for a pure exclusion filter that keeps the primary-documents constraint, i.e. the
    /// default "everything" query or one of its date slices.
    pub fn is_primary_documents(&self) -> bool {
        self.forms.iter().any(|f| f == "-0") && self.forms.iter().all(|f| f.starts_with('-'))
    }

    pub fn to_query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();

        if let Some(ref query) = self.query {
            params.push(("q".to_string(), query.clone()));
        }

        if !self.ciks.is_empty() {
            params.push(("ciks".to_string(), self.ciks.join(",")));
        }

        if !self.forms.is_empty() {
            params.push(("forms".to_string(), self.forms.join(",")));
        }

        params.push(("startdt".to_string(), self.start_date.to_string()));
        params.push(("enddt".to_string(), self.end_date.to_string()));

        if !self.location_codes.is_empty() {
            params.push(("locationCodes".to_string(), self.location_codes.join(",")));
        }

        params
    }

    /// Encoded query string for one page of results.
    pub fn page_query(&self, from: u32, size: u32) -> Result<String> {
        let mut params = self.to_query_params();
        params.push(("from".to_string(), from.to_string()));
        params.push(("size".to_string(), size.to_string()));
        Ok(serde_urlencoded::to_string(&params)?)
    }
}

impl fmt::Display for SearchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(ref query) = self.query {
            parts.push(format!("q={}", query));
        }
        if !self.ciks.is_empty() {
            parts.push(format!("cik={}", self.ciks.join(",")));
        }
        if !self.forms.is_empty() {
            parts.push(format!("forms={}", self.forms.join(",")));
        }
        parts.push(format!("dates={} to {}", self.start_date, self.end_date));
        if !self.location_codes.is_empty() {
            parts.push(format!("location={}", self.location_codes.join(",")));
        }
        write!(f, "{}", parts.join(", "))
    }
}
