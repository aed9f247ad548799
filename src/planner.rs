//! Recursive query planning around the search API's hit ceiling.
//!
//! EFTS will neither count nor page past 10,000 hits for one query, so any filter with more
//! matches than that has to be broken into disjoint sub-queries that each stay under the cap.
//! The planner probes a filter with a page-size-1 request and then either accepts it as a leaf
//! or splits it:
//!
//! 1. **Form buckets.** The probe's `form_filter` aggregation is grouped greedily (largest
//!    bucket first) into groups whose summed count stays under `split_margin`, and each group
//!    becomes a narrowed sub-query.
//! 2. **Date bisection.** Without a usable breakdown the date span is cut into contiguous,
//!    non-overlapping day ranges.
//!
//! The aggregation only reports its top buckets. Whatever it folds into
//! `sum_other_doc_count` is invisible to the form split, so when a primary-documents query is
//! split by form and the leaves account for fewer hits than the aggregated total, a negation
//! sweep queries "everything except the forms already consumed" over the same span.
//!
//! Recursion is bounded by `max_depth`. A query still over the cap at that depth, or a single
//! day that cannot be bisected further, is accepted as-is with a warning.

use chrono::{Days, NaiveDate};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::Efts;
use super::config::PlannerLimits;
use super::error::Result;
use super::filter::{amendment_exclusion, push_unique};
use super::search::{Bucket, SearchParams, SearchResponse};

/// How an over-limit query is split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitStrategy {
    /// Narrow to each group of form types; `other_count` is what the aggregation left out.
    FormBuckets {
        groups: Vec<Vec<String>>,
        other_count: u64,
    },
    /// Cut the date span into `splits` sub-ranges.
    DateBisect { splits: usize },
}

impl SplitStrategy {
    /// Prefers a form split whenever the breakdown yields more than one group.
    pub fn choose(probe: &SearchResponse, limits: &PlannerLimits) -> Self {
        if let Some(agg) = probe.form_buckets() {
            let groups = form_groups(&agg.buckets, limits.split_margin);
            if groups.len() > 1 {
                return SplitStrategy::FormBuckets {
                    groups,
                    other_count: agg.sum_other_doc_count,
                };
            }
        }
        SplitStrategy::DateBisect {
            splits: limits.date_splits,
        }
    }
}

/// Why a leaf exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafOrigin {
    /// The query was small enough as given
    Direct,
    /// Produced by a form or date split
    Split,
    /// Produced by a negation sweep
    Negation,
}

/// A planned sub-query small enough to page through.
#[derive(Debug, Clone)]
pub struct PlanLeaf {
    pub params: Arc<SearchParams>,
    /// Hits reported by the leaf's probe
    pub hits: u64,
    pub depth: u32,
    pub origin: LeafOrigin,
}

impl PlanLeaf {
    /// Hits that can actually be paged through.
    pub fn fetchable_hits(&self, limits: &PlannerLimits) -> u64 {
        self.hits.min(limits.hard_cap)
    }

    /// `(from, size)` of every page of this leaf.
    pub fn page_offsets(&self, limits: &PlannerLimits) -> Vec<(u32, u32)> {
        let page_size = u64::from(limits.page_size);
        let pages = self
            .fetchable_hits(limits)
            .div_ceil(page_size)
            .min(u64::from(limits.max_pages));

        (0..pages)
            .map(|page| ((page * page_size) as u32, limits.page_size))
            .collect()
    }
}

/// Outcome of planning one or more root queries.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub leaves: Vec<PlanLeaf>,
    /// Forms handed to form-split sub-queries, in the order they were consumed
    pub consumed_forms: Vec<String>,
    /// Aggregated totals of the root probes
    pub true_total: u64,
    pub negation_sweeps: usize,
    /// Leaves accepted while still over the cap
    pub exhausted: Vec<Arc<SearchParams>>,
    pub failed_probes: usize,
}

impl Plan {
    pub fn planned_hits(&self, limits: &PlannerLimits) -> u64 {
        self.leaves.iter().map(|l| l.fetchable_hits(limits)).sum()
    }

    pub fn page_count(&self, limits: &PlannerLimits) -> usize {
        self.leaves.iter().map(|l| l.page_offsets(limits).len()).sum()
    }

    fn push_leaf(&mut self, params: SearchParams, hits: u64, depth: u32, origin: LeafOrigin) {
        if hits == 0 {
            return;
        }
        self.leaves.push(PlanLeaf {
            params: Arc::new(params),
            hits,
            depth,
            origin,
        });
    }

    fn leaf_hits_since(&self, mark: usize, limits: &PlannerLimits) -> u64 {
        self.leaves[mark..]
            .iter()
            .map(|l| l.fetchable_hits(limits))
            .sum()
    }
}

/// Plans sub-queries for the client it borrows.
pub struct QueryPlanner<'a> {
    efts: &'a Efts,
    limits: &'a PlannerLimits,
    quiet: bool,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(efts: &'a Efts) -> Self {
        Self {
            efts,
            limits: efts.limits(),
            quiet: efts.config().quiet,
        }
    }

    /// Plans `root` into `plan`.
    ///
    /// Only a failure of the root probe is returned; failures deeper down are logged, counted
    /// in `failed_probes`, and leave that subtree out.
    pub async fn plan_into(&self, root: SearchParams, plan: &mut Plan) -> Result<()> {
        let probe = self.efts.probe(&root).await?;
        if probe.total_hits() == 0 {
            self.note(format_args!("No results found for {}", root));
            return Ok(());
        }

        let true_total = probe.aggregated_total();
        plan.true_total += true_total;
        self.note(format_args!("Found {} total documents to retrieve for {}", true_total, root));

        self.plan_node(root, Some(probe), 0, LeafOrigin::Direct, plan).await;
        Ok(())
    }

    /// Plans a single root query.
    pub async fn plan(&self, root: SearchParams) -> Result<Plan> {
        let mut plan = Plan::default();
        self.plan_into(root, &mut plan).await?;
        Ok(plan)
    }

    fn plan_node<'p>(
        &'p self,
        params: SearchParams,
        probe: Option<SearchResponse>,
        depth: u32,
        origin: LeafOrigin,
        plan: &'p mut Plan,
    ) -> BoxFuture<'p, ()> {
        Box::pin(async move {
            let Some(probe) = self.probe_or_skip(&params, probe, plan).await else {
                return;
            };
            let total = probe.total_hits();
            self.note(format_args!(
                "Planning: analyzing {}query: {} [{} hits]",
                "  ".repeat(depth as usize),
                params,
                total
            ));

            if !exceeds_cap(&probe, self.limits.hard_cap) {
                plan.push_leaf(params, total, depth, origin);
                return;
            }
            if depth >= self.limits.max_depth {
                self.accept_exhausted(params, total, depth, origin, plan, "maximum depth reached");
                return;
            }

            match SplitStrategy::choose(&probe, self.limits) {
                SplitStrategy::FormBuckets {
                    groups,
                    other_count,
                } => {
                    debug!(
                        groups = groups.len(),
                        other_count, "Splitting {} by form buckets", params
                    );
                    let mark = plan.leaves.len();
                    let mut consumed = Vec::new();

                    for group in groups {
                        let child = params.with_forms(narrow_forms(&params, &group));
                        for form in group {
                            push_unique(&mut consumed, form.clone());
                            push_unique(&mut plan.consumed_forms, form);
                        }
                        self.plan_node(child, None, depth + 1, LeafOrigin::Split, &mut *plan)
                            .await;
                    }

                    let enumerated = plan.leaf_hits_since(mark, self.limits);
                    let aggregated = probe.aggregated_total();
                    if params.is_primary_documents() && enumerated < aggregated {
                        self.note(format_args!(
                            "Planning: analyzing remaining primary document forms using negation (~{} hits)",
                            aggregated - enumerated
                        ));
                        plan.negation_sweeps += 1;
                        let swept = params.with_forms(negation_forms(&params, &consumed));
                        self.sweep(swept, None, 0, &mut *plan).await;
                    }
                }
                SplitStrategy::DateBisect { splits } => {
                    let ranges = split_date_range(params.start_date, params.end_date, splits);
                    if ranges.len() < 2 {
                        self.accept_exhausted(params, total, depth, origin, plan, "single day");
                        return;
                    }
                    for (start, end) in ranges {
                        let child = params.with_date_range(start, end);
                        self.plan_node(child, None, depth + 1, LeafOrigin::Split, &mut *plan)
                            .await;
                    }
                }
            }
        })
    }

    /// Negation sweep: date bisection only, with the wider negation fan-out.
    fn sweep<'p>(
        &'p self,
        params: SearchParams,
        probe: Option<SearchResponse>,
        depth: u32,
        plan: &'p mut Plan,
    ) -> BoxFuture<'p, ()> {
        Box::pin(async move {
            let Some(probe) = self.probe_or_skip(&params, probe, plan).await else {
                return;
            };
            let total = probe.total_hits();
            if total == 0 {
                self.note(format_args!("Skipping negated forms query - no results returned"));
                return;
            }
            self.note(format_args!(
                "Planning: analyzing negated forms query (depth {}): {} to {} [{} hits]",
                depth, params.start_date, params.end_date, total
            ));

            if !exceeds_cap(&probe, self.limits.hard_cap) {
                plan.push_leaf(params, total, depth, LeafOrigin::Negation);
                return;
            }
            if depth >= self.limits.max_depth {
                self.accept_exhausted(params, total, depth, LeafOrigin::Negation, plan, "maximum depth reached");
                return;
            }

            let ranges = split_date_range(
                params.start_date,
                params.end_date,
                self.limits.negation_date_splits,
            );
            if ranges.len() < 2 {
                self.accept_exhausted(params, total, depth, LeafOrigin::Negation, plan, "single day");
                return;
            }
            for (start, end) in ranges {
                let child = params.with_date_range(start, end);
                self.sweep(child, None, depth + 1, &mut *plan).await;
            }
        })
    }

    async fn probe_or_skip(
        &self,
        params: &SearchParams,
        probe: Option<SearchResponse>,
        plan: &mut Plan,
    ) -> Option<SearchResponse> {
        if probe.is_some() {
            return probe;
        }
        match self.efts.probe(params).await {
            Ok(probe) => Some(probe),
            Err(e) => {
                error!("Probe failed for {}, skipping this sub-query: {}", params, e);
                plan.failed_probes += 1;
                None
            }
        }
    }

    fn accept_exhausted(
        &self,
        params: SearchParams,
        total: u64,
        depth: u32,
        origin: LeafOrigin,
        plan: &mut Plan,
        reason: &str,
    ) {
        warn!(
            depth,
            hits = total,
            "Planning exhausted ({}): accepting {} as-is, results may be incomplete",
            reason,
            params
        );
        let params = Arc::new(params);
        plan.exhausted.push(Arc::clone(&params));
        plan.leaves.push(PlanLeaf {
            params,
            hits: total,
            depth,
            origin,
        });
    }

    fn note(&self, message: std::fmt::Arguments<'_>) {
        if self.quiet {
            debug!("{}", message);
        } else {
            info!("{}", message);
        }
    }
}

/// True when the probe's count cannot be paged through in one query.
pub fn exceeds_cap(probe: &SearchResponse, hard_cap: u64) -> bool {
    let total = probe.total_hits();
    total > hard_cap || (total >= hard_cap && probe.is_lower_bound())
}

/// Greedy grouping of buckets, largest first, starting a new group whenever adding the next
/// bucket would push the current one over `max_count`. A single bucket larger than
/// `max_count` gets a group of its own.
pub fn form_groups(buckets: &[Bucket], max_count: u64) -> Vec<Vec<String>> {
    let mut sorted: Vec<&Bucket> = buckets.iter().collect();
    sorted.sort_by(|a, b| b.doc_count.cmp(&a.doc_count));

    let mut groups = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_count = 0;

    for bucket in sorted {
        if !current.is_empty() && current_count + bucket.doc_count > max_count {
            groups.push(std::mem::take(&mut current));
            current_count = 0;
        }
        current.push(bucket.key.clone());
        current_count += bucket.doc_count;
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Splits `[start, end]` into at most `splits` contiguous, non-overlapping day ranges of near
/// equal length. A single day (or an inverted range) comes back unchanged.
pub fn split_date_range(start: NaiveDate, end: NaiveDate, splits: usize) -> Vec<(NaiveDate, NaiveDate)> {
    if end <= start || splits < 2 {
        return vec![(start, end)];
    }

    let days = (end - start).num_days() as u64 + 1;
    let parts = days.min(splits as u64);
    let base = days / parts;
    let extra = days % parts;

    let mut ranges = Vec::with_capacity(parts as usize);
    let mut cursor = start;
    for i in 0..parts {
        let len = base + u64::from(i < extra);
        let last = cursor + Days::new(len - 1);
        ranges.push((cursor, last));
        cursor = last + Days::new(1);
    }
    ranges
}

/// Form terms for a form-group sub-query: the group, an amendment exclusion for each member
/// whose amendment is not itself in the group, and every exclusion the parent already carried.
pub fn narrow_forms(parent: &SearchParams, group: &[String]) -> Vec<String> {
    let mut forms = Vec::with_capacity(group.len() * 2);
    for form in group {
        push_unique(&mut forms, form.clone());
    }
    for form in group {
        if let Some(exclusion) = amendment_exclusion(form) {
            if !group.iter().any(|g| exclusion[1..] == **g) {
                push_unique(&mut forms, exclusion);
            }
        }
    }
    for negated in parent.negated_forms() {
        if !group.iter().any(|g| negated[1..] == **g) {
            push_unique(&mut forms, negated.to_string());
        }
    }
    forms
}

/// Form terms for a negation sweep: the node's own exclusions plus the negation of every
/// consumed form.
pub fn negation_forms(node: &SearchParams, consumed: &[String]) -> Vec<String> {
    let mut forms: Vec<String> = node.negated_forms().map(str::to_string).collect();
    for form in consumed {
        push_unique(&mut forms, format!("-{}", form));
    }
    forms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bucket(key: &str, doc_count: u64) -> Bucket {
        Bucket {
            key: key.to_string(),
            doc_count,
        }
    }

    fn probe(json: &str) -> SearchResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_form_groups_greedy() {
        let buckets = vec![
            bucket("4", 5000),
            bucket("8-K", 8000),
            bucket("10-Q", 6000),
            bucket("SC 13G", 500),
            bucket("S-1", 300),
        ];
        let groups = form_groups(&buckets, 9000);

        assert_eq!(
            groups,
            vec![
                vec!["8-K".to_string()],
                vec!["10-Q".to_string()],
                vec!["4".to_string(), "SC 13G".to_string(), "S-1".to_string()],
            ]
        );
    }

    #[test]
    fn test_form_groups_oversized_bucket_stands_alone() {
        let groups = form_groups(&[bucket("8-K", 25_000), bucket("4", 100)], 9000);
        assert_eq!(groups, vec![vec!["8-K".to_string()], vec!["4".to_string()]]);
    }

    #[test]
    fn test_split_date_range_is_disjoint_and_complete() {
        let ranges = split_date_range(day(2023, 1, 1), day(2023, 1, 10), 4);
        assert_eq!(
            ranges,
            vec![
                (day(2023, 1, 1), day(2023, 1, 3)),
                (day(2023, 1, 4), day(2023, 1, 6)),
                (day(2023, 1, 7), day(2023, 1, 8)),
                (day(2023, 1, 9), day(2023, 1, 10)),
            ]
        );

        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1 + Days::new(1), pair[1].0);
        }
    }

    #[test]
    fn test_split_date_range_short_spans() {
        assert_eq!(
            split_date_range(day(2023, 1, 1), day(2023, 1, 1), 4),
            vec![(day(2023, 1, 1), day(2023, 1, 1))]
        );
        assert_eq!(split_date_range(day(2023, 1, 1), day(2023, 1, 2), 10).len(), 2);
    }

    #[test]
    fn test_choose_prefers_form_buckets() {
        let limits = PlannerLimits::default();
        let response = probe(
            r#"{"hits": {"total": {"value": 10000, "relation": "gte"}, "hits": []},
                "aggregations": {"form_filter": {"sum_other_doc_count": 700,
                  "buckets": [{"key": "8-K", "doc_count": 8000}, {"key": "4", "doc_count": 6000}]}}}"#,
        );

        assert_eq!(
            SplitStrategy::choose(&response, &limits),
            SplitStrategy::FormBuckets {
                groups: vec![vec!["8-K".to_string()], vec!["4".to_string()]],
                other_count: 700,
            }
        );
    }

    #[test]
    fn test_choose_falls_back_to_dates() {
        let limits = PlannerLimits::default();
        let single_bucket = probe(
            r#"{"hits": {"total": {"value": 10000, "relation": "gte"}, "hits": []},
                "aggregations": {"form_filter": {"buckets": [{"key": "8-K", "doc_count": 30000}]}}}"#,
        );
        let no_aggregation =
            probe(r#"{"hits": {"total": {"value": 10000, "relation": "gte"}, "hits": []}}"#);

        for response in [single_bucket, no_aggregation] {
            assert_eq!(
                SplitStrategy::choose(&response, &limits),
                SplitStrategy::DateBisect { splits: 4 }
            );
        }
    }

    #[test]
    fn test_exceeds_cap_uses_relation() {
        let exact = probe(r#"{"hits": {"total": {"value": 10000, "relation": "eq"}, "hits": []}}"#);
        let bound = probe(r#"{"hits": {"total": {"value": 10000, "relation": "gte"}, "hits": []}}"#);
        let small = probe(r#"{"hits": {"total": {"value": 3}, "hits": []}}"#);

        assert!(!exceeds_cap(&exact, 10_000));
        assert!(exceeds_cap(&bound, 10_000));
        assert!(!exceeds_cap(&small, 10_000));
    }

    #[test]
    fn test_page_offsets() {
        let limits = PlannerLimits::default();
        let leaf = |hits| PlanLeaf {
            params: Arc::new(SearchParams::new(day(2023, 1, 1), day(2023, 1, 1))),
            hits,
            depth: 0,
            origin: LeafOrigin::Direct,
        };

        assert_eq!(leaf(3).page_offsets(&limits), vec![(0, 100)]);
        assert_eq!(leaf(250).page_offsets(&limits).len(), 3);
        assert_eq!(leaf(250).page_offsets(&limits)[2], (200, 100));
        assert_eq!(leaf(10_000).page_offsets(&limits).len(), 100);
        assert_eq!(leaf(45_000).page_offsets(&limits).len(), 100);
    }

    #[test]
    fn test_narrow_forms_keeps_groups_disjoint() {
        let parent = SearchParams::new(day(2023, 1, 1), day(2023, 12, 31))
            .with_forms(vec!["-0".to_string()]);

        assert_eq!(
            narrow_forms(&parent, &["10-K".to_string()]),
            vec!["10-K", "-10-K/A", "-0"]
        );
        assert_eq!(
            narrow_forms(&parent, &["10-K".to_string(), "10-K/A".to_string()]),
            vec!["10-K", "10-K/A", "-0"]
        );
    }

    #[test]
    fn test_negation_forms() {
        let node = SearchParams::new(day(2023, 1, 1), day(2023, 12, 31))
            .with_forms(vec!["-0".to_string()]);
        let consumed = vec!["8-K".to_string(), "10-Q".to_string(), "4".to_string()];

        assert_eq!(
            negation_forms(&node, &consumed),
            vec!["-0", "-8-K", "-10-Q", "-4"]
        );
    }
}
