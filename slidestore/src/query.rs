//! Query façade: tier selection, cluster fan-out, merge, fold and format.
//!
//! A query names one or more series keys of a single metric kind and asks
//! either for the current statistics ([`QueryRange::Instant`]) or for
//! statistics over a time range ([`QueryRange::Range`]). Every
//! [`SlideSource`] (one per cluster node) is asked for every key; whatever
//! is found is merged into one slide, folded over the range and formatted.
//!
//! # Fault Tolerance
//!
//! A node that fails to answer is logged, treated as holding nothing and
//! reported in [`QueryResult::failed_nodes`]. It never aborts the query.
//! Missing data is not an error either: if no node has any of the keys the
//! outcome is [`QueryOutcome::NotFound`].
//!
//! # Example Usage
//!
//! ```rust
//! use slidestore::policy::RetentionPolicies;
//! use slidestore::query::{Query, QueryOutcome, QueryRange, SlideSource};
//! use slidestore::range::Range;
//! use slidestore::store::{MetricsStore, SeriesKey};
//! use slidestore::values::{MetricKind, Values};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let policies = RetentionPolicies::default();
//! let node_a = MetricsStore::with_node("rabbit@a", policies.clone());
//! let node_b = MetricsStore::with_node("rabbit@b", policies.clone());
//!
//! let key = SeriesKey::new(MetricKind::QueueStatsPublish, "orders");
//! for ts in [5_000, 10_000, 15_000] {
//!     node_a.record(&key, ts, Values::from([10]))?;
//!     node_b.record(&key, ts, Values::from([1]))?;
//! }
//!
//! let sources: [&dyn SlideSource; 2] = [&node_a, &node_b];
//! let range = QueryRange::Range(Range::new(5_000, 15_000, 5_000)?);
//! match Query::new(&policies).run(&sources, &[key], &range, 15_000)? {
//!     QueryOutcome::Found(result) => {
//!         assert_eq!(result.stats().field("publish").unwrap().total, 33);
//!         assert!(result.failed_nodes().is_empty());
//!     }
//!     QueryOutcome::NotFound => unreachable!(),
//! }
//! # Ok(())
//! # }
//! ```

use serde::Serialize;

use crate::error::{NodeError, QueryError, Result, ShapeError};
use crate::format::{Stats, format_stats};
use crate::merge::sum;
use crate::policy::{RetentionPolicies, select_tier};
use crate::range::{Range, fold_range};
use crate::slide::Slide;
use crate::store::SeriesKey;

/// What a query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRange {
    /// Current totals and instant rates only.
    Instant,
    /// Statistics over a range of ticks.
    Range(Range),
}

impl QueryRange {
    /// Returns the tick increment of a range query.
    pub fn incr(&self) -> Option<u64> {
        match self {
            Self::Instant => None,
            Self::Range(range) => Some(range.incr),
        }
    }
}

/// A holder of slides, typically one cluster node.
pub trait SlideSource {
    /// Returns the node name, used in logs and failure reports.
    fn node(&self) -> &str;

    /// Returns a snapshot of one tier of a key's slides.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError`] if the node cannot answer.
    fn fetch(&self, key: &SeriesKey, tier: usize) -> std::result::Result<Option<Slide>, NodeError>;
}

/// Result of a query that found data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// The formatted statistics.
    stats: Stats,

    /// Which tier index was used for this query.
    tier_used: usize,

    /// Oldest and newest observable sample of the merged slide.
    available_range: (Option<u64>, Option<u64>),

    /// Whether data may be incomplete due to retention limits.
    may_be_incomplete: bool,

    /// Nodes that failed to answer.
    failed_nodes: Vec<String>,
}

impl QueryResult {
    /// Returns the formatted statistics.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Consumes the result and returns the statistics.
    pub fn into_stats(self) -> Stats {
        self.stats
    }

    /// Returns the tier index that was used for this query.
    pub fn tier_used(&self) -> usize {
        self.tier_used
    }

    /// Returns `(oldest, newest)` timestamps observable in the merged slide.
    pub fn available_range(&self) -> (Option<u64>, Option<u64>) {
        self.available_range
    }

    /// Returns whether the query result may be incomplete.
    ///
    /// This is `true` when a range query starts before the oldest sample the
    /// selected tier still holds.
    pub fn may_be_incomplete(&self) -> bool {
        self.may_be_incomplete
    }

    /// Returns the nodes that failed to answer and were left out.
    pub fn failed_nodes(&self) -> &[String] {
        &self.failed_nodes
    }
}

/// Outcome of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// At least one node held at least one of the keys.
    Found(QueryResult),
    /// No node held any of the keys.
    NotFound,
}

impl QueryOutcome {
    /// Returns the result if data was found.
    pub fn found(self) -> Option<QueryResult> {
        match self {
            Self::Found(result) => Some(result),
            Self::NotFound => None,
        }
    }

    /// Returns `true` if data was found.
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Runs queries against a set of slide sources.
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    policies: &'a RetentionPolicies,
}

impl<'a> Query<'a> {
    /// Creates a query runner using the given retention policies for tier
    /// selection.
    pub fn new(policies: &'a RetentionPolicies) -> Self {
        Self { policies }
    }

    /// Runs a query.
    ///
    /// # Arguments
    ///
    /// * `sources` - Every node to ask
    /// * `keys` - Series to aggregate; all must share one metric kind
    /// * `range` - Instant or range query
    /// * `now` - Query time in milliseconds
    ///
    /// # Errors
    ///
    /// - [`QueryError::NoKeys`] if `keys` is empty
    /// - [`ShapeError::KindMismatch`] if the keys mix metric kinds
    /// - [`QueryError`] for an invalid range
    /// - [`PolicyError::UnknownPolicy`](crate::error::PolicyError::UnknownPolicy)
    ///   if the kind has no retention policy
    /// - [`ShapeError`] if the found slides cannot be merged
    pub fn run(
        &self,
        sources: &[&dyn SlideSource],
        keys: &[SeriesKey],
        range: &QueryRange,
        now: u64,
    ) -> Result<QueryOutcome> {
        let (first_key, rest) = keys.split_first().ok_or(QueryError::NoKeys)?;
        let kind = first_key.kind;
        if let Some(other) = rest.iter().find(|key| key.kind != kind) {
            return Err(ShapeError::KindMismatch {
                expected: kind.to_string(),
                actual: other.kind.to_string(),
            }
            .into());
        }
        if let QueryRange::Range(range) = range {
            range.validate()?;
        }

        let tier = select_tier(self.policies.tiers_for(kind)?, range.incr());

        let mut found = Vec::new();
        let mut failed_nodes = Vec::new();
        for source in sources {
            match fetch_all(*source, keys, tier) {
                Ok(slides) => found.extend(slides),
                Err(err) => {
                    tracing::warn!("skipping node in {kind} query: {err}");
                    failed_nodes.push(source.node().to_string());
                }
            }
        }

        if found.is_empty() {
            tracing::debug!("no {kind} data for {} key(s) on tier {tier}", keys.len());
            return Ok(QueryOutcome::NotFound);
        }

        let merged = sum(&found)?;
        let history = merged.to_list();
        let available_range = (
            history.last().map(|s| s.timestamp),
            history.first().map(|s| s.timestamp),
        );

        let (fold, may_be_incomplete) = match range {
            QueryRange::Instant => (None, false),
            QueryRange::Range(range) => {
                let (_, incomplete) = analyze_coverage(
                    available_range.0,
                    available_range.1,
                    range.first,
                    range.last,
                );
                (Some(fold_range(&merged, range)?), incomplete)
            }
        };

        let stats = format_stats(kind, &merged, fold.as_ref(), now)?;

        Ok(QueryOutcome::Found(QueryResult {
            stats,
            tier_used: tier,
            available_range,
            may_be_incomplete,
            failed_nodes,
        }))
    }
}

/// Fetches every key from one source; any failure makes the whole node absent.
fn fetch_all(
    source: &dyn SlideSource,
    keys: &[SeriesKey],
    tier: usize,
) -> std::result::Result<Vec<Slide>, NodeError> {
    let mut slides = Vec::new();
    for key in keys {
        if let Some(slide) = source.fetch(key, tier)? {
            slides.push(slide);
        }
    }
    Ok(slides)
}

/// Determines if a time range is covered by the retained history.
///
/// # Arguments
///
/// * `oldest` - The oldest timestamp available (None if empty)
/// * `newest` - The newest timestamp available (None if empty)
/// * `start` - Start of the requested range
/// * `end` - End of the requested range
///
/// # Returns
///
/// `(fully_covered, may_be_incomplete)` where:
/// - `fully_covered` - True if the entire range is within retention
/// - `may_be_incomplete` - True if some data might be missing
pub fn analyze_coverage(
    oldest: Option<u64>,
    newest: Option<u64>,
    start: u64,
    end: u64,
) -> (bool, bool) {
    match (oldest, newest) {
        (Some(oldest_ts), Some(newest_ts)) => {
            let fully_covered = start >= oldest_ts && end <= newest_ts;

            // Ending after the newest sample is expected for queries over the
            // present, so only the start counts.
            let may_be_incomplete = start < oldest_ts;

            (fully_covered, may_be_incomplete)
        }
        _ => (false, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SlideStoreError;
    use crate::store::MetricsStore;
    use crate::values::{MetricKind, Values};

    struct DownNode;

    impl SlideSource for DownNode {
        fn node(&self) -> &str {
            "rabbit@down"
        }

        fn fetch(&self, _key: &SeriesKey, _tier: usize) -> std::result::Result<Option<Slide>, NodeError> {
            Err(NodeError {
                node: "rabbit@down".to_string(),
                reason: "timeout".to_string(),
            })
        }
    }

    fn store_with_publishes(node: &str, per_write: i64) -> MetricsStore {
        let store = MetricsStore::with_node(node, RetentionPolicies::default());
        let key = SeriesKey::new(MetricKind::QueueStatsPublish, "orders");
        for ts in [5_000, 10_000, 15_000] {
            store.record(&key, ts, Values::from([per_write])).unwrap();
        }
        store
    }

    #[test]
    fn test_analyze_coverage_full_coverage() {
        let (fully_covered, incomplete) = analyze_coverage(Some(1000), Some(5000), 2000, 4000);
        assert!(fully_covered);
        assert!(!incomplete);
    }

    #[test]
    fn test_analyze_coverage_starts_too_early() {
        let (fully_covered, incomplete) = analyze_coverage(Some(2000), Some(5000), 1000, 4000);
        assert!(!fully_covered);
        assert!(incomplete);
    }

    #[test]
    fn test_analyze_coverage_ends_too_late() {
        let (fully_covered, incomplete) = analyze_coverage(Some(1000), Some(3000), 2000, 5000);
        assert!(!fully_covered);
        assert!(!incomplete);
    }

    #[test]
    fn test_analyze_coverage_no_data() {
        let (fully_covered, incomplete) = analyze_coverage(None, None, 1000, 2000);
        assert!(!fully_covered);
        assert!(incomplete);
    }

    #[test]
    fn test_instant_query_merges_nodes() {
        let policies = RetentionPolicies::default();
        let a = store_with_publishes("rabbit@a", 10);
        let b = store_with_publishes("rabbit@b", 1);
        let key = SeriesKey::new(MetricKind::QueueStatsPublish, "orders");

        let result = Query::new(&policies)
            .run(&[&a, &b], &[key], &QueryRange::Instant, 15_000)
            .unwrap()
            .found()
            .unwrap();

        let publish = result.stats().field("publish").unwrap();
        assert_eq!(publish.total, 33);
        // (33 - 22) over 5 s
        assert_eq!(publish.details.rate, 2.2);
        assert_eq!(result.tier_used(), 0);
        // The first write only opened a bucket, so 10 s is the oldest commit.
        assert_eq!(result.available_range(), (Some(10_000), Some(15_000)));
        assert!(!result.may_be_incomplete());
    }

    #[test]
    fn test_failed_node_is_skipped_and_reported() {
        let policies = RetentionPolicies::default();
        let a = store_with_publishes("rabbit@a", 10);
        let key = SeriesKey::new(MetricKind::QueueStatsPublish, "orders");

        let result = Query::new(&policies)
            .run(&[&a, &DownNode], &[key], &QueryRange::Instant, 15_000)
            .unwrap()
            .found()
            .unwrap();

        assert_eq!(result.stats().fields()[0].total, 30);
        assert_eq!(result.failed_nodes(), ["rabbit@down".to_string()]);
    }

    #[test]
    fn test_missing_keys_are_not_found() {
        let policies = RetentionPolicies::default();
        let a = store_with_publishes("rabbit@a", 10);
        let key = SeriesKey::new(MetricKind::QueueStatsPublish, "payments");

        let outcome = Query::new(&policies)
            .run(&[&a, &DownNode], &[key], &QueryRange::Instant, 15_000)
            .unwrap();
        assert_eq!(outcome, QueryOutcome::NotFound);
    }

    #[test]
    fn test_invalid_queries_are_rejected() {
        let policies = RetentionPolicies::default();
        let a = store_with_publishes("rabbit@a", 10);
        let query = Query::new(&policies);

        assert!(matches!(
            query.run(&[&a], &[], &QueryRange::Instant, 0).unwrap_err(),
            SlideStoreError::Query(QueryError::NoKeys)
        ));

        let mixed = [
            SeriesKey::new(MetricKind::QueueStatsPublish, "orders"),
            SeriesKey::new(MetricKind::QueueMsgCounts, "orders"),
        ];
        assert!(matches!(
            query.run(&[&a], &mixed, &QueryRange::Instant, 0).unwrap_err(),
            SlideStoreError::Shape(ShapeError::KindMismatch { .. })
        ));

        let inverted = QueryRange::Range(Range {
            first: 10,
            last: 5,
            incr: 5,
        });
        assert!(matches!(
            query.run(&[&a], &mixed[..1], &inverted, 0).unwrap_err(),
            SlideStoreError::Query(QueryError::InvalidRange { first: 10, last: 5 })
        ));

        let huge = QueryRange::Range(Range {
            first: 0,
            last: u64::MAX,
            incr: 1,
        });
        assert!(matches!(
            query.run(&[&a], &mixed[..1], &huge, 0).unwrap_err(),
            SlideStoreError::Query(QueryError::TooManyTicks { .. })
        ));
    }

    #[test]
    fn test_range_query_reports_incomplete_history() {
        let policies = RetentionPolicies::default();
        let a = store_with_publishes("rabbit@a", 10);
        let key = SeriesKey::new(MetricKind::QueueStatsPublish, "orders");
        let range = QueryRange::Range(Range::new(0, 15_000, 5_000).unwrap());

        let result = Query::new(&policies)
            .run(&[&a], &[key], &range, 15_000)
            .unwrap()
            .found()
            .unwrap();

        assert!(result.may_be_incomplete());
        let details = result.stats().fields()[0].details.range.as_ref().unwrap();
        let samples: Vec<i64> = details.samples.iter().map(|s| s.sample).collect();
        // Nothing was committed at 5 s, so that tick is skipped.
        assert_eq!(samples, vec![30, 20, 0]);
    }
}
