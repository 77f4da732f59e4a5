//! Integration tests for cluster-wide queries.
//!
//! Several [`MetricsStore`]s play the role of cluster nodes; queries fan out
//! across them, merge what they find and format the result.

use slidestore::error::NodeError;
use slidestore::query::{Query, QueryOutcome, QueryRange, SlideSource};
use slidestore::range::Range;
use slidestore::slide::Slide;
use slidestore::store::{MetricsStore, SeriesKey};
use slidestore::values::{MetricKind, Values};
use slidestore::RetentionPolicies;

/// A node that is reachable but answers every request with an error.
struct Partitioned<'a> {
    inner: &'a MetricsStore,
}

impl SlideSource for Partitioned<'_> {
    fn node(&self) -> &str {
        self.inner.node()
    }

    fn fetch(&self, _key: &SeriesKey, _tier: usize) -> Result<Option<Slide>, NodeError> {
        Err(NodeError {
            node: self.inner.node().to_string(),
            reason: "net split".to_string(),
        })
    }
}

fn churn(created: i64) -> Values {
    Values::from([created, 0, 0, 0, 0, 0, 0])
}

fn cluster(nodes: &[&str]) -> Vec<MetricsStore> {
    nodes
        .iter()
        .map(|node| MetricsStore::with_node(*node, RetentionPolicies::default()))
        .collect()
}

#[test]
fn test_churn_across_nodes_and_tiers() {
    let policies = RetentionPolicies::default();
    let nodes = cluster(&["rabbit@a", "rabbit@b", "rabbit@c"]);
    let key = SeriesKey::new(MetricKind::ConnectionChurnRates, "cluster");

    for node in &nodes {
        for ts in (0..=60_000).step_by(5_000) {
            node.record(&key, ts, churn(1)).unwrap();
        }
    }
    let sources: Vec<&dyn SlideSource> = nodes.iter().map(|n| n as &dyn SlideSource).collect();
    let query = Query::new(&policies);

    // Instant queries read the 5 s tier.
    let instant = query
        .run(&sources, std::slice::from_ref(&key), &QueryRange::Instant, 60_000)
        .unwrap()
        .found()
        .unwrap();
    let created = instant.stats().field("connection_created").unwrap();
    assert_eq!(instant.tier_used(), 0);
    assert_eq!(created.total, 39);
    // Newest merged bucket of 3 over 5 s.
    assert_eq!(created.details.rate, 0.6);

    // A one-minute step reads the 60 s tier.
    let range = QueryRange::Range(Range::new(0, 60_000, 60_000).unwrap());
    let minute = query
        .run(&sources, &[key], &range, 60_000)
        .unwrap()
        .found()
        .unwrap();
    assert_eq!(minute.tier_used(), 1);

    let created = minute.stats().field("connection_created").unwrap();
    assert_eq!(created.total, 39);
    let details = created.details.range.as_ref().unwrap();
    let samples: Vec<(u64, i64)> = details.samples.iter().map(|s| (s.timestamp, s.sample)).collect();
    assert_eq!(samples, vec![(60_000, 39), (0, 0)]);
    assert_eq!(details.avg, 19.5);
}

#[test]
fn test_offset_node_clocks_merge() {
    let policies = RetentionPolicies::default();
    let nodes = cluster(&["rabbit@a", "rabbit@b"]);
    let key = SeriesKey::new(MetricKind::QueueStatsPublish, "orders");

    for ts in (0..=30_000).step_by(5_000) {
        nodes[0].record(&key, ts, Values::from([1])).unwrap();
        // Node b's clock runs one second ahead.
        nodes[1].record(&key, ts + 1_000, Values::from([10])).unwrap();
    }

    let sources: [&dyn SlideSource; 2] = [&nodes[0], &nodes[1]];
    let result = Query::new(&policies)
        .run(&sources, &[key], &QueryRange::Instant, 31_000)
        .unwrap()
        .found()
        .unwrap();

    let publish = result.stats().field("publish").unwrap();
    assert_eq!(publish.total, 77);
    // (77 - 66) over 5 s
    assert_eq!(publish.details.rate, 2.2);
    assert_eq!(result.available_range(), (Some(5_000), Some(30_000)));
}

#[test]
fn test_owner_aggregate_query() {
    let policies = RetentionPolicies::default();
    let node = MetricsStore::with_node("rabbit@a", policies.clone());

    for exchange in ["amq.direct", "amq.topic", "events"] {
        let key = SeriesKey::new(MetricKind::QueueExchangeStatsPublish, exchange);
        for ts in [5_000, 10_000] {
            node.record_owned(&key, &["/"], ts, Values::from([2])).unwrap();
        }
    }
    let other = SeriesKey::new(MetricKind::QueueExchangeStatsPublish, "audit");
    node.record_owned(&other, &["staging"], 5_000, Values::from([100]))
        .unwrap();

    let keys = node.keys_for_owner("/");
    assert_eq!(keys.len(), 3);

    let result = Query::new(&policies)
        .run(&[&node], &keys, &QueryRange::Instant, 10_000)
        .unwrap()
        .found()
        .unwrap();
    assert_eq!(result.stats().field("publish").unwrap().total, 12);

    assert_eq!(node.delete_owner("/"), 3);
    let outcome = Query::new(&policies)
        .run(&[&node], &keys, &QueryRange::Instant, 10_000)
        .unwrap();
    assert_eq!(outcome, QueryOutcome::NotFound);
}

#[test]
fn test_partitioned_node_degrades_the_answer() {
    let policies = RetentionPolicies::default();
    let nodes = cluster(&["rabbit@a", "rabbit@b"]);
    let key = SeriesKey::new(MetricKind::QueueMsgCounts, "orders");

    nodes[0].record(&key, 5_000, Values::from([7, 5, 2])).unwrap();
    nodes[1].record(&key, 5_000, Values::from([3, 3, 0])).unwrap();

    let split = Partitioned { inner: &nodes[1] };
    let sources: [&dyn SlideSource; 2] = [&nodes[0], &split];
    let result = Query::new(&policies)
        .run(&sources, &[key.clone()], &QueryRange::Instant, 5_000)
        .unwrap()
        .found()
        .unwrap();

    assert_eq!(result.failed_nodes(), ["rabbit@b".to_string()]);
    assert_eq!(result.stats().field("messages").unwrap().total, 7);

    // Every node failing is indistinguishable from no data.
    let split_a = Partitioned { inner: &nodes[0] };
    let all_down: [&dyn SlideSource; 2] = [&split_a, &split];
    let outcome = Query::new(&policies)
        .run(&all_down, &[key], &QueryRange::Instant, 5_000)
        .unwrap();
    assert!(!outcome.is_found());
}

#[test]
fn test_stats_serialize_in_field_order() {
    let policies = RetentionPolicies::default();
    let node = MetricsStore::new(policies.clone());
    let key = SeriesKey::new(MetricKind::QueueMsgCounts, "orders");
    node.record(&key, 5_000, Values::from([4, 3, 1])).unwrap();

    let result = Query::new(&policies)
        .run(&[&node], &[key], &QueryRange::Instant, 5_000)
        .unwrap()
        .found()
        .unwrap();

    let json = serde_json::to_string(result.stats()).unwrap();
    let messages = json.find("\"messages\"").unwrap();
    let ready = json.find("\"messages_ready\"").unwrap();
    let unacked = json.find("\"messages_unacknowledged\"").unwrap();
    assert!(messages < ready && ready < unacked);
}
