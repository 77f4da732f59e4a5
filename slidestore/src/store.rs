//! Keyed store of series slides.
//!
//! The store is the boundary between producers, the garbage collector and
//! the query layer. Producers record values under a [`SeriesKey`]; the store
//! creates one [`Slide`] per tier of the kind's retention policy on first
//! use. The garbage collector deletes keys, directly or through the owner
//! index, when the objects they describe go away.
//!
//! # Design
//!
//! - Each key maps to an `Arc<SeriesSlides>` inside a `parking_lot::RwLock`.
//!   Readers clone the `Arc` and get a consistent snapshot; the writer
//!   mutates through `Arc::make_mut`, which copies only while a reader still
//!   holds the old snapshot.
//! - A secondary index maps owners (a connection, a vhost, a queue) to the
//!   keys recorded on their behalf. It is updated under the same write lock
//!   as the primary map, so the two never disagree.
//! - After [`MetricsStore::shutdown`] every write is rejected.
//!
//! # Example Usage
//!
//! ```rust
//! use slidestore::policy::RetentionPolicies;
//! use slidestore::store::{MetricsStore, SeriesKey};
//! use slidestore::values::{MetricKind, Values};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MetricsStore::new(RetentionPolicies::default());
//! let key = SeriesKey::new(MetricKind::QueueMsgCounts, "vhost/orders");
//!
//! store.record_owned(&key, &["vhost"], 1_000, Values::from([10, 8, 2]))?;
//!
//! assert_eq!(store.series_count(), 1);
//! assert_eq!(store.delete_owner("vhost"), 1);
//! assert!(store.slides(&key).is_none());
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, RecordError, Result, ShapeError};
use crate::policy::{RetentionPolicies, TierConfig};
use crate::query::SlideSource;
use crate::slide::Slide;
use crate::values::{MetricKind, Values};

/// Node name a store reports when none is given.
pub const LOCAL_NODE: &str = "local";

/// Identifies one series: what is measured and about which object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    /// The metric kind, which fixes shape and retention.
    pub kind: MetricKind,
    /// The object the values describe, e.g. a queue or connection name.
    pub id: String,
}

impl SeriesKey {
    /// Creates a series key.
    pub fn new(kind: MetricKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// The slides of one series, one per retention tier, finest first.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSlides {
    kind: MetricKind,
    slides: Vec<Slide>,
}

impl SeriesSlides {
    fn new(kind: MetricKind, tiers: &[TierConfig], now: u64) -> Self {
        let slides = tiers
            .iter()
            .map(|tier| {
                let mut options = tier.slide_options(kind.mode());
                options.arity = Some(kind.arity());
                Slide::new(now, tier.span_ms(), options)
            })
            .collect();
        Self { kind, slides }
    }

    fn add_element(&mut self, timestamp: u64, values: &Values) -> Result<()> {
        for slide in &mut self.slides {
            slide.add_element(timestamp, values.clone())?;
        }
        Ok(())
    }

    /// Returns the metric kind.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Returns the slide of one tier.
    pub fn tier(&self, index: usize) -> Option<&Slide> {
        self.slides.get(index)
    }

    /// Returns all tier slides, finest first.
    pub fn tiers(&self) -> &[Slide] {
        &self.slides
    }
}

#[derive(Debug, Default)]
struct StoreState {
    series: HashMap<SeriesKey, Arc<SeriesSlides>>,
    owners: HashMap<String, HashSet<SeriesKey>>,
}

impl StoreState {
    fn unindex(&mut self, key: &SeriesKey) {
        self.owners.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
    }
}

/// In-memory store of every series' slides.
///
/// # Thread Safety
///
/// `MetricsStore` is `Send + Sync` and meant to be shared behind an `Arc`.
/// Each key must have a single producer; concurrent readers are unlimited.
#[derive(Debug)]
pub struct MetricsStore {
    node: String,
    policies: RetentionPolicies,
    state: RwLock<StoreState>,
    shut_down: AtomicBool,
}

impl MetricsStore {
    /// Creates an empty store reporting as [`LOCAL_NODE`].
    pub fn new(policies: RetentionPolicies) -> Self {
        Self::with_node(LOCAL_NODE, policies)
    }

    /// Creates an empty store reporting under a given node name.
    pub fn with_node(node: impl Into<String>, policies: RetentionPolicies) -> Self {
        Self {
            node: node.into(),
            policies,
            state: RwLock::new(StoreState::default()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Returns the retention policies the store was created with.
    pub fn policies(&self) -> &RetentionPolicies {
        &self.policies
    }

    /// Records values for a key.
    ///
    /// # Errors
    ///
    /// See [`MetricsStore::record_owned`].
    pub fn record(&self, key: &SeriesKey, timestamp: u64, values: Values) -> Result<()> {
        self.record_owned(key, &[], timestamp, values)
    }

    /// Records values for a key and indexes the key under each owner.
    ///
    /// The key's slides are created on first use, one per tier of the kind's
    /// retention policy, starting at `timestamp`.
    ///
    /// # Errors
    ///
    /// - [`RecordError::StoreShutDown`] after [`MetricsStore::shutdown`]
    /// - [`RecordError::InvalidId`] for an empty id
    /// - [`ShapeError::ArityMismatch`] if `values` does not fit the kind
    /// - [`PolicyError::UnknownPolicy`](crate::error::PolicyError::UnknownPolicy)
    ///   if the kind's policy is not configured
    pub fn record_owned(
        &self,
        key: &SeriesKey,
        owners: &[&str],
        timestamp: u64,
        values: Values,
    ) -> Result<()> {
        if key.id.is_empty() {
            return Err(RecordError::InvalidId {
                id: key.id.clone(),
                reason: "id cannot be empty".to_string(),
            }
            .into());
        }
        if values.arity() != key.kind.arity() {
            return Err(ShapeError::ArityMismatch {
                expected: key.kind.arity(),
                actual: values.arity(),
            }
            .into());
        }
        let tiers = self.policies.tiers_for(key.kind)?;

        let mut guard = self.state.write();
        if self.is_shut_down() {
            return Err(RecordError::StoreShutDown.into());
        }
        let state = &mut *guard;

        let slides = state.series.entry(key.clone()).or_insert_with(|| {
            tracing::debug!("creating {} tier slide(s) for {key}", tiers.len());
            Arc::new(SeriesSlides::new(key.kind, tiers, timestamp))
        });
        Arc::make_mut(slides).add_element(timestamp, &values)?;

        for owner in owners {
            state
                .owners
                .entry((*owner).to_string())
                .or_default()
                .insert(key.clone());
        }

        Ok(())
    }

    /// Returns a snapshot of a key's slides.
    pub fn slides(&self, key: &SeriesKey) -> Option<Arc<SeriesSlides>> {
        self.state.read().series.get(key).cloned()
    }

    /// Returns the keys indexed under an owner, sorted.
    pub fn keys_for_owner(&self, owner: &str) -> Vec<SeriesKey> {
        let state = self.state.read();
        let mut keys: Vec<SeriesKey> = state
            .owners
            .get(owner)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Deletes one key. Returns `true` if it existed.
    pub fn delete(&self, key: &SeriesKey) -> bool {
        let mut state = self.state.write();
        let removed = state.series.remove(key).is_some();
        state.unindex(key);
        if removed {
            tracing::debug!("deleted series {key}");
        }
        removed
    }

    /// Deletes every key indexed under an owner. Returns how many existed.
    pub fn delete_owner(&self, owner: &str) -> usize {
        let mut state = self.state.write();
        let Some(keys) = state.owners.remove(owner) else {
            return 0;
        };

        let mut removed = 0;
        for key in &keys {
            if state.series.remove(key).is_some() {
                removed += 1;
            }
            state.unindex(key);
        }
        tracing::debug!("deleted {removed} series owned by {owner}");
        removed
    }

    /// Returns the number of live series.
    pub fn series_count(&self) -> usize {
        self.state.read().series.len()
    }

    /// Stops accepting writes, then drops the owner index and every series.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        let mut state = self.state.write();
        state.owners.clear();
        state.series.clear();
        tracing::debug!("metrics store on {} shut down", self.node);
    }

    /// Returns `true` once [`MetricsStore::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl SlideSource for MetricsStore {
    fn node(&self) -> &str {
        &self.node
    }

    fn fetch(&self, key: &SeriesKey, tier: usize) -> std::result::Result<Option<Slide>, NodeError> {
        Ok(self
            .slides(key)
            .and_then(|slides| slides.tier(tier).cloned()))
    }
}
