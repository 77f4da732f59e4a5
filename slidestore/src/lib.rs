//! # slidestore
//!
//! In-memory sliding-window statistics store for message-broker management.
//!
//! slidestore keeps, per metric series, a bounded history of fixed-arity
//! integer tuples at one or more resolutions, and answers "current totals,
//! instant rates and per-tick samples over a range" queries across a cluster
//! of nodes by merging the per-node histories.
//!
//! ## Key Properties
//!
//! - Lazy, generation-based eviction: no background threads, no per-write scans
//! - Cumulative, delta and gauge accumulation modes
//! - Exact merge of slides with offset clocks onto a common interval grid
//! - Snapshot reads: readers never block the writer for longer than a clone
//! - Failed nodes degrade a query instead of aborting it
//!
//! ## Quick Start
//!
//! ```rust
//! use slidestore::{MetricKind, MetricsStore, Query, QueryOutcome, QueryRange, Range};
//! use slidestore::{RetentionPolicies, SeriesKey, SlideSource, Values};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let policies = RetentionPolicies::default();
//! let store = MetricsStore::new(policies.clone());
//!
//! // Record three publish counters, 5 s apart
//! let key = SeriesKey::new(MetricKind::QueueStatsPublish, "orders");
//! store.record(&key, 5_000, Values::from([4]))?;
//! store.record(&key, 10_000, Values::from([4]))?;
//! store.record(&key, 15_000, Values::from([4]))?;
//!
//! // Ask for the last 10 s in 5 s steps
//! let range = QueryRange::Range(Range::new(5_000, 15_000, 5_000)?);
//! let sources: [&dyn SlideSource; 1] = [&store];
//! if let QueryOutcome::Found(result) = Query::new(&policies).run(&sources, &[key], &range, 15_000)? {
//!     println!("{}", serde_json::to_string_pretty(result.stats())?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Slide`]: One series at one resolution: open bucket plus windowed history
//! - [`sum`]: Merges slides from several nodes into one
//! - [`fold_range`]: Turns a slide into evenly spaced ticks over a [`Range`]
//! - [`format_stats`]: Shapes totals, rates and ticks per [`MetricKind`]
//! - [`MetricsStore`]: Keyed, tiered, thread-safe slide store with an owner index
//! - [`Query`]: Tier selection, fan-out across [`SlideSource`]s, merge and format
//!
//! ## Modules
//!
//! - [`slide`]: The sliding-window store
//! - [`merge`]: Slide merging
//! - [`range`]: Range folding
//! - [`format`]: Rate and range formatting
//! - [`values`]: Value tuples, accumulation modes and metric kinds
//! - [`policy`]: Retention policies and tier selection
//! - [`store`]: Keyed metrics store
//! - [`query`]: Query façade
//! - [`error`]: Error types

pub mod error;
pub mod format;
pub mod merge;
pub mod policy;
pub mod query;
pub mod range;
pub mod slide;
pub mod store;
pub mod values;

// Re-export primary API types at crate root for convenience.
pub use error::{Result, SlideStoreError};
pub use format::{Stats, format_stats};
pub use merge::sum;
pub use policy::{RetentionPolicies, TierConfig};
pub use query::{Query, QueryOutcome, QueryRange, QueryResult, SlideSource};
pub use range::{Range, fold_range};
pub use slide::{Sample, Slide, SlideOptions};
pub use store::{MetricsStore, SeriesKey};
pub use values::{MetricKind, Mode, Values};
