//! Error types for the slidestore statistics core.

use std::time::Duration;

use thiserror::Error;

/// The main error type for all slidestore operations.
///
/// This enum covers every error condition the core can report, from slide
/// shape mismatches on the write path to configuration and query validation.
/// Missing data is never an error: queries report it through
/// [`QueryOutcome::NotFound`](crate::query::QueryOutcome::NotFound).
#[derive(Error, Debug)]
pub enum SlideStoreError {
    /// Slides or values of incompatible shape were combined.
    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    /// Error during a record operation (write path).
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Error during query validation (read path).
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Error in the retention policy configuration.
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    /// A cluster node could not answer a fetch.
    #[error("node error: {0}")]
    Node(#[from] NodeError),
}

/// Errors raised when slides or value tuples do not share a shape.
///
/// These indicate a caller bug: two producers disagree on what a key holds.
/// They are propagated, never recovered from or retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// A value tuple does not have the arity the slide was created with.
    #[error("value arity mismatch: expected {expected} fields, got {actual}")]
    ArityMismatch {
        /// The arity of the slide.
        expected: usize,
        /// The arity of the offending value tuple or slide.
        actual: usize,
    },

    /// Slides with different bucket widths were merged or folded together.
    #[error("interval mismatch: {expected} ms vs {actual} ms")]
    IntervalMismatch {
        /// Interval of the first slide.
        expected: u64,
        /// Interval of the offending slide.
        actual: u64,
    },

    /// Slides with different accumulation modes were merged.
    #[error("mode mismatch: {expected} vs {actual}")]
    ModeMismatch {
        /// Mode of the first slide.
        expected: String,
        /// Mode of the offending slide.
        actual: String,
    },

    /// Keys of different metric kinds were combined in one query.
    #[error("metric kind mismatch: {expected} vs {actual}")]
    KindMismatch {
        /// Kind of the first key.
        expected: String,
        /// Kind of the offending key.
        actual: String,
    },

    /// A merge was requested over no slides at all.
    #[error("cannot merge an empty set of slides")]
    Empty,
}

/// Errors that can occur during record operations (write path).
#[derive(Error, Debug)]
pub enum RecordError {
    /// The store has been shut down and no longer accepts writes.
    #[error("store has been shut down")]
    StoreShutDown,

    /// The series id is empty.
    #[error("invalid series id '{id}': {reason}")]
    InvalidId {
        /// The offending id.
        id: String,
        /// Why the id is invalid.
        reason: String,
    },
}

/// Errors that can occur during query validation (read path).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The range is inverted (first > last).
    #[error("invalid range: first {first} > last {last}")]
    InvalidRange {
        /// Requested first timestamp.
        first: u64,
        /// Requested last timestamp.
        last: u64,
    },

    /// The range step is zero.
    #[error("range increment must be greater than zero")]
    ZeroIncrement,

    /// The range would produce more ticks than a query may emit.
    #[error("range would produce {count} ticks (max {max})")]
    TooManyTicks {
        /// Number of ticks the range spans.
        count: u64,
        /// The maximum allowed ticks.
        max: u64,
    },

    /// A query named no keys.
    #[error("query names no series keys")]
    NoKeys,
}

/// Errors in retention policy configuration.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// A tier configuration is invalid.
    #[error("invalid tier configuration: {reason}")]
    InvalidTierConfig {
        /// Description of what makes the tier configuration invalid.
        reason: String,
    },

    /// A tier would retain too many samples.
    #[error("tier would hold {sample_count} samples (max {max_samples}): span {span:?} / interval {interval:?}")]
    TooManySamples {
        /// The computed sample count.
        sample_count: u64,
        /// The maximum allowed samples.
        max_samples: u64,
        /// The retention span.
        span: Duration,
        /// The bucket interval.
        interval: Duration,
    },

    /// Tiers within a policy are not ordered by increasing interval.
    #[error("tiers of policy '{policy}' must be ordered from finest to coarsest interval")]
    TiersNotOrdered {
        /// The offending policy.
        policy: String,
    },

    /// A policy defines no tiers.
    #[error("policy '{policy}' must define at least one tier")]
    NoTiers {
        /// The offending policy.
        policy: String,
    },

    /// A metric kind refers to a policy that is not configured.
    #[error("unknown retention policy '{policy}'")]
    UnknownPolicy {
        /// The missing policy name.
        policy: String,
    },

    /// The policy file could not be read.
    #[error("failed to read policy file '{path}': {source}")]
    Read {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The policy document is not valid JSON for the policy schema.
    #[error("failed to parse policies: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A cluster node failed to answer a fetch during query fan-out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("node '{node}' unavailable: {reason}")]
pub struct NodeError {
    /// The node name.
    pub node: String,
    /// Why the node did not answer.
    pub reason: String,
}

/// Type alias for `Result<T, SlideStoreError>`.
pub type Result<T> = std::result::Result<T, SlideStoreError>;
