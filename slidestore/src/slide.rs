//! Sliding-window sample store.
//!
//! A [`Slide`] keeps a bounded, time-ordered history of value tuples for one
//! series at one resolution, plus a single open bucket (the accumulator) that
//! collects writes until the bucket's interval has elapsed.
//!
//! # Design
//!
//! - Committed samples are kept newest-first in two generations, `current`
//!   and `previous`, so appends happen at the front in O(1).
//! - When the current generation spans more than `span` or holds `max_n`
//!   samples, it becomes the previous generation and the old previous
//!   generation is dropped wholesale. Eviction is therefore lazy.
//! - Reads apply the retention window themselves, so samples kept alive by a
//!   generation that has not been swapped out yet are never observed.
//! - A bucket closes when a write arrives at least `interval` after the last
//!   commit. The closing write belongs to the bucket it closes and the
//!   committed sample carries its timestamp.
//!
//! # Example
//!
//! ```rust
//! use slidestore::slide::{Slide, SlideOptions};
//! use slidestore::values::Values;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = SlideOptions { interval: 100, ..SlideOptions::default() };
//! let mut slide = Slide::new(1_000, 60_000, options);
//!
//! slide.add_element(1_000, Values::from([7]))?;
//! assert!(slide.to_list().is_empty()); // still in the open bucket
//!
//! slide.add_element(1_101, Values::from([7]))?;
//! let list = slide.to_list();
//! assert_eq!(list[0].timestamp, 1_101);
//! assert_eq!(list[0].values, Values::from([14]));
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShapeError};
use crate::values::{Mode, Values};

/// Bucket width used when none is configured, in milliseconds.
pub const DEFAULT_INTERVAL_MS: u64 = 5_000;

/// A committed (or realized) point in a slide's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sample {
    /// Timestamp in milliseconds.
    pub timestamp: u64,
    /// The values held at that timestamp.
    pub values: Values,
}

impl Sample {
    /// Creates a sample.
    pub fn new(timestamp: u64, values: Values) -> Self {
        Self { timestamp, values }
    }
}

/// Construction parameters for a [`Slide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlideOptions {
    /// Bucket width in milliseconds. Zero is treated as one.
    pub interval: u64,
    /// Hard cap on the number of samples a read returns.
    pub max_n: Option<usize>,
    /// How writes combine.
    pub mode: Mode,
    /// Fixed value arity. When `None`, the first write fixes it.
    pub arity: Option<usize>,
}

impl Default for SlideOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL_MS,
            max_n: None,
            mode: Mode::Cumulative,
            arity: None,
        }
    }
}

/// Bounds for [`Slide::fold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldRange {
    /// Oldest timestamp to visit (inclusive).
    pub start: u64,
    /// The present, if the open bucket should be realized at it.
    pub bound: Option<u64>,
}

impl FoldRange {
    /// Visits committed history from `start` without realizing the open bucket.
    pub fn new(start: u64) -> Self {
        Self { start, bound: None }
    }

    /// Realizes the open bucket at `bound` after the committed history.
    pub fn with_bound(mut self, bound: u64) -> Self {
        self.bound = Some(bound);
        self
    }
}

/// A point handed to a [`Slide::fold`] callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Point<'a> {
    /// A closed bucket from the slide's history.
    Committed(&'a Sample),
    /// The open bucket, synthesized at the fold's bound. Always the last point.
    Realized(&'a Sample),
}

impl<'a> Point<'a> {
    /// Returns the underlying sample.
    pub fn sample(&self) -> &'a Sample {
        match self {
            Self::Committed(sample) | Self::Realized(sample) => sample,
        }
    }

    /// Returns `true` for the synthesized final point.
    pub fn is_realized(&self) -> bool {
        matches!(self, Self::Realized(_))
    }
}

/// A bounded, time-bucketed series of value tuples.
///
/// # Thread Safety
///
/// A slide has exactly one writer and carries no locks. Readers work on
/// snapshots (clones) handed out by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slide {
    /// Creation timestamp.
    pub(crate) start: u64,
    /// Retention span in milliseconds.
    pub(crate) span: u64,
    /// Bucket width in milliseconds, never zero.
    pub(crate) interval: u64,
    /// Optional cap on observable samples.
    pub(crate) max_n: Option<usize>,
    /// Accumulation mode.
    pub(crate) mode: Mode,
    /// Fixed value arity, once known.
    pub(crate) arity: Option<usize>,
    /// Timestamp of the first accepted write.
    pub(crate) first: Option<u64>,
    /// Timestamp of the most recent commit, or `start` before the first one.
    pub(crate) last: u64,
    /// Largest timestamp the slide has observed.
    pub(crate) last_seen: u64,
    /// Timestamp the current generation started at.
    pub(crate) generation_start: u64,
    /// Number of samples in the current generation.
    pub(crate) n: usize,
    /// The open bucket.
    pub(crate) total: Option<Values>,
    /// Whether writes landed since the last commit.
    pub(crate) pending: bool,
    /// Newest generation, newest sample first.
    pub(crate) current: VecDeque<Sample>,
    /// Older generation, newest sample first.
    pub(crate) previous: VecDeque<Sample>,
}

impl Slide {
    /// Creates an empty slide.
    ///
    /// # Arguments
    ///
    /// * `now` - Creation timestamp in milliseconds
    /// * `span` - Retention span in milliseconds; zero makes the slide ignore writes
    /// * `options` - Interval, capacity, mode and arity
    pub fn new(now: u64, span: u64, options: SlideOptions) -> Self {
        Self {
            start: now,
            span,
            interval: options.interval.max(1),
            max_n: options.max_n,
            mode: options.mode,
            arity: options.arity,
            first: None,
            last: now,
            last_seen: now,
            generation_start: now,
            n: 0,
            total: None,
            pending: false,
            current: VecDeque::new(),
            previous: VecDeque::new(),
        }
    }

    /// Appends a write.
    ///
    /// Writes within `interval` of the last commit (in either direction) fold
    /// into the open bucket. A write at least `interval` after the last commit
    /// closes the bucket. Older writes are applied to the retained history
    /// where the mode allows it and dropped otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::ArityMismatch`] if `values` does not have the
    /// slide's arity.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use slidestore::slide::{Slide, SlideOptions};
    /// use slidestore::values::{Mode, Values};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let options = SlideOptions { interval: 10, mode: Mode::Delta, ..SlideOptions::default() };
    /// let mut slide = Slide::new(0, 1_000, options);
    ///
    /// slide.add_element(3, Values::from([1]))?;
    /// slide.add_element(12, Values::from([2]))?;
    ///
    /// assert_eq!(slide.to_list()[0].values, Values::from([3]));
    /// assert!(slide.add_element(20, Values::from([1, 2])).is_err());
    /// # Ok(())
    /// # }
    /// ```
    pub fn add_element(&mut self, timestamp: u64, values: Values) -> Result<()> {
        self.check_arity(&values)?;
        if self.span == 0 {
            return Ok(());
        }

        if timestamp >= self.last {
            if timestamp - self.last < self.interval {
                self.accumulate(timestamp, values);
            } else {
                self.commit(timestamp, values);
            }
        } else if self.last - timestamp < self.interval {
            self.accumulate(timestamp, values);
        } else {
            self.backfill(timestamp, &values);
        }

        Ok(())
    }

    fn check_arity(&mut self, values: &Values) -> std::result::Result<(), ShapeError> {
        match self.arity {
            Some(expected) if expected != values.arity() => Err(ShapeError::ArityMismatch {
                expected,
                actual: values.arity(),
            }),
            Some(_) => Ok(()),
            None => {
                self.arity = Some(values.arity());
                Ok(())
            }
        }
    }

    fn observe(&mut self, timestamp: u64) {
        self.first = Some(self.first.map_or(timestamp, |first| first.min(timestamp)));
        self.last_seen = self.last_seen.max(timestamp);
    }

    fn accumulate(&mut self, timestamp: u64, values: Values) {
        match self.mode {
            Mode::Gauge => self.total = Some(values),
            Mode::Cumulative | Mode::Delta => {
                let arity = values.arity();
                self.total
                    .get_or_insert_with(|| Values::zeros(arity))
                    .add_assign(&values);
            }
        }
        self.pending = true;
        self.observe(timestamp);
    }

    fn commit(&mut self, timestamp: u64, values: Values) {
        let arity = values.arity();
        let committed = match self.mode {
            Mode::Cumulative => {
                let total = self.total.get_or_insert_with(|| Values::zeros(arity));
                total.add_assign(&values);
                total.clone()
            }
            Mode::Delta => {
                let mut bucket = self.total.take().unwrap_or_else(|| Values::zeros(arity));
                bucket.add_assign(&values);
                self.total = Some(Values::zeros(arity));
                bucket
            }
            Mode::Gauge => {
                self.total = Some(values.clone());
                values
            }
        };

        self.pending = false;
        self.last = timestamp;
        self.observe(timestamp);
        self.push(Sample::new(timestamp, committed));
    }

    fn push(&mut self, sample: Sample) {
        let expired = sample.timestamp.saturating_sub(self.generation_start) > self.span;
        let full = self.max_n.is_some_and(|max_n| self.n >= max_n);
        if expired || full {
            self.previous = std::mem::take(&mut self.current);
            self.generation_start = sample.timestamp;
            self.n = 0;
        }
        self.current.push_front(sample);
        self.n += 1;
    }

    /// Applies a write older than the open bucket to the retained history.
    fn backfill(&mut self, timestamp: u64, values: &Values) {
        let floor = self.last.saturating_sub(self.span);
        if timestamp < floor {
            tracing::trace!("dropping write at {timestamp}: older than retained window (floor {floor})");
            return;
        }

        // Newest-first, so the last sample at or after `timestamp` is the
        // oldest bucket the write can belong to.
        let mut newer = self
            .current
            .iter_mut()
            .chain(self.previous.iter_mut())
            .take_while(|sample| sample.timestamp >= timestamp);

        match self.mode {
            Mode::Gauge => {
                tracing::trace!("dropping gauge reading at {timestamp}: superseded");
            }
            Mode::Delta => match newer.last() {
                Some(bucket) => bucket.values.add_assign(values),
                None => tracing::trace!("dropping write at {timestamp}: no retained bucket"),
            },
            Mode::Cumulative => {
                let mut touched = false;
                for sample in newer {
                    sample.values.add_assign(values);
                    touched = true;
                }
                if touched {
                    if let Some(total) = self.total.as_mut() {
                        total.add_assign(values);
                    }
                } else {
                    tracing::trace!("dropping write at {timestamp}: no retained bucket");
                }
            }
        }
    }

    fn limit(&self) -> usize {
        self.max_n.unwrap_or(usize::MAX)
    }

    fn newest(&self) -> Option<&Sample> {
        self.current.front().or_else(|| self.previous.front())
    }

    /// Committed samples observable at `now`, newest first.
    fn committed(&self, now: u64, limit: usize) -> impl Iterator<Item = &Sample> {
        let floor = now.saturating_sub(self.span);
        self.current
            .iter()
            .chain(self.previous.iter())
            .skip_while(move |sample| sample.timestamp > now)
            .take_while(move |sample| sample.timestamp >= floor)
            .take(limit)
    }

    /// The open bucket stamped at `bound`, if it holds writes newer than the
    /// committed history.
    fn realized(&self, bound: u64) -> Option<Sample> {
        if !self.pending || self.limit() == 0 {
            return None;
        }
        if self.newest().is_some_and(|sample| sample.timestamp >= bound) {
            return None;
        }
        self.total.clone().map(|values| Sample::new(bound, values))
    }

    /// Returns the committed samples, newest first.
    ///
    /// The window is relative to the latest timestamp the slide has seen:
    /// only samples within `span` of it are returned, at most `max_n`.
    pub fn to_list(&self) -> Vec<Sample> {
        self.committed(self.last_seen, self.limit()).cloned().collect()
    }

    /// Returns the samples observable at `bound`, newest first.
    ///
    /// If writes are pending and `bound` lies past the newest committed
    /// sample, the open bucket is realized as a sample stamped `bound` and
    /// placed first.
    pub fn to_list_at(&self, bound: u64) -> Vec<Sample> {
        let realized = self.realized(bound);
        let limit = self.limit().saturating_sub(usize::from(realized.is_some()));
        realized
            .into_iter()
            .chain(self.committed(bound, limit).cloned())
            .collect()
    }

    /// Returns the newest committed sample.
    pub fn last(&self) -> Option<Sample> {
        self.committed(self.last_seen, self.limit()).next().cloned()
    }

    /// Returns the newest sample observable at `bound`, realized or committed.
    pub fn last_at(&self, bound: u64) -> Option<Sample> {
        self.realized(bound)
            .or_else(|| self.committed(bound, self.limit()).next().cloned())
    }

    /// Returns the two newest committed samples, newest first.
    ///
    /// Fewer are returned when the history is shorter. The open bucket is
    /// never included.
    pub fn last_two(&self) -> Vec<Sample> {
        self.committed(self.last_seen, self.limit())
            .take(2)
            .cloned()
            .collect()
    }

    /// Folds over the observable history in ascending time order.
    ///
    /// Committed samples at or after `range.start` are visited first. If
    /// `range.bound` is set, lies past the newest committed sample and writes
    /// are pending, `f` is called once more with [`Point::Realized`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use slidestore::slide::{FoldRange, Slide, SlideOptions};
    /// use slidestore::values::Values;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let options = SlideOptions { interval: 5, ..SlideOptions::default() };
    /// let mut slide = Slide::new(0, 1_000, options);
    /// for ts in [5, 10, 15, 20, 23] {
    ///     slide.add_element(ts, Values::from([1]))?;
    /// }
    ///
    /// let points = slide.fold(FoldRange::new(0).with_bound(25), Vec::new(), |mut acc, point| {
    ///     acc.push((point.sample().timestamp, point.is_realized()));
    ///     acc
    /// });
    /// assert_eq!(points.last(), Some(&(25, true)));
    /// # Ok(())
    /// # }
    /// ```
    pub fn fold<A, F>(&self, range: FoldRange, init: A, mut f: F) -> A
    where
        F: FnMut(A, Point<'_>) -> A,
    {
        let now = range.bound.unwrap_or(self.last_seen);
        let realized = range.bound.and_then(|bound| self.realized(bound));
        let limit = self.limit().saturating_sub(usize::from(realized.is_some()));

        let history: Vec<&Sample> = self
            .committed(now, limit)
            .take_while(|sample| sample.timestamp >= range.start)
            .collect();
        let acc = history
            .into_iter()
            .rev()
            .fold(init, |acc, sample| f(acc, Point::Committed(sample)));

        match &realized {
            Some(sample) => f(acc, Point::Realized(sample)),
            None => acc,
        }
    }

    /// Returns a compacted copy.
    ///
    /// Samples of the previous generation that can no longer be observed are
    /// dropped, the survivors join the current generation and allocations are
    /// shrunk. Reads at the slide's latest timestamp are unchanged. A slide
    /// whose previous generation is empty is returned as an identical clone.
    pub fn optimize(&self) -> Slide {
        if self.previous.is_empty() {
            return self.clone();
        }

        let mut current: VecDeque<Sample> = self
            .committed(self.last_seen, self.limit())
            .cloned()
            .collect();
        current.shrink_to_fit();

        Slide {
            start: self.start,
            span: self.span,
            interval: self.interval,
            max_n: self.max_n,
            mode: self.mode,
            arity: self.arity,
            first: self.first,
            last: self.last,
            last_seen: self.last_seen,
            generation_start: current.back().map_or(self.last, |oldest| oldest.timestamp),
            n: current.len(),
            total: self.total.clone(),
            pending: self.pending,
            current,
            previous: VecDeque::new(),
        }
    }

    /// Returns the creation timestamp.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Returns the retention span in milliseconds.
    pub fn span(&self) -> u64 {
        self.span
    }

    /// Returns the bucket width in milliseconds.
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Returns the sample cap, if any.
    pub fn max_n(&self) -> Option<usize> {
        self.max_n
    }

    /// Returns the accumulation mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Returns the value arity, once fixed.
    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    /// Returns the timestamp of the first accepted write.
    pub fn first(&self) -> Option<u64> {
        self.first
    }

    /// Returns the timestamp of the most recent commit.
    pub fn last_timestamp(&self) -> u64 {
        self.last
    }

    /// Returns the largest timestamp observed.
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Returns the open bucket.
    pub fn total(&self) -> Option<&Values> {
        self.total.as_ref()
    }

    /// Returns `true` if writes landed since the last commit.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Returns the number of committed samples physically held, observable
    /// or not.
    pub fn retained(&self) -> usize {
        self.current.len() + self.previous.len()
    }

    /// Returns `true` if the slide has neither history nor pending writes.
    pub fn is_empty(&self) -> bool {
        self.retained() == 0 && !self.pending
    }
}
