//! Range folding: turns a slide into evenly spaced points over a time range.
//!
//! Ticks are anchored at the end of the range, so the present is always a
//! point, and stepped back by the increment down to the start of the range.
//! Each tick is filled from the slide's history:
//!
//! - cumulative and gauge slides carry the latest value at or before the tick
//!   forward across gaps
//! - delta slides sum the buckets that fall inside `(tick - incr, tick]`
//!
//! The open bucket is realized at the end of the range, so a query over the
//! present reflects writes that have not been committed yet.

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};
use crate::merge::sum;
use crate::policy::MAX_SAMPLES_PER_TIER;
use crate::slide::{FoldRange, Sample, Slide};
use crate::values::Values;

/// Maximum number of ticks a single range may produce.
pub const MAX_TICKS: u64 = MAX_SAMPLES_PER_TIER;

/// A time range with a step, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    /// Oldest timestamp of interest.
    pub first: u64,
    /// Newest timestamp of interest, usually "now".
    pub last: u64,
    /// Step between ticks.
    pub incr: u64,
}

impl Range {
    /// Creates a validated range.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::ZeroIncrement`] if `incr` is zero,
    /// [`QueryError::InvalidRange`] if `first > last` and
    /// [`QueryError::TooManyTicks`] if the range spans more than
    /// [`MAX_TICKS`] ticks.
    pub fn new(first: u64, last: u64, incr: u64) -> Result<Self> {
        let range = Self { first, last, incr };
        range.validate()?;
        Ok(range)
    }

    /// Validates the range.
    ///
    /// # Errors
    ///
    /// See [`Range::new`].
    pub fn validate(&self) -> Result<()> {
        if self.incr == 0 {
            return Err(QueryError::ZeroIncrement.into());
        }
        if self.first > self.last {
            return Err(QueryError::InvalidRange {
                first: self.first,
                last: self.last,
            }
            .into());
        }
        let count = ((self.last - self.first) / self.incr).saturating_add(1);
        if count > MAX_TICKS {
            return Err(QueryError::TooManyTicks {
                count,
                max: MAX_TICKS,
            }
            .into());
        }
        Ok(())
    }

    /// Returns the tick timestamps in ascending order.
    ///
    /// Ticks are `last, last - incr, ...` down to `first`. An invalid range
    /// has no ticks.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use slidestore::range::Range;
    ///
    /// let range = Range { first: 3, last: 20, incr: 5 };
    /// assert_eq!(range.ticks(), vec![5, 10, 15, 20]);
    /// ```
    pub fn ticks(&self) -> Vec<u64> {
        if self.validate().is_err() {
            return Vec::new();
        }
        let steps = (self.last - self.first) / self.incr;
        (0..=steps).rev().map(|k| self.last - k * self.incr).collect()
    }
}

/// The result of folding a slide over a [`Range`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeFold {
    /// The range the fold was computed for.
    pub range: Range,
    /// One sample per emitted tick, oldest first.
    pub samples: Vec<Sample>,
    /// Elementwise sum of all emitted samples.
    pub totals: Values,
    /// Number of emitted ticks.
    pub tick_count: u64,
}

/// Folds a slide into one sample per tick of `range`.
///
/// Traversal starts one increment before `range.first` so the first tick can
/// pick up a value from just before the range, and the open bucket is
/// realized at `range.last`.
///
/// For cumulative and gauge slides a tick with no earlier point is filled
/// with zeros if it is the first tick of the range and skipped otherwise.
///
/// # Errors
///
/// Returns [`QueryError`] if the range is invalid.
///
/// # Examples
///
/// ```rust
/// use slidestore::range::{fold_range, Range};
/// use slidestore::slide::{Slide, SlideOptions};
/// use slidestore::values::Values;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let options = SlideOptions { interval: 10, ..SlideOptions::default() };
/// let mut slide = Slide::new(0, 1_000, options);
/// slide.add_element(10, Values::from([1]))?;
/// slide.add_element(40, Values::from([1]))?;
///
/// let fold = fold_range(&slide, &Range::new(0, 50, 10)?)?;
/// assert_eq!(fold.tick_count, 6);
/// assert_eq!(fold.samples[2].values, Values::from([1])); // carried from 10 to 20
/// # Ok(())
/// # }
/// ```
pub fn fold_range(slide: &Slide, range: &Range) -> Result<RangeFold> {
    range.validate()?;

    let bounds = FoldRange::new(range.first.saturating_sub(range.incr)).with_bound(range.last);
    let points: Vec<Sample> = slide.fold(bounds, Vec::new(), |mut points, point| {
        points.push(point.sample().clone());
        points
    });

    let zero = Values::zeros(slide.arity().unwrap_or(0));
    let ticks = range.ticks();
    let samples = if slide.mode().carries_forward() {
        carry_forward(&ticks, &points, &zero)
    } else {
        bucket_sums(&ticks, range.incr, &points, &zero)
    };

    let totals = samples
        .iter()
        .fold(zero, |totals, sample| totals.add(&sample.values));

    Ok(RangeFold {
        range: *range,
        tick_count: samples.len() as u64,
        totals,
        samples,
    })
}

/// Merges `slides` and folds the result over `range`.
///
/// # Errors
///
/// Returns the merge's [`ShapeError`](crate::error::ShapeError) or the
/// fold's [`QueryError`].
pub fn fold_range_many(slides: &[Slide], range: &Range) -> Result<RangeFold> {
    let merged = sum(slides)?;
    fold_range(&merged, range)
}

fn carry_forward(ticks: &[u64], points: &[Sample], zero: &Values) -> Vec<Sample> {
    let mut samples = Vec::with_capacity(ticks.len());
    let mut seen = 0;

    for (index, &tick) in ticks.iter().enumerate() {
        while seen < points.len() && points[seen].timestamp <= tick {
            seen += 1;
        }
        match points[..seen].last() {
            Some(point) => samples.push(Sample::new(tick, point.values.clone())),
            None if index == 0 => samples.push(Sample::new(tick, zero.clone())),
            None => {}
        }
    }

    samples
}

fn bucket_sums(ticks: &[u64], incr: u64, points: &[Sample], zero: &Values) -> Vec<Sample> {
    ticks
        .iter()
        .map(|&tick| {
            let floor = tick.checked_sub(incr);
            let values = points
                .iter()
                .filter(|p| p.timestamp <= tick && floor.is_none_or(|floor| p.timestamp > floor))
                .fold(zero.clone(), |acc, p| acc.add(&p.values));
            Sample::new(tick, values)
        })
        .collect()
}
