//! Merge engine: combines slides of one shape by summation.
//!
//! Merging is how per-object statistics become aggregates (all channels of a
//! connection, all queues of a vhost) and how the same key reported by
//! several cluster nodes becomes one answer.
//!
//! # Design
//!
//! - Sample timestamps are aligned down to the interval grid, so producers
//!   with independent clocks land on the same points.
//! - The merged history is the union of aligned timestamps. For cumulative
//!   and gauge slides every input contributes its last known value at or
//!   before each point (zero before its first sample). For delta slides only
//!   inputs with a bucket at exactly that point contribute.
//! - Every scalar field is combined with a commutative, associative
//!   operation (sum, min, max, any), so the merge is order-independent.
//! - Nothing is evicted while merging. Reads of the merged slide apply the
//!   merged window.

use std::collections::VecDeque;

use crate::error::{Result, ShapeError};
use crate::slide::{Sample, Slide};
use crate::values::Values;

/// Merges slides of the same interval, mode and arity into one.
///
/// A single slide is returned unchanged. Slides that have never committed
/// a bucket leave the merged history untouched and only add their open
/// bucket to the merged accumulator.
///
/// # Errors
///
/// - [`ShapeError::Empty`] if `slides` is empty
/// - [`ShapeError::IntervalMismatch`], [`ShapeError::ModeMismatch`] or
///   [`ShapeError::ArityMismatch`] if the slides do not share a shape
///
/// # Examples
///
/// ```rust
/// use slidestore::merge::sum;
/// use slidestore::slide::{Slide, SlideOptions};
/// use slidestore::values::Values;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let options = SlideOptions { interval: 5, ..SlideOptions::default() };
/// let mut a = Slide::new(0, 1_000, options);
/// let mut b = Slide::new(0, 1_000, options);
/// a.add_element(5, Values::from([1]))?;
/// b.add_element(6, Values::from([2]))?;
///
/// let merged = sum(&[a, b])?;
/// assert_eq!(merged.to_list()[0].timestamp, 5);
/// assert_eq!(merged.to_list()[0].values, Values::from([3]));
/// # Ok(())
/// # }
/// ```
pub fn sum(slides: &[Slide]) -> Result<Slide> {
    let (head, rest) = slides.split_first().ok_or(ShapeError::Empty)?;
    if rest.is_empty() {
        return Ok(head.clone());
    }

    let arity = check_shapes(head, rest)?;

    // A slide with no committed history is the identity for the history
    // merge and only contributes its open bucket.
    let (committed, open): (Vec<&Slide>, Vec<&Slide>) =
        slides.iter().partition(|slide| slide.retained() > 0);

    let mut merged = match committed.as_slice() {
        [] => return Ok(merge_histories(&open, arity)),
        [only] => (*only).clone(),
        many => merge_histories(many, arity),
    };
    for slide in open {
        absorb_open_bucket(&mut merged, slide);
    }
    Ok(merged)
}

/// Merges the histories and scalar fields of same-shaped slides.
fn merge_histories(slides: &[&Slide], arity: Option<usize>) -> Slide {
    let head = slides[0];
    let interval = head.interval;
    let carry = head.mode.carries_forward();

    let histories: Vec<Vec<Sample>> = slides
        .iter()
        .map(|slide| aligned_history(slide, interval))
        .collect();

    let mut grid: Vec<u64> = histories
        .iter()
        .flatten()
        .map(|sample| sample.timestamp)
        .collect();
    grid.sort_unstable();
    grid.dedup();

    let zero = Values::zeros(arity.unwrap_or(0));
    let mut cursors = vec![0usize; histories.len()];
    let mut current = VecDeque::with_capacity(grid.len());

    for &timestamp in &grid {
        let mut values = zero.clone();
        for (history, cursor) in histories.iter().zip(cursors.iter_mut()) {
            while *cursor < history.len() && history[*cursor].timestamp <= timestamp {
                *cursor += 1;
            }
            if let Some(latest) = history[..*cursor].last()
                && (carry || latest.timestamp == timestamp)
            {
                values.add_assign(&latest.values);
            }
        }
        current.push_front(Sample::new(timestamp, values));
    }

    let total = slides
        .iter()
        .filter_map(|slide| slide.total.as_ref())
        .fold(None, |acc: Option<Values>, total| {
            Some(acc.map_or_else(|| total.clone(), |acc| acc.add(total)))
        });

    let start = slides.iter().map(|s| s.start).min().unwrap_or(head.start);
    let max_n = slides
        .iter()
        .map(|s| s.max_n)
        .try_fold(0usize, |acc, max_n| max_n.map(|n| acc.max(n)));

    Slide {
        start,
        span: slides.iter().map(|s| s.span).max().unwrap_or(head.span),
        interval,
        max_n,
        mode: head.mode,
        arity,
        first: slides.iter().filter_map(|s| s.first).min(),
        last: slides.iter().map(|s| s.last).max().unwrap_or(head.last),
        last_seen: slides.iter().map(|s| s.last_seen).max().unwrap_or(head.last_seen),
        generation_start: start,
        n: current.len(),
        total,
        pending: slides.iter().any(|s| s.pending),
        current,
        previous: VecDeque::new(),
    }
}

/// Adds the open bucket of a slide without history to `merged`.
fn absorb_open_bucket(merged: &mut Slide, slide: &Slide) {
    if let Some(total) = &slide.total {
        merged.total = Some(match merged.total.take() {
            Some(acc) => acc.add(total),
            None => total.clone(),
        });
    }
    merged.pending |= slide.pending;
    merged.first = merged.first.into_iter().chain(slide.first).min();
}

/// Verifies that all slides share interval, mode and arity.
///
/// Returns the common arity, or `None` if no slide has been written to.
fn check_shapes(head: &Slide, rest: &[Slide]) -> std::result::Result<Option<usize>, ShapeError> {
    let mut arity = head.arity;
    for slide in rest {
        if slide.interval != head.interval {
            return Err(ShapeError::IntervalMismatch {
                expected: head.interval,
                actual: slide.interval,
            });
        }
        if slide.mode != head.mode {
            return Err(ShapeError::ModeMismatch {
                expected: head.mode.to_string(),
                actual: slide.mode.to_string(),
            });
        }
        match (arity, slide.arity) {
            (Some(expected), Some(actual)) if expected != actual => {
                return Err(ShapeError::ArityMismatch { expected, actual });
            }
            (None, Some(actual)) => arity = Some(actual),
            _ => {}
        }
    }
    Ok(arity)
}

/// Every retained committed sample, oldest first, with grid-aligned timestamps.
fn aligned_history(slide: &Slide, interval: u64) -> Vec<Sample> {
    slide
        .current
        .iter()
        .chain(slide.previous.iter())
        .rev()
        .map(|sample| {
            Sample::new(
                sample.timestamp - sample.timestamp % interval,
                sample.values.clone(),
            )
        })
        .collect()
}
