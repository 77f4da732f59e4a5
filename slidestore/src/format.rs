//! Rate and range formatting for the query layer.
//!
//! [`format_stats`] turns a (usually merged) slide and an optional
//! [`RangeFold`] into per-field statistics shaped by the slide's
//! [`MetricKind`]: the current total, an instant rate, and, for range
//! queries, the per-tick samples with their average and average rate.
//!
//! # Output Shape
//!
//! [`Stats`] serializes to one entry per field plus a `_details` entry,
//! in the kind's fixed field order:
//!
//! ```text
//! {
//!   "publish": 150,
//!   "publish_details": {
//!     "rate": 10.0,
//!     "samples": [{"timestamp": 10000, "sample": 150}, ...],
//!     "avg": 125.0,
//!     "avg_rate": 10.0
//!   }
//! }
//! ```
//!
//! The `samples`, `avg` and `avg_rate` keys are present only for range
//! queries.

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use crate::error::{Result, ShapeError};
use crate::range::RangeFold;
use crate::slide::Slide;
use crate::values::{MetricKind, Mode, Values};

/// Formatted statistics for one metric kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    kind: MetricKind,
    fields: Vec<FieldStats>,
}

impl Stats {
    /// Returns the metric kind the statistics were formatted for.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Returns the per-field statistics in the kind's field order.
    pub fn fields(&self) -> &[FieldStats] {
        &self.fields
    }

    /// Looks up one field by name.
    pub fn field(&self, name: &str) -> Option<&FieldStats> {
        self.fields.iter().find(|field| field.name == name)
    }
}

impl Serialize for Stats {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len() * 2))?;
        for field in &self.fields {
            map.serialize_entry(field.name, &field.total)?;
            map.serialize_entry(&format!("{}_details", field.name), &field.details)?;
        }
        map.end()
    }
}

/// Statistics for a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldStats {
    /// Field name.
    pub name: &'static str,
    /// Current total.
    pub total: i64,
    /// Rate and range details.
    pub details: Details,
}

/// The `<field>_details` part of a field's statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Details {
    /// Instant rate per second, zero when the series has gone quiet.
    pub rate: f64,
    /// Present for range queries only.
    #[serde(flatten)]
    pub range: Option<RangeDetails>,
}

/// Per-tick samples and averages for a range query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeDetails {
    /// One entry per tick, newest first.
    pub samples: Vec<FieldSample>,
    /// Mean of the tick values.
    pub avg: f64,
    /// Mean rate per second over the range.
    pub avg_rate: f64,
}

/// A single tick value of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSample {
    /// Tick timestamp in milliseconds.
    pub timestamp: u64,
    /// Tick value.
    pub sample: i64,
}

/// Formats a slide's statistics for `kind`.
///
/// # Arguments
///
/// * `kind` - The metric kind, which fixes field names and order
/// * `slide` - The slide to report on, usually the merge of several
/// * `range` - The range fold, for range queries
/// * `now` - Query time in milliseconds; a rate whose newest sample is more
///   than one interval behind `now` (aligned down to the interval grid) reads zero
///
/// # Errors
///
/// Returns [`ShapeError::ArityMismatch`] if the slide's arity differs from
/// the kind's.
///
/// # Examples
///
/// ```rust
/// use slidestore::format::format_stats;
/// use slidestore::slide::{Slide, SlideOptions};
/// use slidestore::values::{MetricKind, Values};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let options = SlideOptions { interval: 5_000, ..SlideOptions::default() };
/// let mut slide = Slide::new(0, 600_000, options);
/// slide.add_element(5_000, Values::from([100]))?;
/// slide.add_element(10_000, Values::from([50]))?;
///
/// let stats = format_stats(MetricKind::ProcessStats, &slide, None, 12_000)?;
/// let reductions = stats.field("reductions").unwrap();
/// assert_eq!(reductions.total, 150);
/// assert_eq!(reductions.details.rate, 10.0);
/// # Ok(())
/// # }
/// ```
pub fn format_stats(
    kind: MetricKind,
    slide: &Slide,
    range: Option<&RangeFold>,
    now: u64,
) -> Result<Stats> {
    if let Some(actual) = slide.arity()
        && actual != kind.arity()
    {
        return Err(ShapeError::ArityMismatch {
            expected: kind.arity(),
            actual,
        }
        .into());
    }

    let totals = current_totals(slide, kind.arity());
    let rates = instant_rates(slide, kind.arity(), now);

    let fields = kind
        .fields()
        .iter()
        .enumerate()
        .map(|(index, &name)| FieldStats {
            name,
            total: totals.get(index).unwrap_or(0),
            details: Details {
                rate: rates.get(index).copied().unwrap_or(0.0),
                range: range.map(|fold| range_details(slide.mode(), fold, index)),
            },
        })
        .collect();

    Ok(Stats { kind, fields })
}

fn current_totals(slide: &Slide, arity: usize) -> Values {
    let pending = slide.total().cloned().unwrap_or_else(|| Values::zeros(arity));
    match slide.mode() {
        Mode::Cumulative | Mode::Gauge => pending,
        Mode::Delta => slide
            .to_list()
            .iter()
            .fold(pending, |acc, sample| acc.add(&sample.values)),
    }
}

fn instant_rates(slide: &Slide, arity: usize, now: u64) -> Vec<f64> {
    let pair = slide.last_two();
    let [newest, older] = pair.as_slice() else {
        return vec![0.0; arity];
    };
    // Merged timestamps sit on the interval grid, so `now` is aligned too.
    let now = now - now % slide.interval();
    if now.saturating_sub(newest.timestamp) > slide.interval() {
        return vec![0.0; arity];
    }

    let elapsed = newest.timestamp - older.timestamp;
    let deltas = match slide.mode() {
        Mode::Cumulative | Mode::Gauge => newest.values.sub(&older.values),
        Mode::Delta => newest.values.clone(),
    };
    deltas
        .as_slice()
        .iter()
        .map(|&delta| per_second(delta, elapsed))
        .collect()
}

fn range_details(mode: Mode, fold: &RangeFold, index: usize) -> RangeDetails {
    let value = |values: &Values| values.get(index).unwrap_or(0);

    let samples = fold
        .samples
        .iter()
        .rev()
        .map(|sample| FieldSample {
            timestamp: sample.timestamp,
            sample: value(&sample.values),
        })
        .collect();

    let total = value(&fold.totals);
    let avg = if fold.tick_count == 0 {
        0.0
    } else {
        i64_as_f64(total) / u64_as_f64(fold.tick_count)
    };

    let avg_rate = match mode {
        Mode::Cumulative | Mode::Gauge => match (fold.samples.first(), fold.samples.last()) {
            (Some(oldest), Some(newest)) => per_second(
                value(&newest.values).saturating_sub(value(&oldest.values)),
                newest.timestamp - oldest.timestamp,
            ),
            _ => 0.0,
        },
        Mode::Delta => per_second(total, fold.tick_count.saturating_mul(fold.range.incr)),
    };

    RangeDetails {
        samples,
        avg,
        avg_rate,
    }
}

/// Converts a change over `elapsed_ms` into a per-second rate.
fn per_second(delta: i64, elapsed_ms: u64) -> f64 {
    if elapsed_ms == 0 {
        return 0.0;
    }
    i64_as_f64(delta) * 1000.0 / u64_as_f64(elapsed_ms)
}

#[allow(clippy::cast_precision_loss)] // counters stay well below 2^53
fn i64_as_f64(value: i64) -> f64 {
    value as f64
}

#[allow(clippy::cast_precision_loss)] // millisecond spans stay well below 2^53
fn u64_as_f64(value: u64) -> f64 {
    value as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::{Range, fold_range};
    use crate::slide::SlideOptions;
    use serde_json::json;

    fn process_slide() -> Slide {
        let options = SlideOptions {
            interval: 5_000,
            ..SlideOptions::default()
        };
        let mut slide = Slide::new(0, 600_000, options);
        slide.add_element(5_000, Values::from([100])).unwrap();
        slide.add_element(10_000, Values::from([50])).unwrap();
        slide
    }

    #[test]
    fn test_instant_rate_and_total() {
        let slide = process_slide();
        let stats = format_stats(MetricKind::ProcessStats, &slide, None, 12_000).unwrap();

        assert_eq!(
            serde_json::to_value(&stats).unwrap(),
            json!({
                "reductions": 150,
                "reductions_details": { "rate": 10.0 }
            })
        );
    }

    #[test]
    fn test_rate_is_zero_when_series_is_quiet() {
        let slide = process_slide();
        let stats = format_stats(MetricKind::ProcessStats, &slide, None, 20_000).unwrap();

        assert_eq!(stats.fields()[0].details.rate, 0.0);
        assert_eq!(stats.fields()[0].total, 150);
    }

    #[test]
    fn test_merged_rate_stays_live_on_interval_grid() {
        let options = SlideOptions {
            interval: 5_000,
            ..SlideOptions::default()
        };
        let mut a = Slide::new(0, 600_000, options);
        a.add_element(6_000, Values::from([10])).unwrap();
        a.add_element(11_000, Values::from([10])).unwrap();
        let mut b = Slide::new(1_000, 600_000, options);
        b.add_element(7_000, Values::from([10])).unwrap();
        b.add_element(12_000, Values::from([10])).unwrap();

        // Both histories align to 5000 and 10000.
        let merged = crate::merge::sum(&[a.clone(), b]).unwrap();
        let stats = format_stats(MetricKind::QueueStatsPublish, &merged, None, 16_000).unwrap();
        assert_eq!(stats.fields()[0].details.rate, 4.0);

        let alone = format_stats(MetricKind::QueueStatsPublish, &a, None, 16_000).unwrap();
        let fresh = Slide::new(0, 600_000, options);
        let with_fresh = crate::merge::sum(&[a, fresh]).unwrap();
        let stats = format_stats(MetricKind::QueueStatsPublish, &with_fresh, None, 16_000).unwrap();
        assert_eq!(alone.fields()[0].details.rate, 2.0);
        assert_eq!(stats.fields()[0].details.rate, 2.0);
    }

    #[test]
    fn test_single_sample_has_no_rate() {
        let options = SlideOptions {
            interval: 5_000,
            ..SlideOptions::default()
        };
        let mut slide = Slide::new(0, 600_000, options);
        slide.add_element(5_000, Values::from([100])).unwrap();

        let stats = format_stats(MetricKind::ProcessStats, &slide, None, 5_000).unwrap();
        assert_eq!(stats.fields()[0].details.rate, 0.0);
    }

    #[test]
    fn test_range_details() {
        let slide = process_slide();
        let fold = fold_range(&slide, &Range::new(5_000, 10_000, 5_000).unwrap()).unwrap();
        let stats = format_stats(MetricKind::ProcessStats, &slide, Some(&fold), 12_000).unwrap();

        assert_eq!(
            serde_json::to_value(&stats).unwrap(),
            json!({
                "reductions": 150,
                "reductions_details": {
                    "rate": 10.0,
                    "samples": [
                        { "timestamp": 10_000, "sample": 150 },
                        { "timestamp": 5_000, "sample": 100 }
                    ],
                    "avg": 125.0,
                    "avg_rate": 10.0
                }
            })
        );
    }

    #[test]
    fn test_delta_total_and_rates() {
        let options = SlideOptions {
            interval: 5_000,
            mode: Mode::Delta,
            ..SlideOptions::default()
        };
        let mut slide = Slide::new(0, 600_000, options);
        let churn = |created: i64| Values::from([created, 0, 0, 0, 0, 0, 0]);
        slide.add_element(5_000, churn(2)).unwrap();
        slide.add_element(10_000, churn(4)).unwrap();
        slide.add_element(11_000, churn(1)).unwrap();

        let fold = fold_range(&slide, &Range::new(5_000, 15_000, 5_000).unwrap()).unwrap();
        let stats =
            format_stats(MetricKind::ConnectionChurnRates, &slide, Some(&fold), 12_000).unwrap();

        let created = stats.field("connection_created").unwrap();
        assert_eq!(created.total, 7);
        // Newest bucket of 4 over 5 s.
        assert_eq!(created.details.rate, 0.8);

        let range = created.details.range.as_ref().unwrap();
        assert_eq!(range.samples[0], FieldSample { timestamp: 15_000, sample: 1 });
        assert_eq!(range.avg, 7.0 / 3.0);
        // 7 events over 3 ticks of 5 s.
        assert_eq!(range.avg_rate, 7.0 / 15.0);

        // The range start is off the tick grid: the 3 ticks still cover 15 s.
        let fold = fold_range(&slide, &Range::new(3_000, 15_000, 5_000).unwrap()).unwrap();
        let stats =
            format_stats(MetricKind::ConnectionChurnRates, &slide, Some(&fold), 12_000).unwrap();
        let range = stats.field("connection_created").unwrap().details.range.clone().unwrap();
        assert_eq!(fold.tick_count, 3);
        assert_eq!(range.avg_rate, 7.0 / 15.0);

        assert_eq!(stats.field("queue_deleted").unwrap().total, 0);
    }

    #[test]
    fn test_field_order_follows_kind() {
        let options = SlideOptions {
            interval: 5_000,
            mode: Mode::Gauge,
            ..SlideOptions::default()
        };
        let mut slide = Slide::new(0, 600_000, options);
        slide.add_element(1_000, Values::from([3, 2, 1])).unwrap();

        let stats = format_stats(MetricKind::QueueMsgCounts, &slide, None, 1_000).unwrap();
        let names: Vec<&str> = stats.fields().iter().map(|f| f.name).collect();

        assert_eq!(names, MetricKind::QueueMsgCounts.fields());
        assert_eq!(stats.field("messages_ready").unwrap().total, 2);
    }

    #[test]
    fn test_arity_must_match_kind() {
        let slide = process_slide();
        assert!(format_stats(MetricKind::FineStats, &slide, None, 0).is_err());
    }
}
