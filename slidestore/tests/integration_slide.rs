//! Integration tests for slide retention over long write sequences.
//!
//! These tests drive a slide through many generation swaps and check that
//! reads only ever observe the retention window.

use slidestore::range::{Range, fold_range};
use slidestore::slide::{FoldRange, Slide, SlideOptions};
use slidestore::values::{Mode, Values};

fn slide(span: u64, interval: u64, max_n: Option<usize>, mode: Mode) -> Slide {
    let options = SlideOptions {
        interval,
        max_n,
        mode,
        arity: Some(1),
    };
    Slide::new(0, span, options)
}

#[test]
fn test_window_holds_across_generation_swaps() {
    let mut slide = slide(60_000, 5_000, None, Mode::Cumulative);

    // One hour of writes, 5 s apart.
    for i in 1..=720u64 {
        slide.add_element(i * 5_000, Values::from([1])).unwrap();

        let now = i * 5_000;
        let list = slide.to_list();
        assert!(
            list.iter().all(|s| s.timestamp + 60_000 >= now),
            "sample outside window at {now}"
        );
        assert_eq!(list.first().map(|s| s.timestamp), Some(now));
    }

    let list = slide.to_list();
    // Window is [3_540 s, 3_600 s] inclusive.
    assert_eq!(list.len(), 13);
    assert_eq!(list[0].values, Values::from([720]));
    assert_eq!(list[12].values, Values::from([708]));

    // Retained storage stays bounded by two generations.
    assert!(slide.retained() <= 2 * 13 + 1);
}

#[test]
fn test_max_n_caps_reads() {
    let mut slide = slide(1_000_000, 10, Some(5), Mode::Delta);
    for ts in (10..=200).step_by(10) {
        slide.add_element(ts, Values::from([1])).unwrap();
    }

    let list = slide.to_list();
    assert_eq!(list.len(), 5);
    assert_eq!(list[0].timestamp, 200);
    assert_eq!(list[4].timestamp, 160);
}

#[test]
fn test_optimize_preserves_reads() {
    let mut slide = slide(100, 10, None, Mode::Cumulative);
    for ts in (10..=500).step_by(10) {
        slide.add_element(ts, Values::from([2])).unwrap();
    }
    slide.add_element(505, Values::from([1])).unwrap();

    let optimized = slide.optimize();

    assert_eq!(optimized.to_list(), slide.to_list());
    assert_eq!(optimized.to_list_at(510), slide.to_list_at(510));
    assert_eq!(optimized.last_two(), slide.last_two());
    assert_eq!(optimized.total(), slide.total());
    assert!(optimized.retained() <= slide.retained());
}

#[test]
fn test_fold_and_range_agree_on_history() {
    let mut slide = slide(600_000, 5_000, None, Mode::Gauge);
    let readings = [(5_000, 3), (10_000, 8), (15_000, 5), (20_000, 0), (25_000, 12)];
    for (ts, depth) in readings {
        slide.add_element(ts, Values::from([depth])).unwrap();
    }

    let visited = slide.fold(FoldRange::new(0), Vec::new(), |mut acc, point| {
        acc.push(point.sample().values.as_slice()[0]);
        acc
    });
    assert_eq!(visited, vec![3, 8, 5, 0, 12]);

    let fold = fold_range(&slide, &Range::new(10_000, 25_000, 5_000).unwrap()).unwrap();
    let ticks: Vec<i64> = fold.samples.iter().map(|s| s.values.as_slice()[0]).collect();
    assert_eq!(ticks, vec![8, 5, 0, 12]);
}

#[test]
fn test_late_writes_land_in_history() {
    let mut slide = slide(600_000, 5_000, None, Mode::Delta);
    for ts in [5_000, 10_000, 15_000, 20_000] {
        slide.add_element(ts, Values::from([1])).unwrap();
    }

    // Belongs to the bucket closed at 10 s.
    slide.add_element(7_000, Values::from([5])).unwrap();

    let list = slide.to_list();
    let at_10s = list.iter().find(|s| s.timestamp == 10_000).unwrap();
    assert_eq!(at_10s.values, Values::from([6]));
}
