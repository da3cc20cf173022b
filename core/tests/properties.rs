use proptest::prelude::*;
use tickchart_core::{Interval, Tick, Window, aggregate};
use time::macros::datetime;
use time::{Duration, OffsetDateTime, UtcOffset};

const BASE: OffsetDateTime = datetime!(2024-06-07 14:00 UTC);

/// Ticks of one symbol with unique sequences, possibly sharing timestamps.
fn batch() -> impl Strategy<Value = Vec<Tick>> {
    prop::collection::vec((0i64..600_000, 1.0f64..500.0, 1u64..1_000), 0..80).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (millis, price, size))| Tick {
                symbol: "SNOW".into(),
                timestamp: BASE + Duration::milliseconds(millis - millis % 250),
                price,
                size,
                sequence: i as u64,
            })
            .collect()
    })
}

fn horizon() -> impl Strategy<Value = Duration> {
    (1i64..700).prop_map(Duration::seconds)
}

proptest! {
    #[test]
    fn merging_the_same_batch_twice_changes_nothing(
        first in batch(),
        second in batch(),
        horizon in horizon(),
    ) {
        let once = Window::default().merge(&first, horizon).merge(&second, horizon);
        let twice = once.merge(&second, horizon);
        prop_assert_eq!(once.ticks(), twice.ticks());
        prop_assert_eq!(once.version(), twice.version());
    }

    #[test]
    fn retained_ticks_are_unique_ordered_and_within_horizon(
        first in batch(),
        second in batch(),
        horizon in horizon(),
    ) {
        let window = Window::default().merge(&first, horizon).merge(&second, horizon);
        let ticks = window.ticks();
        prop_assert!(ticks.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        if let Some(latest) = window.latest() {
            prop_assert!(ticks.iter().all(|t| t.timestamp >= latest - horizon));
        }
    }

    #[test]
    fn duplicate_timestamps_keep_the_last_ordered_record(ticks in batch()) {
        let window = Window::default().merge(&ticks, Duration::days(1));
        for kept in window.ticks() {
            let winner = ticks
                .iter()
                .filter(|t| t.timestamp == kept.timestamp)
                .max_by_key(|t| t.sequence);
            prop_assert_eq!(Some(kept), winner);
        }
    }

    #[test]
    fn arrival_order_does_not_change_the_window(ticks in batch(), horizon in horizon()) {
        let mut reversed = ticks.clone();
        reversed.reverse();
        let a = Window::default().merge(&ticks, horizon);
        let b = Window::default().merge(&reversed, horizon);
        prop_assert_eq!(a.ticks(), b.ticks());
    }

    #[test]
    fn every_tick_lands_in_exactly_one_bucket(ticks in batch()) {
        let buckets = aggregate(&ticks, Interval::Second(5), UtcOffset::UTC);

        let counted: u64 = buckets.iter().map(|b| b.count).sum();
        let volume: u64 = buckets.iter().map(|b| b.volume).sum();
        prop_assert_eq!(counted, ticks.len() as u64);
        prop_assert_eq!(volume, ticks.iter().map(|t| t.size).sum::<u64>());

        for b in &buckets {
            prop_assert!(b.count >= 1);
            prop_assert!(b.low <= b.open && b.open <= b.high);
            prop_assert!(b.low <= b.close && b.close <= b.high);
            prop_assert!(b.low - 1e-9 <= b.average && b.average <= b.high + 1e-9);
        }
        prop_assert!(buckets.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn bucket_ties_break_on_sequence_not_arrival(ticks in batch()) {
        let mut reversed = ticks.clone();
        reversed.reverse();
        let a = aggregate(&ticks, Interval::Second(5), UtcOffset::UTC);
        let b = aggregate(&reversed, Interval::Second(5), UtcOffset::UTC);
        prop_assert_eq!(a, b);
    }
}
