//! Preset historical panels built from the minute-bar table.

use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use tracing::{debug, info};

use crate::bucket::resample;
use crate::error::StoreError;
use crate::render::{RenderableSeries, group_by_symbol};
use crate::session::{TradingHours, previous_trading_day, trailing_day};
use crate::store::{DataRange, DuckDbStore};
use crate::{Bucket, Interval};

pub const PREVIOUS_DAY_INTERVAL: Interval = Interval::Minute(5);
pub const MAX_LOOKBACK_ATTEMPTS: usize = 10;
pub const TRAILING_DAYS: i64 = 90;

fn day_start(date: Date, offset: UtcOffset) -> OffsetDateTime {
    PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_offset(offset)
}

fn day_range(date: Date, offset: UtcOffset) -> DataRange {
    let start = day_start(date, offset);
    DataRange::Between {
        start,
        end: start + Duration::days(1) - Duration::nanoseconds(1),
    }
}

fn into_series(
    buckets: Vec<Bucket>,
    interval: Interval,
    offset: UtcOffset,
) -> Vec<RenderableSeries> {
    group_by_symbol(buckets)
        .into_iter()
        .filter_map(|(symbol, series)| {
            RenderableSeries::from_buckets(&symbol, interval, series, None, offset)
        })
        .collect()
}

/// The most recent trading session before `today` that has bars.
///
/// Walks back over weekends and empty days, at most `max_attempts` days.
/// Minute bars outside regular trading hours are dropped, each symbol keeps
/// only the last day of its data, and the rest is resampled to five minutes.
pub fn previous_session(
    store: &DuckDbStore,
    symbols: &[String],
    today: Date,
    offset: UtcOffset,
    max_attempts: usize,
) -> Result<Option<(Date, Vec<RenderableSeries>)>, StoreError> {
    if symbols.is_empty() {
        return Ok(None);
    }

    let hours = TradingHours::new(offset);
    let mut day = today;
    for _ in 0..max_attempts {
        let Some(prev) = previous_trading_day(day) else {
            break;
        };
        day = prev;

        let minutes =
            store.query_aggregates(symbols, &day_range(day, offset), Interval::Minute(1), offset)?;
        let minutes = hours.retain(minutes);
        if minutes.is_empty() {
            debug!(%day, "no session data, looking further back");
            continue;
        }

        let trimmed: Vec<Bucket> = group_by_symbol(minutes)
            .into_values()
            .flat_map(|series| resample(&trailing_day(series), PREVIOUS_DAY_INTERVAL, offset))
            .collect();
        info!(%day, buckets = trimmed.len(), "loaded previous session");
        return Ok(Some((day, into_series(trimmed, PREVIOUS_DAY_INTERVAL, offset))));
    }

    Ok(None)
}

/// Daily buckets over the `days` days up to and including `today`.
pub fn trailing_days(
    store: &DuckDbStore,
    symbols: &[String],
    today: Date,
    offset: UtcOffset,
    days: i64,
) -> Result<Vec<RenderableSeries>, StoreError> {
    let end = day_start(today, offset) + Duration::days(1);
    let range = DataRange::Between {
        start: end - Duration::days(days),
        end: end - Duration::nanoseconds(1),
    };
    let interval = Interval::Day(1);
    let buckets = store.query_aggregates(symbols, &range, interval, offset)?;
    Ok(into_series(buckets, interval, offset))
}
