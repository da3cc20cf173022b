//! The value handed to a chart each cycle.
//!
//! Nothing here draws. A [`SeriesSink`] receives a fresh [`Frame`] per cycle
//! and decides what to do with it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use time::{Duration, OffsetDateTime, UtcOffset};

use crate::bucket::{aggregate, bounds};
use crate::controller::{CycleOutcome, CycleStats};
use crate::gaps::gaps;
use crate::window::Window;
use crate::{Bucket, Interval, Mode};

#[derive(Debug, Clone, PartialEq)]
pub struct RenderableSeries {
    pub symbol: String,
    pub interval: Interval,
    pub buckets: Vec<Bucket>,
    /// Expected bucket starts with no data; the x-axis breaks across them.
    pub discontinuities: BTreeSet<OffsetDateTime>,
    pub display_range: (OffsetDateTime, OffsetDateTime),
    /// `(min low, max high)`.
    pub price_bounds: (f64, f64),
    pub max_volume: u64,
}

impl RenderableSeries {
    /// Builds a series from buckets of one symbol ordered by start.
    ///
    /// With a `horizon` the display range follows the live edge, otherwise it
    /// covers every bucket. Returns `None` for an empty series.
    pub fn from_buckets(
        symbol: &str,
        interval: Interval,
        buckets: Vec<Bucket>,
        horizon: Option<Duration>,
        offset: UtcOffset,
    ) -> Option<Self> {
        let first = buckets.first()?.start;
        let last = buckets.last()?.start;
        let price_bounds = bounds(&buckets)?;
        let max_volume = buckets.iter().map(|b| b.volume).max().unwrap_or(0);

        let present: BTreeSet<OffsetDateTime> = buckets.iter().map(|b| b.start).collect();
        let discontinuities = gaps(
            (first, last + interval.as_duration()),
            interval,
            &present,
            first,
            offset,
        );

        let display_range = match horizon {
            Some(horizon) => display_range(first, last, horizon),
            None => (first, last + interval.as_duration()),
        };

        Some(Self {
            symbol: symbol.to_string(),
            interval,
            buckets,
            discontinuities,
            display_range,
            price_bounds,
            max_volume,
        })
    }
}

/// `[first, first + horizon]` while the data is shorter than the horizon,
/// `[last - horizon, last]` once it is longer.
pub fn display_range(
    first: OffsetDateTime,
    last: OffsetDateTime,
    horizon: Duration,
) -> (OffsetDateTime, OffsetDateTime) {
    if last - first < horizon {
        (first, first + horizon)
    } else {
        (last - horizon, last)
    }
}

/// Buckets the retained ticks of one window.
pub fn renderable_series(
    symbol: &str,
    window: &Window,
    interval: Interval,
    horizon: Duration,
    offset: UtcOffset,
) -> Option<RenderableSeries> {
    let buckets = aggregate(window.ticks(), interval, offset);
    RenderableSeries::from_buckets(symbol, interval, buckets, Some(horizon), offset)
}

/// Splits a multi-symbol bucket list into ordered per-symbol series.
pub fn group_by_symbol(buckets: Vec<Bucket>) -> BTreeMap<String, Vec<Bucket>> {
    let mut grouped: BTreeMap<String, Vec<Bucket>> = BTreeMap::new();
    for bucket in buckets {
        grouped.entry(bucket.symbol.clone()).or_default().push(bucket);
    }
    for series in grouped.values_mut() {
        series.sort_by_key(|b| b.start);
    }
    grouped
}

/// Everything one cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub mode: Mode,
    pub watermark: Option<OffsetDateTime>,
    /// Bumped on every reset (mode switch, symbol change, replay wrap).
    pub generation: u64,
    pub outcome: CycleOutcome,
    /// Whether any window changed this cycle.
    pub changed: bool,
    pub stats: CycleStats,
    pub series: Vec<RenderableSeries>,
}

pub trait SeriesSink: Send {
    fn publish(&mut self, frame: Frame);
}

impl SeriesSink for tokio::sync::mpsc::UnboundedSender<Frame> {
    fn publish(&mut self, frame: Frame) {
        // A closed receiver means nobody is watching anymore.
        let _ = self.send(frame);
    }
}

impl SeriesSink for Box<dyn SeriesSink> {
    fn publish(&mut self, frame: Frame) {
        (**self).publish(frame)
    }
}

/// Keeps every published frame; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<Frame> {
        self.frames.lock().ok().and_then(|f| f.last().cloned())
    }
}

impl SeriesSink for CollectingSink {
    fn publish(&mut self, frame: Frame) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.push(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tick;
    use time::macros::datetime;

    fn tick(ts: OffsetDateTime, price: f64, size: u64) -> Tick {
        Tick {
            symbol: "SNOW".into(),
            timestamp: ts,
            price,
            size,
            sequence: 0,
        }
    }

    #[test]
    fn short_window_anchors_at_first_point() {
        let first = datetime!(2024-04-09 13:30:00 UTC);
        let last = datetime!(2024-04-09 13:31:00 UTC);
        assert_eq!(
            display_range(first, last, Duration::minutes(5)),
            (first, datetime!(2024-04-09 13:35:00 UTC))
        );

        let later = datetime!(2024-04-09 13:40:00 UTC);
        assert_eq!(
            display_range(first, later, Duration::minutes(5)),
            (datetime!(2024-04-09 13:35:00 UTC), later)
        );
    }

    #[test]
    fn window_series_reports_gaps_and_axes() {
        let window = Window::default().merge(
            &[
                tick(datetime!(2024-04-09 13:30:00.250 UTC), 10.0, 5),
                tick(datetime!(2024-04-09 13:30:00.750 UTC), 12.0, 7),
                tick(datetime!(2024-04-09 13:30:03 UTC), 9.0, 2),
            ],
            Duration::minutes(5),
        );

        let series = renderable_series(
            "SNOW",
            &window,
            Interval::Second(1),
            Duration::minutes(5),
            UtcOffset::UTC,
        )
        .unwrap();

        assert_eq!(series.buckets.len(), 2);
        assert_eq!(
            series.discontinuities,
            [
                datetime!(2024-04-09 13:30:01 UTC),
                datetime!(2024-04-09 13:30:02 UTC)
            ]
            .into_iter()
            .collect()
        );
        assert_eq!(series.price_bounds, (9.0, 12.0));
        assert_eq!(series.max_volume, 12);
        assert_eq!(series.display_range.0, datetime!(2024-04-09 13:30:00 UTC));
    }

    #[test]
    fn empty_window_has_no_series() {
        assert!(
            renderable_series(
                "SNOW",
                &Window::default(),
                Interval::Second(1),
                Duration::minutes(5),
                UtcOffset::UTC,
            )
            .is_none()
        );
    }

    #[test]
    fn collecting_sink_shares_frames_between_clones() {
        let sink = CollectingSink::new();
        let mut writer = sink.clone();
        writer.publish(Frame {
            mode: Mode::Replay,
            watermark: None,
            generation: 0,
            outcome: CycleOutcome::Idle,
            changed: false,
            stats: CycleStats::default(),
            series: Vec::new(),
        });
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.last().unwrap().mode, Mode::Replay);
    }
}
