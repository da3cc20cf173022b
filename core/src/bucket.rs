use time::{OffsetDateTime, UtcOffset};

use crate::{Bucket, Interval, Tick};

/// Price range `(min low, max high)` across the series.
pub fn bounds(buckets: &[Bucket]) -> Option<(f64, f64)> {
    if buckets.is_empty() {
        return None;
    }
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    for b in buckets {
        min = min.min(b.low);
        max = max.max(b.high);
    }
    Some((min, max))
}

/// Start of the bucket containing `ts`, aligned in exchange-local time.
pub fn align(ts: OffsetDateTime, interval: Interval, offset: UtcOffset) -> OffsetDateTime {
    let width = interval.width_nanos();
    if width <= 0 {
        return ts;
    }
    let shift = i128::from(offset.whole_seconds()) * 1_000_000_000;
    let local = ts.unix_timestamp_nanos() + shift;
    let bucket = local.div_euclid(width) * width - shift;
    OffsetDateTime::from_unix_timestamp_nanos(bucket).unwrap_or(ts)
}

struct Accumulator {
    symbol: String,
    start: OffsetDateTime,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    price_sum: f64,
    volume: u64,
    count: u64,
}

impl Accumulator {
    fn open_with(tick: &Tick, start: OffsetDateTime) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            start,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            price_sum: tick.price,
            volume: tick.size,
            count: 1,
        }
    }

    fn push(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.close = tick.price;
        self.price_sum += tick.price;
        self.volume = self.volume.saturating_add(tick.size);
        self.count += 1;
    }

    fn finish(self) -> Bucket {
        Bucket {
            symbol: self.symbol,
            start: self.start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            average: self.price_sum / self.count as f64,
            volume: self.volume,
            count: self.count,
        }
    }
}

/// Groups ticks into fixed-width buckets per symbol.
///
/// Ticks are ordered by `(symbol, timestamp, sequence)` first, so arrival order
/// never changes the result. Output is grouped by symbol, then by bucket start.
/// Spans without ticks produce no bucket.
pub fn aggregate(ticks: &[Tick], interval: Interval, offset: UtcOffset) -> Vec<Bucket> {
    let mut ordered: Vec<&Tick> = ticks.iter().collect();
    ordered.sort_by(|a, b| {
        a.symbol
            .cmp(&b.symbol)
            .then_with(|| a.order_key().cmp(&b.order_key()))
    });

    let mut out = Vec::new();
    let mut acc: Option<Accumulator> = None;

    for tick in ordered {
        let start = align(tick.timestamp, interval, offset);
        match acc.as_mut() {
            Some(current) if current.start == start && current.symbol == tick.symbol => {
                current.push(tick);
            }
            _ => {
                if let Some(done) = acc.take() {
                    out.push(done.finish());
                }
                acc = Some(Accumulator::open_with(tick, start));
            }
        }
    }

    if let Some(done) = acc {
        out.push(done.finish());
    }

    out
}

/// Re-buckets finer buckets of a single symbol into a coarser interval.
///
/// Input must be ordered by start. `average` is weighted by tick count.
pub fn resample(buckets: &[Bucket], interval: Interval, offset: UtcOffset) -> Vec<Bucket> {
    if buckets.is_empty() {
        return Vec::new();
    }

    let mut out: Vec<Bucket> = Vec::new();
    let mut current = buckets[0].clone();
    current.start = align(current.start, interval, offset);
    let mut weighted = current.average * current.count as f64;

    for b in buckets.iter().skip(1) {
        let start = align(b.start, interval, offset);
        if start == current.start && b.symbol == current.symbol {
            current.high = current.high.max(b.high);
            current.low = current.low.min(b.low);
            current.close = b.close;
            current.volume = current.volume.saturating_add(b.volume);
            current.count += b.count;
            weighted += b.average * b.count as f64;
        } else {
            current.average = weighted_average(weighted, current.count, current.close);
            out.push(current);

            current = b.clone();
            current.start = start;
            weighted = b.average * b.count as f64;
        }
    }

    current.average = weighted_average(weighted, current.count, current.close);
    out.push(current);

    out
}

fn weighted_average(sum: f64, count: u64, fallback: f64) -> f64 {
    if count == 0 { fallback } else { sum / count as f64 }
}
