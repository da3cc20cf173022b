//! Deterministic random-walk data for seeding stores and driving the feeder.

use time::{Duration, OffsetDateTime};

use crate::{Bucket, Tick};

struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed ^ 0x1234_5678_9abc_def0)
    }

    fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bits = (self.0 >> 12) | 0x3ff0_0000_0000_0000;
        let f = f64::from_bits(bits) - 1.0;
        f.clamp(0.0, 1.0)
    }
}

fn seed_for(symbol: &str, seed: u64) -> u64 {
    symbol
        .bytes()
        .fold(seed, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)))
}

/// `n` ticks starting at `start`, spaced by `step`, with occasional same-timestamp trades.
pub fn ticks(symbol: &str, start: OffsetDateTime, n: usize, step: Duration, seed: u64) -> Vec<Tick> {
    let mut rng = Lcg::new(seed_for(symbol, seed));
    let mut price = 100.0_f64;
    let mut ts = start;
    let mut out = Vec::with_capacity(n);

    for i in 0..n {
        if i > 0 && rng.next_f64() > 0.2 {
            ts += step;
        }
        price = (price + (rng.next_f64() - 0.5) * 0.4).max(1.0);
        out.push(Tick {
            symbol: symbol.to_string(),
            timestamp: ts,
            price: (price * 100.0).round() / 100.0,
            size: 1 + (rng.next_f64() * 500.0) as u64,
            sequence: i as u64,
        });
    }

    out
}

/// `n` consecutive one-minute bars starting at `start`.
pub fn minute_bars(symbol: &str, start: OffsetDateTime, n: usize, seed: u64) -> Vec<Bucket> {
    let mut rng = Lcg::new(seed_for(symbol, seed));
    let mut price = 100.0_f64;
    let mut bars = Vec::with_capacity(n);

    for i in 0..n {
        let open = price;
        let close = (price + (rng.next_f64() - 0.5) * 0.8).max(1.0);
        let high = open.max(close) + rng.next_f64() * 0.4;
        let low = (open.min(close) - rng.next_f64() * 0.4).max(0.5);
        let count = 1 + (rng.next_f64() * 40.0) as u64;
        bars.push(Bucket {
            symbol: symbol.to_string(),
            start: start + Duration::minutes(i as i64),
            open,
            high,
            low,
            close,
            average: (open + close) / 2.0,
            volume: count * (1 + (rng.next_f64() * 100.0) as u64),
            count,
        });
        price = close;
    }

    bars
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn ticks_are_ordered_and_deterministic() {
        let start = datetime!(2024-04-09 13:30:00 UTC);
        let a = ticks("SNOW", start, 200, Duration::milliseconds(250), 7);
        let b = ticks("SNOW", start, 200, Duration::milliseconds(250), 7);
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0].order_key() < w[1].order_key()));
        assert!(a.iter().all(|t| t.price >= 1.0 && t.size >= 1));
    }

    #[test]
    fn bars_are_consistent() {
        let bars = minute_bars("MSFT", datetime!(2024-04-09 13:30:00 UTC), 390, 1);
        assert_eq!(bars.len(), 390);
        assert!(bars.iter().all(|b| b.low <= b.open.min(b.close)));
        assert!(bars.iter().all(|b| b.high >= b.open.max(b.close)));
        assert_eq!(bars[389].start - bars[0].start, Duration::minutes(389));
    }
}
