use std::fmt;
use std::str::FromStr;

use time::{Duration, OffsetDateTime};

use crate::error::RecordError;

/// A single trade observation from a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub timestamp: OffsetDateTime,
    pub price: f64,
    pub size: u64,
    pub sequence: u64,
}

impl Tick {
    /// Total order within one feed: timestamp first, sequence as tie-breaker.
    pub fn order_key(&self) -> (OffsetDateTime, u64) {
        (self.timestamp, self.sequence)
    }
}

/// A raw row as it comes back from storage, before required fields are checked.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTick {
    pub symbol: Option<String>,
    pub timestamp: Option<OffsetDateTime>,
    pub price: Option<f64>,
    pub size: Option<i64>,
    pub sequence: Option<i64>,
}

impl TryFrom<RawTick> for Tick {
    type Error = RecordError;

    fn try_from(raw: RawTick) -> Result<Self, Self::Error> {
        let symbol = raw.symbol.ok_or(RecordError::Missing("symbol"))?;
        let timestamp = raw.timestamp.ok_or(RecordError::Missing("timestamp"))?;
        let price = raw.price.ok_or(RecordError::Missing("price"))?;
        if !price.is_finite() {
            return Err(RecordError::Invalid { field: "price", value: price.to_string() });
        }
        let size = raw.size.ok_or(RecordError::Missing("size"))?;
        let size = u64::try_from(size).map_err(|_| RecordError::Invalid {
            field: "size",
            value: size.to_string(),
        })?;
        let sequence = raw.sequence.ok_or(RecordError::Missing("sequence"))?;
        let sequence = u64::try_from(sequence).map_err(|_| RecordError::Invalid {
            field: "sequence",
            value: sequence.to_string(),
        })?;
        Ok(Tick {
            symbol,
            timestamp,
            price,
            size,
            sequence,
        })
    }
}

/// OHLCV aggregate of one symbol over `[start, start + interval)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub symbol: String,
    pub start: OffsetDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Arithmetic mean of the contributing prices.
    pub average: f64,
    pub volume: u64,
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub symbol: String,
    pub timestamp: String,
    pub price: String,
    pub size: String,
    pub sequence: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub count: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            symbol: "symbol".into(),
            timestamp: "timestamp".into(),
            price: "price".into(),
            size: "size".into(),
            sequence: "sequence".into(),
            open: "open".into(),
            high: "high".into(),
            low: "low".into(),
            close: "close".into(),
            volume: "volume".into(),
            count: "transactions".into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub columns: ColumnMapping,
    /// Symbol to stamp on every row when the file has no symbol column.
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    Second(u32),
    Minute(u32),
    Hour(u32),
    Day(u32),
}

impl Interval {
    pub fn as_duration(&self) -> Duration {
        match *self {
            Interval::Second(n) => Duration::seconds(n.into()),
            Interval::Minute(n) => Duration::minutes(n.into()),
            Interval::Hour(n) => Duration::hours(n.into()),
            Interval::Day(n) => Duration::days(n.into()),
        }
    }

    pub fn width_nanos(&self) -> i128 {
        self.as_duration().whole_nanoseconds()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Interval::Second(n) => write!(f, "{n}s"),
            Interval::Minute(n) => write!(f, "{n}m"),
            Interval::Hour(n) => write!(f, "{n}h"),
            Interval::Day(n) => write!(f, "{n}d"),
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim().to_ascii_lowercase();
        if trimmed.is_empty() {
            return Err("interval cannot be empty".into());
        }

        let split = trimmed.char_indices().last().map_or(0, |(i, _)| i);
        let (number, unit) = trimmed.split_at(split);

        let amount: u32 = number
            .parse()
            .map_err(|_| format!("invalid interval amount: {number}"))?;
        if amount == 0 {
            return Err("interval amount must be positive".into());
        }

        match unit {
            "s" => Ok(Interval::Second(amount)),
            "m" => Ok(Interval::Minute(amount)),
            "h" => Ok(Interval::Hour(amount)),
            "d" => Ok(Interval::Day(amount)),
            other => Err(format!("unsupported interval unit: {other} (use s/m/h/d)")),
        }
    }
}

/// Which feed the chart is following.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    #[default]
    Live,
    Replay,
}

impl Mode {
    /// Feed name as stored in the `ticks.feed` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Live => "live",
            Mode::Replay => "replay",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "live" | "real-time" | "realtime" => Ok(Mode::Live),
            "replay" => Ok(Mode::Replay),
            other => Err(format!("unknown mode: {other} (use live/replay)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_interval_units() {
        assert_eq!("5m".parse::<Interval>(), Ok(Interval::Minute(5)));
        assert_eq!(" 1H ".parse::<Interval>(), Ok(Interval::Hour(1)));
        assert_eq!("1d".parse::<Interval>(), Ok(Interval::Day(1)));
        assert!("0s".parse::<Interval>().is_err());
        assert!("3w".parse::<Interval>().is_err());
        assert!("5µ".parse::<Interval>().is_err());
        assert!("µ".parse::<Interval>().is_err());
        assert_eq!(Interval::Second(10).to_string(), "10s");
    }

    #[test]
    fn raw_tick_requires_every_field() {
        let raw = RawTick {
            symbol: Some("MSFT".into()),
            timestamp: Some(datetime!(2024-04-09 13:30:00 UTC)),
            price: Some(420.5),
            size: Some(100),
            sequence: None,
        };
        assert_eq!(
            Tick::try_from(raw.clone()),
            Err(RecordError::Missing("sequence"))
        );

        let ok = Tick::try_from(RawTick {
            sequence: Some(7),
            ..raw.clone()
        })
        .unwrap();
        assert_eq!(ok.sequence, 7);
        assert_eq!(ok.size, 100);

        let negative = Tick::try_from(RawTick {
            sequence: Some(7),
            size: Some(-1),
            ..raw
        });
        assert!(matches!(
            negative,
            Err(RecordError::Invalid { field: "size", .. })
        ));
    }

    #[test]
    fn mode_round_trips_through_feed_name() {
        assert_eq!("Real-Time".parse::<Mode>(), Ok(Mode::Live));
        assert_eq!(Mode::Replay.as_str().parse::<Mode>(), Ok(Mode::Replay));
    }
}
