use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset, Weekday};

use crate::Bucket;

/// Restricts raw reads to part of the recorded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFilter {
    All,
    /// One exchange-local trading date.
    Day(Date),
}

impl SessionFilter {
    /// Half-open `[start, end)` bounds of the session, if any.
    pub fn bounds(&self, offset: UtcOffset) -> Option<(OffsetDateTime, OffsetDateTime)> {
        match *self {
            SessionFilter::All => None,
            SessionFilter::Day(date) => {
                let start = PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_offset(offset);
                Some((start, start + Duration::days(1)))
            }
        }
    }

    /// Today's session at the exchange.
    pub fn today(now: OffsetDateTime, offset: UtcOffset) -> Self {
        SessionFilter::Day(now.to_offset(offset).date())
    }
}

/// Regular trading hours, in exchange-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingHours {
    pub open: Time,
    pub close: Time,
    pub offset: UtcOffset,
}

impl TradingHours {
    pub fn new(offset: UtcOffset) -> Self {
        Self {
            open: time::macros::time!(09:30),
            close: time::macros::time!(16:00),
            offset,
        }
    }

    pub fn contains(&self, ts: OffsetDateTime) -> bool {
        let local = ts.to_offset(self.offset).time();
        local >= self.open && local < self.close
    }

    pub fn retain(&self, buckets: Vec<Bucket>) -> Vec<Bucket> {
        buckets.into_iter().filter(|b| self.contains(b.start)).collect()
    }
}

pub fn is_trading_day(date: Date) -> bool {
    !matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday)
}

/// Closest weekday strictly before `date`.
pub fn previous_trading_day(date: Date) -> Option<Date> {
    let mut day = date.previous_day()?;
    while !is_trading_day(day) {
        day = day.previous_day()?;
    }
    Some(day)
}

/// Keeps buckets within one day of the last bucket.
pub fn trailing_day(buckets: Vec<Bucket>) -> Vec<Bucket> {
    let Some(last) = buckets.iter().map(|b| b.start).max() else {
        return buckets;
    };
    let cutoff = last - Duration::days(1);
    buckets.into_iter().filter(|b| b.start > cutoff).collect()
}
