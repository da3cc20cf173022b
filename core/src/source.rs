use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use time::{OffsetDateTime, UtcOffset};
use tracing::debug;

use crate::error::{FetchError, StoreError};
use crate::session::SessionFilter;
use crate::store::DuckDbStore;
use crate::{Mode, RawTick, Tick};

/// One fetch result: well-formed ticks per symbol, ordered by `(timestamp, sequence)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fetched {
    pub ticks: BTreeMap<String, Vec<Tick>>,
    /// Rows dropped for missing or invalid fields.
    pub malformed: usize,
}

impl Fetched {
    pub fn is_empty(&self) -> bool {
        self.ticks.values().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.ticks.values().map(Vec::len).sum()
    }

    /// Validates raw rows, keeping only `symbols` and dropping malformed rows.
    pub fn from_raw(rows: Vec<RawTick>, symbols: &[String]) -> Self {
        let mut fetched = Fetched::default();
        for raw in rows {
            match Tick::try_from(raw) {
                Ok(tick) if symbols.contains(&tick.symbol) => {
                    fetched.ticks.entry(tick.symbol.clone()).or_default().push(tick);
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(%err, "dropping malformed tick");
                    fetched.malformed += 1;
                }
            }
        }
        for ticks in fetched.ticks.values_mut() {
            ticks.sort_by_key(Tick::order_key);
        }
        fetched
    }
}

/// Pulls ticks newer than a watermark from the live or replay feed.
///
/// Implementations are read-only and keep no buffer of their own. An empty
/// symbol set yields an empty result, not an error.
pub trait TickSource: Send + Sync {
    fn fetch_since(
        &self,
        symbols: &[String],
        watermark: Option<OffsetDateTime>,
        mode: Mode,
    ) -> Result<Fetched, FetchError>;
}

/// Reads the `ticks` table of a shared DuckDB store.
///
/// Live reads are restricted to today's exchange-local session unless a
/// session override is set; replay reads the whole recording.
pub struct StoreSource {
    store: Arc<Mutex<DuckDbStore>>,
    offset: UtcOffset,
    session: Option<SessionFilter>,
}

impl StoreSource {
    pub fn new(store: Arc<Mutex<DuckDbStore>>, offset: UtcOffset) -> Self {
        Self {
            store,
            offset,
            session: None,
        }
    }

    pub fn with_session(mut self, session: SessionFilter) -> Self {
        self.session = Some(session);
        self
    }

    fn session_for(&self, mode: Mode) -> SessionFilter {
        match (self.session, mode) {
            (Some(session), _) => session,
            (None, Mode::Live) => SessionFilter::today(OffsetDateTime::now_utc(), self.offset),
            (None, Mode::Replay) => SessionFilter::All,
        }
    }
}

impl TickSource for StoreSource {
    fn fetch_since(
        &self,
        symbols: &[String],
        watermark: Option<OffsetDateTime>,
        mode: Mode,
    ) -> Result<Fetched, FetchError> {
        if symbols.is_empty() {
            return Ok(Fetched::default());
        }

        let session = self.session_for(mode);
        let rows = {
            let store = self.store.lock().map_err(|_| StoreError::Poisoned)?;
            store.query_raw_since(mode, symbols, watermark, session, self.offset)?
        };
        Ok(Fetched::from_raw(rows, symbols))
    }
}

/// A fixed in-memory recording per feed.
///
/// Handy for driving the engine without a database; the replay feed behaves as
/// a bounded recording that simply stops yielding once read past its end.
#[derive(Debug, Default)]
pub struct RecordedSource {
    feeds: Mutex<BTreeMap<&'static str, Vec<Tick>>>,
}

impl RecordedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, mode: Mode, ticks: impl IntoIterator<Item = Tick>) {
        if let Ok(mut feeds) = self.feeds.lock() {
            feeds.entry(mode.as_str()).or_default().extend(ticks);
        }
    }

    pub fn clear(&self, mode: Mode) {
        if let Ok(mut feeds) = self.feeds.lock() {
            feeds.remove(mode.as_str());
        }
    }
}

impl TickSource for RecordedSource {
    fn fetch_since(
        &self,
        symbols: &[String],
        watermark: Option<OffsetDateTime>,
        mode: Mode,
    ) -> Result<Fetched, FetchError> {
        let mut fetched = Fetched::default();
        if symbols.is_empty() {
            return Ok(fetched);
        }

        let feeds = self.feeds.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(recording) = feeds.get(mode.as_str()) else {
            return Ok(fetched);
        };

        for tick in recording {
            if !symbols.contains(&tick.symbol) {
                continue;
            }
            if watermark.is_some_and(|w| tick.timestamp <= w) {
                continue;
            }
            fetched
                .ticks
                .entry(tick.symbol.clone())
                .or_default()
                .push(tick.clone());
        }
        for ticks in fetched.ticks.values_mut() {
            ticks.sort_by_key(Tick::order_key);
        }
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use time::macros::datetime;

    fn tick(symbol: &str, ts: OffsetDateTime, sequence: u64) -> Tick {
        Tick {
            symbol: symbol.into(),
            timestamp: ts,
            price: 10.0 + sequence as f64,
            size: 5,
            sequence,
        }
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_symbol_set_is_not_an_error() {
        let source = RecordedSource::new();
        source.push(Mode::Live, [tick("SNOW", datetime!(2024-04-09 13:30:00 UTC), 1)]);
        let fetched = source.fetch_since(&[], None, Mode::Live).unwrap();
        assert!(fetched.is_empty());
    }

    #[test]
    fn recorded_source_is_exclusive_of_watermark() {
        let t0 = datetime!(2024-04-09 13:30:00 UTC);
        let source = RecordedSource::new();
        source.push(
            Mode::Replay,
            (0..4).map(|i| tick("SNOW", t0 + Duration::seconds(i), i as u64)),
        );
        source.push(Mode::Replay, [tick("MSFT", t0, 9)]);

        let fetched = source
            .fetch_since(&symbols(&["SNOW"]), Some(t0 + Duration::seconds(1)), Mode::Replay)
            .unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched.ticks["SNOW"][0].timestamp, t0 + Duration::seconds(2));

        let live = source
            .fetch_since(&symbols(&["SNOW"]), None, Mode::Live)
            .unwrap();
        assert!(live.is_empty());
    }

    #[test]
    fn malformed_rows_are_counted_and_dropped() {
        let ts = datetime!(2024-04-09 13:30:00 UTC);
        let good = RawTick {
            symbol: Some("SNOW".into()),
            timestamp: Some(ts),
            price: Some(1.0),
            size: Some(1),
            sequence: Some(1),
        };
        let rows = vec![
            good.clone(),
            RawTick {
                price: None,
                ..good.clone()
            },
            RawTick {
                timestamp: None,
                ..good
            },
        ];
        let fetched = Fetched::from_raw(rows, &symbols(&["SNOW"]));
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched.malformed, 2);
    }

    #[test]
    fn store_source_reads_session_rows() {
        let store = DuckDbStore::in_memory().unwrap();
        let ts = datetime!(2024-04-09 14:00:00 UTC);
        store
            .write_ticks(Mode::Live, &[tick("SNOW", ts, 1), tick("SNOW", ts + Duration::seconds(1), 2)])
            .unwrap();
        let source = StoreSource::new(Arc::new(Mutex::new(store)), UtcOffset::UTC)
            .with_session(SessionFilter::Day(ts.date()));

        let fetched = source
            .fetch_since(&symbols(&["SNOW"]), Some(ts), Mode::Live)
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched.ticks["SNOW"][0].sequence, 2);
    }
}
