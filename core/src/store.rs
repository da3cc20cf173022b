use std::path::{Path, PathBuf};

use duckdb::types::Value;
use duckdb::{Connection, params, params_from_iter};
use time::{OffsetDateTime, UtcOffset};

use crate::error::StoreError;
use crate::session::SessionFilter;
use crate::{Bucket, Interval, Mode, RawTick, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Memory,
    Disk,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRange {
    All,
    From(OffsetDateTime),
    Until(OffsetDateTime),
    Between {
        start: OffsetDateTime,
        end: OffsetDateTime,
    },
}

pub struct DuckDbStore {
    mode: StorageMode,
    disk_path: Option<PathBuf>,
    memory: Option<Connection>,
    disk: Option<Connection>,
}

impl DuckDbStore {
    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    pub fn new(path: impl AsRef<Path>, mode: StorageMode) -> Result<Self, StoreError> {
        let mut store = Self {
            mode,
            disk_path: Some(path.as_ref().to_path_buf()),
            memory: None,
            disk: None,
        };

        store.open_backends(mode)?;

        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let mut store = Self {
            mode: StorageMode::Memory,
            disk_path: None,
            memory: None,
            disk: None,
        };
        store.open_backends(StorageMode::Memory)?;
        Ok(store)
    }

    fn open_memory(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(conn)
    }

    fn open_disk(&self, path: &Path) -> Result<Connection, StoreError> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(conn)
    }

    fn open_backends(&mut self, mode: StorageMode) -> Result<(), StoreError> {
        let disk_path = self.disk_path.clone();
        match (mode, disk_path.as_deref()) {
            (StorageMode::Memory, _) => {
                self.memory = Some(self.open_memory()?);
            }
            (StorageMode::Disk, Some(path)) => {
                self.disk = Some(self.open_disk(path)?);
            }
            (StorageMode::Both, Some(path)) => {
                self.memory = Some(self.open_memory()?);
                self.disk = Some(self.open_disk(path)?);
            }
            (StorageMode::Disk | StorageMode::Both, None) => {
                return Err(StoreError::MissingDiskPath);
            }
        }

        self.mode = mode;

        Ok(())
    }

    fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.memory.iter().chain(self.disk.iter())
    }

    fn ensure_backend(&self) -> Result<(), StoreError> {
        if self.connections().count() == 0 {
            return Err(StoreError::NoBackend);
        }
        Ok(())
    }

    /// Appends pre-bucketed minute bars. `count` is stored as the trade count.
    pub fn write_bars(&self, bars: &[Bucket]) -> Result<(), StoreError> {
        self.ensure_backend()?;

        for conn in self.connections() {
            let mut stmt = conn.prepare(
                "INSERT INTO bars (symbol, ts_ns, open, high, low, close, volume, transactions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for bar in bars {
                stmt.execute(params![
                    bar.symbol,
                    to_nanos(bar.start)?,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    clamp_i64(bar.volume),
                    clamp_i64(bar.count)
                ])?;
            }
        }

        Ok(())
    }

    pub fn write_ticks(&self, feed: Mode, ticks: &[Tick]) -> Result<(), StoreError> {
        let raw: Vec<RawTick> = ticks
            .iter()
            .map(|t| RawTick {
                symbol: Some(t.symbol.clone()),
                timestamp: Some(t.timestamp),
                price: Some(t.price),
                size: Some(clamp_i64(t.size)),
                sequence: Some(clamp_i64(t.sequence)),
            })
            .collect();
        self.write_raw_ticks(feed, &raw)
    }

    /// Appends rows to a feed as-is, including rows with missing fields.
    pub fn write_raw_ticks(&self, feed: Mode, ticks: &[RawTick]) -> Result<(), StoreError> {
        self.ensure_backend()?;

        for conn in self.connections() {
            let mut stmt = conn.prepare(
                "INSERT INTO ticks (feed, symbol, ts_ns, price, size, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for tick in ticks {
                let ts_ns = tick.timestamp.map(to_nanos).transpose()?;
                stmt.execute(params![
                    feed.as_str(),
                    tick.symbol,
                    ts_ns,
                    tick.price,
                    tick.size,
                    tick.sequence
                ])?;
            }
        }

        Ok(())
    }

    /// Drops every row of a feed; the replay feeder does this when its recording wraps.
    pub fn clear_feed(&self, feed: Mode) -> Result<(), StoreError> {
        self.ensure_backend()?;
        for conn in self.connections() {
            conn.execute("DELETE FROM ticks WHERE feed = ?", params![feed.as_str()])?;
        }
        Ok(())
    }

    pub fn set_reference(&self, symbol: &str, name: &str) -> Result<(), StoreError> {
        self.ensure_backend()?;
        for conn in self.connections() {
            conn.execute(
                "INSERT INTO reference(symbol, name) VALUES (?, ?)
                 ON CONFLICT(symbol) DO UPDATE SET name = excluded.name",
                params![symbol, name],
            )?;
        }
        Ok(())
    }

    pub fn symbol_name(&self, symbol: &str) -> Result<Option<String>, StoreError> {
        for conn in self.connections() {
            let mut stmt = conn.prepare("SELECT name FROM reference WHERE symbol = ? LIMIT 1")?;
            let mut rows = stmt.query([symbol])?;
            if let Some(row) = rows.next()? {
                let v: String = row.get(0)?;
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    /// Distinct symbols with historical bars, sorted.
    pub fn list_symbols(&self) -> Result<Vec<String>, StoreError> {
        let mut result = Vec::new();
        for conn in self.connections() {
            let mut stmt = conn.prepare("SELECT DISTINCT symbol FROM bars ORDER BY symbol ASC")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let symbol: String = row.get(0)?;
                result.push(symbol);
            }
            if !result.is_empty() {
                return Ok(result);
            }
        }
        Ok(result)
    }

    /// Historical bulk aggregation of the minute bars into `interval` buckets.
    ///
    /// Buckets align in exchange-local time given by `offset`.
    pub fn query_aggregates(
        &self,
        symbols: &[String],
        range: &DataRange,
        interval: Interval,
        offset: UtcOffset,
    ) -> Result<Vec<Bucket>, StoreError> {
        let mut result = Vec::new();
        if symbols.is_empty() {
            return Ok(result);
        }

        let width = i64::try_from(interval.width_nanos())
            .map_err(|_| StoreError::TimestampRange(interval.width_nanos()))?
            .max(1);
        let shift = i64::from(offset.whole_seconds()) * 1_000_000_000;

        let mut conditions = vec![symbol_condition(symbols.len())];
        let mut params: Vec<Value> = symbols.iter().cloned().map(Value::Text).collect();
        match range {
            DataRange::All => {}
            DataRange::From(start) => {
                conditions.push("ts_ns >= ?".to_string());
                params.push(Value::BigInt(to_nanos(*start)?));
            }
            DataRange::Until(end) => {
                conditions.push("ts_ns <= ?".to_string());
                params.push(Value::BigInt(to_nanos(*end)?));
            }
            DataRange::Between { start, end } => {
                conditions.push("ts_ns >= ?".to_string());
                conditions.push("ts_ns <= ?".to_string());
                params.push(Value::BigInt(to_nanos(*start)?));
                params.push(Value::BigInt(to_nanos(*end)?));
            }
        }

        let query = format!(
            "SELECT symbol,
                    (ts_ns + {shift}) // {width} * {width} - {shift} AS bucket,
                    arg_min(open, ts_ns),
                    max(high),
                    min(low),
                    arg_max(close, ts_ns),
                    avg(close),
                    CAST(sum(volume) AS BIGINT),
                    CAST(sum(transactions) AS BIGINT)
             FROM bars
             WHERE {}
             GROUP BY symbol, bucket
             ORDER BY symbol ASC, bucket ASC",
            conditions.join(" AND ")
        );

        for conn in self.connections() {
            let mut stmt = conn.prepare(&query)?;
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            while let Some(row) = rows.next()? {
                let bucket_ns: i64 = row.get(1)?;
                let volume: i64 = row.get(7)?;
                let count: i64 = row.get(8)?;
                result.push(Bucket {
                    symbol: row.get(0)?,
                    start: from_nanos(bucket_ns)?,
                    open: row.get(2)?,
                    high: row.get(3)?,
                    low: row.get(4)?,
                    close: row.get(5)?,
                    average: row.get(6)?,
                    volume: u64::try_from(volume).unwrap_or(0),
                    count: u64::try_from(count).unwrap_or(0),
                });
            }

            if !result.is_empty() {
                return Ok(result);
            }
        }

        Ok(result)
    }

    /// Raw feed rows with `timestamp > watermark`, ordered by symbol, timestamp, sequence.
    pub fn query_raw_since(
        &self,
        feed: Mode,
        symbols: &[String],
        watermark: Option<OffsetDateTime>,
        session: SessionFilter,
        offset: UtcOffset,
    ) -> Result<Vec<RawTick>, StoreError> {
        let mut result = Vec::new();
        if symbols.is_empty() {
            return Ok(result);
        }

        let mut conditions = vec!["feed = ?".to_string(), symbol_condition(symbols.len())];
        let mut params: Vec<Value> = vec![Value::Text(feed.as_str().to_string())];
        params.extend(symbols.iter().cloned().map(Value::Text));

        if let Some(watermark) = watermark {
            conditions.push("ts_ns > ?".to_string());
            params.push(Value::BigInt(to_nanos(watermark)?));
        }
        if let Some((start, end)) = session.bounds(offset) {
            conditions.push("ts_ns >= ?".to_string());
            conditions.push("ts_ns < ?".to_string());
            params.push(Value::BigInt(to_nanos(start)?));
            params.push(Value::BigInt(to_nanos(end)?));
        }

        let query = format!(
            "SELECT symbol, ts_ns, price, size, seq
             FROM ticks
             WHERE {}
             ORDER BY symbol ASC, ts_ns ASC, seq ASC",
            conditions.join(" AND ")
        );

        for conn in self.connections() {
            let mut stmt = conn.prepare(&query)?;
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            while let Some(row) = rows.next()? {
                let ts_ns: Option<i64> = row.get(1)?;
                result.push(RawTick {
                    symbol: row.get(0)?,
                    timestamp: ts_ns.and_then(|ns| from_nanos(ns).ok()),
                    price: row.get(2)?,
                    size: row.get(3)?,
                    sequence: row.get(4)?,
                });
            }

            if !result.is_empty() {
                return Ok(result);
            }
        }

        Ok(result)
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS bars (
            symbol TEXT NOT NULL,
            ts_ns BIGINT NOT NULL,
            open DOUBLE NOT NULL,
            high DOUBLE NOT NULL,
            low DOUBLE NOT NULL,
            close DOUBLE NOT NULL,
            volume BIGINT NOT NULL,
            transactions BIGINT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_bars_symbol_ts ON bars(symbol, ts_ns);

        CREATE TABLE IF NOT EXISTS ticks (
            feed TEXT NOT NULL,
            symbol TEXT,
            ts_ns BIGINT,
            price DOUBLE,
            size BIGINT,
            seq BIGINT
        );
        CREATE INDEX IF NOT EXISTS idx_ticks_feed_symbol_ts ON ticks(feed, symbol, ts_ns);

        CREATE TABLE IF NOT EXISTS reference (
            symbol TEXT PRIMARY KEY,
            name TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn symbol_condition(n: usize) -> String {
    let placeholders = vec!["?"; n].join(", ");
    format!("symbol IN ({placeholders})")
}

fn to_nanos(ts: OffsetDateTime) -> Result<i64, StoreError> {
    let nanos = ts.unix_timestamp_nanos();
    i64::try_from(nanos).map_err(|_| StoreError::TimestampRange(nanos))
}

fn from_nanos(nanos: i64) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|_| StoreError::TimestampRange(i128::from(nanos)))
}

fn clamp_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
