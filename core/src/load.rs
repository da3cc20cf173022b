use crate::{Bucket, ColumnMapping, LoadError, LoadOptions, Tick};
use polars::datatypes::TimeUnit;
use polars::prelude::PlPathRef;
use polars::prelude::*;
use std::path::Path;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

fn read_csv(path: &Path) -> Result<DataFrame, LoadError> {
    let pl_path = PlPathRef::from_local_path(path).into_owned();
    let lf = LazyCsvReader::new(pl_path).with_has_header(true);
    Ok(lf.finish()?.collect()?)
}

fn read_parquet(path: &Path) -> Result<DataFrame, LoadError> {
    let pl_path = PlPathRef::from_local_path(path).into_owned();
    let lf = LazyFrame::scan_parquet(pl_path, ScanArgsParquet::default())?;
    Ok(lf.collect()?)
}

/// Trade recording with `timestamp, price, size` and optional `symbol, sequence`.
pub fn load_ticks_csv(path: impl AsRef<Path>, options: LoadOptions) -> Result<Vec<Tick>, LoadError> {
    parse_ticks(read_csv(path.as_ref())?, &options)
}

pub fn load_ticks_parquet(
    path: impl AsRef<Path>,
    options: LoadOptions,
) -> Result<Vec<Tick>, LoadError> {
    parse_ticks(read_parquet(path.as_ref())?, &options)
}

/// Minute bars with `timestamp, open, high, low, close, volume` and optional
/// `symbol, transactions`.
pub fn load_bars_csv(path: impl AsRef<Path>, options: LoadOptions) -> Result<Vec<Bucket>, LoadError> {
    parse_bars(read_csv(path.as_ref())?, &options)
}

pub fn load_bars_parquet(
    path: impl AsRef<Path>,
    options: LoadOptions,
) -> Result<Vec<Bucket>, LoadError> {
    parse_bars(read_parquet(path.as_ref())?, &options)
}

fn required<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, LoadError> {
    df.column(name)
        .map_err(|_| LoadError::MissingColumn(name.to_string()))
}

fn optional<'a>(df: &'a DataFrame, name: &str) -> Option<&'a Column> {
    df.column(name).ok()
}

fn symbol_at(
    column: Option<&Column>,
    fallback: Option<&str>,
    row: usize,
) -> Result<String, LoadError> {
    if let Some(column) = column {
        match column.get(row)? {
            AnyValue::String(s) if !s.trim().is_empty() => return Ok(s.trim().to_string()),
            AnyValue::StringOwned(s) if !s.trim().is_empty() => return Ok(s.trim().to_string()),
            _ => {}
        }
    }
    fallback
        .map(str::to_string)
        .ok_or(LoadError::MissingSymbol { row })
}

fn parse_ticks(df: DataFrame, options: &LoadOptions) -> Result<Vec<Tick>, LoadError> {
    let columns: &ColumnMapping = &options.columns;
    let ts = required(&df, &columns.timestamp)?;
    let price = required(&df, &columns.price)?;
    let size = required(&df, &columns.size)?;
    let symbol = optional(&df, &columns.symbol);
    let sequence = optional(&df, &columns.sequence);

    let len = ts.len();
    if price.len() != len || size.len() != len {
        return Err(LoadError::LengthMismatch);
    }

    let mut ticks = Vec::with_capacity(len);
    for idx in 0..len {
        let timestamp = to_datetime(ts.get(idx)?, idx)?;
        let price = to_f64(price.get(idx)?, &columns.price, idx)?;
        let size = to_u64(size.get(idx)?, &columns.size, idx)?;
        let sequence = match sequence {
            Some(col) => to_u64(col.get(idx)?, &columns.sequence, idx)?,
            None => idx as u64,
        };
        ticks.push(Tick {
            symbol: symbol_at(symbol, options.symbol.as_deref(), idx)?,
            timestamp,
            price,
            size,
            sequence,
        });
    }

    Ok(ticks)
}

fn parse_bars(df: DataFrame, options: &LoadOptions) -> Result<Vec<Bucket>, LoadError> {
    let columns = &options.columns;
    let ts = required(&df, &columns.timestamp)?;
    let open = required(&df, &columns.open)?;
    let high = required(&df, &columns.high)?;
    let low = required(&df, &columns.low)?;
    let close = required(&df, &columns.close)?;
    let volume = required(&df, &columns.volume)?;
    let symbol = optional(&df, &columns.symbol);
    let count = optional(&df, &columns.count);

    let len = ts.len();
    if open.len() != len
        || high.len() != len
        || low.len() != len
        || close.len() != len
        || volume.len() != len
    {
        return Err(LoadError::LengthMismatch);
    }

    let mut bars = Vec::with_capacity(len);
    for idx in 0..len {
        let start = to_datetime(ts.get(idx)?, idx)?;
        let open = to_f64(open.get(idx)?, &columns.open, idx)?;
        let high = to_f64(high.get(idx)?, &columns.high, idx)?;
        let low = to_f64(low.get(idx)?, &columns.low, idx)?;
        let close = to_f64(close.get(idx)?, &columns.close, idx)?;
        let volume = to_u64(volume.get(idx)?, &columns.volume, idx)?;
        let count = match count {
            Some(col) => to_u64(col.get(idx)?, &columns.count, idx)?.max(1),
            None => 1,
        };

        if low > high {
            return Err(LoadError::InvertedRange { row: idx, low, high });
        }

        bars.push(Bucket {
            symbol: symbol_at(symbol, options.symbol.as_deref(), idx)?,
            start,
            open,
            high,
            low,
            close,
            average: close,
            volume,
            count,
        });
    }

    Ok(bars)
}

fn to_datetime(value: AnyValue, row: usize) -> Result<OffsetDateTime, LoadError> {
    match value {
        AnyValue::Datetime(ts, unit, _) => from_timestamp(ts, unit, row),
        AnyValue::Date(days) => {
            let secs = days as i64 * 86_400;
            OffsetDateTime::from_unix_timestamp(secs).map_err(|_| LoadError::UnsupportedTimestamp {
                row,
                value: format!("days since epoch: {days}"),
            })
        }
        AnyValue::Int64(raw) => from_epoch_guess(raw, row),
        AnyValue::UInt64(raw) => from_epoch_guess(raw as i64, row),
        AnyValue::String(s) => OffsetDateTime::parse(s, &Rfc3339).map_err(|err| {
            LoadError::UnsupportedTimestamp {
                row,
                value: format!("{s} ({err})"),
            }
        }),
        AnyValue::StringOwned(s) => to_datetime(AnyValue::String(&s), row),
        other => Err(LoadError::UnsupportedTimestamp {
            row,
            value: format!("{other:?}"),
        }),
    }
}

/// Bare integers are read as epoch seconds, millis, micros or nanos by magnitude.
fn from_epoch_guess(raw: i64, row: usize) -> Result<OffsetDateTime, LoadError> {
    let unit = match raw.unsigned_abs() {
        n if n >= 100_000_000_000_000_000 => Some(TimeUnit::Nanoseconds),
        n if n >= 100_000_000_000_000 => Some(TimeUnit::Microseconds),
        n if n >= 100_000_000_000 => Some(TimeUnit::Milliseconds),
        _ => None,
    };
    match unit {
        Some(unit) => from_timestamp(raw, unit, row),
        None => OffsetDateTime::from_unix_timestamp(raw).map_err(|_| {
            LoadError::UnsupportedTimestamp {
                row,
                value: raw.to_string(),
            }
        }),
    }
}

fn from_timestamp(value: i64, unit: TimeUnit, row: usize) -> Result<OffsetDateTime, LoadError> {
    let nanos = match unit {
        TimeUnit::Nanoseconds => i128::from(value),
        TimeUnit::Microseconds => i128::from(value) * 1_000,
        TimeUnit::Milliseconds => i128::from(value) * 1_000_000,
    };
    OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(|_| LoadError::UnsupportedTimestamp {
        row,
        value: format!("{value} ({unit:?})"),
    })
}

fn to_f64(value: AnyValue, column: &str, row: usize) -> Result<f64, LoadError> {
    let invalid = |value: String| LoadError::InvalidNumber {
        column: column.to_string(),
        row,
        value,
    };
    let v = match value {
        AnyValue::Float64(v) => v,
        AnyValue::Float32(v) => v as f64,
        AnyValue::Int64(v) => v as f64,
        AnyValue::Int32(v) => v as f64,
        AnyValue::UInt64(v) => v as f64,
        AnyValue::UInt32(v) => v as f64,
        AnyValue::String(s) => s.trim().parse::<f64>().map_err(|_| invalid(s.to_string()))?,
        AnyValue::StringOwned(s) => return to_f64(AnyValue::String(&s), column, row),
        other => return Err(invalid(format!("{other:?}"))),
    };
    if v.is_finite() {
        Ok(v)
    } else {
        Err(invalid(v.to_string()))
    }
}

fn to_u64(value: AnyValue, column: &str, row: usize) -> Result<u64, LoadError> {
    let invalid = |value: String| LoadError::InvalidNumber {
        column: column.to_string(),
        row,
        value,
    };
    match value {
        AnyValue::UInt64(v) => Ok(v),
        AnyValue::UInt32(v) => Ok(v.into()),
        AnyValue::Int64(v) => u64::try_from(v).map_err(|_| invalid(v.to_string())),
        AnyValue::Int32(v) => u64::try_from(v).map_err(|_| invalid(v.to_string())),
        AnyValue::Float64(v) if v >= 0.0 && v.fract() == 0.0 => Ok(v as u64),
        AnyValue::String(s) => s.trim().parse::<u64>().map_err(|_| invalid(s.to_string())),
        AnyValue::StringOwned(s) => to_u64(AnyValue::String(&s), column, row),
        other => Err(invalid(format!("{other:?}"))),
    }
}
