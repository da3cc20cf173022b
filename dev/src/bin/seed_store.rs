use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, anyhow};
use clap::Parser;
use tickchart_core::config::{StoreConfig, parse_offset};
use tickchart_core::session::previous_trading_day;
use tickchart_core::{
    Bucket, DuckDbStore, LoadOptions, Mode, load_bars_csv, load_bars_parquet, synth,
};
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "seed-store")]
#[command(about = "Seed a tickchart DuckDB store with minute bars, reference names and a replay recording.", long_about = None)]
struct Args {
    /// DuckDB file (defaults to $TICKCHART_DB or tickchart.duckdb).
    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(long, value_delimiter = ',', default_value = "AAPL,MSFT,SNOW")]
    symbols: Vec<String>,

    /// Trading sessions of synthetic minute bars, ending yesterday.
    #[arg(long, default_value_t = 5)]
    days: usize,

    /// Import minute bars from CSV or Parquet instead of generating them.
    #[arg(long)]
    bars: Option<PathBuf>,

    /// If non-zero, only keep the first N rows of --bars.
    #[arg(long, default_value_t = 0)]
    limit_bars: usize,

    /// Reference name as SYMBOL=Name; repeatable.
    #[arg(long = "name", value_parser = parse_reference)]
    names: Vec<(String, String)>,

    /// Synthetic ticks per symbol written to the replay feed.
    #[arg(long, default_value_t = 1_200)]
    replay_ticks: usize,

    #[arg(long, default_value_t = 250)]
    tick_ms: i64,

    #[arg(long, default_value = "-05:00", value_parser = parse_utc_offset)]
    utc_offset: UtcOffset,

    #[arg(long, default_value_t = 7)]
    seed: u64,
}

fn parse_utc_offset(raw: &str) -> Result<UtcOffset, String> {
    parse_offset(raw).map_err(|e| e.to_string())
}

fn parse_reference(raw: &str) -> Result<(String, String), String> {
    let (symbol, name) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected SYMBOL=Name, got {raw}"))?;
    let symbol = symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() || name.trim().is_empty() {
        return Err(format!("expected SYMBOL=Name, got {raw}"));
    }
    Ok((symbol, name.trim().to_string()))
}

/// Last `days` weekdays before `today`, oldest first.
fn sessions(today: Date, days: usize) -> Vec<Date> {
    let mut out = Vec::with_capacity(days);
    let mut day = today;
    while out.len() < days {
        match previous_trading_day(day) {
            Some(prev) => {
                out.push(prev);
                day = prev;
            }
            None => break,
        }
    }
    out.reverse();
    out
}

fn session_open(date: Date, offset: UtcOffset) -> OffsetDateTime {
    PrimitiveDateTime::new(date, time::macros::time!(09:30)).assume_offset(offset)
}

/// Bars from a CSV or Parquet file, keeping the first `limit` rows when non-zero.
fn import_bars(path: &Path, limit: usize, fallback: Option<&str>) -> Result<Vec<Bucket>> {
    let options = LoadOptions {
        symbol: fallback.map(str::to_string),
        ..LoadOptions::default()
    };
    let is_parquet = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"));
    let mut bars = if is_parquet {
        load_bars_parquet(path, options)
    } else {
        load_bars_csv(path, options)
    }
    .with_context(|| format!("load bars from {}", path.display()))?;

    if limit > 0 {
        bars.truncate(limit);
    }
    Ok(bars)
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init()
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = StoreConfig::default();
    if let Some(db) = args.db {
        config.path = db;
    }
    let store = DuckDbStore::new(&config.path, config.mode)
        .with_context(|| format!("open store {}", config.path.display()))?;

    let symbols: Vec<String> = args
        .symbols
        .iter()
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        return Err(anyhow!("at least one symbol is required"));
    }

    let today = OffsetDateTime::now_utc().to_offset(args.utc_offset).date();
    let days = sessions(today, args.days);

    let bars = match &args.bars {
        Some(path) => import_bars(path, args.limit_bars, symbols.first().map(String::as_str))?,
        None => {
            let mut bars = Vec::new();
            for symbol in &symbols {
                for (i, day) in days.iter().enumerate() {
                    let open = session_open(*day, args.utc_offset);
                    bars.extend(synth::minute_bars(symbol, open, 390, args.seed + i as u64));
                }
            }
            bars
        }
    };
    store.write_bars(&bars)?;
    info!(bars = bars.len(), sessions = days.len(), "wrote minute bars");

    for (symbol, name) in &args.names {
        store.set_reference(symbol, name)?;
    }
    info!(names = args.names.len(), "wrote reference names");

    if args.replay_ticks > 0 {
        let start = days
            .last()
            .map(|d| session_open(*d, args.utc_offset))
            .unwrap_or_else(OffsetDateTime::now_utc);
        let step = Duration::milliseconds(args.tick_ms.max(1));
        store.clear_feed(Mode::Replay)?;
        for symbol in &symbols {
            let ticks = synth::ticks(symbol, start, args.replay_ticks, step, args.seed);
            store.write_ticks(Mode::Replay, &ticks)?;
        }
        info!(
            per_symbol = args.replay_ticks,
            symbols = symbols.len(),
            "wrote replay recording"
        );
    }

    info!(path = %config.path.display(), "store seeded");
    Ok(())
}
