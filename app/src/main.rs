use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use tickchart_core::cache::SymbolDirectory;
use tickchart_core::config::{StoreConfig, parse_offset};
use tickchart_core::history::{MAX_LOOKBACK_ATTEMPTS, previous_session, trailing_days};
use tickchart_core::{
    Control, DuckDbStore, Engine, EngineConfig, Interval, Mode, ReplayController, StorageMode,
    StoreSource, synth,
};
use time::{Duration, OffsetDateTime, UtcOffset};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod feeder;
mod input;
mod sink;

use feeder::Feeder;
use input::{InputFormat, load_recording};
use sink::{ConsoleSink, describe};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Storage {
    Memory,
    Disk,
    Both,
}

impl From<Storage> for StorageMode {
    fn from(value: Storage) -> Self {
        match value {
            Storage::Memory => StorageMode::Memory,
            Storage::Disk => StorageMode::Disk,
            Storage::Both => StorageMode::Both,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "tickchart", about = "Rolling OHLCV charts over a DuckDB tick store")]
struct Args {
    /// DuckDB file (defaults to $TICKCHART_DB or tickchart.duckdb).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[arg(long, value_enum, global = true)]
    storage: Option<Storage>,

    /// Exchange UTC offset, e.g. -05:00 (defaults to $TICKCHART_UTC_OFFSET).
    #[arg(long, global = true, value_parser = parse_utc_offset)]
    utc_offset: Option<UtcOffset>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the live or replay feed and print each cycle.
    ///
    /// While running, stdin accepts `live`, `replay`, `symbols A,B` and `quit`.
    Watch {
        #[arg(required = true)]
        symbols: Vec<String>,

        #[arg(long, default_value = "live")]
        mode: Mode,

        /// Bucket width (e.g. 1s, 5s, 1m). Defaults to $TICKCHART_INTERVAL.
        #[arg(long)]
        interval: Option<Interval>,

        /// Retention horizon in seconds. Defaults to $TICKCHART_RETENTION_SECS.
        #[arg(long)]
        retention_secs: Option<i64>,

        /// Feed a recording into the store alongside the engine.
        #[arg(long)]
        simulate: bool,

        /// Tick recording for --simulate; synthetic ticks when omitted.
        #[arg(long, requires = "simulate")]
        recording: Option<PathBuf>,

        #[arg(long, value_enum)]
        format: Option<InputFormat>,
    },
    /// Print the previous trading session and the trailing daily history.
    History {
        #[arg(required = true)]
        symbols: Vec<String>,

        #[arg(long, default_value_t = 90)]
        days: i64,
    },
    /// List known symbols with their reference names.
    Symbols,
}

fn parse_utc_offset(raw: &str) -> Result<UtcOffset, String> {
    parse_offset(raw).map_err(|e| e.to_string())
}

// Initialise an INFO `Subscriber` for `Tracing` logs
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_ansi(cfg!(debug_assertions))
        .init()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let mut engine_config = EngineConfig::from_env().context("invalid TICKCHART_* environment")?;
    if let Some(offset) = args.utc_offset {
        engine_config.utc_offset = offset;
    }

    let mut store_config = StoreConfig::default();
    if let Some(db) = args.db {
        store_config.path = db;
    }
    if let Some(storage) = args.storage {
        store_config.mode = storage.into();
    }
    let store = DuckDbStore::new(&store_config.path, store_config.mode)
        .with_context(|| format!("failed to open store at {}", store_config.path.display()))?;
    info!(path = %store_config.path.display(), mode = ?store.mode(), "store ready");
    let store = Arc::new(Mutex::new(store));

    match args.command {
        Command::Watch {
            symbols,
            mode,
            interval,
            retention_secs,
            simulate,
            recording,
            format,
        } => {
            if let Some(interval) = interval {
                engine_config.interval = interval;
            }
            if let Some(secs) = retention_secs {
                if secs <= 0 {
                    return Err(anyhow!("--retention-secs must be positive"));
                }
                engine_config.retention = Duration::seconds(secs);
            }
            let sim = simulate.then_some((recording, format));
            watch(store, engine_config, symbols, mode, sim).await
        }
        Command::History { symbols, days } => history(&store, &engine_config, &symbols, days),
        Command::Symbols => list_symbols(&store),
    }
}

fn lock(store: &Arc<Mutex<DuckDbStore>>) -> Result<std::sync::MutexGuard<'_, DuckDbStore>> {
    store.lock().map_err(|_| anyhow!("store lock poisoned"))
}

/// Known symbols of `requested`. An empty bar table accepts everything.
fn validate_symbols(
    store: &Arc<Mutex<DuckDbStore>>,
    directory: &mut SymbolDirectory,
    requested: &[String],
) -> Result<Vec<String>> {
    let guard = lock(store)?;
    let now = Instant::now();
    if directory.symbols(&guard, now)?.is_empty() {
        warn!("no historical bars, skipping symbol validation");
        return Ok(requested.iter().map(|s| s.trim().to_ascii_uppercase()).collect());
    }
    Ok(directory.validate(&guard, requested, now)?)
}

fn parse_control(line: &str) -> Option<Result<Control, ()>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(rest) = line.strip_prefix("symbols") {
        let symbols = rest
            .split([',', ' '])
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string())
            .collect();
        return Some(Ok(Control::SetSymbols(symbols)));
    }
    Some(line.parse::<Mode>().map(Control::SwitchMode).map_err(|_| ()))
}

async fn watch(
    store: Arc<Mutex<DuckDbStore>>,
    config: EngineConfig,
    symbols: Vec<String>,
    mode: Mode,
    simulate: Option<(Option<PathBuf>, Option<InputFormat>)>,
) -> Result<()> {
    let mut directory = SymbolDirectory::default();
    let symbols = validate_symbols(&store, &mut directory, &symbols)?;
    if symbols.is_empty() {
        return Err(anyhow!("none of the requested symbols are known"));
    }

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    if let Some((recording, format)) = simulate {
        let ticks = match recording {
            Some(path) => load_recording(&path, format, symbols.first().cloned())?,
            None => {
                let start = OffsetDateTime::now_utc();
                symbols
                    .iter()
                    .flat_map(|s| synth::ticks(s, start, 2_400, Duration::milliseconds(250), 42))
                    .collect()
            }
        };
        let feeder = Feeder::new(Arc::clone(&store), ticks, mode);
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = feeder.run(token).await {
                warn!(%err, "feeder stopped");
            }
        }));
    }

    let (control_tx, control_rx) = mpsc::channel::<Control>(16);

    {
        let token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                token.cancel();
            }
        });
    }

    // A plain thread: a blocked stdin read must not hold up runtime shutdown.
    {
        let token = cancel.clone();
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if line.trim() == "quit" {
                    token.cancel();
                    break;
                }
                let control = match parse_control(&line) {
                    None => continue,
                    Some(Err(())) => {
                        warn!(%line, "unknown command (live | replay | symbols A,B | quit)");
                        continue;
                    }
                    Some(Ok(Control::SetSymbols(requested))) => {
                        match validate_symbols(&store, &mut directory, &requested) {
                            Ok(valid) if !valid.is_empty() => Control::SetSymbols(valid),
                            Ok(_) => {
                                warn!(?requested, "no known symbols in request");
                                continue;
                            }
                            Err(err) => {
                                warn!(%err, "symbol validation failed");
                                continue;
                            }
                        }
                    }
                    Some(Ok(control)) => control,
                };
                if control_tx.blocking_send(control).is_err() {
                    break;
                }
            }
        });
    }

    let offset = config.utc_offset;
    let source = Arc::new(StoreSource::new(Arc::clone(&store), offset));
    let controller = ReplayController::new(mode, symbols, config);
    let engine = Engine::new(source, ConsoleSink::new(offset), controller);

    let engine = engine.run(cancel.clone(), control_rx).await;
    cancel.cancel();
    for task in tasks {
        task.await.ok();
    }

    info!(
        mode = %engine.controller().mode(),
        watermark = ?engine.controller().watermark(),
        generation = engine.controller().generation(),
        "watch finished"
    );
    Ok(())
}

fn history(
    store: &Arc<Mutex<DuckDbStore>>,
    config: &EngineConfig,
    symbols: &[String],
    days: i64,
) -> Result<()> {
    let mut directory = SymbolDirectory::default();
    let symbols = validate_symbols(store, &mut directory, symbols)?;
    let offset = config.utc_offset;
    let today = OffsetDateTime::now_utc().to_offset(offset).date();
    let guard = lock(store)?;

    for symbol in &symbols {
        let name = directory.name(&guard, symbol, Instant::now())?;
        println!("{symbol}: {}", name.as_deref().unwrap_or("(no reference name)"));
    }

    match previous_session(&guard, &symbols, today, offset, MAX_LOOKBACK_ATTEMPTS)? {
        Some((day, series)) => {
            println!("Previous trading day ({day})");
            for s in &series {
                println!("  {}", describe(s, offset, false));
            }
        }
        None => println!("Previous trading day: no data available"),
    }

    let series = trailing_days(&guard, &symbols, today, offset, days)?;
    println!("Last {days} days");
    if series.is_empty() {
        println!("  no data available");
    }
    for s in &series {
        println!("  {}", describe(s, offset, true));
    }
    Ok(())
}

fn list_symbols(store: &Arc<Mutex<DuckDbStore>>) -> Result<()> {
    let mut directory = SymbolDirectory::default();
    let guard = lock(store)?;
    let now = Instant::now();
    let symbols = directory.symbols(&guard, now)?.to_vec();
    if symbols.is_empty() {
        println!("no symbols in store");
    }
    for symbol in symbols {
        let name = directory.name(&guard, &symbol, now)?;
        println!("{symbol:<8} {}", name.unwrap_or_default());
    }
    Ok(())
}
