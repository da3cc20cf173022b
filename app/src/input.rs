use std::path::Path;

use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use tickchart_core::{LoadOptions, Tick, load_ticks_csv, load_ticks_parquet};

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum InputFormat {
    Csv,
    Parquet,
}

pub fn detect_format(path: &Path) -> Option<InputFormat> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    match ext.as_str() {
        "csv" => Some(InputFormat::Csv),
        "parquet" | "parq" => Some(InputFormat::Parquet),
        _ => None,
    }
}

/// Reads a tick recording, stamping `symbol` on rows that have none.
pub fn load_recording(
    path: &Path,
    format: Option<InputFormat>,
    symbol: Option<String>,
) -> Result<Vec<Tick>> {
    let format = format
        .or_else(|| detect_format(path))
        .ok_or_else(|| anyhow!("could not determine file format of {} (use --format)", path.display()))?;

    let options = LoadOptions {
        symbol,
        ..LoadOptions::default()
    };
    let ticks = match format {
        InputFormat::Csv => load_ticks_csv(path, options),
        InputFormat::Parquet => load_ticks_parquet(path, options),
    }
    .with_context(|| format!("failed to load {}", path.display()))?;

    if ticks.is_empty() {
        return Err(anyhow!("no ticks loaded from {}", path.display()));
    }
    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_extension() {
        assert!(matches!(detect_format(Path::new("a/b.CSV")), Some(InputFormat::Csv)));
        assert!(matches!(
            detect_format(Path::new("trades.parq")),
            Some(InputFormat::Parquet)
        ));
        assert!(detect_format(Path::new("trades")).is_none());
    }
}
