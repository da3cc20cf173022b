//! Live/replay state machine around the per-symbol windows.
//!
//! The controller owns the watermark and the [`WindowBuffer`]. It never talks to
//! the source itself: the engine fetches and hands the result to [`ReplayController::apply`],
//! so one cycle's state change is applied in one call.

use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::FetchError;
use crate::render::{Frame, RenderableSeries, renderable_series};
use crate::source::Fetched;
use crate::window::WindowBuffer;
use crate::{Mode, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleOutcome {
    /// At least one tick was merged or held back.
    Merged,
    /// Nothing new; state unchanged.
    #[default]
    Idle,
    /// The replay recording wrapped; windows cleared and watermark reset.
    Reset,
    /// The fetch failed and the cycle counted as empty.
    Failed,
}

/// Per-cycle counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleStats {
    pub fetched: usize,
    pub merged: usize,
    pub held_back: usize,
    /// Ticks older than the watermark beyond the skew tolerance.
    pub skewed: usize,
    pub malformed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub changed: bool,
    pub stats: CycleStats,
}

pub struct ReplayController {
    mode: Mode,
    symbols: Vec<String>,
    watermark: Option<OffsetDateTime>,
    buffer: WindowBuffer,
    config: EngineConfig,
    generation: u64,
}

impl ReplayController {
    pub fn new(mode: Mode, symbols: Vec<String>, config: EngineConfig) -> Self {
        Self {
            mode,
            symbols: normalize(symbols),
            watermark: None,
            buffer: WindowBuffer::new(config.lag),
            config,
            generation: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn watermark(&self) -> Option<OffsetDateTime> {
        self.watermark
    }

    pub fn buffer(&self) -> &WindowBuffer {
        &self.buffer
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Switching feeds drops every window; the two modes are never blended.
    pub fn switch_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            return;
        }
        info!(from = %self.mode, to = %mode, "switching mode");
        self.mode = mode;
        self.reset();
    }

    pub fn set_symbols(&mut self, symbols: Vec<String>) {
        let symbols = normalize(symbols);
        if symbols == self.symbols {
            return;
        }
        info!(?symbols, "symbol set changed");
        self.symbols = symbols;
        self.reset();
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.watermark = None;
        self.generation += 1;
    }

    /// Applies one fetch result.
    ///
    /// A failed fetch counts as empty and leaves the watermark untouched. An
    /// empty replay fetch over a non-empty buffer means the recording wrapped.
    pub fn apply(&mut self, result: Result<Fetched, FetchError>) -> CycleReport {
        let mut report = CycleReport::default();

        let mut fetched = match result {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(mode = %self.mode, %err, "fetch failed, treating cycle as empty");
                report.outcome = CycleOutcome::Failed;
                return report;
            }
        };

        report.stats.malformed = fetched.malformed;
        report.stats.fetched = fetched.len();
        if fetched.malformed > 0 {
            warn!(count = fetched.malformed, "dropped malformed ticks");
        }

        if fetched.is_empty() {
            if self.mode == Mode::Replay && !self.buffer.is_empty() {
                info!(watermark = ?self.watermark, "replay recording exhausted, restarting");
                self.reset();
                report.outcome = CycleOutcome::Reset;
                report.changed = true;
            }
            return report;
        }

        let mut advanced: Option<OffsetDateTime> = None;
        let mut held_floor: Option<OffsetDateTime> = None;
        for symbol in &self.symbols {
            let ticks = fetched.ticks.remove(symbol).unwrap_or_default();
            let (ticks, skewed) = drop_skewed(ticks, self.watermark, self.config.skew_tolerance);
            if skewed > 0 {
                warn!(%symbol, skewed, watermark = ?self.watermark, "ignoring ticks behind watermark");
            }
            report.stats.skewed += skewed;

            let outcome = self.buffer.merge(symbol, ticks, self.config.retention);
            report.stats.merged += outcome.merged;
            report.stats.held_back += outcome.held_back;
            report.changed |= outcome.changed;

            // The slowest symbol bounds the watermark so no symbol skips ticks.
            if let Some(latest) = outcome.merged_latest {
                advanced = Some(advanced.map_or(latest, |a| a.min(latest)));
            }
            if let Some(held) = outcome.held_from {
                held_floor = Some(held_floor.map_or(held, |h| h.min(held)));
            }
        }

        // Fetches are exclusive of the watermark; stay below every held-back tick.
        if let Some(held) = held_floor {
            let ceiling = held - time::Duration::nanoseconds(1);
            advanced = advanced.map(|a| a.min(ceiling));
        }

        if let Some(next) = advanced {
            if self.watermark.is_none_or(|w| next > w) {
                self.watermark = Some(next);
            }
        }

        report.outcome = CycleOutcome::Merged;
        report
    }

    pub fn renderable_series(&self, symbol: &str) -> Option<RenderableSeries> {
        let window = self.buffer.window(symbol)?;
        renderable_series(
            symbol,
            window,
            self.config.interval,
            self.config.retention,
            self.config.utc_offset,
        )
    }

    pub fn frame(&self, report: &CycleReport) -> Frame {
        Frame {
            mode: self.mode,
            watermark: self.watermark,
            generation: self.generation,
            outcome: report.outcome,
            changed: report.changed,
            stats: report.stats,
            series: self
                .symbols
                .iter()
                .filter_map(|s| self.renderable_series(s))
                .collect(),
        }
    }
}

fn normalize(symbols: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let symbol = symbol.trim().to_ascii_uppercase();
        if !symbol.is_empty() && !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    out
}

fn drop_skewed(
    ticks: Vec<Tick>,
    watermark: Option<OffsetDateTime>,
    tolerance: time::Duration,
) -> (Vec<Tick>, usize) {
    let Some(watermark) = watermark else {
        return (ticks, 0);
    };
    let floor = watermark - tolerance;
    let before = ticks.len();
    let kept: Vec<Tick> = ticks.into_iter().filter(|t| t.timestamp >= floor).collect();
    let skewed = before - kept.len();
    (kept, skewed)
}
