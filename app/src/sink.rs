use tickchart_core::controller::CycleOutcome;
use tickchart_core::{Frame, RenderableSeries, SeriesSink};
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

const CLOCK: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]:[second]");
const DAY: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

fn clock(ts: OffsetDateTime) -> String {
    ts.format(CLOCK).unwrap_or_else(|_| ts.to_string())
}

fn day(ts: OffsetDateTime) -> String {
    ts.format(DAY).unwrap_or_else(|_| ts.to_string())
}

/// One line per series, in exchange-local time when `offset` is set.
pub fn describe(series: &RenderableSeries, offset: time::UtcOffset, daily: bool) -> String {
    let fmt = |ts: OffsetDateTime| {
        let local = ts.to_offset(offset);
        if daily { day(local) } else { clock(local) }
    };
    let Some(last) = series.buckets.last() else {
        return format!("{:<6} no data", series.symbol);
    };
    format!(
        "{:<6} {:>5} x {:<3} last {} O {:.2} H {:.2} L {:.2} C {:.2} avg {:.2} vol {} | range {}..{} | price {:.2}..{:.2} | gaps {}",
        series.symbol,
        series.buckets.len(),
        series.interval,
        fmt(last.start),
        last.open,
        last.high,
        last.low,
        last.close,
        last.average,
        last.volume,
        fmt(series.display_range.0),
        fmt(series.display_range.1),
        series.price_bounds.0,
        series.price_bounds.1,
        series.discontinuities.len(),
    )
}

/// Prints a frame whenever a window changed or the stream reset.
pub struct ConsoleSink {
    offset: time::UtcOffset,
}

impl ConsoleSink {
    pub fn new(offset: time::UtcOffset) -> Self {
        Self { offset }
    }
}

impl SeriesSink for ConsoleSink {
    fn publish(&mut self, frame: Frame) {
        match frame.outcome {
            CycleOutcome::Reset => {
                println!("[{}] stream reset (generation {})", frame.mode, frame.generation);
                return;
            }
            _ if !frame.changed => return,
            _ => {}
        }

        let watermark = frame
            .watermark
            .map(|w| clock(w.to_offset(self.offset)))
            .unwrap_or_else(|| "-".into());
        println!(
            "[{}] watermark {} merged {} held {} skewed {} malformed {}",
            frame.mode,
            watermark,
            frame.stats.merged,
            frame.stats.held_back,
            frame.stats.skewed,
            frame.stats.malformed,
        );
        for series in &frame.series {
            println!("  {}", describe(series, self.offset, false));
        }
    }
}
