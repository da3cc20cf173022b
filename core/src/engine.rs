use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::Mode;
use crate::config::EngineConfig;
use crate::controller::{CycleReport, ReplayController};
use crate::error::FetchError;
use crate::render::SeriesSink;
use crate::source::{Fetched, TickSource};

/// Runtime instructions for a running engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    SwitchMode(Mode),
    SetSymbols(Vec<String>),
}

/// One polling loop: fetch, merge, bucket, gap-fill, publish, sleep.
pub struct Engine<S, K> {
    source: Arc<S>,
    sink: K,
    controller: ReplayController,
}

impl<S, K> Engine<S, K>
where
    S: TickSource + 'static,
    K: SeriesSink,
{
    pub fn new(source: Arc<S>, sink: K, controller: ReplayController) -> Self {
        Self {
            source,
            sink,
            controller,
        }
    }

    pub fn controller(&self) -> &ReplayController {
        &self.controller
    }

    pub fn config(&self) -> &EngineConfig {
        self.controller.config()
    }

    pub fn handle(&mut self, control: Control) {
        match control {
            Control::SwitchMode(mode) => self.controller.switch_mode(mode),
            Control::SetSymbols(symbols) => self.controller.set_symbols(symbols),
        }
    }

    /// One full cycle. State changes are applied at once after the fetch returns.
    pub async fn cycle(&mut self) -> CycleReport {
        let result = fetch(
            Arc::clone(&self.source),
            self.controller.symbols().to_vec(),
            self.controller.watermark(),
            self.controller.mode(),
            self.config().fetch_timeout,
        )
        .await;
        let report = self.controller.apply(result);
        debug!(
            outcome = ?report.outcome,
            merged = report.stats.merged,
            held_back = report.stats.held_back,
            watermark = ?self.controller.watermark(),
            "cycle"
        );
        let frame = self.controller.frame(&report);
        self.sink.publish(frame);
        report
    }

    /// Polls until `cancel` fires. Cancellation interrupts the sleep, never a cycle.
    ///
    /// Control messages are applied between cycles; one arriving mid-sleep
    /// starts the next cycle early.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        mut control: mpsc::Receiver<Control>,
    ) -> Self {
        info!(
            mode = %self.controller.mode(),
            symbols = ?self.controller.symbols(),
            poll = ?self.config().poll_interval,
            "engine started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            while let Ok(msg) = control.try_recv() {
                self.handle(msg);
            }

            self.cycle().await;

            let poll = self.config().poll_interval;
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(msg) = control.recv() => self.handle(msg),
                _ = tokio::time::sleep(poll) => {}
            }
        }

        info!("engine stopped");
        self
    }
}

/// Runs the blocking source read off the runtime, bounded by `limit`.
async fn fetch<S: TickSource + 'static>(
    source: Arc<S>,
    symbols: Vec<String>,
    watermark: Option<OffsetDateTime>,
    mode: Mode,
    limit: std::time::Duration,
) -> Result<Fetched, FetchError> {
    let task = tokio::task::spawn_blocking(move || source.fetch_since(&symbols, watermark, mode));
    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(FetchError::Join(join.to_string())),
        Err(_) => Err(FetchError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tick;
    use crate::controller::CycleOutcome;
    use crate::render::CollectingSink;
    use crate::source::RecordedSource;
    use crate::window::LagPolicy;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;
    use time::Duration;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-04-09 13:30:00 UTC);

    fn config() -> EngineConfig {
        EngineConfig {
            poll_interval: StdDuration::from_millis(10),
            fetch_timeout: StdDuration::from_millis(200),
            retention: Duration::minutes(2),
            lag: LagPolicy::None,
            ..EngineConfig::default()
        }
    }

    fn tick(ts: OffsetDateTime, price: f64) -> Tick {
        Tick {
            symbol: "SNOW".into(),
            timestamp: ts,
            price,
            size: 1,
            sequence: 0,
        }
    }

    /// Replays scripted results and records each watermark it was asked for.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Fetched, FetchError>>>,
        calls: Mutex<Vec<Option<OffsetDateTime>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Fetched, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::default(),
            }
        }

        fn calls(&self) -> Vec<Option<OffsetDateTime>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TickSource for ScriptedSource {
        fn fetch_since(
            &self,
            _symbols: &[String],
            watermark: Option<OffsetDateTime>,
            _mode: Mode,
        ) -> Result<Fetched, FetchError> {
            self.calls.lock().unwrap().push(watermark);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Fetched::default()))
        }
    }

    struct SlowSource;

    impl TickSource for SlowSource {
        fn fetch_since(
            &self,
            _symbols: &[String],
            _watermark: Option<OffsetDateTime>,
            _mode: Mode,
        ) -> Result<Fetched, FetchError> {
            std::thread::sleep(StdDuration::from_millis(300));
            Ok(Fetched::default())
        }
    }

    fn batch(ticks: Vec<Tick>) -> Fetched {
        Fetched {
            ticks: [("SNOW".to_string(), ticks)].into_iter().collect(),
            malformed: 0,
        }
    }

    fn engine<S: TickSource + 'static>(
        source: Arc<S>,
        mode: Mode,
        cfg: EngineConfig,
    ) -> (Engine<S, CollectingSink>, CollectingSink) {
        let sink = CollectingSink::new();
        let controller = ReplayController::new(mode, vec!["SNOW".into()], cfg);
        (Engine::new(source, sink.clone(), controller), sink)
    }

    #[tokio::test]
    async fn replay_reset_is_visible_on_next_fetch() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(batch(vec![tick(T0, 1.0), tick(T0 + Duration::seconds(1), 2.0)])),
            Ok(Fetched::default()),
            Ok(batch(vec![tick(T0, 1.0)])),
        ]));
        let (mut engine, sink) = engine(source.clone(), Mode::Replay, config());

        engine.cycle().await;
        assert_eq!(engine.cycle().await.outcome, CycleOutcome::Reset);
        engine.cycle().await;

        assert_eq!(
            source.calls(),
            vec![None, Some(T0 + Duration::seconds(1)), None]
        );
        assert_eq!(sink.len(), 3);
        assert!(sink.frames()[1].series.is_empty());
        let window = engine.controller().buffer().window("SNOW").unwrap();
        assert_eq!(window.len(), 1);
    }

    #[tokio::test]
    async fn live_empty_reads_keep_state() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(batch(vec![tick(T0, 1.0)]))]));
        let (mut engine, sink) = engine(source.clone(), Mode::Live, config());

        engine.cycle().await;
        engine.cycle().await;
        engine.cycle().await;

        assert_eq!(source.calls(), vec![None, Some(T0), Some(T0)]);
        assert_eq!(engine.controller().watermark(), Some(T0));
        assert_eq!(sink.last().unwrap().series.len(), 1);
    }

    #[tokio::test]
    async fn timeout_counts_as_empty_cycle() {
        let cfg = EngineConfig {
            fetch_timeout: StdDuration::from_millis(20),
            ..config()
        };
        let (mut engine, sink) = engine(Arc::new(SlowSource), Mode::Replay, cfg);

        let report = engine.cycle().await;
        assert_eq!(report.outcome, CycleOutcome::Failed);
        assert_eq!(engine.controller().watermark(), None);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_cancel_and_applies_control() {
        let source = Arc::new(RecordedSource::new());
        source.push(Mode::Live, [tick(T0, 1.0)]);
        source.push(Mode::Replay, [tick(T0, 5.0), tick(T0 + Duration::seconds(1), 6.0)]);

        let (engine, sink) = engine(source, Mode::Live, config());
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(engine.run(cancel.clone(), rx));

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        tx.send(Control::SwitchMode(Mode::Replay)).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(150)).await;
        cancel.cancel();

        let engine = tokio::time::timeout(StdDuration::from_secs(2), handle)
            .await
            .expect("engine did not stop")
            .unwrap();

        assert_eq!(engine.controller().mode(), Mode::Replay);
        let frames = sink.frames();
        assert!(frames.iter().any(|f| f.mode == Mode::Live && !f.series.is_empty()));
        // A static replay recording loops: merged, then exhausted, then merged again.
        assert!(frames.iter().any(|f| {
            f.mode == Mode::Replay && f.series.first().is_some_and(|s| s.buckets.len() == 2)
        }));
        assert!(frames.iter().any(|f| f.outcome == CycleOutcome::Reset));
        assert!(frames.last().unwrap().generation >= 1);
    }

    #[tokio::test]
    async fn default_lag_replay_settles_then_wraps() {
        let source = Arc::new(RecordedSource::new());
        source.push(
            Mode::Replay,
            [tick(T0, 1.0), tick(T0 + Duration::seconds(1), 2.0), tick(T0 + Duration::seconds(2), 3.0)],
        );
        let cfg = EngineConfig {
            lag: LagPolicy::DropFinalTimestamp,
            ..config()
        };
        let (mut engine, sink) = engine(source, Mode::Replay, cfg);

        let first = engine.cycle().await;
        assert_eq!(first.stats.held_back, 1);
        assert_eq!(engine.controller().watermark(), Some(T0 + Duration::seconds(1)));

        let second = engine.cycle().await;
        assert_eq!(second.stats.merged, 1);
        assert_eq!(second.stats.held_back, 0);
        assert_eq!(engine.controller().watermark(), Some(T0 + Duration::seconds(2)));

        assert_eq!(engine.cycle().await.outcome, CycleOutcome::Reset);
        assert_eq!(sink.len(), 3);
        let settled = &sink.frames()[1];
        assert_eq!(settled.series[0].buckets.len(), 3);
    }
}
