use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tickchart_core::{DuckDbStore, Mode, Tick};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Stands in for the ingestion client: appends a recording to a feed in
/// wall-clock time, rebasing timestamps so the first tick lands "now".
///
/// The replay feed loops. After the last tick it waits, clears the feed and
/// starts over, which the engine sees as the recording wrapping.
pub struct Feeder {
    store: Arc<Mutex<DuckDbStore>>,
    recording: Vec<Tick>,
    feed: Mode,
    step: Duration,
    pause: Duration,
}

impl Feeder {
    pub fn new(store: Arc<Mutex<DuckDbStore>>, mut recording: Vec<Tick>, feed: Mode) -> Self {
        recording.sort_by_key(Tick::order_key);
        Self {
            store,
            recording,
            feed,
            step: Duration::from_millis(250),
            pause: Duration::from_secs(3),
        }
    }

    async fn write(&self, batch: Vec<Tick>) -> Result<()> {
        let store = Arc::clone(&self.store);
        let feed = self.feed;
        tokio::task::spawn_blocking(move || -> Result<()> {
            let store = store.lock().map_err(|_| anyhow!("store lock poisoned"))?;
            store.write_ticks(feed, &batch)?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let store = Arc::clone(&self.store);
        let feed = self.feed;
        tokio::task::spawn_blocking(move || -> Result<()> {
            let store = store.lock().map_err(|_| anyhow!("store lock poisoned"))?;
            store.clear_feed(feed)?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    /// Sleeps unless cancelled first. Returns `false` on cancellation.
    async fn wait(&self, cancel: &CancellationToken, duration: Duration) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let Some(first) = self.recording.first().map(|t| t.timestamp) else {
            return Ok(());
        };

        for pass in 1u64.. {
            let shift = OffsetDateTime::now_utc() - first;
            info!(pass, feed = %self.feed, ticks = self.recording.len(), "feeding recording");

            let mut cursor = 0;
            while cursor < self.recording.len() {
                let now = OffsetDateTime::now_utc();
                let due = self.recording[cursor..]
                    .iter()
                    .take_while(|t| t.timestamp + shift <= now)
                    .count();
                if due > 0 {
                    let batch: Vec<Tick> = self.recording[cursor..cursor + due]
                        .iter()
                        .map(|t| Tick {
                            timestamp: t.timestamp + shift,
                            ..t.clone()
                        })
                        .collect();
                    self.write(batch).await?;
                    cursor += due;
                }
                if !self.wait(&cancel, self.step).await {
                    return Ok(());
                }
            }

            if self.feed == Mode::Live {
                info!("live recording finished");
                return Ok(());
            }

            if !self.wait(&cancel, self.pause).await {
                return Ok(());
            }
            self.clear().await?;
            info!(pass, "replay feed cleared");
        }

        Ok(())
    }
}
