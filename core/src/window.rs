//! Bounded, deduplicated per-symbol tick history.
//!
//! A [`Window`] is never patched in place: merging produces the next value,
//! and the owner swaps it in once the merge is complete.

use std::collections::BTreeMap;

use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::Tick;

/// How the live edge of each fetched batch is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LagPolicy {
    /// Merge everything.
    None,
    /// Hold back the single temporally-last record.
    DropLast,
    /// Hold back every record sharing the batch's final timestamp.
    #[default]
    DropFinalTimestamp,
}

impl LagPolicy {
    /// Sorts the batch and splits off the held-back tail.
    pub fn apply(&self, batch: &mut Vec<Tick>) -> Vec<Tick> {
        batch.sort_by_key(Tick::order_key);
        let keep = match self {
            LagPolicy::None => batch.len(),
            LagPolicy::DropLast => batch.len().saturating_sub(1),
            LagPolicy::DropFinalTimestamp => match batch.last() {
                Some(last) => {
                    let edge = last.timestamp;
                    batch.iter().take_while(|t| t.timestamp < edge).count()
                }
                None => 0,
            },
        };
        batch.split_off(keep)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Window {
    ticks: Vec<Tick>,
    version: u64,
}

impl Window {
    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Bumped whenever a merge changes the retained ticks.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn earliest(&self) -> Option<OffsetDateTime> {
        self.ticks.first().map(|t| t.timestamp)
    }

    pub fn latest(&self) -> Option<OffsetDateTime> {
        self.ticks.last().map(|t| t.timestamp)
    }

    /// Returns the window after merging `batch` and evicting everything older
    /// than `latest - horizon`.
    ///
    /// Entries are keyed by timestamp; for a repeated key the record merged
    /// last wins. Within `batch` that is the one ordered last.
    pub fn merge(&self, batch: &[Tick], horizon: Duration) -> Window {
        let mut keyed: BTreeMap<OffsetDateTime, Tick> = self
            .ticks
            .iter()
            .map(|t| (t.timestamp, t.clone()))
            .collect();

        let mut ordered: Vec<&Tick> = batch.iter().collect();
        ordered.sort_by_key(|t| t.order_key());
        for tick in ordered {
            keyed.insert(tick.timestamp, tick.clone());
        }

        if let Some((&latest, _)) = keyed.last_key_value() {
            let cutoff = latest - horizon;
            keyed = keyed.split_off(&cutoff);
        }

        let ticks: Vec<Tick> = keyed.into_values().collect();
        let version = if ticks == self.ticks {
            self.version
        } else {
            self.version + 1
        };
        Window { ticks, version }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    /// Latest timestamp retained after the merge, or the prior one when unchanged.
    pub latest: Option<OffsetDateTime>,
    /// Latest timestamp among the ticks actually merged this time.
    pub merged_latest: Option<OffsetDateTime>,
    /// Earliest timestamp still held back. The next fetch must reach back to it.
    pub held_from: Option<OffsetDateTime>,
    pub merged: usize,
    pub held_back: usize,
    pub changed: bool,
    /// Nothing arrived and nothing was retained.
    pub fully_empty: bool,
}

/// Per-symbol windows of one stream.
///
/// A held-back tail that comes back unchanged on the next merge has settled:
/// nothing newer arrived for a full cycle, so it is merged instead of held again.
#[derive(Debug, Clone, Default)]
pub struct WindowBuffer {
    windows: BTreeMap<String, Window>,
    pending: BTreeMap<String, Vec<Tick>>,
    lag: LagPolicy,
}

impl WindowBuffer {
    pub fn new(lag: LagPolicy) -> Self {
        Self {
            windows: BTreeMap::new(),
            pending: BTreeMap::new(),
            lag,
        }
    }

    pub fn lag_policy(&self) -> LagPolicy {
        self.lag
    }

    pub fn window(&self, symbol: &str) -> Option<&Window> {
        self.windows.get(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.windows.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.windows.values().all(Window::is_empty)
    }

    /// Ticks of `symbol` held back by the last merge.
    pub fn pending(&self, symbol: &str) -> &[Tick] {
        self.pending.get(symbol).map_or(&[], Vec::as_slice)
    }

    pub fn clear(&mut self) {
        self.windows.clear();
        self.pending.clear();
    }

    pub fn merge(&mut self, symbol: &str, mut ticks: Vec<Tick>, horizon: Duration) -> MergeOutcome {
        let mut held = self.lag.apply(&mut ticks);
        let previous_tail = self.pending.remove(symbol).unwrap_or_default();
        if !held.is_empty() && held == previous_tail {
            debug!(symbol, released = held.len(), "held tail settled");
            ticks.append(&mut held);
        }
        let held_back = held.len();
        let held_from = held.first().map(|t| t.timestamp);
        if !held.is_empty() {
            self.pending.insert(symbol.to_string(), held);
        }

        let previous = self.windows.get(symbol).cloned().unwrap_or_default();

        if ticks.is_empty() {
            return MergeOutcome {
                latest: previous.latest(),
                merged_latest: None,
                held_from,
                merged: 0,
                held_back,
                changed: false,
                fully_empty: previous.is_empty() && held_back == 0,
            };
        }

        let next = previous.merge(&ticks, horizon);
        let changed = next.version() != previous.version();
        let outcome = MergeOutcome {
            latest: next.latest(),
            merged_latest: ticks.last().map(|t| t.timestamp),
            held_from,
            merged: ticks.len(),
            held_back,
            changed,
            fully_empty: false,
        };

        debug!(
            symbol,
            merged = outcome.merged,
            held_back,
            retained = next.len(),
            version = next.version(),
            "window merge"
        );

        self.windows.insert(symbol.to_string(), next);
        outcome
    }
}
