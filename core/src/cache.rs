use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::DuckDbStore;

pub const SYMBOL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A single value that is recomputed once it is older than its ttl.
#[derive(Debug, Clone)]
pub struct ExpiringCache<T> {
    ttl: Duration,
    entry: Option<(Instant, T)>,
}

impl<T> ExpiringCache<T> {
    pub fn invalidate_after(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    pub fn get(&self, now: Instant) -> Option<&T> {
        match &self.entry {
            Some((at, value)) if now.saturating_duration_since(*at) < self.ttl => Some(value),
            _ => None,
        }
    }

    /// Returns the cached value, calling `refresh` first if it is missing or stale.
    ///
    /// A failed refresh leaves the cache empty.
    pub fn get_or_refresh<E>(
        &mut self,
        now: Instant,
        refresh: impl FnOnce() -> Result<T, E>,
    ) -> Result<&T, E> {
        let entry = match self.entry.take() {
            Some((at, value)) if now.saturating_duration_since(at) < self.ttl => (at, value),
            _ => (now, refresh()?),
        };
        Ok(&self.entry.insert(entry).1)
    }
}

/// Known symbols and their reference names, refreshed daily.
#[derive(Debug)]
pub struct SymbolDirectory {
    symbols: ExpiringCache<Vec<String>>,
    names: BTreeMap<String, ExpiringCache<Option<String>>>,
    ttl: Duration,
}

impl Default for SymbolDirectory {
    fn default() -> Self {
        Self::new(SYMBOL_TTL)
    }
}

impl SymbolDirectory {
    pub fn new(ttl: Duration) -> Self {
        Self {
            symbols: ExpiringCache::invalidate_after(ttl),
            names: BTreeMap::new(),
            ttl,
        }
    }

    pub fn symbols(&mut self, store: &DuckDbStore, now: Instant) -> Result<&[String], StoreError> {
        let list = self.symbols.get_or_refresh(now, || {
            let list = store.list_symbols()?;
            debug!(count = list.len(), "refreshed symbol list");
            Ok::<_, StoreError>(list)
        })?;
        Ok(list.as_slice())
    }

    /// Keeps the known symbols of `requested`, in order and without repeats.
    pub fn validate(
        &mut self,
        store: &DuckDbStore,
        requested: &[String],
        now: Instant,
    ) -> Result<Vec<String>, StoreError> {
        let known = self.symbols(store, now)?;
        let mut out: Vec<String> = Vec::with_capacity(requested.len());
        for symbol in requested {
            let symbol = symbol.trim().to_ascii_uppercase();
            if out.contains(&symbol) {
                continue;
            }
            if known.contains(&symbol) {
                out.push(symbol);
            } else {
                warn!(%symbol, "unknown symbol, ignoring");
            }
        }
        Ok(out)
    }

    pub fn name(
        &mut self,
        store: &DuckDbStore,
        symbol: &str,
        now: Instant,
    ) -> Result<Option<String>, StoreError> {
        let ttl = self.ttl;
        let cache = self
            .names
            .entry(symbol.to_string())
            .or_insert_with(|| ExpiringCache::invalidate_after(ttl));
        let name = cache.get_or_refresh(now, || store.symbol_name(symbol))?;
        Ok(name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bucket;
    use time::macros::datetime;

    #[test]
    fn value_expires_after_ttl() {
        let start = Instant::now();
        let mut cache = ExpiringCache::invalidate_after(Duration::from_secs(10));
        let mut calls = 0;

        let mut fetch = |now: Instant| {
            *cache
                .get_or_refresh(now, || {
                    calls += 1;
                    Ok::<_, ()>(calls)
                })
                .unwrap()
        };
        assert_eq!(fetch(start), 1);
        assert_eq!(fetch(start + Duration::from_secs(9)), 1);
        assert_eq!(fetch(start + Duration::from_secs(10)), 2);
    }

    #[test]
    fn failed_refresh_leaves_cache_empty() {
        let now = Instant::now();
        let mut cache: ExpiringCache<u32> = ExpiringCache::invalidate_after(Duration::ZERO);
        assert!(cache.get_or_refresh(now, || Err("down")).is_err());
        assert!(cache.get(now).is_none());
    }

    fn seeded_store() -> DuckDbStore {
        let store = DuckDbStore::in_memory().unwrap();
        let bar = |symbol: &str| Bucket {
            symbol: symbol.into(),
            start: datetime!(2024-04-09 13:30:00 UTC),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            average: 1.0,
            volume: 1,
            count: 1,
        };
        store.write_bars(&[bar("SNOW"), bar("MSFT")]).unwrap();
        store.set_reference("MSFT", "Microsoft Corporation").unwrap();
        store
    }

    #[test]
    fn directory_validates_against_known_symbols() {
        let store = seeded_store();
        let mut dir = SymbolDirectory::default();
        let now = Instant::now();

        let kept = dir
            .validate(
                &store,
                &["snow".into(), "XXXX".into(), "SNOW".into(), "MSFT".into()],
                now,
            )
            .unwrap();
        assert_eq!(kept, vec!["SNOW", "MSFT"]);
        assert_eq!(
            dir.name(&store, "MSFT", now).unwrap(),
            Some("Microsoft Corporation".to_string())
        );
        assert_eq!(dir.name(&store, "SNOW", now).unwrap(), None);
    }

    #[test]
    fn directory_serves_cached_list_until_expiry() {
        let store = seeded_store();
        let mut dir = SymbolDirectory::new(Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(dir.symbols(&store, now).unwrap().len(), 2);

        let empty = DuckDbStore::in_memory().unwrap();
        assert_eq!(dir.symbols(&empty, now).unwrap().len(), 2);
        assert!(dir.symbols(&empty, now + Duration::from_secs(61)).unwrap().is_empty());
    }
}
