use std::path::PathBuf;
use std::str::FromStr;

use time::macros::{format_description, offset};
use time::{Duration, UtcOffset};

use crate::Interval;
use crate::error::ConfigError;
use crate::store::StorageMode;
use crate::window::LagPolicy;

pub const DEFAULT_POLL_MS: u64 = 1_000;
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 750;
pub const DEFAULT_RETENTION_SECS: i64 = 300;
pub const DEFAULT_SKEW_TOLERANCE_MS: i64 = 2_000;
pub const DEFAULT_STORE_PATH: &str = "tickchart.duckdb";

/// Polling loop settings. Durations driving tokio timers are `std`, window
/// arithmetic is `time`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub poll_interval: std::time::Duration,
    pub fetch_timeout: std::time::Duration,
    /// Retention horizon of each window, also the width of the display range.
    pub retention: Duration,
    pub interval: Interval,
    pub utc_offset: UtcOffset,
    pub skew_tolerance: Duration,
    pub lag: LagPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: std::time::Duration::from_millis(DEFAULT_POLL_MS),
            fetch_timeout: std::time::Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            retention: Duration::seconds(DEFAULT_RETENTION_SECS),
            interval: Interval::Second(1),
            utc_offset: offset!(-5),
            skew_tolerance: Duration::milliseconds(DEFAULT_SKEW_TOLERANCE_MS),
            lag: LagPolicy::DropFinalTimestamp,
        }
    }
}

impl EngineConfig {
    /// Builtin defaults overridden by `TICKCHART_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = lookup("TICKCHART_POLL_MS") {
            cfg.poll_interval = std::time::Duration::from_millis(parse_num("TICKCHART_POLL_MS", &v)?);
        }
        if let Some(v) = lookup("TICKCHART_FETCH_TIMEOUT_MS") {
            cfg.fetch_timeout =
                std::time::Duration::from_millis(parse_num("TICKCHART_FETCH_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("TICKCHART_RETENTION_SECS") {
            let secs: i64 = parse_num("TICKCHART_RETENTION_SECS", &v)?;
            if secs <= 0 {
                return Err(invalid("TICKCHART_RETENTION_SECS", &v, "must be positive"));
            }
            cfg.retention = Duration::seconds(secs);
        }
        if let Some(v) = lookup("TICKCHART_INTERVAL") {
            cfg.interval = Interval::from_str(&v).map_err(|e| invalid("TICKCHART_INTERVAL", &v, &e))?;
        }
        if let Some(v) = lookup("TICKCHART_UTC_OFFSET") {
            cfg.utc_offset = parse_offset(&v)?;
        }
        if let Some(v) = lookup("TICKCHART_SKEW_TOLERANCE_MS") {
            cfg.skew_tolerance = Duration::milliseconds(parse_num("TICKCHART_SKEW_TOLERANCE_MS", &v)?);
        }
        if let Some(v) = lookup("TICKCHART_LAG_ONE") {
            cfg.lag = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "edge" => LagPolicy::DropFinalTimestamp,
                "last" => LagPolicy::DropLast,
                "0" | "false" | "no" => LagPolicy::None,
                _ => return Err(invalid("TICKCHART_LAG_ONE", &v, "use true/false/last")),
            };
        }

        Ok(cfg)
    }
}

/// Parses `+HH:MM` / `-HH:MM`.
pub fn parse_offset(raw: &str) -> Result<UtcOffset, ConfigError> {
    let format = format_description!("[offset_hour sign:mandatory]:[offset_minute]");
    UtcOffset::parse(raw.trim(), &format)
        .map_err(|e| invalid("TICKCHART_UTC_OFFSET", raw, &e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub mode: StorageMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: std::env::var("TICKCHART_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORE_PATH)),
            mode: StorageMode::Disk,
        }
    }
}

fn parse_num<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, raw, &e.to_string()))
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let cfg = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.utc_offset, offset!(-5));
        assert_eq!(cfg.retention, Duration::minutes(5));
        assert_eq!(cfg.lag, LagPolicy::DropFinalTimestamp);
    }

    #[test]
    fn env_overrides() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("TICKCHART_POLL_MS", "2000"),
            ("TICKCHART_RETENTION_SECS", "120"),
            ("TICKCHART_INTERVAL", "5s"),
            ("TICKCHART_UTC_OFFSET", "-04:00"),
            ("TICKCHART_LAG_ONE", "last"),
        ]))
        .unwrap();
        assert_eq!(cfg.poll_interval, std::time::Duration::from_secs(2));
        assert_eq!(cfg.retention, Duration::minutes(2));
        assert_eq!(cfg.interval, Interval::Second(5));
        assert_eq!(cfg.utc_offset, offset!(-4));
        assert_eq!(cfg.lag, LagPolicy::DropLast);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(EngineConfig::from_lookup(lookup(&[("TICKCHART_POLL_MS", "soon")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("TICKCHART_RETENTION_SECS", "0")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("TICKCHART_UTC_OFFSET", "EST")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("TICKCHART_LAG_ONE", "maybe")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("TICKCHART_INTERVAL", "5µ")])).is_err());
    }
}
