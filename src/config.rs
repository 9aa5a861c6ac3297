use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::HoldPolicy;
use crate::limits::{MAX_HOLD_TTL_SECS, MAX_TXN_ATTEMPTS};

/// Process configuration, read from `SLOTHOLD_*` environment variables.
/// Unparseable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub hold_ttl: Duration,
    pub single_hold: bool,
    pub max_connections: usize,
    pub token: String,
    pub data_dir: PathBuf,
    pub reaper_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
            lookup(name).and_then(|s| s.trim().parse().ok())
        }

        let ttl_secs: u64 = parsed(&lookup, "SLOTHOLD_HOLD_TTL_SECS").unwrap_or(120);
        let reaper_ms: u64 = parsed(&lookup, "SLOTHOLD_REAPER_INTERVAL_MS").unwrap_or(5_000);

        Self {
            bind: lookup("SLOTHOLD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "SLOTHOLD_PORT").unwrap_or(8080),
            hold_ttl: Duration::from_secs(ttl_secs.clamp(1, MAX_HOLD_TTL_SECS)),
            single_hold: parsed(&lookup, "SLOTHOLD_SINGLE_HOLD").unwrap_or(true),
            max_connections: parsed(&lookup, "SLOTHOLD_MAX_CONNECTIONS").unwrap_or(256),
            token: lookup("SLOTHOLD_TOKEN").unwrap_or_else(|| "slothold".into()),
            data_dir: lookup("SLOTHOLD_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            reaper_interval: Duration::from_millis(reaper_ms.max(1)),
            metrics_port: parsed(&lookup, "SLOTHOLD_METRICS_PORT"),
        }
    }

    pub fn hold_policy(&self) -> HoldPolicy {
        HoldPolicy {
            ttl: self.hold_ttl,
            single_hold: self.single_hold,
            max_attempts: MAX_TXN_ATTEMPTS,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
