//! Configuration file support for hostlink
//!
//! Config is loaded from `~/.hostlink/config.toml` (or
//! `$HOSTLINK_HOME/config.toml`). Every field has a default; the file is
//! optional. Values are durations in milliseconds unless noted.

use crate::storage::hostlink_dir;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global config instance (loaded once on first access)
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::load)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-request timeout on the broker connection (ms)
    pub request_timeout_ms: u64,

    /// How long a connect-time ping may take before the connection is
    /// considered dead (ms)
    pub ping_timeout_ms: u64,

    /// Total budget for waiting out a host reload (ms)
    pub reload_timeout_ms: u64,

    /// First delay of the reload poll loop (ms); doubles per iteration
    pub reload_poll_floor_ms: u64,

    /// Ceiling for the reload poll delay (ms)
    pub reload_poll_cap_ms: u64,

    /// Pause after a reload-triggering tool call before polling (ms)
    pub settle_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            ping_timeout_ms: 5_000,
            reload_timeout_ms: 60_000,
            reload_poll_floor_ms: 500,
            reload_poll_cap_ms: 2_000,
            settle_delay_ms: 500,
        }
    }
}

impl Config {
    fn load() -> Self {
        let path = match hostlink_dir() {
            Ok(dir) => dir.join("config.toml"),
            Err(_) => return Self::default(),
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    crate::logging::warn(&format!(
                        "Invalid config at {}: {} (using defaults)",
                        path.display(),
                        e
                    ));
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_millis(self.reload_timeout_ms)
    }

    pub fn reload_poll_floor(&self) -> Duration {
        Duration::from_millis(self.reload_poll_floor_ms)
    }

    pub fn reload_poll_cap(&self) -> Duration {
        Duration::from_millis(self.reload_poll_cap_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
