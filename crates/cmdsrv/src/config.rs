//! Router configuration.
//!
//! Loading flow:
//! 1. Start with [`SrvConfig::default()`]
//! 2. If the given JSON file exists, its fields replace the defaults
//! 3. Apply `CMDSRV_*` environment variable overrides (highest priority)

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{Result, SrvError};

/// Env var overriding [`SrvConfig::state_expire_secs`].
pub const ENV_STATE_EXPIRE_SECS: &str = "CMDSRV_STATE_EXPIRE_SECS";
/// Env var overriding [`SrvConfig::heartbeat_timeout_secs`].
pub const ENV_HEARTBEAT_TIMEOUT_SECS: &str = "CMDSRV_HEARTBEAT_TIMEOUT_SECS";
/// Env var overriding [`SrvConfig::access_log`].
pub const ENV_ACCESS_LOG: &str = "CMDSRV_ACCESS_LOG";

/// Configuration consumed by [`Srv::with_config`](crate::Srv::with_config).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrvConfig {
    /// Lifetime of session state entries in seconds (default one day).
    pub state_expire_secs: u64,
    /// Close sessions idle for this many seconds. `None` disables the
    /// heartbeat monitor.
    pub heartbeat_timeout_secs: Option<u64>,
    /// Service name for the access log. `None` disables it.
    pub access_log: Option<String>,
}

impl Default for SrvConfig {
    fn default() -> Self {
        Self {
            state_expire_secs: 24 * 60 * 60,
            heartbeat_timeout_secs: None,
            access_log: None,
        }
    }
}

impl SrvConfig {
    /// Load from a JSON file, then apply environment overrides.
    ///
    /// A missing file yields the defaults; unreadable or invalid JSON is an
    /// error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            debug!(?path, "loading router config from file");
            let content = std::fs::read_to_string(path).map_err(|e| SrvError::Config {
                message: format!("{}: {e}", path.display()),
            })?;
            let mut parsed: Self = serde_json::from_str(&content).map_err(|e| SrvError::Config {
                message: format!("{}: {e}", path.display()),
            })?;
            parsed.drop_zero_durations();
            parsed
        } else {
            debug!(?path, "router config not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `CMDSRV_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`. Unparsable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = read_secs(&lookup, ENV_STATE_EXPIRE_SECS) {
            self.state_expire_secs = v;
        }
        if let Some(v) = read_secs(&lookup, ENV_HEARTBEAT_TIMEOUT_SECS) {
            self.heartbeat_timeout_secs = Some(v);
        }
        if let Some(v) = lookup(ENV_ACCESS_LOG).filter(|v| !v.is_empty()) {
            self.access_log = Some(v);
        }
    }

    /// Zero durations are rejected like their env counterparts: the
    /// default TTL is restored and a zero heartbeat timeout disables the
    /// monitor.
    fn drop_zero_durations(&mut self) {
        if self.state_expire_secs == 0 {
            warn!("state_expire_secs of 0 ignored, using default");
            self.state_expire_secs = Self::default().state_expire_secs;
        }
        if self.heartbeat_timeout_secs == Some(0) {
            warn!("heartbeat_timeout_secs of 0 ignored, heartbeat disabled");
            self.heartbeat_timeout_secs = None;
        }
    }

    /// State TTL as a duration.
    pub fn state_expire(&self) -> Duration {
        Duration::from_secs(self.state_expire_secs)
    }

    /// Heartbeat timeout as a duration, if enabled.
    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout_secs.map(Duration::from_secs)
    }
}

fn read_secs(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    let val = lookup(name)?;
    let result = val.trim().parse::<u64>().ok().filter(|v| *v > 0);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid seconds env var, ignoring");
    }
    result
}
