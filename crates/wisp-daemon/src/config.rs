//! Daemon configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the daemon can start with zero
//! configuration for local development.

use std::path::PathBuf;
use std::time::Duration;

use wisp_core::{LifecyclePolicy, StreakPolicy};

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Explicit database file path.
    /// Env: `DB_PATH`
    /// Default: platform data directory (see `wisp_store::Database::new`).
    pub db_path: Option<PathBuf>,

    /// Filesystem path where snap payloads are stored.
    /// Env: `PAYLOAD_STORAGE_PATH`
    /// Default: `./payloads`
    pub payload_storage_path: PathBuf,

    /// Maximum payload size in bytes.
    /// Env: `MAX_PAYLOAD_SIZE`
    /// Default: 10 MiB.
    pub max_payload_size: usize,

    /// Timeout for individual payload store operations, in seconds.
    /// Env: `PAYLOAD_TIMEOUT_SECS`
    /// Default: 10.
    pub payload_timeout_secs: u64,

    /// Sweep interval in minutes.  This is a low-frequency maintenance
    /// task, not a hot path.
    /// Env: `SWEEP_INTERVAL_MINUTES`
    /// Default: 15.
    pub sweep_interval_minutes: u64,

    /// Content expiry policy.
    /// Env: `DEFAULT_SNAP_TTL_HOURS`, `MAX_TTL_HOURS`
    pub lifecycle: LifecyclePolicy,

    /// Streak window policy.
    /// Env: `STREAK_WINDOW_HOURS`, `STREAK_AT_RISK_HOURS`
    pub streaks: StreakPolicy,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            payload_storage_path: PathBuf::from("./payloads"),
            max_payload_size: 10 * 1024 * 1024, // 10 MiB
            payload_timeout_secs: 10,
            sweep_interval_minutes: 15,
            lifecycle: LifecyclePolicy::default(),
            streaks: StreakPolicy::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("PAYLOAD_STORAGE_PATH") {
            config.payload_storage_path = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("MAX_PAYLOAD_SIZE") {
            match val.parse::<usize>() {
                Ok(n) => config.max_payload_size = n,
                Err(_) => tracing::warn!(value = %val, "Invalid MAX_PAYLOAD_SIZE, using default"),
            }
        }

        if let Ok(val) = std::env::var("PAYLOAD_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.payload_timeout_secs = n,
                _ => tracing::warn!(value = %val, "Invalid PAYLOAD_TIMEOUT_SECS, using default"),
            }
        }

        if let Ok(val) = std::env::var("SWEEP_INTERVAL_MINUTES") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.sweep_interval_minutes = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid SWEEP_INTERVAL_MINUTES, using default")
                }
            }
        }

        if let Ok(val) = std::env::var("DEFAULT_SNAP_TTL_HOURS") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.lifecycle.default_snap_ttl_hours = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid DEFAULT_SNAP_TTL_HOURS, using default")
                }
            }
        }

        if let Ok(val) = std::env::var("MAX_TTL_HOURS") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.lifecycle.max_ttl_hours = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_TTL_HOURS, using default"),
            }
        }

        if let Ok(val) = std::env::var("STREAK_WINDOW_HOURS") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.streaks.window_hours = n,
                _ => tracing::warn!(value = %val, "Invalid STREAK_WINDOW_HOURS, using default"),
            }
        }

        if let Ok(val) = std::env::var("STREAK_AT_RISK_HOURS") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.streaks.at_risk_hours = n,
                _ => tracing::warn!(value = %val, "Invalid STREAK_AT_RISK_HOURS, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes * 60)
    }

    pub fn payload_timeout(&self) -> Duration {
        Duration::from_secs(self.payload_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.sweep_interval(), Duration::from_secs(15 * 60));
        assert_eq!(config.max_payload_size, 10 * 1024 * 1024);
        assert_eq!(config.lifecycle.default_snap_ttl_hours, 24);
        assert_eq!(config.streaks.window_hours, 24);
    }
}
