use anyhow::Result;
use std::str::FromStr;
use std::time::Duration;

mod batch;
mod ledger;
mod notification;
mod telemetry;

pub use batch::BatchConfig;
pub use ledger::LedgerConfig;
pub use notification::{NotificationConfig, NotificationTarget};
pub use telemetry::{StallConfig, TelemetryConfig};

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_SERVICE_NAME: &str = "batch-gateway";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
const DEFAULT_RUST_LOG: &str = "info";

// ============================================================================
// Configuration Structures
// ============================================================================

/// Top-level gateway configuration, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Name used as the prefix of every diagnostic label
    pub service_name: String,
    pub port: u16,
    pub bind_address: String,
    pub rust_log: String,

    // Sub-configurations
    pub batch: BatchConfig,
    pub ledger: LedgerConfig,
    pub notification: NotificationConfig,
    pub telemetry: TelemetryConfig,
    pub stall: StallConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            rust_log: DEFAULT_RUST_LOG.to_string(),
            batch: BatchConfig::default(),
            ledger: LedgerConfig::default(),
            notification: NotificationConfig::default(),
            telemetry: TelemetryConfig::default(),
            stall: StallConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            service_name: std::env::var("SERVICE_NAME")
                .unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string()),
            port: env_or("PORT", DEFAULT_PORT),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string()),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_RUST_LOG.to_string()),
            batch: BatchConfig::from_env(),
            ledger: LedgerConfig::from_env(),
            notification: NotificationConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
            stall: StallConfig::from_env(),
        };
        config.validate()?;

        Ok(config)
    }

    /// Rejects values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.stall.probe_interval.is_zero() {
            anyhow::bail!("STALL_PROBE_INTERVAL_MS must be greater than zero");
        }
        if self.batch.flush_window.is_zero() {
            anyhow::bail!("BATCH_FLUSH_WINDOW_MS must be greater than zero");
        }
        if self.ledger.host.is_empty() {
            anyhow::bail!("LEDGER_HOST must not be empty");
        }
        for (name, target) in [
            ("NOTIFY_CREATE_HOST", &self.notification.create),
            ("NOTIFY_ACCEPT_HOST", &self.notification.accept),
        ] {
            if target.host.is_empty() {
                anyhow::bail!("{} must not be empty", name);
            }
        }
        Ok(())
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Reads `key` and parses it, falling back to `default` when unset or invalid.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key = key, value = %raw, "Invalid configuration value, using default");
            default
        }),
        Err(_) => default,
    }
}

pub(crate) fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_or(key, default_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear(keys: &[&str]) {
        for key in keys {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_match_reference_values() {
        clear(&[
            "BATCH_FLUSH_WINDOW_MS",
            "BATCH_MAX_SIZE",
            "STALL_THRESHOLD_MS",
            "STALL_PROBE_INTERVAL_MS",
            "LEV_HOST",
            "LEV_PORT",
            "NOTIFY_PATH_PREFIX_SEGMENTS",
        ]);

        let config = Config::from_env().unwrap();
        assert_eq!(config.batch.flush_window, Duration::from_millis(100));
        assert_eq!(config.batch.max_batch_size, None);
        assert_eq!(config.stall.threshold, Duration::from_millis(10));
        assert_eq!(config.stall.probe_interval, Duration::from_millis(5));
        assert_eq!(config.telemetry.port, 4444);
        assert_eq!(config.notification.path_prefix_segments, 1);
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        std::env::set_var("LEV_HOST", "collector.internal");
        std::env::set_var("LEV_PORT", "5555");
        std::env::set_var("BATCH_FLUSH_WINDOW_MS", "250");
        std::env::set_var("BATCH_MAX_SIZE", "64");

        let config = Config::from_env().unwrap();
        assert_eq!(config.telemetry.collector_address(), "collector.internal:5555");
        assert_eq!(config.batch.flush_window, Duration::from_millis(250));
        assert_eq!(config.batch.max_batch_size, Some(64));

        clear(&["LEV_HOST", "LEV_PORT", "BATCH_FLUSH_WINDOW_MS", "BATCH_MAX_SIZE"]);
    }

    #[test]
    #[serial]
    fn test_invalid_number_falls_back_to_default() {
        std::env::set_var("LEV_PORT", "not-a-port");
        let config = Config::from_env().unwrap();
        assert_eq!(config.telemetry.port, 4444);
        clear(&["LEV_PORT"]);
    }

    #[test]
    #[serial]
    fn test_zero_probe_interval_is_rejected() {
        std::env::set_var("STALL_PROBE_INTERVAL_MS", "0");
        assert!(Config::from_env().is_err());
        clear(&["STALL_PROBE_INTERVAL_MS"]);
    }
}
