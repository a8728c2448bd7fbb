// ============================================================================
// Telemetry and Runtime Health Configuration
// ============================================================================

use std::time::Duration;

use super::{env_millis, env_or};

const DEFAULT_COLLECTOR_HOST: &str = "127.0.0.1";
const DEFAULT_COLLECTOR_PORT: u16 = 4444;
const DEFAULT_PROBE_INTERVAL_MS: u64 = 5;
const DEFAULT_STALL_THRESHOLD_MS: u64 = 10;

/// Remote diagnostic event collector
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// When false, events are discarded at the emitter
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: DEFAULT_COLLECTOR_HOST.to_string(),
            port: DEFAULT_COLLECTOR_PORT,
        }
    }
}

impl TelemetryConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            enabled: env_or("LEV_ENABLED", true),
            host: std::env::var("LEV_HOST").unwrap_or_else(|_| DEFAULT_COLLECTOR_HOST.to_string()),
            port: env_or("LEV_PORT", DEFAULT_COLLECTOR_PORT),
        }
    }

    pub fn collector_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Scheduler stall probe
#[derive(Clone, Debug)]
pub struct StallConfig {
    pub probe_interval: Duration,
    /// Drift beyond the expected tick that counts as a stall
    pub threshold: Duration,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_millis(DEFAULT_PROBE_INTERVAL_MS),
            threshold: Duration::from_millis(DEFAULT_STALL_THRESHOLD_MS),
        }
    }
}

impl StallConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            probe_interval: env_millis("STALL_PROBE_INTERVAL_MS", DEFAULT_PROBE_INTERVAL_MS),
            threshold: env_millis("STALL_THRESHOLD_MS", DEFAULT_STALL_THRESHOLD_MS),
        }
    }
}
