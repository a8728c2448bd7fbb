// ============================================================================
// Ledger Backend Configuration
// ============================================================================

use std::time::Duration;

use super::{env_millis, env_or};

const DEFAULT_LEDGER_HOST: &str = "127.0.0.1";
const DEFAULT_LEDGER_PORT: u16 = 3001;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub host: String,
    pub port: u16,
    /// Applies to the startup connection and to lazy reconnects
    pub connect_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_LEDGER_HOST.to_string(),
            port: DEFAULT_LEDGER_PORT,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

impl LedgerConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            host: std::env::var("LEDGER_HOST").unwrap_or_else(|_| DEFAULT_LEDGER_HOST.to_string()),
            port: env_or("LEDGER_PORT", DEFAULT_LEDGER_PORT),
            connect_timeout: env_millis("LEDGER_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
