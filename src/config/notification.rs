// ============================================================================
// Notification Forwarding Configuration
// ============================================================================

use std::time::Duration;

use super::env_or;

const DEFAULT_NOTIFY_HOST: &str = "127.0.0.1";
const DEFAULT_CREATE_PORT: u16 = 3100;
const DEFAULT_ACCEPT_PORT: u16 = 3101;
const DEFAULT_PATH_PREFIX_SEGMENTS: usize = 1;
const DEFAULT_POOL_MAX_IDLE: usize = 10;
const DEFAULT_POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// A fixed downstream HTTP endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationTarget {
    pub host: String,
    pub port: u16,
}

impl NotificationTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Absolute URL for `path`, which must start with `/`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }

    fn from_env(host_key: &str, port_key: &str, default_port: u16) -> Self {
        Self {
            host: std::env::var(host_key).unwrap_or_else(|_| DEFAULT_NOTIFY_HOST.to_string()),
            port: env_or(port_key, default_port),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    /// Receives every accepted create request
    pub create: NotificationTarget,
    /// Receives every accepted accept (fulfil) request
    pub accept: NotificationTarget,
    /// Leading path segments removed before forwarding (`/transfers/1` -> `/1`)
    pub path_prefix_segments: usize,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            create: NotificationTarget::new(DEFAULT_NOTIFY_HOST, DEFAULT_CREATE_PORT),
            accept: NotificationTarget::new(DEFAULT_NOTIFY_HOST, DEFAULT_ACCEPT_PORT),
            path_prefix_segments: DEFAULT_PATH_PREFIX_SEGMENTS,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE,
            pool_idle_timeout: Duration::from_secs(DEFAULT_POOL_IDLE_TIMEOUT_SECS),
        }
    }
}

impl NotificationConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            create: NotificationTarget::from_env(
                "NOTIFY_CREATE_HOST",
                "NOTIFY_CREATE_PORT",
                DEFAULT_CREATE_PORT,
            ),
            accept: NotificationTarget::from_env(
                "NOTIFY_ACCEPT_HOST",
                "NOTIFY_ACCEPT_PORT",
                DEFAULT_ACCEPT_PORT,
            ),
            path_prefix_segments: env_or(
                "NOTIFY_PATH_PREFIX_SEGMENTS",
                DEFAULT_PATH_PREFIX_SEGMENTS,
            ),
            pool_max_idle_per_host: env_or("NOTIFY_POOL_MAX_IDLE", DEFAULT_POOL_MAX_IDLE),
            pool_idle_timeout: Duration::from_secs(env_or(
                "NOTIFY_POOL_IDLE_TIMEOUT_SECS",
                DEFAULT_POOL_IDLE_TIMEOUT_SECS,
            )),
        }
    }
}
