// ============================================================================
// Batch Configuration
// ============================================================================

use std::time::Duration;

use super::{env_millis, env_or};

const DEFAULT_FLUSH_WINDOW_MS: u64 = 100;

/// Batch queue policy
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Time from the first job of a batch until it is flushed
    pub flush_window: Duration,
    /// Optional early flush once a batch holds this many jobs.
    /// `None` keeps the flush purely time-bounded.
    pub max_batch_size: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_window: Duration::from_millis(DEFAULT_FLUSH_WINDOW_MS),
            max_batch_size: None,
        }
    }
}

impl BatchConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            flush_window: env_millis("BATCH_FLUSH_WINDOW_MS", DEFAULT_FLUSH_WINDOW_MS),
            // 0 disables the size trigger
            max_batch_size: match env_or("BATCH_MAX_SIZE", 0usize) {
                0 => None,
                size => Some(size),
            },
        }
    }
}
