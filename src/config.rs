use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    CPU_COUNT, DEFAULT_DIR, DEFAULT_FINAL_FLUSH_ATTEMPTS, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_RETRY_BACKOFF, DEFAULT_WRITE_BUFFER,
};

/// Configuration for an [`Environment`](crate::Environment)
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Directory holding persisted stores (default: ./shared_prefs)
    pub dir: PathBuf,

    /// Upper bound of the save worker pool (default: available parallelism)
    pub max_workers: usize,

    /// Idle save workers retire after this long (default: 30s)
    pub idle_timeout: Duration,

    /// Pause before a failed flush is resubmitted (default: 50ms)
    pub retry_backoff: Duration,

    /// Buffer size for persisted file writes (default: 32KB)
    pub write_buffer_size: usize,

    /// Flush attempts per store during shutdown (default: 3)
    pub final_flush_attempts: usize,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_DIR),
            max_workers: *CPU_COUNT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            write_buffer_size: DEFAULT_WRITE_BUFFER,
            final_flush_attempts: DEFAULT_FINAL_FLUSH_ATTEMPTS,
        }
    }
}

impl EnvConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    pub fn final_flush_attempts(mut self, attempts: usize) -> Self {
        self.final_flush_attempts = attempts;
        self
    }
}
