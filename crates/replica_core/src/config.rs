//! Tuning knobs of a synchronization session.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_max_retry_attempts() -> u32 {
    10
}

fn default_pending_ttl_ms() -> u64 {
    30_000
}

fn default_find_timeout_ms() -> u64 {
    10_000
}

/// Session configuration.
///
/// Every field has a serde default so partial TOML tables are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Delay before a deferred component is re-attempted
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Retry attempts before a deferred component is dropped
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Maximum age of a pending component regardless of attempts
    #[serde(default = "default_pending_ttl_ms")]
    pub pending_ttl_ms: u64,
    /// Upper bound on each bulk `find` issued during join (0 disables the bound)
    #[serde(default = "default_find_timeout_ms")]
    pub find_timeout_ms: u64,
}

impl SyncConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_millis(self.pending_ttl_ms)
    }

    pub fn find_timeout(&self) -> Option<Duration> {
        (self.find_timeout_ms > 0).then(|| Duration::from_millis(self.find_timeout_ms))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_retry_attempts == 0 {
            return Err("sync.max_retry_attempts must be greater than 0".to_string());
        }
        if self.retry_backoff_ms == 0 {
            return Err("sync.retry_backoff_ms must be greater than 0".to_string());
        }
        if self.pending_ttl_ms < self.retry_backoff_ms {
            return Err("sync.pending_ttl_ms must be at least sync.retry_backoff_ms".to_string());
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: default_retry_backoff_ms(),
            max_retry_attempts: default_max_retry_attempts(),
            pending_ttl_ms: default_pending_ttl_ms(),
            find_timeout_ms: default_find_timeout_ms(),
        }
    }
}
