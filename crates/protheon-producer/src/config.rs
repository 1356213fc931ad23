//! Producer configuration

use std::path::PathBuf;
use std::time::Duration;

use protheon_broker::RetryPolicy;
use protheon_common::defaults::{
    DEFAULT_BROKER_URL, DEFAULT_DIAL_ATTEMPTS, DEFAULT_DIAL_BACKOFF_MS, DEFAULT_QUEUE_NAME,
};
use serde::{Deserialize, Serialize};

use crate::pipeline::DEFAULT_MAX_LINE_BYTES;

// ============================================================================
// Producer Configuration Constants
// ============================================================================

/// Extension of the compressed PGCR dumps.
pub const DEFAULT_EXTENSION: &str = ".zst";

/// Files streamed at the same time, each over its own broker session.
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Directory scanned for source files. Required.
    pub root: PathBuf,
    pub extension: String,
    pub concurrency: usize,
    pub broker_url: String,
    pub queue: String,
    pub max_line_bytes: usize,
    pub dial_attempts: u32,
    pub dial_backoff_ms: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl ProducerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment and defaults.
    ///
    /// Not validated: the scan root usually arrives later as a command-line
    /// override, so call [`ProducerConfig::validate`] once it is set.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            root: std::env::var("PROTHEON_SOURCE_DIR")
                .map(PathBuf::from)
                .unwrap_or_default(),
            extension: std::env::var("PROTHEON_SOURCE_EXT")
                .unwrap_or_else(|_| DEFAULT_EXTENSION.to_string()),
            concurrency: env_or("PROTHEON_PRODUCER_CONCURRENCY", DEFAULT_CONCURRENCY),
            broker_url: std::env::var("PROTHEON_BROKER_URL")
                .unwrap_or_else(|_| DEFAULT_BROKER_URL.to_string()),
            queue: std::env::var("PROTHEON_QUEUE")
                .unwrap_or_else(|_| DEFAULT_QUEUE_NAME.to_string()),
            max_line_bytes: env_or("PROTHEON_MAX_LINE_BYTES", DEFAULT_MAX_LINE_BYTES),
            dial_attempts: DEFAULT_DIAL_ATTEMPTS,
            dial_backoff_ms: DEFAULT_DIAL_BACKOFF_MS,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.root.as_os_str().is_empty() {
            anyhow::bail!("Source directory is required (set PROTHEON_SOURCE_DIR or --root)");
        }

        if !self.root.is_dir() {
            anyhow::bail!("Source directory '{}' does not exist", self.root.display());
        }

        if self.concurrency == 0 {
            anyhow::bail!("Producer concurrency must be greater than 0");
        }

        if self.queue.is_empty() {
            anyhow::bail!("Queue name cannot be empty");
        }

        if self.broker_url.is_empty() {
            anyhow::bail!("Broker URL cannot be empty");
        }

        if self.max_line_bytes == 0 {
            anyhow::bail!("Maximum line length must be greater than 0");
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.dial_attempts, Duration::from_millis(self.dial_backoff_ms))
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            extension: DEFAULT_EXTENSION.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            broker_url: DEFAULT_BROKER_URL.to_string(),
            queue: DEFAULT_QUEUE_NAME.to_string(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            dial_attempts: DEFAULT_DIAL_ATTEMPTS,
            dial_backoff_ms: DEFAULT_DIAL_BACKOFF_MS,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        for var in [
            "PROTHEON_SOURCE_DIR",
            "PROTHEON_SOURCE_EXT",
            "PROTHEON_PRODUCER_CONCURRENCY",
            "PROTHEON_BROKER_URL",
            "PROTHEON_QUEUE",
            "PROTHEON_MAX_LINE_BYTES",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults_need_a_root() {
        let config = ProducerConfig::default();
        assert_eq!(config.extension, ".zst");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.queue, "pgcr_jobs");
        assert_eq!(config.max_line_bytes, 64 * 1024 * 1024);
        assert!(config.validate().is_err());

        let dir = TempDir::new().unwrap();
        assert!(ProducerConfig::new(dir.path()).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_dir_and_zero_concurrency() {
        let dir = TempDir::new().unwrap();

        assert!(ProducerConfig::new(dir.path().join("absent")).validate().is_err());

        let config = ProducerConfig {
            concurrency: 0,
            ..ProducerConfig::new(dir.path())
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("PROTHEON_SOURCE_DIR", "/data/pgcr");
        std::env::set_var("PROTHEON_PRODUCER_CONCURRENCY", "8");
        std::env::set_var("PROTHEON_QUEUE", "bulk_pgcr");

        let config = ProducerConfig::from_env();
        clear_env();

        assert_eq!(config.root, PathBuf::from("/data/pgcr"));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.queue, "bulk_pgcr");
        assert_eq!(config.extension, ".zst");
    }
}
