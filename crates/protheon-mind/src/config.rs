//! Worker configuration

use std::time::Duration;

use protheon_broker::RetryPolicy;
use protheon_common::defaults::{
    DEFAULT_BROKER_URL, DEFAULT_CONDUCTOR_PORT, DEFAULT_DIAL_ATTEMPTS, DEFAULT_DIAL_BACKOFF_MS,
    DEFAULT_PREFETCH,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Mind Configuration Constants
// ============================================================================

/// Pause before re-subscribing after the delivery stream closes.
pub const DEFAULT_IDLE_DELAY_SECS: u64 = 2;

/// Timeout for each conductor request.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

pub fn default_conductor_url() -> String {
    format!("http://localhost:{DEFAULT_CONDUCTOR_PORT}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MindConfig {
    pub conductor_url: String,
    pub broker_url: String,
    pub prefetch: u16,
    pub idle_delay_secs: u64,
    pub http_timeout_secs: u64,
    pub dial_attempts: u32,
    pub dial_backoff_ms: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl MindConfig {
    /// Load configuration from environment and defaults
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = MindConfig {
            conductor_url: std::env::var("PROTHEON_CONDUCTOR_URL")
                .unwrap_or_else(|_| default_conductor_url()),
            broker_url: std::env::var("PROTHEON_BROKER_URL")
                .unwrap_or_else(|_| DEFAULT_BROKER_URL.to_string()),
            prefetch: env_or("PROTHEON_PREFETCH", DEFAULT_PREFETCH),
            idle_delay_secs: env_or("PROTHEON_IDLE_DELAY_SECS", DEFAULT_IDLE_DELAY_SECS),
            http_timeout_secs: env_or("PROTHEON_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
            dial_attempts: DEFAULT_DIAL_ATTEMPTS,
            dial_backoff_ms: DEFAULT_DIAL_BACKOFF_MS,
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.conductor_url.starts_with("http://") && !self.conductor_url.starts_with("https://")
        {
            anyhow::bail!(
                "Conductor URL must start with http:// or https:// (got '{}')",
                self.conductor_url
            );
        }

        if self.broker_url.is_empty() {
            anyhow::bail!("Broker URL cannot be empty");
        }

        if self.prefetch == 0 {
            anyhow::bail!("Prefetch must be greater than 0");
        }

        if self.http_timeout_secs == 0 {
            anyhow::bail!("HTTP timeout must be greater than 0");
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.dial_attempts, Duration::from_millis(self.dial_backoff_ms))
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_secs(self.idle_delay_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for MindConfig {
    fn default() -> Self {
        Self {
            conductor_url: default_conductor_url(),
            broker_url: DEFAULT_BROKER_URL.to_string(),
            prefetch: DEFAULT_PREFETCH,
            idle_delay_secs: DEFAULT_IDLE_DELAY_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
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

    fn clear_env() {
        for var in [
            "PROTHEON_CONDUCTOR_URL",
            "PROTHEON_BROKER_URL",
            "PROTHEON_PREFETCH",
            "PROTHEON_IDLE_DELAY_SECS",
            "PROTHEON_HTTP_TIMEOUT_SECS",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let config = MindConfig::default();
        assert_eq!(config.conductor_url, "http://localhost:8080");
        assert_eq!(config.prefetch, 5);
        assert_eq!(config.idle_delay(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("PROTHEON_CONDUCTOR_URL", "http://conductor:9000");
        std::env::set_var("PROTHEON_PREFETCH", "12");

        let config = MindConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.conductor_url, "http://conductor:9000");
        assert_eq!(config.prefetch, 12);
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bare_host() {
        clear_env();
        std::env::set_var("PROTHEON_CONDUCTOR_URL", "conductor:8080");

        let result = MindConfig::from_env();
        clear_env();

        assert!(result.is_err());
    }
}
