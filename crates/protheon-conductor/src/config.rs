//! Configuration management

use std::time::Duration;

use protheon_broker::RetryPolicy;
use protheon_common::defaults::{
    DEFAULT_BROKER_URL, DEFAULT_CONDUCTOR_PORT, DEFAULT_DIAL_ATTEMPTS, DEFAULT_DIAL_BACKOFF_MS,
    DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_QUEUE_NAME,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Conductor Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";

/// Default time allowed for in-flight requests after shutdown starts.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Missed heartbeats after which a worker is dropped from the registry.
pub const DEFAULT_MISSED_HEARTBEATS: u64 = 3;

/// Default seconds between emitted jobs.
pub const DEFAULT_EMIT_INTERVAL_SECS: u64 = 2;

/// Conductor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub workers: WorkerConfig,
    pub emitter: EmitterConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_grace_secs: u64,
}

/// Broker connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub url: String,
    pub queue: String,
    pub dial_attempts: u32,
    pub dial_backoff_ms: u64,
}

/// Worker liveness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Advertised to minds at registration
    pub heartbeat_interval_secs: u64,
    /// Workers silent for longer than this are reaped
    pub worker_timeout_secs: u64,
}

/// Job emitter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitterConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl ConductorConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let heartbeat_interval_secs =
            env_or("PROTHEON_HEARTBEAT_SECS", DEFAULT_HEARTBEAT_INTERVAL_SECS);

        let config = ConductorConfig {
            server: ServerConfig {
                host: std::env::var("PROTHEON_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_or("PROTHEON_PORT", DEFAULT_CONDUCTOR_PORT),
                shutdown_grace_secs: env_or(
                    "PROTHEON_SHUTDOWN_GRACE_SECS",
                    DEFAULT_SHUTDOWN_GRACE_SECS,
                ),
            },
            broker: BrokerConfig {
                url: std::env::var("PROTHEON_BROKER_URL")
                    .unwrap_or_else(|_| DEFAULT_BROKER_URL.to_string()),
                queue: std::env::var("PROTHEON_QUEUE")
                    .unwrap_or_else(|_| DEFAULT_QUEUE_NAME.to_string()),
                dial_attempts: DEFAULT_DIAL_ATTEMPTS,
                dial_backoff_ms: DEFAULT_DIAL_BACKOFF_MS,
            },
            workers: WorkerConfig {
                heartbeat_interval_secs,
                worker_timeout_secs: env_or(
                    "PROTHEON_WORKER_TIMEOUT_SECS",
                    heartbeat_interval_secs.saturating_mul(DEFAULT_MISSED_HEARTBEATS),
                ),
            },
            emitter: EmitterConfig {
                enabled: env_or("PROTHEON_EMIT_JOBS", false),
                interval_secs: env_or("PROTHEON_EMIT_INTERVAL_SECS", DEFAULT_EMIT_INTERVAL_SECS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.broker.url.is_empty() {
            anyhow::bail!("Broker URL cannot be empty");
        }

        if self.broker.queue.is_empty() {
            anyhow::bail!("Queue name cannot be empty");
        }

        if self.workers.heartbeat_interval_secs == 0 {
            anyhow::bail!("Heartbeat interval must be greater than 0");
        }

        if self.workers.worker_timeout_secs < self.workers.heartbeat_interval_secs {
            anyhow::bail!(
                "Worker timeout ({}s) cannot be shorter than the heartbeat interval ({}s)",
                self.workers.worker_timeout_secs,
                self.workers.heartbeat_interval_secs
            );
        }

        if self.emitter.enabled && self.emitter.interval_secs == 0 {
            anyhow::bail!("Emit interval must be greater than 0");
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.broker.dial_attempts,
            Duration::from_millis(self.broker.dial_backoff_ms),
        )
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_CONDUCTOR_PORT,
                shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            },
            broker: BrokerConfig {
                url: DEFAULT_BROKER_URL.to_string(),
                queue: DEFAULT_QUEUE_NAME.to_string(),
                dial_attempts: DEFAULT_DIAL_ATTEMPTS,
                dial_backoff_ms: DEFAULT_DIAL_BACKOFF_MS,
            },
            workers: WorkerConfig {
                heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
                worker_timeout_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS * DEFAULT_MISSED_HEARTBEATS,
            },
            emitter: EmitterConfig {
                enabled: false,
                interval_secs: DEFAULT_EMIT_INTERVAL_SECS,
            },
        }
    }
}
