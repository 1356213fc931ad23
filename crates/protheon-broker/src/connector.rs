//! Resilient connector
//!
//! Dials the broker up to `max_attempts` times, sleeping between failures
//! with a backoff that doubles after every failed attempt. The shutdown token
//! is checked before each attempt and during each sleep.

use std::future::Future;
use std::time::Duration;

use protheon_common::defaults::{DEFAULT_DIAL_ATTEMPTS, DEFAULT_DIAL_BACKOFF_MS};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{BrokerError, Result};
use crate::transport::Transport;

/// How many times to dial and how long to wait after the first failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_DIAL_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_DIAL_BACKOFF_MS),
        }
    }
}

/// Call `connect` until it succeeds, the attempts run out, or `cancel` fires.
///
/// A cancelled token yields [`BrokerError::Cancelled`] without spending an
/// attempt. Exhaustion yields [`BrokerError::RetriesExhausted`] wrapping the
/// last connect error. There is no sleep after the final failed attempt.
pub async fn dial_with_retry<C, F, Fut>(
    target: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut connect: F,
) -> Result<C>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<C>>,
{
    let mut backoff = policy.initial_backoff;
    let mut last_error = BrokerError::Connection("no connect attempts permitted".to_string());

    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            info!(attempt, "Shutdown requested, dialing cancelled");
            return Err(BrokerError::Cancelled);
        }

        match connect(target.to_string()).await {
            Ok(conn) => {
                if attempt > 1 {
                    info!(attempt, "Connected to broker after retrying");
                }
                return Ok(conn);
            }
            Err(err) => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "Broker dial failed"
                );
                last_error = err;
            }
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(attempt, "Shutdown requested during backoff, dialing cancelled");
                    return Err(BrokerError::Cancelled);
                }
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = backoff.saturating_mul(2);
        }
    }

    Err(BrokerError::RetriesExhausted {
        attempts: policy.max_attempts,
        source: Box::new(last_error),
    })
}

/// Open a [`Transport`] session through [`dial_with_retry`].
pub async fn dial<T: Transport>(
    transport: &T,
    endpoint: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<T::Session> {
    dial_with_retry(endpoint, policy, cancel, move |target| async move {
        transport.connect(&target).await
    })
    .await
}
