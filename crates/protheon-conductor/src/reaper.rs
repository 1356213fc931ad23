//! Stale worker sweeps

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::WorkerRegistry;

/// Every `interval`, drop workers that have been silent for longer than
/// `timeout`. Returns when `cancel` fires.
pub fn spawn_reaper(
    registry: WorkerRegistry,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Reaper stopping");
                    return;
                }
                _ = ticker.tick() => {
                    let reaped = registry.reap_expired(timeout, Utc::now());
                    if !reaped.is_empty() {
                        info!(reaped = reaped.len(), remaining = registry.len(), "Reaped stale workers");
                    }
                }
            }
        }
    })
}
