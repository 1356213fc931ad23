//! Heartbeat sender

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::ConductorClient;
use crate::stats::WorkerStats;

/// Post a heartbeat every `interval` until `cancel` fires. Failed posts are
/// logged and retried on the next tick.
pub fn spawn_heartbeat(
    client: ConductorClient,
    worker_id: String,
    interval: Duration,
    stats: Arc<WorkerStats>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Heartbeat shutting down");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let report = stats.report(&worker_id);
            match client.heartbeat(&report).await {
                Ok(()) => debug!(jobs_done = report.jobs_done, uptime = %report.uptime, "Heartbeat sent"),
                Err(e) => warn!(error = %e, "Heartbeat failed"),
            }
        }
    })
}
