//! Protheon Mind
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! The worker role. A mind registers with the conductor, reports liveness on
//! the interval the conductor hands back, and consumes the queue it was told
//! to consume.

pub mod client;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod stats;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use protheon_broker::{ConsumerConfig, QueueConsumer, Transport};
use protheon_common::types::RegisterRequest;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use client::ConductorClient;
pub use config::MindConfig;
pub use error::{ClientError, JobError};
pub use stats::WorkerStats;
pub use worker::{run_consumer_loop, JobHandler, LoopReport, WorkItem, WorkItemHandler};

/// Hostname and OS sent at registration
pub fn local_identity() -> RegisterRequest {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    RegisterRequest {
        hostname,
        os: std::env::consts::OS.to_string(),
    }
}

/// Run a mind until `cancel` fires.
pub async fn run<T, H>(
    config: MindConfig,
    transport: T,
    handler: H,
    cancel: CancellationToken,
) -> anyhow::Result<LoopReport>
where
    T: Transport,
    H: JobHandler,
{
    let client = ConductorClient::new(&config.conductor_url, config.http_timeout())?;

    info!(conductor = %client.base_url(), "Registering with conductor");
    let registration = client
        .register(&local_identity())
        .await
        .context("Failed to register with conductor")?;
    info!(
        worker_id = %registration.id,
        queue = %registration.queue_name,
        heartbeat_secs = registration.heartbeat_interval,
        "Registered with conductor"
    );

    let stats = Arc::new(WorkerStats::new());
    let heartbeat_cancel = cancel.child_token();
    let heartbeat = heartbeat::spawn_heartbeat(
        client,
        registration.id.clone(),
        Duration::from_secs(registration.heartbeat_interval.max(1)),
        stats.clone(),
        heartbeat_cancel.clone(),
    );

    let consumer_config = ConsumerConfig {
        queue: registration.queue_name,
        prefetch: config.prefetch,
        consumer_tag: format!("mind-{}", registration.id),
        retry: config.retry_policy(),
        resubscribe_delay: config.idle_delay(),
    };

    let result = consume(transport, &config.broker_url, consumer_config, &handler, &stats, &cancel).await;

    heartbeat_cancel.cancel();
    if let Err(e) = heartbeat.await {
        error!("Heartbeat task panicked: {}", e);
    }

    let report = result?;
    info!(jobs_done = stats.jobs_done(), "Mind shut down gracefully");
    Ok(report)
}

async fn consume<T, H>(
    transport: T,
    broker_url: &str,
    consumer_config: ConsumerConfig,
    handler: &H,
    stats: &WorkerStats,
    cancel: &CancellationToken,
) -> anyhow::Result<LoopReport>
where
    T: Transport,
    H: JobHandler,
{
    let mut consumer = match QueueConsumer::subscribe(transport, broker_url, consumer_config, cancel).await {
        Ok(consumer) => consumer,
        Err(e) if e.is_cancelled() => return Ok(LoopReport::default()),
        Err(e) => return Err(e).context("Failed to subscribe to job queue"),
    };
    info!("Connected to broker");

    let report = run_consumer_loop(&mut consumer, handler, stats, cancel)
        .await
        .context("Lost the job queue")?;

    if let Err(e) = consumer.close().await {
        tracing::warn!(error = %e, "Failed to close consumer session");
    }
    Ok(report)
}
