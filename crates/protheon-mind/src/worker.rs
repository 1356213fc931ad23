//! Consumer loop
//!
//! Pulls deliveries from a [`QueueConsumer`] and hands each body to a
//! [`JobHandler`]. Success acks. A malformed payload is dropped with a
//! non-requeueing nack; any other failure is nacked back onto the queue.
//! Cancellation leaves in-flight deliveries unacknowledged so the broker
//! redelivers them to another mind.

use async_trait::async_trait;
use protheon_broker::{BrokerError, QueueConsumer, Transport};
use protheon_common::types::{Job, Pgcr};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::stats::WorkerStats;

/// Processes one message body
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> Result<(), JobError>;
}

/// The two payload shapes that travel on the queue
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WorkItem {
    Pgcr(Box<Pgcr>),
    Job(Job),
}

/// Default handler: decodes a [`WorkItem`] and logs it.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkItemHandler;

#[async_trait]
impl JobHandler for WorkItemHandler {
    async fn handle(&self, body: &[u8]) -> Result<(), JobError> {
        let item: WorkItem =
            serde_json::from_slice(body).map_err(|e| JobError::Malformed(e.to_string()))?;

        match item {
            WorkItem::Pgcr(pgcr) => info!(
                instance_id = %pgcr.instance_id(),
                entries = pgcr.entries.len(),
                "PGCR processed"
            ),
            WorkItem::Job(job) => info!(job_id = job.id, data = %job.data, "Job done"),
        }
        Ok(())
    }
}

/// Counts from one run of [`run_consumer_loop`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    pub acked: u64,
    pub rejected: u64,
    pub requeued: u64,
}

/// Consume until `cancel` fires.
///
/// Returns an error only when the consumer cannot re-subscribe.
pub async fn run_consumer_loop<T, H>(
    consumer: &mut QueueConsumer<T>,
    handler: &H,
    stats: &WorkerStats,
    cancel: &CancellationToken,
) -> Result<LoopReport, BrokerError>
where
    T: Transport,
    H: JobHandler + ?Sized,
{
    let mut report = LoopReport::default();
    info!(queue = %consumer.config().queue, "Worker started");

    while let Some(delivery) = consumer.recv(cancel).await? {
        let tag = delivery.delivery_tag;

        let settled = match handler.handle(&delivery.body).await {
            Ok(()) => {
                stats.record_job();
                report.acked += 1;
                delivery.ack().await
            }
            Err(err) => {
                let requeue = err.requeue();
                warn!(delivery_tag = tag, redelivered = delivery.redelivered, requeue, error = %err, "Job failed");
                if requeue {
                    report.requeued += 1;
                } else {
                    report.rejected += 1;
                }
                delivery.nack(requeue).await
            }
        };

        // The delivery is still unacked at the broker and will come back
        if let Err(err) = settled {
            warn!(delivery_tag = tag, error = %err, "Failed to settle delivery");
        }
    }

    debug!(
        acked = report.acked,
        rejected = report.rejected,
        requeued = report.requeued,
        "Worker shutting down"
    );
    Ok(report)
}
