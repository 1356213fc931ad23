//! Timer-driven job emitter
//!
//! Publishes a synthetic [`Job`] every tick. Ids start at 0 and increase by
//! one per tick, whether or not the publish succeeded.

use std::time::Duration;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use protheon_broker::{MessagePublisher, QueuePublisher, RetryPolicy, Transport};
use protheon_common::types::Job;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Counts from one emitter run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmitterStats {
    pub published: u64,
    pub failed: u64,
}

/// Publish a job every `interval` until `cancel` fires.
pub async fn emit_jobs<P>(publisher: &P, interval: Duration, cancel: &CancellationToken) -> EmitterStats
where
    P: MessagePublisher + ?Sized,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = EmitterStats::default();

    info!(interval_ms = interval.as_millis() as u64, "Starting job dispatch");
    for id in 0u64.. {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let job = Job {
            id,
            data: format!(
                "Job created at {}",
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
        };

        let payload = match job.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(job_id = id, error = %e, "Failed to encode job");
                stats.failed += 1;
                continue;
            }
        };

        match publisher.publish(&payload).await {
            Ok(()) => {
                stats.published += 1;
                info!(job_id = job.id, data = %job.data, "Published job");
            }
            Err(e) => {
                stats.failed += 1;
                warn!(job_id = job.id, error = %e, "Failed to publish job");
            }
        }
    }

    info!(published = stats.published, failed = stats.failed, "Job dispatch stopped");
    stats
}

/// Connect a publisher, emit until cancelled, then close the publisher.
///
/// Connector exhaustion ends the emitter with an error; a cancelled dial is
/// a clean stop.
pub async fn run_emitter<T: Transport>(
    transport: &T,
    endpoint: &str,
    queue: &str,
    policy: &RetryPolicy,
    interval: Duration,
    cancel: &CancellationToken,
) -> anyhow::Result<EmitterStats> {
    let mut publisher = match QueuePublisher::connect(transport, endpoint, queue, policy, cancel).await
    {
        Ok(publisher) => publisher,
        Err(e) if e.is_cancelled() => return Ok(EmitterStats::default()),
        Err(e) => return Err(e).context("Job emitter could not connect to broker"),
    };
    info!(queue = %publisher.queue(), "Connected to broker");

    let stats = emit_jobs(&publisher, interval, cancel).await;

    if let Err(e) = publisher.close().await {
        warn!(error = %e, "Failed to close job publisher");
    }
    Ok(stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use protheon_broker::memory::MemoryBroker;

    #[tokio::test(start_paused = true)]
    async fn test_emits_sequential_jobs_each_interval() {
        let broker = MemoryBroker::new();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            trigger.cancel();
        });

        let stats = run_emitter(
            &broker.transport(),
            "mem://",
            "pgcr_jobs",
            &RetryPolicy::default(),
            Duration::from_secs(1),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(stats, EmitterStats { published: 2, failed: 0 });

        let jobs: Vec<Job> = broker
            .ready_messages("pgcr_jobs")
            .iter()
            .map(|m| serde_json::from_slice(&m.body).unwrap())
            .collect();
        assert_eq!(jobs.iter().map(|j| j.id).collect::<Vec<_>>(), vec![0, 1]);
        assert!(jobs[0].data.starts_with("Job created at "));
        assert_eq!(broker.open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failures_do_not_stop_the_loop() {
        let broker = MemoryBroker::new();
        let cancel = CancellationToken::new();
        let session = broker.transport().connect("mem://").await.unwrap();
        let publisher = QueuePublisher::new(session, "pgcr_jobs").await.unwrap();

        broker.sever_connections();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3_500)).await;
            trigger.cancel();
        });

        let stats = emit_jobs(&publisher, Duration::from_secs(1), &cancel).await;
        assert_eq!(stats, EmitterStats { published: 0, failed: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_connector_exhaustion_is_an_error() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(u32::MAX);

        let result = run_emitter(
            &broker.transport(),
            "mem://",
            "pgcr_jobs",
            &RetryPolicy::new(2, Duration::from_millis(10)),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(broker.connect_attempts(), 2);
    }
}
