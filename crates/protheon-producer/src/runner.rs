//! Concurrent producers
//!
//! Runs several [`PgcrProducer`]s side by side over one shared [`ClaimSet`].
//! Every task dials its own broker session, so a slow or broken stream never
//! blocks its siblings. A file that cannot be read or decoded stays claimed
//! but not done; it is reported, not retried. A file interrupted by a lost
//! broker session is released and claimed again once the task has re-dialed,
//! so its leading records may be published twice.

use std::sync::Arc;

use anyhow::Context;
use protheon_broker::{BrokerError, QueuePublisher, Transport};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::claims::ClaimSet;
use crate::config::ProducerConfig;
use crate::error::ProducerError;
use crate::pipeline::PgcrProducer;

/// Totals across every producer task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files_completed: usize,
    pub files_failed: usize,
    pub records_published: u64,
    /// At least one task stopped early because of the shutdown signal
    pub cancelled: bool,
}

impl RunSummary {
    fn merge(&mut self, other: RunSummary) {
        self.files_completed += other.files_completed;
        self.files_failed += other.files_failed;
        self.records_published += other.records_published;
        self.cancelled |= other.cancelled;
    }
}

/// Stream every file in `claims` with up to `config.concurrency` producers.
///
/// Connector exhaustion in any task, on the first dial or a re-dial after the
/// session dropped, stops the others and is returned as an error. Cancellation is not an error: the partial summary comes back with
/// `cancelled` set.
pub async fn run_producers<T>(
    claims: Arc<ClaimSet>,
    transport: T,
    config: &ProducerConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<RunSummary>
where
    T: Transport + Clone + 'static,
{
    let workers = config.concurrency.min(claims.len());
    if workers == 0 {
        debug!("No files to produce");
        return Ok(RunSummary::default());
    }

    let scope = cancel.child_token();
    let config = Arc::new(config.clone());
    let mut tasks = JoinSet::new();

    for task_id in 0..workers {
        tasks.spawn(produce_claims(
            task_id,
            claims.clone(),
            transport.clone(),
            config.clone(),
            scope.clone(),
        ));
    }
    info!(tasks = workers, files = claims.len(), "Started producers");

    let mut summary = RunSummary::default();
    let mut fatal: Option<BrokerError> = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(task_summary)) => summary.merge(task_summary),
            Ok(Err(err)) => {
                error!(error = %err, "Producer could not reach the broker, stopping all producers");
                scope.cancel();
                fatal.get_or_insert(err);
            }
            Err(err) => {
                error!(error = %err, "Producer task panicked");
            }
        }
    }

    if let Some(err) = fatal {
        return Err(err).context("Producers lost the broker");
    }

    summary.cancelled |= cancel.is_cancelled();
    let progress = claims.progress();
    info!(
        completed = summary.files_completed,
        failed = summary.files_failed,
        published = summary.records_published,
        remaining = progress.total - progress.started,
        "Producers finished"
    );
    Ok(summary)
}

/// One producer task: claim, stream, repeat until the set runs dry.
async fn produce_claims<T: Transport>(
    task_id: usize,
    claims: Arc<ClaimSet>,
    transport: T,
    config: Arc<ProducerConfig>,
    cancel: CancellationToken,
) -> Result<RunSummary, BrokerError> {
    let mut summary = RunSummary::default();

    let Some(mut publisher) = connect_publisher(&transport, &config, &cancel).await? else {
        summary.cancelled = true;
        return Ok(summary);
    };

    while !cancel.is_cancelled() {
        let Some(file) = claims.claim() else {
            break;
        };
        debug!(task_id, file = %file.name, "Claimed file");

        let outcome = PgcrProducer::new(&file.path, &publisher)
            .with_max_line_bytes(config.max_line_bytes)
            .produce(&cancel)
            .await;

        match outcome {
            Ok(report) => {
                summary.records_published += report.published;
                if report.cancelled {
                    summary.cancelled = true;
                    break;
                }
                claims.complete(&file.name);
                summary.files_completed += 1;
                info!(task_id, file = %file.name, published = report.published, "Produced file");
            }
            Err(err @ ProducerError::Publish { .. }) => {
                warn!(task_id, file = %file.name, error = %err, "Lost broker session, re-dialing");
                claims.release(&file.name);

                if let Err(close_err) = publisher.close().await {
                    debug!(task_id, error = %close_err, "Closing dead publisher failed");
                }
                match connect_publisher(&transport, &config, &cancel).await? {
                    Some(fresh) => publisher = fresh,
                    None => {
                        summary.cancelled = true;
                        return Ok(summary);
                    }
                }
            }
            Err(err) => {
                summary.files_failed += 1;
                error!(task_id, file = %file.name, error = %err, "Failed to produce file");
            }
        }
    }

    if cancel.is_cancelled() {
        summary.cancelled = true;
    }

    if let Err(err) = publisher.close().await {
        warn!(task_id, error = %err, "Failed to close producer publisher");
    }
    Ok(summary)
}

/// Dial a publisher for the configured queue. `None` when the dial was cancelled.
async fn connect_publisher<T: Transport>(
    transport: &T,
    config: &ProducerConfig,
    cancel: &CancellationToken,
) -> Result<Option<QueuePublisher<T::Session>>, BrokerError> {
    match QueuePublisher::connect(
        transport,
        &config.broker_url,
        config.queue.as_str(),
        &config.retry_policy(),
        cancel,
    )
    .await
    {
        Ok(publisher) => Ok(Some(publisher)),
        Err(err) if err.is_cancelled() => Ok(None),
        Err(err) => Err(err),
    }
}
