//! Role entry points
//!
//! Each role loads its configuration from the environment (and `.env`),
//! applies the command-line overrides that were actually given, and runs
//! until the shutdown token fires.

use std::path::PathBuf;

use anyhow::Context;
use protheon_broker::amqp::AmqpTransport;
use protheon_conductor::ConductorConfig;
use protheon_mind::{MindConfig, WorkItemHandler};
use protheon_producer::ProducerConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Replace `target` only when the flag was given.
fn apply<T>(target: &mut T, flag: Option<T>) {
    if let Some(value) = flag {
        *target = value;
    }
}

pub struct ConductorArgs {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub queue: Option<String>,
    pub emit: bool,
    pub emit_interval: Option<u64>,
}

impl ConductorArgs {
    fn apply_to(self, config: &mut ConductorConfig) {
        apply(&mut config.server.host, self.host);
        apply(&mut config.server.port, self.port);
        apply(&mut config.broker.queue, self.queue);
        if self.emit {
            config.emitter.enabled = true;
        }
        apply(&mut config.emitter.interval_secs, self.emit_interval);
    }
}

pub async fn conductor(
    broker_url: Option<String>,
    args: ConductorArgs,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut config = ConductorConfig::load().context("Failed to load conductor configuration")?;

    apply(&mut config.broker.url, broker_url);
    args.apply_to(&mut config);
    config.validate()?;

    protheon_conductor::run(config, AmqpTransport, cancel).await
}

pub async fn mind(
    broker_url: Option<String>,
    conductor_url: Option<String>,
    prefetch: Option<u16>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut config = MindConfig::from_env().context("Failed to load mind configuration")?;

    apply(&mut config.broker_url, broker_url);
    apply(&mut config.conductor_url, conductor_url);
    apply(&mut config.prefetch, prefetch);
    config.validate()?;

    let report = protheon_mind::run(config, AmqpTransport, WorkItemHandler, cancel).await?;
    info!(
        acked = report.acked,
        rejected = report.rejected,
        requeued = report.requeued,
        "Mind finished"
    );
    Ok(())
}

pub struct ProducerArgs {
    pub root: Option<PathBuf>,
    pub ext: Option<String>,
    pub concurrency: Option<usize>,
    pub queue: Option<String>,
}

impl ProducerArgs {
    fn apply_to(self, config: &mut ProducerConfig) {
        apply(&mut config.root, self.root);
        apply(&mut config.extension, self.ext);
        apply(&mut config.concurrency, self.concurrency);
        apply(&mut config.queue, self.queue);
    }
}

pub async fn producer(
    broker_url: Option<String>,
    args: ProducerArgs,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut config = ProducerConfig::from_env();

    apply(&mut config.broker_url, broker_url);
    args.apply_to(&mut config);

    let summary = protheon_producer::run(config, AmqpTransport, cancel).await?;
    info!(
        files_completed = summary.files_completed,
        files_failed = summary.files_failed,
        records_published = summary.records_published,
        cancelled = summary.cancelled,
        "Producer finished"
    );

    if summary.files_failed > 0 {
        anyhow::bail!("{} file(s) failed to produce", summary.files_failed);
    }
    Ok(())
}
