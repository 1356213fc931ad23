//! Protheon Producer
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Turns directories of zstd-compressed PGCR dumps into queue messages.
//!
//! - [`finder`] walks the source tree once and builds a [`ClaimSet`].
//! - [`claims`] hands each file to exactly one producer.
//! - [`pipeline`] streams one file, line by line, onto the queue.
//! - [`runner`] drives several pipelines concurrently.

pub mod claims;
pub mod config;
pub mod error;
pub mod finder;
pub mod pipeline;
pub mod runner;

use std::sync::Arc;

use anyhow::Context;
use protheon_broker::Transport;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use claims::{ClaimSet, ClaimedFile, FileClaim, Progress};
pub use config::ProducerConfig;
pub use error::{ProducerError, Result};
pub use finder::FileFinder;
pub use pipeline::{PgcrProducer, ProduceReport, DEFAULT_MAX_LINE_BYTES};
pub use runner::{run_producers, RunSummary};

/// Scan the configured root and stream every matching file until done or
/// cancelled.
pub async fn run<T>(
    config: ProducerConfig,
    transport: T,
    cancel: CancellationToken,
) -> anyhow::Result<RunSummary>
where
    T: Transport + Clone + 'static,
{
    config.validate()?;

    let finder = FileFinder::new(&config.root);
    let extension = config.extension.clone();
    let claims = tokio::task::spawn_blocking(move || finder.find_by_extension(&extension))
        .await
        .context("Source scan task failed")?
        .with_context(|| format!("Failed to scan {}", config.root.display()))?;

    if claims.is_empty() {
        warn!(
            root = %config.root.display(),
            extension = %config.extension,
            "No source files found"
        );
        return Ok(RunSummary::default());
    }
    info!(root = %config.root.display(), files = claims.len(), "Found source files");

    let claims = Arc::new(claims);
    let summary = run_producers(claims.clone(), transport, &config, &cancel).await?;

    if claims.is_finished() {
        info!(published = summary.records_published, "All source files produced");
    }
    Ok(summary)
}
