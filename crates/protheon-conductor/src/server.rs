//! Conductor lifecycle
//!
//! Binds the HTTP listener, starts the reaper and (optionally) the job
//! emitter, and tears all of it down when the shutdown token fires or the
//! emitter gives up on the broker.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use protheon_broker::Transport;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ConductorConfig;
use crate::emitter::run_emitter;
use crate::reaper::spawn_reaper;
use crate::registry::WorkerRegistry;
use crate::routes;

/// Run the conductor until `cancel` fires.
///
/// Connector exhaustion in the job emitter is fatal: it cancels `cancel`,
/// the listener drains, and the emitter's error is returned.
pub async fn run<T>(config: ConductorConfig, transport: T, cancel: CancellationToken) -> anyhow::Result<()>
where
    T: Transport + 'static,
{
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Conductor listening on {}", addr);

    let registry = WorkerRegistry::new(
        config.workers.heartbeat_interval_secs,
        config.broker.queue.as_str(),
    );

    let reaper = spawn_reaper(
        registry.clone(),
        Duration::from_secs(config.workers.heartbeat_interval_secs),
        Duration::from_secs(config.workers.worker_timeout_secs),
        cancel.clone(),
    );

    let emitter = if config.emitter.enabled {
        let policy = config.retry_policy();
        let endpoint = config.broker.url.clone();
        let queue = config.broker.queue.clone();
        let interval = Duration::from_secs(config.emitter.interval_secs);
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            let result = run_emitter(&transport, &endpoint, &queue, &policy, interval, &cancel).await;
            if let Err(e) = &result {
                error!("Job emitter failed, shutting down conductor: {:#}", e);
                cancel.cancel();
            }
            result
        }))
    } else {
        info!("Job emitter disabled (PROTHEON_EMIT_JOBS=false)");
        None
    };

    let served = serve(
        listener,
        routes::router(registry),
        Duration::from_secs(config.server.shutdown_grace_secs),
        cancel.clone(),
    )
    .await;

    // The listener may have failed on its own; make sure background tasks stop too
    cancel.cancel();

    let mut emitter_failure = None;
    if let Some(emitter) = emitter {
        match emitter.await {
            Ok(Ok(stats)) => info!(published = stats.published, failed = stats.failed, "Job emitter stopped"),
            Ok(Err(e)) => emitter_failure = Some(e),
            Err(e) => error!("Job emitter task panicked: {}", e),
        }
    }
    if let Err(e) = reaper.await {
        error!("Reaper task panicked: {}", e);
    }

    if let Some(e) = emitter_failure {
        return Err(e.context("Job emitter could not reach the broker"));
    }
    served?;
    info!("Conductor shut down gracefully");
    Ok(())
}

/// Serve `app` on `listener` until `cancel` fires, then give in-flight
/// requests `grace` to finish before dropping them.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    grace: Duration,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let shutdown = cancel.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result.context("HTTP server failed")?,
        _ = async {
            cancel.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(grace_secs = grace.as_secs(), "In-flight requests did not drain in time, forcing shutdown");
        }
    }

    Ok(())
}
