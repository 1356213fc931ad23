//! Conductor routes
//!
//! - `POST /mind/register`: admit a mind, reply with its id, heartbeat
//!   interval and queue name
//! - `POST /mind/heartbeat`: liveness and progress report
//! - `GET /mind/workers`: registry snapshot
//! - `GET /health`

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use protheon_common::types::{HeartbeatRequest, RegisterRequest, RegisterResponse};
use serde_json::json;

use crate::error::AppError;
use crate::middleware;
use crate::registry::WorkerRegistry;

/// Build the conductor router around `registry`
pub fn router(registry: WorkerRegistry) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/mind/register", post(register_worker))
        .route("/mind/heartbeat", post(receive_heartbeat))
        .route("/mind/workers", get(list_workers))
        .with_state(registry)
        .layer(middleware::tracing_layer())
}

/// Register a worker
///
/// POST /mind/register
async fn register_worker(
    State(registry): State<WorkerRegistry>,
    peer: Option<ConnectInfo<SocketAddr>>,
    body: Bytes,
) -> Result<Json<RegisterResponse>, AppError> {
    let request: RegisterRequest = serde_json::from_slice(&body)?;
    let ip = peer
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let registration = registry.register(&request.hostname, &request.os, &ip);

    Ok(Json(RegisterResponse {
        id: registration.id.to_string(),
        heartbeat_interval: registration.heartbeat_interval_secs,
        queue_name: registration.queue_name,
    }))
}

/// Accept a heartbeat
///
/// POST /mind/heartbeat
///
/// Always 200 for a well-formed body; an unknown id is only logged.
async fn receive_heartbeat(
    State(registry): State<WorkerRegistry>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let report: HeartbeatRequest = serde_json::from_slice(&body)?;
    registry.heartbeat(&report);
    Ok(StatusCode::OK)
}

/// GET /mind/workers
async fn list_workers(State(registry): State<WorkerRegistry>) -> impl IntoResponse {
    let workers = registry.workers();
    Json(json!({
        "count": workers.len(),
        "workers": workers,
    }))
}

async fn health_check(State(registry): State<WorkerRegistry>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "workers": registry.len(),
    }))
}
