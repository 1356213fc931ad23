//! Protheon Conductor
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Coordinating HTTP service. Minds register here, report liveness through
//! heartbeats, and learn which queue to consume. Optionally emits synthetic
//! jobs onto that queue.

pub mod config;
pub mod emitter;
pub mod error;
pub mod middleware;
pub mod reaper;
pub mod registry;
pub mod routes;
pub mod server;

pub use config::ConductorConfig;
pub use error::AppError;
pub use registry::{HeartbeatOutcome, Registration, Worker, WorkerRegistry};
pub use server::{run, serve};
