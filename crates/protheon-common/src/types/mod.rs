//! Wire types shared across Protheon roles
//!
//! - [`api`]: conductor HTTP request/response bodies
//! - [`job`]: emitted job payloads
//! - [`pgcr`]: structural shape of a post-game carnage report record

pub mod api;
pub mod job;
pub mod pgcr;

pub use api::{format_uptime, HeartbeatRequest, RegisterRequest, RegisterResponse};
pub use job::Job;
pub use pgcr::Pgcr;
