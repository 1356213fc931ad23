//! Protheon Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, defaults, and error handling for the Protheon workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`ProtheonError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber setup shared by every role
//! - **Types**: wire types exchanged between conductor, minds and producers
//! - **Defaults**: queue name, heartbeat cadence and prefetch shared by all roles
//!
//! # Example
//!
//! ```no_run
//! use protheon_common::types::RegisterRequest;
//!
//! let body = serde_json::to_vec(&RegisterRequest {
//!     hostname: "mind-01".to_string(),
//!     os: "linux".to_string(),
//! })?;
//! # Ok::<(), serde_json::Error>(())
//! ```

pub mod defaults;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ProtheonError, Result};
