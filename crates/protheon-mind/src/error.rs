//! Error types for the worker role

use thiserror::Error;

/// Failures talking to the conductor
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Conductor request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Conductor answered {status} for {url}")]
    Status { status: u16, url: String },
}

/// Why a delivery could not be processed
#[derive(Error, Debug)]
pub enum JobError {
    /// The payload will never decode; redelivering it would fail again.
    #[error("Malformed job payload: {0}")]
    Malformed(String),

    /// Processing failed but may succeed on another attempt.
    #[error("Job failed: {0}")]
    Failed(String),
}

impl JobError {
    /// Whether the broker should hand the message out again
    pub fn requeue(&self) -> bool {
        matches!(self, JobError::Failed(_))
    }
}
