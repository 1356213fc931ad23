//! Conductor HTTP error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors surfaced by conductor handlers
///
/// Bodies are plain text; minds only look at the status code.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid JSON request")]
    InvalidJson(#[from] serde_json::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::InvalidJson(ref e) => {
                tracing::debug!(error = %e, "Rejected malformed request body");
                StatusCode::BAD_REQUEST
            }
        };

        (status, self.to_string()).into_response()
    }
}
