//! Error types for Protheon

use thiserror::Error;

/// Result type alias for Protheon operations
pub type Result<T> = std::result::Result<T, ProtheonError>;

/// Main error type shared across Protheon crates
#[derive(Error, Debug)]
pub enum ProtheonError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
