//! Producer error taxonomy
//!
//! Every variant except [`ProducerError::Walk`] is scoped to a single file:
//! it aborts that stream and nothing else.

use std::path::PathBuf;

use protheon_broker::BrokerError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProducerError>;

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Error opening source [{}]: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error decompressing source [{}]: {source}", path.display())]
    Decompress {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {line} exceeds {limit} bytes")]
    LineTooLong { line: u64, limit: usize },

    #[error("Line {line} is not a valid PGCR: {source}")]
    Decode {
        line: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Error publishing pgcr [{instance_id}] from line {line}: {source}")]
    Publish {
        line: u64,
        instance_id: String,
        #[source]
        source: BrokerError,
    },
}
