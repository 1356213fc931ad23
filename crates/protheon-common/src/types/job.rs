//! Jobs emitted by the conductor's timer

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A synthetic unit of work published by the conductor's job emitter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub data: String,
}

impl Job {
    /// JSON message body
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
