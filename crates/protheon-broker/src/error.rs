//! Broker error taxonomy

use thiserror::Error;

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors raised while talking to the message broker
#[derive(Error, Debug)]
pub enum BrokerError {
    /// A single connect attempt failed. Transient; the connector retries it.
    #[error("Broker connection failed: {0}")]
    Connection(String),

    /// Every connect attempt failed. Fatal to the role that needed the connection.
    #[error("Gave up connecting to broker after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<BrokerError>,
    },

    /// The shutdown signal fired before or while dialing.
    #[error("Dialing cancelled")]
    Cancelled,

    /// Publish/consume/ack failed at the broker (closed channel, closed connection, ...).
    #[error("Broker protocol error: {0}")]
    Protocol(String),

    /// The publisher or consumer no longer holds a session.
    #[error("Publisher not initialized")]
    Uninitialized,
}

impl BrokerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BrokerError::Cancelled)
    }
}

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        BrokerError::Protocol(err.to_string())
    }
}
