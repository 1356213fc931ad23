//! Queue publisher
//!
//! Owns exactly one session bound to one durable queue. The queue is
//! declared when the publisher is built, so every later publish can assume
//! it exists.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connector::{dial, RetryPolicy};
use crate::error::{BrokerError, Result};
use crate::transport::{MessageProperties, Session, Transport};

/// Anything that can put a payload onto a queue
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, payload: &[u8]) -> Result<()>;
}

pub struct QueuePublisher<S: Session> {
    queue: String,
    properties: MessageProperties,
    session: Option<S>,
}

impl<S: Session> QueuePublisher<S> {
    /// Take ownership of `session` and declare `queue` on it.
    ///
    /// If the declaration fails the session is closed before returning.
    pub async fn new(session: S, queue: impl Into<String>) -> Result<Self> {
        let queue = queue.into();

        if let Err(err) = session.declare_queue(&queue).await {
            warn!(queue = %queue, error = %err, "Queue declaration failed");
            if let Err(close_err) = session.close().await {
                debug!(error = %close_err, "Session close after failed declare also failed");
            }
            return Err(err);
        }

        debug!(queue = %queue, "Publisher ready");
        Ok(Self {
            queue,
            properties: MessageProperties::default(),
            session: Some(session),
        })
    }

    /// Dial through the resilient connector, then declare `queue`.
    pub async fn connect<T>(
        transport: &T,
        endpoint: &str,
        queue: impl Into<String>,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Self>
    where
        T: Transport<Session = S>,
    {
        let session = dial(transport, endpoint, policy, cancel).await?;
        Self::new(session, queue).await
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Release the session. Publishing afterwards fails with
    /// [`BrokerError::Uninitialized`]. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => {
                info!(queue = %self.queue, "Closing publisher");
                session.close().await
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<S: Session> MessagePublisher for QueuePublisher<S> {
    /// Publish `payload` unchanged as a persistent JSON message.
    async fn publish(&self, payload: &[u8]) -> Result<()> {
        let session = self.session.as_ref().ok_or(BrokerError::Uninitialized)?;
        session.publish(&self.queue, payload, &self.properties).await
    }
}
