//! Broker seam
//!
//! A [`Transport`] opens [`Session`]s; a session owns one broker connection
//! plus one channel and is never shared between a publisher and a consumer.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use protheon_common::defaults::MESSAGE_CONTENT_TYPE;

use crate::error::Result;

/// Stream of deliveries from one subscription. Ends when the channel closes.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// Properties attached to a published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: String,
    /// Survives a broker restart when the queue is durable
    pub persistent: bool,
}

impl Default for MessageProperties {
    fn default() -> Self {
        Self {
            content_type: MESSAGE_CONTENT_TYPE.to_string(),
            persistent: true,
        }
    }
}

/// Opens broker sessions
#[async_trait]
pub trait Transport: Send + Sync {
    type Session: Session;

    /// One connect attempt, no retries. See [`crate::connector::dial`].
    async fn connect(&self, endpoint: &str) -> Result<Self::Session>;
}

/// One connection + channel pair
#[async_trait]
pub trait Session: Send + Sync + Sized + 'static {
    /// Declare a durable queue. Safe to repeat.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    async fn publish(&self, queue: &str, payload: &[u8], properties: &MessageProperties)
        -> Result<()>;

    /// Cap unacknowledged deliveries held by this session. 0 means unbounded.
    async fn set_prefetch(&self, count: u16) -> Result<()>;

    /// Subscribe with manual acknowledgment.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    /// Release the channel and connection. Unacked deliveries go back to the queue.
    async fn close(self) -> Result<()>;
}

/// Settles a single delivery
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// A message handed to a consumer, pending acknowledgment
pub struct Delivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    /// Set when the broker has handed this message out before
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        body: Vec<u8>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            body,
            redelivered,
            acker,
        }
    }

    /// Confirm processing; the broker forgets the message.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    /// Refuse the message, optionally returning it to the queue.
    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
