//! Prefetch consumer
//!
//! Subscribes to a durable queue with manual acknowledgment and a bounded
//! number of unacknowledged deliveries. When the delivery stream ends, the
//! consumer releases its session, waits `resubscribe_delay`, then dials and
//! subscribes again. Messages left unacknowledged on the dead session are
//! redelivered by the broker.

use std::time::Duration;

use futures::StreamExt;
use protheon_common::defaults::DEFAULT_PREFETCH;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connector::{dial, RetryPolicy};
use crate::error::{BrokerError, Result};
use crate::transport::{Delivery, DeliveryStream, Session, Transport};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: String,
    pub prefetch: u16,
    pub consumer_tag: String,
    pub retry: RetryPolicy,
    /// Pause before re-subscribing after the stream ends
    pub resubscribe_delay: Duration,
}

impl ConsumerConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            prefetch: DEFAULT_PREFETCH,
            consumer_tag: String::new(),
            retry: RetryPolicy::default(),
            resubscribe_delay: Duration::from_secs(2),
        }
    }
}

pub struct QueueConsumer<T: Transport> {
    transport: T,
    endpoint: String,
    config: ConsumerConfig,
    session: Option<T::Session>,
    stream: Option<DeliveryStream>,
    resubscriptions: u64,
}

impl<T: Transport> QueueConsumer<T> {
    /// Dial, declare the queue, set prefetch and start consuming.
    pub async fn subscribe(
        transport: T,
        endpoint: impl Into<String>,
        config: ConsumerConfig,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut consumer = Self {
            transport,
            endpoint: endpoint.into(),
            config,
            session: None,
            stream: None,
            resubscriptions: 0,
        };
        consumer.attach(cancel).await?;
        Ok(consumer)
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Times the subscription has been re-established after the stream ended
    pub fn resubscriptions(&self) -> u64 {
        self.resubscriptions
    }

    /// Next delivery, or `None` once `cancel` fires.
    ///
    /// Broken subscriptions are repaired transparently. Errors surface only
    /// when re-dialing exhausts its retry policy.
    pub async fn recv(&mut self, cancel: &CancellationToken) -> Result<Option<Delivery>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            if let Some(stream) = self.stream.as_mut() {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(None),
                    next = stream.next() => next,
                };

                match next {
                    Some(Ok(delivery)) => return Ok(Some(delivery)),
                    Some(Err(err)) => {
                        warn!(queue = %self.config.queue, error = %err, "Delivery stream failed");
                    }
                    None => {
                        warn!(queue = %self.config.queue, "Delivery stream closed by broker");
                    }
                }
            }

            self.release().await;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.config.resubscribe_delay) => {}
            }

            match self.attach(cancel).await {
                Ok(()) => {
                    self.resubscriptions += 1;
                    info!(
                        queue = %self.config.queue,
                        resubscriptions = self.resubscriptions,
                        "Re-subscribed to queue"
                    );
                }
                Err(err) if err.is_cancelled() => return Ok(None),
                Err(err) => return Err(err),
            }
        }
    }

    /// Stop consuming and close the session. Unacked deliveries are requeued.
    pub async fn close(mut self) -> Result<()> {
        self.stream = None;
        match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }

    /// Dial and subscribe. A session that dials but cannot subscribe is
    /// closed and the whole attach is retried after `resubscribe_delay`, up to
    /// `retry.max_attempts` times.
    async fn attach(&mut self, cancel: &CancellationToken) -> Result<()> {
        let attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let session = dial(&self.transport, &self.endpoint, &self.config.retry, cancel).await?;

            let err = match Self::open_stream(&session, &self.config).await {
                Ok(stream) => {
                    debug!(
                        queue = %self.config.queue,
                        prefetch = self.config.prefetch,
                        "Subscribed to queue"
                    );
                    self.session = Some(session);
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(err) => err,
            };

            if let Err(close_err) = session.close().await {
                debug!(error = %close_err, "Closing unsubscribed session failed");
            }
            if attempt >= attempts {
                return Err(err);
            }
            warn!(
                queue = %self.config.queue,
                attempt,
                error = %err,
                "Subscribing failed, dialing again"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BrokerError::Cancelled),
                _ = tokio::time::sleep(self.config.resubscribe_delay) => {}
            }
        }
    }

    async fn open_stream(session: &T::Session, config: &ConsumerConfig) -> Result<DeliveryStream> {
        session.declare_queue(&config.queue).await?;
        session.set_prefetch(config.prefetch).await?;
        session.consume(&config.queue, &config.consumer_tag).await
    }

    async fn release(&mut self) {
        self.stream = None;
        if let Some(session) = self.session.take() {
            if let Err(err) = session.close().await {
                debug!(error = %err, "Closing dead session failed");
            }
        }
    }
}

