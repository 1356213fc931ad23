//! RabbitMQ transport (AMQP 0-9-1 over lapin)

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, QueueDeclareOptions,
    },
    types::{FieldTable, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tracing::debug;

use crate::error::{BrokerError, Result};
use crate::transport::{Acknowledger, Delivery, DeliveryStream, MessageProperties, Session, Transport};

const DELIVERY_MODE_TRANSIENT: u8 = 1;
const DELIVERY_MODE_PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// Connects to RabbitMQ with an `amqp://` URI
#[derive(Debug, Clone, Default)]
pub struct AmqpTransport;

#[async_trait]
impl Transport for AmqpTransport {
    type Session = AmqpSession;

    async fn connect(&self, endpoint: &str) -> Result<AmqpSession> {
        let connection = Connection::connect(endpoint, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                let _ = connection.close(REPLY_SUCCESS, "channel open failed").await;
                return Err(BrokerError::Connection(err.to_string()));
            }
        };

        debug!(channel_id = channel.id(), "AMQP channel opened");
        Ok(AmqpSession {
            connection,
            channel,
        })
    }
}

/// One AMQP connection with a single channel
pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl Session for AmqpSession {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: &MessageProperties,
    ) -> Result<()> {
        let delivery_mode = if properties.persistent {
            DELIVERY_MODE_PERSISTENT
        } else {
            DELIVERY_MODE_TRANSIENT
        };
        let basic_properties = BasicProperties::default()
            .with_content_type(ShortString::from(properties.content_type.clone()))
            .with_delivery_mode(delivery_mode);

        self.channel
            .basic_publish("", queue, BasicPublishOptions::default(), payload, basic_properties)
            .await?
            .await?;
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let stream = consumer.map(|delivery| {
            delivery.map_err(BrokerError::from).map(|d| {
                Delivery::new(
                    d.delivery_tag,
                    d.data,
                    d.redelivered,
                    Box::new(AmqpAcker(d.acker)),
                )
            })
        });

        Ok(stream.boxed())
    }

    async fn close(self) -> Result<()> {
        let channel_result = self.channel.close(REPLY_SUCCESS, "closing").await;
        self.connection.close(REPLY_SUCCESS, "closing").await?;
        channel_result?;
        Ok(())
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await?;
        Ok(())
    }
}
