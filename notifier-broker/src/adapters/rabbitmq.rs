//! AMQP 0-9-1 transport backed by `lapin`.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    uri::AMQPUri,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use log::debug;

use crate::{
    BrokerChannel, Connector, Delivery, DeliveryStream, Endpoint, PublishProperties, QueueName,
    TransportError,
};

const PERSISTENT_DELIVERY_MODE: u8 = 2;
const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";
const REPLY_SUCCESS: u16 = 200;

#[derive(Clone, Default)]
pub struct RabbitMqConnector {
    properties: ConnectionProperties,
}

impl RabbitMqConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

fn amqp_uri(endpoint: &Endpoint) -> AMQPUri {
    let mut uri = AMQPUri::default();
    uri.authority.host = endpoint.host.clone();
    uri.authority.port = endpoint.port;
    uri.authority.userinfo.username = endpoint.username.clone();
    uri.authority.userinfo.password = endpoint.password.clone();
    uri.vhost = endpoint.vhost.clone();
    uri.query.heartbeat = u16::try_from(endpoint.heartbeat.as_secs()).ok();
    uri.query.connection_timeout = u64::try_from(endpoint.connect_timeout.as_millis()).ok();
    uri
}

#[async_trait]
impl Connector for RabbitMqConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        let connection = Connection::connect_uri(amqp_uri(endpoint), self.properties.clone())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                let _ = connection.close(REPLY_SUCCESS, "channel setup failed").await;
                return Err(TransportError::Channel(err.to_string()));
            }
        };

        debug!("Opened AMQP channel {} on {}", channel.id(), endpoint);
        Ok(Arc::new(RabbitMqChannel {
            connection,
            channel,
        }))
    }
}

pub struct RabbitMqChannel {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for RabbitMqChannel {
    async fn declare_queue(&self, queue: QueueName) -> Result<(), TransportError> {
        // No arguments: redeclaring must never conflict with an existing queue.
        self.channel
            .queue_declare(
                queue.as_str(),
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(|err| TransportError::Declare {
                queue: queue.to_string(),
                reason: err.to_string(),
            })
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), TransportError> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|err| TransportError::Channel(err.to_string()))
    }

    async fn publish(
        &self,
        queue: QueueName,
        body: Vec<u8>,
        properties: PublishProperties,
    ) -> Result<(), TransportError> {
        let mut amqp_properties =
            BasicProperties::default().with_content_type(properties.content_type.as_str().into());
        if properties.persistent {
            amqp_properties = amqp_properties.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
        }

        self.channel
            .basic_publish(
                "",
                queue.as_str(),
                BasicPublishOptions::default(),
                &body,
                amqp_properties,
            )
            .await
            .map(|_| ())
            .map_err(|err| TransportError::Publish(err.to_string()))
    }

    async fn consume(
        &self,
        queue: QueueName,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, TransportError> {
        let consumer = self
            .channel
            .basic_consume(
                queue.as_str(),
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| TransportError::Consume(err.to_string()))?;

        Ok(consumer
            .map(|item| {
                item.map(|delivery| Delivery {
                    tag: delivery.delivery_tag,
                    delivery_count: delivery_count(&delivery.properties),
                    redelivered: delivery.redelivered,
                    body: delivery.data,
                })
                .map_err(|err| TransportError::Consume(err.to_string()))
            })
            .boxed())
    }

    async fn ack(&self, tag: u64) -> Result<(), TransportError> {
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(|err| TransportError::Acknowledge {
                tag,
                reason: err.to_string(),
            })
    }

    async fn reject(&self, tag: u64, requeue: bool) -> Result<(), TransportError> {
        self.channel
            .basic_nack(
                tag,
                BasicNackOptions {
                    requeue,
                    ..BasicNackOptions::default()
                },
            )
            .await
            .map_err(|err| TransportError::Acknowledge {
                tag,
                reason: err.to_string(),
            })
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.channel.status().connected() {
            self.channel
                .close(REPLY_SUCCESS, "closing")
                .await
                .map_err(|err| TransportError::Channel(err.to_string()))?;
        }
        if self.connection.status().connected() {
            self.connection
                .close(REPLY_SUCCESS, "closing")
                .await
                .map_err(|err| TransportError::Connect(err.to_string()))?;
        }
        Ok(())
    }
}

/// Previous deliveries as counted by quorum queues.
fn delivery_count(properties: &BasicProperties) -> Option<u32> {
    let headers = properties.headers().as_ref()?;
    let (_, value) = headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == DELIVERY_COUNT_HEADER)?;

    match value {
        AMQPValue::ShortShortUInt(count) => Some(u32::from(*count)),
        AMQPValue::ShortUInt(count) => Some(u32::from(*count)),
        AMQPValue::LongUInt(count) => Some(*count),
        AMQPValue::ShortShortInt(count) => u32::try_from(*count).ok(),
        AMQPValue::ShortInt(count) => u32::try_from(*count).ok(),
        AMQPValue::LongInt(count) => u32::try_from(*count).ok(),
        AMQPValue::LongLongInt(count) => u32::try_from(*count).ok(),
        _ => None,
    }
}
