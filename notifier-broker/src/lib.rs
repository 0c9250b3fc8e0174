pub mod adapters;
mod connection;
mod consumer;
mod errors;
pub mod in_memory;
mod publisher;
mod retry;
mod types;

pub use connection::BrokerConnection;
pub use consumer::{
    decide, Consumer, ConsumerConfig, FailurePolicy, MessageHandler, ProcessingOutcome,
};
pub use errors::{
    ConnectionError, ConsumerError, ProcessingFailure, PublishError, TransportError,
};
pub use notifier_models::QueueName;
pub use publisher::Publisher;
pub use retry::RetryPolicy;
pub use types::{
    AckDecision, ConnectionState, Delivery, DeliveryStream, Endpoint, PublishProperties,
    CONTENT_TYPE_JSON,
};

use async_trait::async_trait;
use std::sync::Arc;

/// Opens channels against a queue service.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish transport, authenticate and open one channel.
    async fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn BrokerChannel>, TransportError>;
}

/// A live channel to the queue service.
#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    /// Declare a durable queue. Declaring an existing queue is a no-op.
    async fn declare_queue(&self, queue: QueueName) -> Result<(), TransportError>;

    /// Limit unacknowledged deliveries outstanding on this channel.
    async fn set_prefetch(&self, count: u16) -> Result<(), TransportError>;

    async fn publish(
        &self,
        queue: QueueName,
        body: Vec<u8>,
        properties: PublishProperties,
    ) -> Result<(), TransportError>;

    /// Start consuming with manual acknowledgement.
    async fn consume(
        &self,
        queue: QueueName,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, TransportError>;

    async fn ack(&self, tag: u64) -> Result<(), TransportError>;

    async fn reject(&self, tag: u64, requeue: bool) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    /// Release the channel and its transport. Closing twice is not an error.
    async fn close(&self) -> Result<(), TransportError>;
}
