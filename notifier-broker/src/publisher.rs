use std::sync::Arc;

use log::{error, info, warn};
use notifier_models::{MessageEnvelope, Payload};

use crate::{BrokerConnection, PublishError, PublishProperties, QueueName};

/// Sends envelopes to durable queues over a shared [`BrokerConnection`].
///
/// Safe to clone and use from concurrent request handlers; reconnects are
/// serialized by the connection.
#[derive(Clone)]
pub struct Publisher {
    connection: Arc<BrokerConnection>,
}

impl Publisher {
    pub fn new(connection: Arc<BrokerConnection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<BrokerConnection> {
        &self.connection
    }

    /// Publish `envelope` as a persistent JSON message.
    ///
    /// A failed send drops the channel and is retried once on a fresh
    /// connection. Failing to obtain a connection at all is not retried here:
    /// the connect itself already went through its bounded attempts.
    pub async fn publish<P: Payload>(
        &self,
        queue: QueueName,
        envelope: &MessageEnvelope<P>,
    ) -> Result<(), PublishError> {
        let body = envelope.to_json()?;
        self.publish_bytes(queue, &envelope.message_id, body).await
    }

    pub async fn publish_bytes(
        &self,
        queue: QueueName,
        message_id: &str,
        body: Vec<u8>,
    ) -> Result<(), PublishError> {
        let mut last_error = None;

        for attempt in 1..=2u32 {
            let channel = self.connection.channel().await.map_err(|err| {
                error!("Cannot publish {} to '{}': {}", message_id, queue, err);
                PublishError::Unavailable(err.to_string())
            })?;

            match channel
                .publish(queue, body.clone(), PublishProperties::persistent_json())
                .await
            {
                Ok(()) => {
                    info!("Published {} to '{}'", message_id, queue);
                    return Ok(());
                }
                Err(err) => {
                    if attempt == 1 {
                        warn!(
                            "Publishing {} to '{}' failed, reconnecting: {}",
                            message_id, queue, err
                        );
                    }
                    self.connection.invalidate(&channel).await;
                    last_error = Some(err);
                }
            }
        }

        let reason = last_error.map(|err| err.to_string()).unwrap_or_default();
        error!(
            "Giving up on publishing {} to '{}' after retry: {}",
            message_id, queue, reason
        );
        Err(PublishError::Unavailable(reason))
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }
}
