use log::error;
use notifier_broker::{PublishError, Publisher};
use notifier_models::{MessageEnvelope, MessageKind, Payload};

use crate::models::ApiError;

/// Validate `payload`, wrap it in an envelope and queue it on the queue of its kind.
///
/// `Ok` means the broker accepted the message; any error means it was not queued.
pub async fn submit<P: Payload>(
    publisher: &Publisher,
    payload: P,
) -> Result<MessageEnvelope<P>, ApiError> {
    payload.validate()?;

    let envelope = MessageEnvelope::new(payload);
    match publisher.publish(envelope.queue(), &envelope).await {
        Ok(()) => Ok(envelope),
        Err(PublishError::Unavailable(reason)) => {
            error!(
                "Could not queue {} on '{}': {}",
                envelope.message_id,
                envelope.queue(),
                reason
            );
            Err(ApiError::Unavailable(unavailable_detail(P::KIND)))
        }
        Err(err) => Err(ApiError::Internal(err.to_string())),
    }
}

fn unavailable_detail(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Order => "Failed to publish pedido to queue",
        MessageKind::Email | MessageKind::Admin => "Failed to publish message to queue",
    }
}
