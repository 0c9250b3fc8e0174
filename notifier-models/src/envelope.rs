use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{errors::ValidationError, QueueName};

/// Type tag carried in the `type` field of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Email,
    Admin,
    #[serde(rename = "pedido", alias = "order")]
    Order,
}

impl MessageKind {
    pub fn queue(&self) -> QueueName {
        match self {
            MessageKind::Email => QueueName::Email,
            MessageKind::Admin => QueueName::Admin,
            MessageKind::Order => QueueName::Orders,
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            MessageKind::Email => "email",
            MessageKind::Admin => "admin",
            MessageKind::Order => "pedido",
        }
    }
}

/// Type-specific body of an envelope.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: MessageKind;

    /// Suffix appended to the kind prefix to form the envelope id.
    fn id_suffix(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Unit moved through the queues. Payload fields are flattened next to the
/// envelope metadata on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope<P> {
    #[serde(flatten)]
    pub payload: P,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    pub message_id: String,
}

impl<P: Payload> MessageEnvelope<P> {
    pub fn new(payload: P) -> Self {
        let message_id = format!("{}_{}", P::KIND.id_prefix(), payload.id_suffix());
        Self {
            payload,
            kind: P::KIND,
            timestamp: Utc::now(),
            message_id,
        }
    }

    pub fn queue(&self) -> QueueName {
        self.kind.queue()
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}
