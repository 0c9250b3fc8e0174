use thiserror::Error;

/// Failure reported by a transport implementation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    Connect(String),
    #[error("queue declaration failed for {queue}: {reason}")]
    Declare { queue: String, reason: String },
    #[error("channel error: {0}")]
    Channel(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("consume failed: {0}")]
    Consume(String),
    #[error("acknowledgement failed for delivery {tag}: {reason}")]
    Acknowledge { tag: u64, reason: String },
    #[error("channel is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("broker unreachable after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: TransportError,
    },
    #[error("connection attempt cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("failed to serialize envelope: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("consumer for {queue} stopped: {source}")]
    Connection {
        queue: String,
        #[source]
        source: ConnectionError,
    },
}

/// Business-logic failure returned by a processing function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProcessingFailure(pub String);

impl ProcessingFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
