use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Durable queues known to the notification system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueueName {
    #[serde(rename = "queue_email")]
    Email,
    #[serde(rename = "queue_admin")]
    Admin,
    #[serde(rename = "queue_pedidos")]
    Orders,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::Email, QueueName::Admin, QueueName::Orders];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Email => "queue_email",
            QueueName::Admin => "queue_admin",
            QueueName::Orders => "queue_pedidos",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown queue '{0}'")]
pub struct UnknownQueue(pub String);

impl FromStr for QueueName {
    type Err = UnknownQueue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|queue| queue.as_str() == value)
            .ok_or_else(|| UnknownQueue(value.to_string()))
    }
}
