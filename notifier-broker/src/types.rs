use std::{fmt, time::Duration};

use futures_util::stream::BoxStream;

use crate::TransportError;

/// Where and as whom to connect.
#[derive(Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
    pub heartbeat: Duration,
    /// Limit for one connect attempt, including queue declaration.
    pub connect_timeout: Duration,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "rabbitmq".into(),
            port: 5672,
            username: "admin".into(),
            password: "admin123".into(),
            vhost: "/".into(),
            heartbeat: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

// Keeps the password out of logs.
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("vhost", &self.vhost)
            .field("heartbeat", &self.heartbeat)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

pub const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishProperties {
    /// Survives a broker restart (AMQP delivery mode 2).
    pub persistent: bool,
    pub content_type: String,
}

impl PublishProperties {
    pub fn persistent_json() -> Self {
        Self {
            persistent: true,
            content_type: CONTENT_TYPE_JSON.into(),
        }
    }
}

/// A message handed to a consumer, pending acknowledgement.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
    pub redelivered: bool,
    /// Previous deliveries as reported by the broker, when it tracks them.
    pub delivery_count: Option<u32>,
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery, TransportError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What a consumer tells the broker about one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    RejectDiscard,
    RejectRequeue,
}
