use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::QueueName;

/// Body of `GET /`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    pub service: String,
    pub rabbitmq_connected: bool,
    pub timestamp: DateTime<Utc>,
}

/// Body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub api: String,
    pub rabbitmq: String,
    pub timestamp: DateTime<Utc>,
}

/// 202 body for notification endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub status: String,
    pub message: String,
    pub queue: QueueName,
    pub message_id: String,
}

/// 202 body for `POST /pedidos`.
#[derive(Debug, Serialize, Deserialize)]
pub struct OrderAcceptedResponse {
    pub status: String,
    pub message: String,
    pub queue: QueueName,
    pub pedido_id: String,
    pub valor_total: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub detail: String,
}
