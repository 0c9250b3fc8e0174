use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use notifier_broker::{MessageHandler, ProcessingFailure, ProcessingOutcome};
use notifier_models::{
    core::{AdminNotification, EmailNotification, Order, Severity},
    MessageEnvelope, Payload,
};

/// Simulates sending an email notification.
pub struct EmailSender {
    latency: Duration,
}

impl EmailSender {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl MessageHandler for EmailSender {
    type Message = MessageEnvelope<EmailNotification>;

    async fn process(&self, message: Self::Message) -> ProcessingOutcome {
        let email = &message.payload;
        info!("Sending email {} to {}", message.message_id, email.to);
        info!("  subject: {}", email.subject);
        info!("  priority: {}", email.priority);
        if let Some(template) = &email.template {
            info!("  template: {}", template);
        }

        email
            .validate()
            .map_err(|err| ProcessingFailure::new(err.to_string()))?;

        tokio::time::sleep(self.latency).await;
        info!("Email {} sent", message.message_id);
        Ok(())
    }
}

/// Records administrative events in the log at their own severity.
pub struct AdminAuditLog {
    latency: Duration,
}

impl AdminAuditLog {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl MessageHandler for AdminAuditLog {
    type Message = MessageEnvelope<AdminNotification>;

    async fn process(&self, message: Self::Message) -> ProcessingOutcome {
        let event = &message.payload;
        let line = format!(
            "[{}] {} by {}: {}",
            event.action.to_uppercase(),
            message.message_id,
            event.user,
            event.details
        );
        match event.severity {
            Severity::Error | Severity::Critical => error!("{}", line),
            Severity::Warning => warn!("{}", line),
            Severity::Info => info!("{}", line),
        }

        tokio::time::sleep(self.latency / 2).await;
        Ok(())
    }
}

/// Walks an order through picking, labelling and inventory before issuing a receipt.
pub struct OrderFulfillment {
    latency: Duration,
}

impl OrderFulfillment {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    async fn step(&self, order: &Order, name: &str, latency: Duration) {
        info!("Order {}: {}", order.order_id, name);
        tokio::time::sleep(latency).await;
    }
}

#[async_trait]
impl MessageHandler for OrderFulfillment {
    type Message = MessageEnvelope<Order>;

    async fn process(&self, message: Self::Message) -> ProcessingOutcome {
        let order = &message.payload;
        info!(
            "Processing order {} for {}: {} item(s), total {:.2}",
            order.order_id,
            order.customer,
            order.items.len(),
            order.total
        );

        if order.items.is_empty() {
            return Err(ProcessingFailure::new(format!(
                "order {} has no items",
                order.order_id
            )));
        }
        if order.total < 0.0 {
            return Err(ProcessingFailure::new(format!(
                "order {} has a negative total",
                order.order_id
            )));
        }

        self.step(order, "picking items", self.latency).await;
        self.step(order, "printing shipping label", self.latency / 2)
            .await;
        self.step(order, "updating inventory", self.latency / 2).await;

        let receipt = order.receipt(Utc::now());
        info!(
            "Order {} {} with receipt {}",
            receipt.order_id, receipt.status, receipt.receipt_id
        );
        Ok(())
    }
}
