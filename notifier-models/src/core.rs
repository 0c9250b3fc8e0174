use serde::{Deserialize, Serialize};

use crate::{envelope::Payload, errors::ValidationError, MessageKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailNotification {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminNotification {
    pub action: String,
    pub user: String,
    pub details: String,
    #[serde(default)]
    pub severity: Severity,
}

/// Order ("pedido") submitted for fulfillment. Field names follow the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "pedido_id")]
    pub order_id: String,
    #[serde(rename = "cliente")]
    pub customer: String,
    #[serde(rename = "itens")]
    pub items: Vec<String>,
    #[serde(rename = "valor_total")]
    pub total: f64,
    #[serde(default = "default_order_status")]
    pub status: String,
}

/// Proof of fulfillment derived from a processed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(rename = "pedido_id")]
    pub order_id: String,
    #[serde(rename = "cliente")]
    pub customer: String,
    #[serde(rename = "itens")]
    pub items: Vec<String>,
    #[serde(rename = "valor_total")]
    pub total: f64,
    pub status: String,
    #[serde(rename = "data_processamento")]
    pub processed_at: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "recibo_id")]
    pub receipt_id: String,
}

fn default_priority() -> String {
    "normal".into()
}

fn default_order_status() -> String {
    "pendente".into()
}

impl Payload for EmailNotification {
    const KIND: MessageKind = MessageKind::Email;

    fn validate(&self) -> Result<(), ValidationError> {
        if is_email_address(&self.to) {
            Ok(())
        } else {
            Err(ValidationError::new("to", "value is not a valid email address"))
        }
    }
}

impl Payload for AdminNotification {
    const KIND: MessageKind = MessageKind::Admin;
}

impl Payload for Order {
    const KIND: MessageKind = MessageKind::Order;

    fn id_suffix(&self) -> String {
        self.order_id.clone()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.order_id.trim().is_empty() {
            return Err(ValidationError::new("pedido_id", "must not be empty"));
        }
        if !self.total.is_finite() {
            return Err(ValidationError::new("valor_total", "must be a finite number"));
        }
        Ok(())
    }
}

impl Order {
    pub fn receipt(&self, processed_at: chrono::DateTime<chrono::Utc>) -> Receipt {
        Receipt {
            order_id: self.order_id.clone(),
            customer: self.customer.clone(),
            items: self.items.clone(),
            total: self.total,
            status: "processado".into(),
            processed_at,
            receipt_id: format!("REC-{}-{}", self.order_id, processed_at.timestamp()),
        }
    }
}

fn is_email_address(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageEnvelope;

    #[test]
    fn email_envelope_is_flat_on_the_wire() {
        let envelope = MessageEnvelope::new(EmailNotification {
            to: "a@b.com".into(),
            subject: "hi".into(),
            body: "x".into(),
            template: None,
            priority: default_priority(),
        });

        let value: serde_json::Value = serde_json::from_slice(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "email");
        assert_eq!(value["to"], "a@b.com");
        assert_eq!(value["priority"], "normal");
        assert!(value["template"].is_null());
        assert!(value["message_id"].as_str().unwrap().starts_with("email_"));
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn order_defaults_and_id() {
        let order: Order = serde_json::from_str(
            r#"{"pedido_id":"42","cliente":"Ana","itens":["livro"],"valor_total":10.5}"#,
        )
        .unwrap();
        assert_eq!(order.status, "pendente");

        let envelope = MessageEnvelope::new(order);
        assert_eq!(envelope.message_id, "pedido_42");
        let value: serde_json::Value = serde_json::from_slice(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "pedido");
        assert_eq!(value["valor_total"], 10.5);
    }

    #[test]
    fn order_kind_accepts_english_alias() {
        let raw = r#"{"pedido_id":"7","cliente":"Bo","itens":[],"valor_total":1.0,
            "type":"order","timestamp":"2024-01-01T00:00:00Z","message_id":"pedido_7"}"#;
        let envelope = MessageEnvelope::<Order>::from_json(raw.as_bytes()).unwrap();
        assert_eq!(envelope.kind, MessageKind::Order);
    }

    #[test]
    fn admin_severity_defaults_to_info() {
        let admin: AdminNotification =
            serde_json::from_str(r#"{"action":"login","user":"root","details":"ok"}"#).unwrap();
        assert_eq!(admin.severity, Severity::Info);
    }

    #[test]
    fn email_validation() {
        assert!(is_email_address("a@b.com"));
        assert!(!is_email_address("a@b"));
        assert!(!is_email_address("@b.com"));
        assert!(!is_email_address("a b@c.com"));
        assert!(!is_email_address("a@@b.com"));
        assert!(!is_email_address("a@b..com"));
    }

    #[test]
    fn receipt_id_uses_order_and_time() {
        let order = Order {
            order_id: "9".into(),
            customer: "C".into(),
            items: vec!["x".into()],
            total: 3.0,
            status: default_order_status(),
        };
        let at = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let receipt = order.receipt(at);
        assert_eq!(receipt.receipt_id, "REC-9-1700000000");
        assert_eq!(receipt.status, "processado");
    }
}
