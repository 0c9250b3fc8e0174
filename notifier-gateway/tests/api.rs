use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use notifier_broker::{
    in_memory::InMemoryBroker, BrokerConnection, Consumer, ConsumerConfig, Endpoint,
    FailurePolicy, MessageHandler, ProcessingOutcome, Publisher, QueueName, RetryPolicy,
};
use notifier_gateway::{router, AppState};
use notifier_models::{core::EmailNotification, MessageEnvelope};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn app(broker: &InMemoryBroker) -> (Router, Publisher) {
    let connection = BrokerConnection::new(
        Arc::new(broker.clone()),
        Endpoint::default(),
        RetryPolicy::bounded(2, Duration::from_millis(5)),
        QueueName::ALL,
    );
    let publisher = Publisher::new(Arc::new(connection));
    (router(AppState::new(publisher.clone())), publisher)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, value)
}

fn queued(broker: &InMemoryBroker, queue: QueueName) -> Vec<Value> {
    broker
        .peek(queue)
        .iter()
        .map(|body| serde_json::from_slice(body).unwrap())
        .collect()
}

#[tokio::test]
async fn email_is_accepted_and_queued_as_flat_envelope() {
    let broker = InMemoryBroker::new();
    let (app, _) = app(&broker);

    let (status, body) = send(
        &app,
        "POST",
        "/notify/email",
        Some(json!({"to": "a@b.com", "subject": "hi", "body": "x"})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["queue"], "queue_email");
    let message_id = body["message_id"].as_str().unwrap();
    assert!(message_id.starts_with("email_"));

    let messages = queued(&broker, QueueName::Email);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["message_id"], message_id);
    assert_eq!(messages[0]["type"], "email");
    assert_eq!(messages[0]["to"], "a@b.com");
    assert_eq!(messages[0]["priority"], "normal");
    assert!(messages[0]["timestamp"].is_string());
}

#[tokio::test]
async fn admin_notification_goes_to_admin_queue() {
    let broker = InMemoryBroker::new();
    let (app, _) = app(&broker);

    let (status, body) = send(
        &app,
        "POST",
        "/notify/admin",
        Some(json!({"action": "login", "user": "root", "details": "ssh", "severity": "warning"})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["message"], "Admin notification enqueued");
    assert!(body["message_id"].as_str().unwrap().starts_with("admin_"));
    let messages = queued(&broker, QueueName::Admin);
    assert_eq!(messages[0]["severity"], "warning");
    assert_eq!(messages[0]["type"], "admin");
}

#[tokio::test]
async fn order_response_echoes_id_and_total() {
    let broker = InMemoryBroker::new();
    let (app, _) = app(&broker);

    let (status, body) = send(
        &app,
        "POST",
        "/pedidos",
        Some(json!({"pedido_id": "P-1", "cliente": "Ana", "itens": ["livro", "caneta"], "valor_total": 59.9})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["pedido_id"], "P-1");
    assert_eq!(body["valor_total"], 59.9);
    assert_eq!(body["queue"], "queue_pedidos");

    let messages = queued(&broker, QueueName::Orders);
    assert_eq!(messages[0]["message_id"], "pedido_P-1");
    assert_eq!(messages[0]["type"], "pedido");
    assert_eq!(messages[0]["status"], "pendente");
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_queueing() {
    let broker = InMemoryBroker::new();
    let (app, _) = app(&broker);

    let (status, body) = send(
        &app,
        "POST",
        "/notify/email",
        Some(json!({"to": "not-an-address", "subject": "hi", "body": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("to"));

    let (status, body) = send(&app, "POST", "/notify/admin", Some(json!({"action": "x"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].is_string());

    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn unavailable_broker_yields_503() {
    let broker = InMemoryBroker::new();
    broker.set_available(false);
    let (app, _) = app(&broker);

    let (status, body) = send(
        &app,
        "POST",
        "/notify/email",
        Some(json!({"to": "a@b.com", "subject": "hi", "body": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["detail"], "Failed to publish message to queue");

    let (status, body) = send(
        &app,
        "POST",
        "/pedidos",
        Some(json!({"pedido_id": "9", "cliente": "B", "itens": [], "valor_total": 1.0})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["detail"], "Failed to publish pedido to queue");
}

#[tokio::test]
async fn health_follows_connection_state() {
    let broker = InMemoryBroker::new();
    let (app, publisher) = app(&broker);

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["rabbitmq"], "disconnected");

    publisher.connection().connect().await.unwrap();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["api"], "healthy");
    assert_eq!(body["rabbitmq"], "connected");

    let (status, body) = send(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "online");
    assert_eq!(body["rabbitmq_connected"], true);

    broker.sever_connections();
    let (status, _) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

struct AlwaysSend;

#[async_trait]
impl MessageHandler for AlwaysSend {
    type Message = MessageEnvelope<EmailNotification>;

    async fn process(&self, _message: Self::Message) -> ProcessingOutcome {
        Ok(())
    }
}

#[tokio::test]
async fn email_flows_from_http_to_acknowledgement() {
    let broker = InMemoryBroker::new();
    let (app, _) = app(&broker);

    let (status, body) = send(
        &app,
        "POST",
        "/notify/email",
        Some(json!({"to": "a@b.com", "subject": "hi", "body": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let message_id = body["message_id"].as_str().unwrap().to_string();

    let cancel = CancellationToken::new();
    let connection = BrokerConnection::new(
        Arc::new(broker.clone()),
        Endpoint::default(),
        RetryPolicy::unbounded(Duration::from_millis(5)),
        [QueueName::Email],
    )
    .with_cancellation(&cancel);
    let consumer = Consumer::new(
        Arc::new(connection),
        AlwaysSend,
        ConsumerConfig::new(QueueName::Email, FailurePolicy::DiscardOnFailure),
    );
    let task = tokio::spawn(consumer.run(cancel.clone()));

    tokio::time::timeout(Duration::from_secs(2), async {
        while broker.acked_ids().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(broker.acked_ids(), vec![message_id]);
    assert_eq!(broker.ready_count(QueueName::Email), 0);
    assert_eq!(broker.unacked_count(), 0);

    cancel.cancel();
    task.await.unwrap().unwrap();
}
