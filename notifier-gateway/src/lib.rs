pub mod ingress;
pub mod models;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use log::info;
use notifier_broker::Publisher;
use notifier_models::{
    core::{AdminNotification, EmailNotification, Order},
    web::{AcceptedResponse, HealthStatus, OrderAcceptedResponse, ServiceStatus},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::models::ApiError;

pub const SERVICE_NAME: &str = "Notification System API Gateway";

/// Shared handler state. The publisher is created at startup and closed by
/// the owner after the server stops.
#[derive(Clone)]
pub struct AppState {
    publisher: Publisher,
}

impl AppState {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }
}

type Accepted<T> = Result<(StatusCode, Json<T>), ApiError>;

async fn root(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        status: "online".into(),
        service: SERVICE_NAME.into(),
        rabbitmq_connected: state.publisher.connection().is_connected(),
        timestamp: Utc::now(),
    })
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let connected = state.publisher.connection().is_connected();
    let status = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthStatus {
            api: "healthy".into(),
            rabbitmq: if connected { "connected" } else { "disconnected" }.into(),
            timestamp: Utc::now(),
        }),
    )
}

async fn notify_email(
    State(state): State<AppState>,
    payload: Result<Json<EmailNotification>, JsonRejection>,
) -> Accepted<AcceptedResponse> {
    let Json(payload) = payload?;
    let envelope = ingress::submit(&state.publisher, payload).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted".into(),
            message: "Email enqueued for processing".into(),
            queue: envelope.queue(),
            message_id: envelope.message_id,
        }),
    ))
}

async fn notify_admin(
    State(state): State<AppState>,
    payload: Result<Json<AdminNotification>, JsonRejection>,
) -> Accepted<AcceptedResponse> {
    let Json(payload) = payload?;
    let envelope = ingress::submit(&state.publisher, payload).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted".into(),
            message: "Admin notification enqueued".into(),
            queue: envelope.queue(),
            message_id: envelope.message_id,
        }),
    ))
}

async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<Order>, JsonRejection>,
) -> Accepted<OrderAcceptedResponse> {
    let Json(payload) = payload?;
    let envelope = ingress::submit(&state.publisher, payload).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(OrderAcceptedResponse {
            status: "accepted".into(),
            message: "Pedido enqueued for processing".into(),
            queue: envelope.queue(),
            pedido_id: envelope.payload.order_id,
            valor_total: envelope.payload.total,
        }),
    ))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/notify/email", post(notify_email))
        .route("/notify/admin", post(notify_admin))
        .route("/pedidos", post(create_order))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` fires, letting in-flight requests finish.
pub async fn run_webserver(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Shutting down web server...");
        })
        .await
}
