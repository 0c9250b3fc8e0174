mod config;
mod processors;
mod roles;

use std::sync::Arc;

use config::{parse_config, Config};
use log::{error, info};
use notifier_broker::{
    adapters::rabbitmq::RabbitMqConnector, BrokerConnection, Consumer, MessageHandler,
};
use notifier_models::errors::{RuntimeError, SendableError};
use notifier_utilities::startup;
use processors::{AdminAuditLog, EmailSender, OrderFulfillment};
use roles::Role;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), SendableError> {
    let config = parse_config();
    startup::startup(
        config.role.display_name(),
        config.log.level,
        config.log.file.as_deref(),
    )?;
    info!(
        "Consuming {} with max deliveries {:?}",
        config.role.queue(),
        config.max_deliveries
    );

    let shutdown = CancellationToken::new();
    let shutdown_listener = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", err);
            return;
        }
        info!("Shutdown signal received, finishing current message...");
        shutdown_listener.cancel();
    });

    let connection = Arc::new(
        BrokerConnection::new(
            Arc::new(RabbitMqConnector::new()),
            config.broker.endpoint(),
            config.broker.unbounded_retry(),
            [config.role.queue()],
        )
        .with_cancellation(&shutdown),
    );

    let latency = config.step_latency;
    match config.role {
        Role::Email => consume(connection, EmailSender::new(latency), &config, shutdown).await,
        Role::Admin => consume(connection, AdminAuditLog::new(latency), &config, shutdown).await,
        Role::Orders => {
            consume(connection, OrderFulfillment::new(latency), &config, shutdown).await
        }
    }
}

async fn consume<H: MessageHandler>(
    connection: Arc<BrokerConnection>,
    handler: H,
    config: &Config,
    shutdown: CancellationToken,
) -> Result<(), SendableError> {
    let consumer_config = config
        .role
        .consumer_config(config.max_deliveries, config.prefetch);
    Consumer::new(connection, handler, consumer_config)
        .run(shutdown)
        .await
        .map_err(|err| RuntimeError::boxed("worker.broker.consume", err))?;
    info!("{} stopped", config.role.display_name());
    Ok(())
}
