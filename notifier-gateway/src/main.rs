mod config;

use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use notifier_broker::{adapters::rabbitmq::RabbitMqConnector, BrokerConnection, Publisher, QueueName};
use notifier_gateway::{run_webserver, AppState};
use notifier_models::errors::{RuntimeError, SendableError};
use notifier_utilities::startup;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::CliArgs;

#[tokio::main]
async fn main() -> Result<(), SendableError> {
    let args = CliArgs::parse();
    startup::startup(
        "Notification System API Gateway",
        args.log.level,
        args.log.file.as_deref(),
    )?;

    let shutdown = CancellationToken::new();
    let shutdown_listener = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", err);
            return;
        }
        info!("Shutdown signal received, stopping gateway...");
        shutdown_listener.cancel();
    });

    let connection = BrokerConnection::new(
        Arc::new(RabbitMqConnector::new()),
        args.broker.endpoint(),
        args.broker.bounded_retry(),
        QueueName::ALL,
    )
    .with_cancellation(&shutdown);
    let publisher = Publisher::new(Arc::new(connection));

    match publisher.connection().connect().await {
        Ok(()) => info!("Gateway ready to accept notifications"),
        Err(err) => error!(
            "Broker unavailable at startup, publishes will retry: {}",
            err
        ),
    }

    let listener = TcpListener::bind((args.bind.as_str(), args.port))
        .await
        .map_err(|err| RuntimeError::boxed("gateway.bind", err))?;
    info!("Gateway listening on {}:{}", args.bind, args.port);

    let served = run_webserver(listener, AppState::new(publisher.clone()), shutdown).await;
    publisher.close().await;
    served.map_err(|err| RuntimeError::boxed("gateway.serve", err))
}
