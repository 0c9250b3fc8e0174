use std::{path::PathBuf, time::Duration};

use clap::Args;
use notifier_broker::{Endpoint, RetryPolicy};

/// Broker endpoint, credentials and reconnect tuning shared by every process.
#[derive(Args, Debug, Clone)]
pub struct BrokerArgs {
    /// Broker host name
    #[arg(long = "rabbitmq-host", env = "RABBITMQ_HOST", default_value = "rabbitmq")]
    pub host: String,

    /// Broker AMQP port
    #[arg(long = "rabbitmq-port", env = "RABBITMQ_PORT", default_value_t = 5672)]
    pub port: u16,

    #[arg(long = "rabbitmq-user", env = "RABBITMQ_USER", default_value = "admin")]
    pub username: String,

    #[arg(
        long = "rabbitmq-password",
        env = "RABBITMQ_PASSWORD",
        default_value = "admin123",
        hide_env_values = true,
        hide_default_value = true
    )]
    pub password: String,

    #[arg(long = "rabbitmq-vhost", env = "RABBITMQ_VHOST", default_value = "/")]
    pub vhost: String,

    /// Heartbeat interval negotiated with the broker, in seconds
    #[arg(long = "rabbitmq-heartbeat", env = "RABBITMQ_HEARTBEAT", default_value_t = 600)]
    pub heartbeat_seconds: u64,

    /// Seconds one connect attempt may take before it counts as failed
    #[arg(long, env = "BROKER_CONNECT_TIMEOUT_SECONDS", default_value_t = 10)]
    pub connect_timeout_seconds: u64,

    /// Connection attempts before a publish gives up
    #[arg(long, env = "BROKER_CONNECT_ATTEMPTS", default_value_t = 5)]
    pub connect_attempts: u32,

    /// Seconds between connection attempts
    #[arg(long, env = "BROKER_RETRY_DELAY_SECONDS", default_value_t = 5)]
    pub retry_delay_seconds: u64,

    /// Upper bound for the doubled retry delay; equal to the delay for a fixed backoff
    #[arg(long, env = "BROKER_MAX_RETRY_DELAY_SECONDS", default_value_t = 5)]
    pub max_retry_delay_seconds: u64,
}

impl BrokerArgs {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            vhost: self.vhost.clone(),
            heartbeat: Duration::from_secs(self.heartbeat_seconds),
            connect_timeout: Duration::from_secs(self.connect_timeout_seconds.max(1)),
        }
    }

    /// Policy for request paths that must answer in bounded time.
    pub fn bounded_retry(&self) -> RetryPolicy {
        RetryPolicy::bounded(self.connect_attempts, self.retry_delay())
            .with_max_delay(self.max_retry_delay())
    }

    /// Policy for workers that wait for the broker indefinitely.
    pub fn unbounded_retry(&self) -> RetryPolicy {
        RetryPolicy::unbounded(self.retry_delay()).with_max_delay(self.max_retry_delay())
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_seconds)
    }
}

#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long = "log-level", env = "NOTIFIER_LOG", default_value = "info")]
    pub level: log::LevelFilter,

    /// Also append log lines to this file
    #[arg(long = "log-file", env = "NOTIFIER_LOG_FILE")]
    pub file: Option<PathBuf>,
}
