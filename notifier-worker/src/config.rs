use std::time::Duration;

use clap::Parser;
use notifier_config::{BrokerArgs, LogArgs};

use crate::roles::Role;

#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub max_deliveries: Option<u32>,
    pub prefetch: u16,
    pub step_latency: Duration,
    pub broker: BrokerArgs,
    pub log: LogArgs,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drains one notification queue", long_about = None)]
struct CliArgs {
    /// Which queue this worker drains
    #[arg(long, env = "WORKER_ROLE", value_enum)]
    role: Role,

    /// Deliveries before a requeued message is dropped; 0 never gives up
    #[arg(long, env = "WORKER_MAX_DELIVERIES", default_value_t = 5)]
    max_deliveries: u32,

    /// Unacknowledged messages allowed in flight
    #[arg(long, env = "WORKER_PREFETCH", default_value_t = 1)]
    prefetch: u16,

    /// Simulated duration of one processing step, in milliseconds
    #[arg(long, env = "WORKER_SIMULATED_LATENCY_MS", default_value_t = 1000)]
    simulated_latency_ms: u64,

    #[command(flatten)]
    broker: BrokerArgs,

    #[command(flatten)]
    log: LogArgs,
}

pub fn parse_config() -> Config {
    from_args(CliArgs::parse())
}

fn from_args(args: CliArgs) -> Config {
    Config {
        role: args.role,
        max_deliveries: Some(args.max_deliveries).filter(|max| *max > 0),
        prefetch: args.prefetch.max(1),
        step_latency: Duration::from_millis(args.simulated_latency_ms),
        broker: args.broker,
        log: args.log,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_max_deliveries_disables_the_cap() {
        let config = from_args(
            CliArgs::try_parse_from(["worker", "--role", "orders", "--max-deliveries", "0"])
                .unwrap(),
        );
        assert_eq!(config.role, Role::Orders);
        assert_eq!(config.max_deliveries, None);
        assert_eq!(config.prefetch, 1);
    }
}
