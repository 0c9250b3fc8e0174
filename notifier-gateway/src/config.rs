use clap::Parser;
use notifier_config::{BrokerArgs, LogArgs};

#[derive(Debug, Parser)]
#[command(author, version, about = "HTTP gateway that queues notification requests", long_about = None)]
pub(crate) struct CliArgs {
    /// Address to bind the HTTP listener to
    #[arg(long, env = "GATEWAY_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// HTTP port
    #[arg(long, env = "GATEWAY_PORT", default_value_t = 8000)]
    pub port: u16,

    #[command(flatten)]
    pub broker: BrokerArgs,

    #[command(flatten)]
    pub log: LogArgs,
}
