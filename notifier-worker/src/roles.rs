use clap::ValueEnum;
use notifier_broker::{ConsumerConfig, FailurePolicy, QueueName};

/// The three consumer roles. They differ only in queue, processing and failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    Email,
    Admin,
    Orders,
}

impl Role {
    pub fn queue(&self) -> QueueName {
        match self {
            Role::Email => QueueName::Email,
            Role::Admin => QueueName::Admin,
            Role::Orders => QueueName::Orders,
        }
    }

    /// One-shot notifications are never retried; order fulfillment is.
    pub fn failure_policy(&self) -> FailurePolicy {
        match self {
            Role::Email | Role::Admin => FailurePolicy::DiscardOnFailure,
            Role::Orders => FailurePolicy::RequeueOnFailure,
        }
    }

    pub fn consumer_config(&self, max_deliveries: Option<u32>, prefetch: u16) -> ConsumerConfig {
        ConsumerConfig::new(self.queue(), self.failure_policy())
            .with_max_deliveries(max_deliveries)
            .with_prefetch(prefetch)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Email => "Email Consumer",
            Role::Admin => "Admin Consumer",
            Role::Orders => "Pedidos Consumer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_orders_requeue() {
        assert_eq!(Role::Email.failure_policy(), FailurePolicy::DiscardOnFailure);
        assert_eq!(Role::Admin.failure_policy(), FailurePolicy::DiscardOnFailure);
        assert_eq!(Role::Orders.failure_policy(), FailurePolicy::RequeueOnFailure);
    }

    #[test]
    fn config_carries_queue_and_cap() {
        let config = Role::Orders.consumer_config(Some(4), 1);
        assert_eq!(config.queue, QueueName::Orders);
        assert_eq!(config.max_deliveries, Some(4));
        assert_eq!(config.prefetch, 1);
    }
}
