use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    num::NonZeroUsize,
    sync::Arc,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{error, info, warn};
use lru::LruCache;
use serde::{de::DeserializeOwned, Deserialize};
use tokio_util::sync::CancellationToken;

use crate::{
    AckDecision, BrokerChannel, BrokerConnection, ConnectionError, ConsumerError, Delivery,
    ProcessingFailure, QueueName, TransportError,
};

pub type ProcessingOutcome = Result<(), ProcessingFailure>;

/// The side effect a consumer performs for each message.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Message: DeserializeOwned + Send + 'static;

    async fn process(&self, message: Self::Message) -> ProcessingOutcome;
}

/// What happens to a message whose processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Remove it; one-shot side effects must not be repeated.
    DiscardOnFailure,
    /// Return it to the head of the queue for redelivery.
    RequeueOnFailure,
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: QueueName,
    pub failure_policy: FailurePolicy,
    pub prefetch: u16,
    /// Deliveries after which a requeued message is discarded instead. `None` never gives up.
    pub max_deliveries: Option<u32>,
    pub consumer_tag: String,
}

impl ConsumerConfig {
    pub fn new(queue: QueueName, failure_policy: FailurePolicy) -> Self {
        Self {
            queue,
            failure_policy,
            prefetch: 1,
            max_deliveries: None,
            consumer_tag: format!("{}-{}", queue, uuid::Uuid::new_v4().simple()),
        }
    }

    pub fn with_max_deliveries(mut self, max_deliveries: Option<u32>) -> Self {
        self.max_deliveries = max_deliveries.filter(|max| *max > 0);
        self
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }
}

/// Map a processing outcome to an acknowledgement. `delivery` is 1 for the
/// first delivery of a message.
pub fn decide(
    outcome: &ProcessingOutcome,
    policy: FailurePolicy,
    delivery: u32,
    max_deliveries: Option<u32>,
) -> AckDecision {
    match (outcome, policy) {
        (Ok(()), _) => AckDecision::Ack,
        (Err(_), FailurePolicy::DiscardOnFailure) => AckDecision::RejectDiscard,
        (Err(_), FailurePolicy::RequeueOnFailure) => match max_deliveries {
            Some(max) if delivery >= max => AckDecision::RejectDiscard,
            _ => AckDecision::RejectRequeue,
        },
    }
}

#[derive(Deserialize)]
struct MessageMeta {
    message_id: Option<String>,
}

/// Sequential consume loop over one queue: one message is fully handled and
/// acknowledged before the next is taken.
pub struct Consumer<H: MessageHandler> {
    connection: Arc<BrokerConnection>,
    handler: H,
    config: ConsumerConfig,
    deliveries: DeliveryCounter,
}

impl<H: MessageHandler> Consumer<H> {
    pub fn new(connection: Arc<BrokerConnection>, handler: H, config: ConsumerConfig) -> Self {
        Self {
            connection,
            handler,
            config,
            deliveries: DeliveryCounter::new(TRACKED_DELIVERIES),
        }
    }

    /// Consume until `cancel` fires, reconnecting whenever the transport drops.
    /// The connection is closed on the way out.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ConsumerError> {
        let result = self.consume_until(&cancel).await;
        self.connection.close().await;
        info!("Consumer for '{}' stopped", self.config.queue);
        result
    }

    async fn consume_until(&mut self, cancel: &CancellationToken) -> Result<(), ConsumerError> {
        let queue = self.config.queue;
        // Consecutive setups that ended without handling a delivery.
        let mut failures = 0u32;

        while !cancel.is_cancelled() {
            if failures > 0 && !self.pause(cancel, failures).await {
                return Ok(());
            }

            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                connected = self.connection.channel() => connected,
            };
            let channel = match connected {
                Ok(channel) => channel,
                Err(ConnectionError::Cancelled) => return Ok(()),
                Err(source) => {
                    return Err(ConsumerError::Connection {
                        queue: queue.to_string(),
                        source,
                    })
                }
            };

            if let Err(err) = channel.set_prefetch(self.config.prefetch).await {
                warn!("Setting prefetch on '{}' failed: {}", queue, err);
                self.connection.invalidate(&channel).await;
                failures += 1;
                continue;
            }

            let mut stream = match channel.consume(queue, &self.config.consumer_tag).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!("Starting consumer on '{}' failed: {}", queue, err);
                    self.connection.invalidate(&channel).await;
                    failures += 1;
                    continue;
                }
            };
            info!("Consumer '{}' waiting for messages on '{}'", self.config.consumer_tag, queue);

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("Shutdown requested; consumer on '{}' exiting", queue);
                        return Ok(());
                    }
                    next = stream.next() => next,
                };

                match next {
                    Some(Ok(delivery)) => {
                        failures = 0;
                        if let Err(err) = self.handle(&channel, delivery).await {
                            warn!("Lost channel while acknowledging on '{}': {}", queue, err);
                            self.connection.invalidate(&channel).await;
                            failures += 1;
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!("Delivery error on '{}', reconnecting: {}", queue, err);
                        self.connection.invalidate(&channel).await;
                        failures += 1;
                        break;
                    }
                    None => {
                        warn!("Delivery stream for '{}' ended, reconnecting", queue);
                        self.connection.invalidate(&channel).await;
                        failures += 1;
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Back off before setting up again. Returns `false` when cancelled meanwhile.
    async fn pause(&self, cancel: &CancellationToken, failures: u32) -> bool {
        let delay = self.connection.retry_policy().delay_after(failures);
        info!(
            "Restarting consumer on '{}' in {:?}",
            self.config.queue, delay
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Deserialize, process and acknowledge one delivery.
    pub async fn handle(
        &mut self,
        channel: &Arc<dyn BrokerChannel>,
        delivery: Delivery,
    ) -> Result<AckDecision, TransportError> {
        let queue = self.config.queue;
        let message_id = serde_json::from_slice::<MessageMeta>(&delivery.body)
            .ok()
            .and_then(|meta| meta.message_id);
        let key = message_id.clone().unwrap_or_else(|| body_hash(&delivery.body));
        let label = message_id.as_deref().unwrap_or("<no id>");

        let message = match serde_json::from_slice::<H::Message>(&delivery.body) {
            Ok(message) => message,
            Err(err) => {
                error!("Discarding malformed message {} on '{}': {}", label, queue, err);
                self.deliveries.forget(&key);
                channel.reject(delivery.tag, false).await?;
                return Ok(AckDecision::RejectDiscard);
            }
        };

        let delivery_number = self.deliveries.next(&key, &delivery);
        let outcome = self.handler.process(message).await;
        let decision = decide(
            &outcome,
            self.config.failure_policy,
            delivery_number,
            self.config.max_deliveries,
        );
        let reason = outcome.err().map(|failure| failure.0).unwrap_or_default();

        match decision {
            AckDecision::Ack => {
                channel.ack(delivery.tag).await?;
                self.deliveries.forget(&key);
                info!("Message {} on '{}' processed", label, queue);
            }
            AckDecision::RejectDiscard => {
                channel.reject(delivery.tag, false).await?;
                self.deliveries.forget(&key);
                if self.config.failure_policy == FailurePolicy::RequeueOnFailure {
                    error!(
                        "Message {} on '{}' failed on delivery {}; giving up: {}",
                        label, queue, delivery_number, reason
                    );
                } else {
                    error!("Message {} on '{}' failed and was discarded: {}", label, queue, reason);
                }
            }
            AckDecision::RejectRequeue => {
                channel.reject(delivery.tag, true).await?;
                warn!(
                    "Message {} on '{}' failed on delivery {}; requeued: {}",
                    label, queue, delivery_number, reason
                );
            }
        }

        Ok(decision)
    }
}

/// Upper bound on locally tracked delivery counts. The least recently seen
/// message is evicted first.
const TRACKED_DELIVERIES: usize = 4096;

/// Per-consumer delivery numbers for brokers that do not report them.
struct DeliveryCounter {
    counts: LruCache<String, u32>,
}

impl DeliveryCounter {
    fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            counts: LruCache::new(capacity),
        }
    }

    /// Delivery number of `delivery`, 1 for its first delivery.
    fn next(&mut self, key: &str, delivery: &Delivery) -> u32 {
        let number = match delivery.delivery_count {
            Some(previous) => previous.saturating_add(1),
            // A fresh delivery of a reused id starts over.
            None if delivery.redelivered => self
                .counts
                .get(key)
                .copied()
                .unwrap_or(0)
                .saturating_add(1),
            None => 1,
        };
        self.counts.put(key.to_string(), number);
        number
    }

    fn forget(&mut self, key: &str) {
        self.counts.pop(key);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.counts.len()
    }
}

fn body_hash(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> ProcessingOutcome {
        Err(ProcessingFailure::new("boom"))
    }

    #[test]
    fn success_is_always_acked() {
        for policy in [FailurePolicy::DiscardOnFailure, FailurePolicy::RequeueOnFailure] {
            assert_eq!(decide(&Ok(()), policy, 9, Some(1)), AckDecision::Ack);
        }
    }

    #[test]
    fn discard_policy_never_requeues() {
        assert_eq!(
            decide(&failed(), FailurePolicy::DiscardOnFailure, 1, None),
            AckDecision::RejectDiscard
        );
    }

    #[test]
    fn requeue_policy_respects_cap() {
        let policy = FailurePolicy::RequeueOnFailure;
        assert_eq!(decide(&failed(), policy, 1, Some(3)), AckDecision::RejectRequeue);
        assert_eq!(decide(&failed(), policy, 2, Some(3)), AckDecision::RejectRequeue);
        assert_eq!(decide(&failed(), policy, 3, Some(3)), AckDecision::RejectDiscard);
        assert_eq!(decide(&failed(), policy, 1000, None), AckDecision::RejectRequeue);
    }

    fn delivery(redelivered: bool) -> Delivery {
        Delivery {
            tag: 1,
            body: Vec::new(),
            redelivered,
            delivery_count: None,
        }
    }

    #[test]
    fn local_counter_follows_redeliveries() {
        let mut counter = DeliveryCounter::new(8);
        assert_eq!(counter.next("pedido_1", &delivery(false)), 1);
        assert_eq!(counter.next("pedido_1", &delivery(true)), 2);
        assert_eq!(counter.next("pedido_1", &delivery(true)), 3);
        assert_eq!(counter.next("pedido_1", &delivery(false)), 1);

        counter.forget("pedido_1");
        assert_eq!(counter.len(), 0);
    }

    #[test]
    fn local_counter_evicts_oldest_entries() {
        let mut counter = DeliveryCounter::new(2);
        counter.next("a", &delivery(false));
        counter.next("b", &delivery(false));
        counter.next("c", &delivery(false));

        assert_eq!(counter.len(), 2);
        // "a" was evicted, so its redelivery counts from scratch.
        assert_eq!(counter.next("a", &delivery(true)), 1);
        assert_eq!(counter.next("c", &delivery(true)), 2);
    }

    #[test]
    fn broker_count_wins_over_local_counter() {
        let mut counter = DeliveryCounter::new(2);
        let reported = Delivery {
            delivery_count: Some(4),
            ..delivery(true)
        };
        assert_eq!(counter.next("a", &reported), 5);
    }

    #[test]
    fn zero_cap_means_uncapped() {
        let config = ConsumerConfig::new(QueueName::Orders, FailurePolicy::RequeueOnFailure)
            .with_max_deliveries(Some(0));
        assert_eq!(config.max_deliveries, None);
        assert!(config.consumer_tag.starts_with("queue_pedidos-"));
    }
}
