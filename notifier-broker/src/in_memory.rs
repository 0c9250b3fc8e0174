//! Queue service living in process memory.
//!
//! Behaves like a single broker node: durable queues shared by every channel
//! it opens, per-channel prefetch, manual acknowledgement and redelivery of
//! unacknowledged messages when a channel goes away. Faults can be injected to
//! exercise reconnect and retry paths.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    BrokerChannel, Connector, Delivery, DeliveryStream, Endpoint, PublishProperties, QueueName,
    TransportError,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    persistent: bool,
    deliveries: u32,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    declarations: usize,
}

struct Unacked {
    channel: u64,
    queue: QueueName,
    message: StoredMessage,
}

struct ChannelState {
    open: bool,
    prefetch: u16,
    unacked: usize,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<QueueName, QueueState>,
    unacked: HashMap<u64, Unacked>,
    channels: HashMap<u64, ChannelState>,
    next_tag: u64,
    next_channel: u64,
    refuse_connections: bool,
    fail_connects: usize,
    fail_declares: usize,
    fail_publishes: usize,
    fail_consumes: usize,
    delivery_count_header: bool,
    connection_attempts: usize,
    published: Vec<(QueueName, PublishProperties)>,
    acked: Vec<Vec<u8>>,
    discarded: Vec<Vec<u8>>,
    requeued: usize,
}

impl BrokerState {
    fn channel_open(&self, id: u64) -> bool {
        self.channels.get(&id).is_some_and(|channel| channel.open)
    }

    fn close_channel(&mut self, id: u64) {
        let Some(channel) = self.channels.get_mut(&id) else {
            return;
        };
        if !channel.open {
            return;
        }
        channel.open = false;
        channel.unacked = 0;

        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, unacked)| unacked.channel == id)
            .map(|(tag, _)| *tag)
            .collect();
        // Oldest delivery ends up at the head of the queue.
        tags.sort_unstable_by(|a, b| b.cmp(a));
        for tag in tags {
            if let Some(unacked) = self.unacked.remove(&tag) {
                self.queues
                    .entry(unacked.queue)
                    .or_default()
                    .ready
                    .push_front(unacked.message);
            }
        }
    }

    fn settle(&mut self, id: u64, tag: u64) -> Result<Unacked, TransportError> {
        if !self.channel_open(id) {
            return Err(TransportError::Closed);
        }
        match self.unacked.get(&tag) {
            Some(unacked) if unacked.channel == id => {}
            _ => {
                return Err(TransportError::Acknowledge {
                    tag,
                    reason: "unknown delivery tag".into(),
                })
            }
        }
        if let Some(channel) = self.channels.get_mut(&id) {
            channel.unacked = channel.unacked.saturating_sub(1);
        }
        self.unacked.remove(&tag).ok_or(TransportError::Acknowledge {
            tag,
            reason: "unknown delivery tag".into(),
        })
    }

    fn take_next(&mut self, id: u64, queue: QueueName) -> Take {
        let (prefetch, outstanding) = match self.channels.get(&id) {
            Some(channel) if channel.open => (channel.prefetch, channel.unacked),
            _ => return Take::Closed,
        };
        if prefetch != 0 && outstanding >= usize::from(prefetch) {
            return Take::Empty;
        }
        let Some(mut message) = self
            .queues
            .get_mut(&queue)
            .and_then(|state| state.ready.pop_front())
        else {
            return Take::Empty;
        };

        let previous = message.deliveries;
        message.deliveries += 1;
        self.next_tag += 1;
        let tag = self.next_tag;
        let delivery = Delivery {
            tag,
            body: message.body.clone(),
            redelivered: previous > 0,
            delivery_count: self.delivery_count_header.then_some(previous),
        };
        self.unacked.insert(
            tag,
            Unacked {
                channel: id,
                queue,
                message,
            },
        );
        if let Some(channel) = self.channels.get_mut(&id) {
            channel.unacked += 1;
        }
        Take::Delivery(delivery)
    }
}

enum Take {
    Delivery(Delivery),
    Empty,
    Closed,
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every connection attempt while `false`.
    pub fn set_available(&self, available: bool) {
        self.state.lock().refuse_connections = !available;
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().fail_connects = count;
    }

    pub fn fail_next_declares(&self, count: usize) {
        self.state.lock().fail_declares = count;
    }

    pub fn fail_next_publishes(&self, count: usize) {
        self.state.lock().fail_publishes = count;
    }

    /// Refuse the next `count` consume requests, as a broker denying access would.
    pub fn fail_next_consumes(&self, count: usize) {
        self.state.lock().fail_consumes = count;
    }

    /// Report previous deliveries the way quorum queues do (`x-delivery-count`).
    pub fn set_delivery_count_header(&self, enabled: bool) {
        self.state.lock().delivery_count_header = enabled;
    }

    /// Drop every open channel, as a network partition would. Unacknowledged
    /// messages go back to their queues.
    pub fn sever_connections(&self) {
        let mut state = self.state.lock();
        let ids: Vec<u64> = state.channels.keys().copied().collect();
        for id in ids {
            state.close_channel(id);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Sever connections and lose every message not published as persistent.
    pub fn restart(&self) {
        self.sever_connections();
        let mut state = self.state.lock();
        for queue in state.queues.values_mut() {
            queue.ready.retain(|message| message.persistent);
        }
    }

    /// Enqueue raw bytes, bypassing any publisher.
    pub fn push_raw(&self, queue: QueueName, body: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .queues
            .entry(queue)
            .or_default()
            .ready
            .push_back(StoredMessage {
                body: body.into(),
                persistent: true,
                deliveries: 0,
            });
        self.notify.notify_waiters();
    }

    pub fn ready_count(&self, queue: QueueName) -> usize {
        self.state
            .lock()
            .queues
            .get(&queue)
            .map_or(0, |state| state.ready.len())
    }

    /// Bodies waiting in `queue`, head first.
    pub fn peek(&self, queue: QueueName) -> Vec<Vec<u8>> {
        self.state.lock().queues.get(&queue).map_or_else(Vec::new, |state| {
            state.ready.iter().map(|message| message.body.clone()).collect()
        })
    }

    pub fn unacked_count(&self) -> usize {
        self.state.lock().unacked.len()
    }

    pub fn declarations(&self, queue: QueueName) -> usize {
        self.state
            .lock()
            .queues
            .get(&queue)
            .map_or(0, |state| state.declarations)
    }

    pub fn connection_attempts(&self) -> usize {
        self.state.lock().connection_attempts
    }

    pub fn open_channels(&self) -> usize {
        self.state
            .lock()
            .channels
            .values()
            .filter(|channel| channel.open)
            .count()
    }

    pub fn published(&self) -> Vec<(QueueName, PublishProperties)> {
        self.state.lock().published.clone()
    }

    pub fn acked_ids(&self) -> Vec<String> {
        self.state.lock().acked.iter().map(|body| message_id(body)).collect()
    }

    pub fn discarded_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .discarded
            .iter()
            .map(|body| message_id(body))
            .collect()
    }

    pub fn requeue_count(&self) -> usize {
        self.state.lock().requeued
    }
}

/// `message_id` of a JSON body, or the lossy body text when it has none.
fn message_id(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("message_id")?.as_str().map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn open(&self, _endpoint: &Endpoint) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        let mut state = self.state.lock();
        state.connection_attempts += 1;
        if state.refuse_connections {
            return Err(TransportError::Connect("broker unavailable".into()));
        }
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(TransportError::Connect("injected connect failure".into()));
        }

        state.next_channel += 1;
        let id = state.next_channel;
        state.channels.insert(
            id,
            ChannelState {
                open: true,
                prefetch: 0,
                unacked: 0,
            },
        );

        Ok(Arc::new(InMemoryChannel {
            id,
            broker: self.clone(),
        }))
    }
}

pub struct InMemoryChannel {
    id: u64,
    broker: InMemoryBroker,
}

impl InMemoryChannel {
    fn with_open_state<T>(
        &self,
        f: impl FnOnce(&mut BrokerState) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut state = self.broker.state.lock();
        if !state.channel_open(self.id) {
            return Err(TransportError::Closed);
        }
        f(&mut state)
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_queue(&self, queue: QueueName) -> Result<(), TransportError> {
        self.with_open_state(|state| {
            if state.fail_declares > 0 {
                state.fail_declares -= 1;
                return Err(TransportError::Declare {
                    queue: queue.to_string(),
                    reason: "injected declare failure".into(),
                });
            }
            state.queues.entry(queue).or_default().declarations += 1;
            Ok(())
        })
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), TransportError> {
        let id = self.id;
        self.with_open_state(|state| {
            if let Some(channel) = state.channels.get_mut(&id) {
                channel.prefetch = count;
            }
            Ok(())
        })
    }

    async fn publish(
        &self,
        queue: QueueName,
        body: Vec<u8>,
        properties: PublishProperties,
    ) -> Result<(), TransportError> {
        self.with_open_state(|state| {
            if state.fail_publishes > 0 {
                state.fail_publishes -= 1;
                return Err(TransportError::Publish("injected publish failure".into()));
            }
            state.published.push((queue, properties.clone()));
            // The default exchange drops messages for queues nobody declared.
            if let Some(queue_state) = state.queues.get_mut(&queue) {
                queue_state.ready.push_back(StoredMessage {
                    body,
                    persistent: properties.persistent,
                    deliveries: 0,
                });
            }
            Ok(())
        })?;
        self.broker.notify.notify_waiters();
        Ok(())
    }

    async fn consume(
        &self,
        queue: QueueName,
        _consumer_tag: &str,
    ) -> Result<DeliveryStream, TransportError> {
        self.with_open_state(|state| {
            if state.fail_consumes > 0 {
                state.fail_consumes -= 1;
                return Err(TransportError::Consume("injected consume failure".into()));
            }
            Ok(())
        })?;
        let id = self.id;
        let broker = self.broker.clone();

        Ok(futures_util::stream::unfold(broker, move |broker| async move {
            loop {
                let notify = Arc::clone(&broker.notify);
                let mut notified = std::pin::pin!(notify.notified());
                notified.as_mut().enable();

                let next = broker.state.lock().take_next(id, queue);
                match next {
                    Take::Delivery(delivery) => return Some((Ok(delivery), broker)),
                    Take::Closed => return None,
                    Take::Empty => notified.await,
                }
            }
        })
        .boxed())
    }

    async fn ack(&self, tag: u64) -> Result<(), TransportError> {
        let id = self.id;
        self.with_open_state(|state| {
            let settled = state.settle(id, tag)?;
            state.acked.push(settled.message.body);
            Ok(())
        })?;
        self.broker.notify.notify_waiters();
        Ok(())
    }

    async fn reject(&self, tag: u64, requeue: bool) -> Result<(), TransportError> {
        let id = self.id;
        self.with_open_state(|state| {
            let settled = state.settle(id, tag)?;
            if requeue {
                state.requeued += 1;
                state
                    .queues
                    .entry(settled.queue)
                    .or_default()
                    .ready
                    .push_front(settled.message);
            } else {
                state.discarded.push(settled.message.body);
            }
            Ok(())
        })?;
        self.broker.notify.notify_waiters();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.broker.state.lock().channel_open(self.id)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.broker.state.lock().close_channel(self.id);
        self.broker.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(broker: &InMemoryBroker) -> Arc<dyn BrokerChannel> {
        broker.open(&Endpoint::default()).await.unwrap()
    }

    #[tokio::test]
    async fn prefetch_limits_outstanding_deliveries() {
        let broker = InMemoryBroker::new();
        let channel = open(&broker).await;
        channel.declare_queue(QueueName::Email).await.unwrap();
        channel.set_prefetch(1).await.unwrap();
        broker.push_raw(QueueName::Email, "one");
        broker.push_raw(QueueName::Email, "two");

        let mut stream = channel.consume(QueueName::Email, "t").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.body, b"one");
        assert_eq!(broker.ready_count(QueueName::Email), 1);

        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(50), stream.next()).await;
        assert!(blocked.is_err());

        channel.ack(first.tag).await.unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.body, b"two");
    }

    #[tokio::test]
    async fn closing_a_channel_redelivers_unacked() {
        let broker = InMemoryBroker::new();
        let channel = open(&broker).await;
        channel.declare_queue(QueueName::Orders).await.unwrap();
        broker.push_raw(QueueName::Orders, "order");

        let mut stream = channel.consume(QueueName::Orders, "t").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert!(!delivery.redelivered);
        channel.close().await.unwrap();
        assert!(stream.next().await.is_none());
        assert_eq!(broker.ready_count(QueueName::Orders), 1);

        let channel = open(&broker).await;
        let mut stream = channel.consume(QueueName::Orders, "t").await.unwrap();
        let again = stream.next().await.unwrap().unwrap();
        assert!(again.redelivered);
        assert!(channel.ack(delivery.tag).await.is_err());
        channel.ack(again.tag).await.unwrap();
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn restart_keeps_only_persistent_messages() {
        let broker = InMemoryBroker::new();
        let channel = open(&broker).await;
        channel.declare_queue(QueueName::Admin).await.unwrap();
        channel
            .publish(QueueName::Admin, b"kept".to_vec(), PublishProperties::persistent_json())
            .await
            .unwrap();
        channel
            .publish(
                QueueName::Admin,
                b"lost".to_vec(),
                PublishProperties {
                    persistent: false,
                    content_type: "text/plain".into(),
                },
            )
            .await
            .unwrap();

        broker.restart();
        assert!(!channel.is_open());
        assert_eq!(broker.ready_count(QueueName::Admin), 1);
    }

    #[tokio::test]
    async fn undeclared_queue_drops_messages() {
        let broker = InMemoryBroker::new();
        let channel = open(&broker).await;
        channel
            .publish(QueueName::Email, b"x".to_vec(), PublishProperties::persistent_json())
            .await
            .unwrap();
        assert_eq!(broker.ready_count(QueueName::Email), 0);
    }
}
