#![allow(dead_code)]

use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use notifier_broker::{
    in_memory::InMemoryBroker, BrokerChannel, BrokerConnection, Connector, Endpoint, QueueName,
    RetryPolicy, TransportError,
};

pub const STEP: Duration = Duration::from_millis(10);

pub fn bounded(attempts: u32) -> RetryPolicy {
    RetryPolicy::bounded(attempts, STEP)
}

pub fn connection(
    broker: &InMemoryBroker,
    retry: RetryPolicy,
    queues: impl IntoIterator<Item = QueueName>,
) -> BrokerConnection {
    BrokerConnection::new(Arc::new(broker.clone()), Endpoint::default(), retry, queues)
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("operation did not finish in time")
}

/// A broker that accepts the socket and then never answers the handshake.
#[derive(Default)]
pub struct StalledConnector {
    attempts: AtomicUsize,
}

impl StalledConnector {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StalledConnector {
    async fn open(&self, _endpoint: &Endpoint) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

pub fn stalled_connection(
    connector: &Arc<StalledConnector>,
    retry: RetryPolicy,
    connect_timeout: Duration,
) -> BrokerConnection {
    let endpoint = Endpoint {
        connect_timeout,
        ..Endpoint::default()
    };
    BrokerConnection::new(connector.clone(), endpoint, retry, [QueueName::Email])
}
