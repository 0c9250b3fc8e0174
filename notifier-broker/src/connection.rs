use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    BrokerChannel, ConnectionError, ConnectionState, Connector, Endpoint, QueueName, RetryPolicy,
    TransportError,
};

struct Current {
    state: ConnectionState,
    channel: Option<Arc<dyn BrokerChannel>>,
}

/// One logical connection to the queue service, owned by a single role
/// (gateway publisher or worker consumer).
///
/// The channel is either fully usable or absent: a connect attempt only
/// publishes its channel after every queue of the role has been declared.
pub struct BrokerConnection {
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    retry: RetryPolicy,
    queues: Vec<QueueName>,
    connect_lock: Mutex<()>,
    current: RwLock<Current>,
    shutdown: CancellationToken,
}

impl BrokerConnection {
    pub fn new(
        connector: Arc<dyn Connector>,
        endpoint: Endpoint,
        retry: RetryPolicy,
        queues: impl IntoIterator<Item = QueueName>,
    ) -> Self {
        Self {
            connector,
            endpoint,
            retry,
            queues: queues.into_iter().collect(),
            connect_lock: Mutex::new(()),
            current: RwLock::new(Current {
                state: ConnectionState::Disconnected,
                channel: None,
            }),
            shutdown: CancellationToken::new(),
        }
    }

    /// Tie pending connect attempts to an outer shutdown signal.
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.shutdown = parent.child_token();
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn state(&self) -> ConnectionState {
        let current = self.current.read();
        match (&current.state, &current.channel) {
            (ConnectionState::Connected, Some(channel)) if !channel.is_open() => {
                ConnectionState::Disconnected
            }
            (state, _) => *state,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Connect using the configured retry policy, declaring the role's queues.
    /// Returns immediately when a usable channel already exists.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.connect_channel().await.map(|_| ())
    }

    /// Fast path check used before every publish or consume.
    pub async fn ensure_connected(&self) -> Result<(), ConnectionError> {
        self.channel().await.map(|_| ())
    }

    /// The live channel, reconnecting first if there is none.
    pub async fn channel(&self) -> Result<Arc<dyn BrokerChannel>, ConnectionError> {
        match self.live_channel() {
            Some(channel) => Ok(channel),
            None => self.connect_channel().await,
        }
    }

    /// Drop `failed` after a transport error. A newer channel opened by
    /// another caller in the meantime is left alone.
    pub async fn invalidate(&self, failed: &Arc<dyn BrokerChannel>) {
        let stale = {
            let mut current = self.current.write();
            let is_current = current
                .channel
                .as_ref()
                .is_some_and(|channel| same_channel(channel, failed));
            if !is_current {
                return;
            }
            current.state = ConnectionState::Disconnected;
            current.channel.take()
        };

        warn!("Broker connection to {} marked as disconnected", self.endpoint);
        if let Some(channel) = stale {
            if let Err(err) = channel.close().await {
                warn!("Ignoring error while dropping stale channel: {}", err);
            }
        }
    }

    /// Release the channel and transport. Pending connect attempts are
    /// cancelled and the connection refuses to reconnect afterwards.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let _guard = self.connect_lock.lock().await;
        let channel = {
            let mut current = self.current.write();
            current.state = ConnectionState::Disconnected;
            current.channel.take()
        };

        if let Some(channel) = channel {
            if let Err(err) = channel.close().await {
                warn!("Error while closing broker channel: {}", err);
            }
            info!("Broker connection to {} closed", self.endpoint);
        }
    }

    fn live_channel(&self) -> Option<Arc<dyn BrokerChannel>> {
        let current = self.current.read();
        match (&current.state, &current.channel) {
            (ConnectionState::Connected, Some(channel)) if channel.is_open() => {
                Some(Arc::clone(channel))
            }
            _ => None,
        }
    }

    fn set_state(&self, state: ConnectionState, channel: Option<Arc<dyn BrokerChannel>>) {
        let mut current = self.current.write();
        current.state = state;
        current.channel = channel;
    }

    async fn connect_channel(&self) -> Result<Arc<dyn BrokerChannel>, ConnectionError> {
        let _guard = self.connect_lock.lock().await;

        // Another caller may have connected while this one waited for the lock.
        if let Some(channel) = self.live_channel() {
            return Ok(channel);
        }

        let stale = self.current.write().channel.take();
        if let Some(channel) = stale {
            let _ = channel.close().await;
        }

        let mut attempt = 0u32;
        loop {
            if self.shutdown.is_cancelled() {
                self.set_state(ConnectionState::Disconnected, None);
                return Err(ConnectionError::Cancelled);
            }

            attempt += 1;
            self.set_state(ConnectionState::Connecting, None);
            let attempted = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.set_state(ConnectionState::Disconnected, None);
                    return Err(ConnectionError::Cancelled);
                }
                attempted = tokio::time::timeout(
                    self.endpoint.connect_timeout,
                    self.open_and_declare(),
                ) => attempted.unwrap_or_else(|_| {
                    Err(TransportError::Connect(format!(
                        "timed out after {:?}",
                        self.endpoint.connect_timeout
                    )))
                }),
            };

            match attempted {
                Ok(channel) => {
                    self.set_state(ConnectionState::Connected, Some(Arc::clone(&channel)));
                    info!(
                        "Connected to broker at {} (queues: {})",
                        self.endpoint,
                        self.queue_list()
                    );
                    return Ok(channel);
                }
                Err(err) => {
                    error!(
                        "Broker connection attempt {} to {} failed: {}",
                        self.attempt_label(attempt),
                        self.endpoint,
                        err
                    );

                    if !self.retry.allows_another(attempt) {
                        self.set_state(ConnectionState::Disconnected, None);
                        return Err(ConnectionError::Exhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }

                    let delay = self.retry.delay_after(attempt);
                    info!("Retrying broker connection in {:?}", delay);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            self.set_state(ConnectionState::Disconnected, None);
                            return Err(ConnectionError::Cancelled);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn open_and_declare(&self) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        let channel = self.connector.open(&self.endpoint).await?;
        for queue in &self.queues {
            if let Err(err) = channel.declare_queue(*queue).await {
                let _ = channel.close().await;
                return Err(err);
            }
        }
        Ok(channel)
    }

    fn attempt_label(&self, attempt: u32) -> String {
        match self.retry.max_attempts {
            Some(max) => format!("{attempt}/{max}"),
            None => attempt.to_string(),
        }
    }

    fn queue_list(&self) -> String {
        self.queues
            .iter()
            .map(QueueName::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn same_channel(a: &Arc<dyn BrokerChannel>, b: &Arc<dyn BrokerChannel>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
