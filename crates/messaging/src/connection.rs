//! Ownership and lifecycle of the broker connection.
//!
//! A participant owns exactly one [`ConnectionManager`]. The HTTP layer, the
//! outbox relay and the consumer loop all reach the broker through it, and a
//! reconnect replaces the handle for all of them at once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;

use crate::{Broker, Connector, MessagingError, QueueSpec, Result};

/// Lifecycle of the broker connection.
///
/// State transitions:
/// ```text
/// Disconnected ──► Connecting ──┬──► Connected ──► Disconnected (on error)
///                               └──► Disconnected (on failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Timing of the reconnect supervisor.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay after the first failed attempt; doubles on each further failure.
    pub initial_backoff: Duration,
    /// Upper bound for the delay between attempts.
    pub max_backoff: Duration,
    /// How often a healthy connection is checked.
    pub check_interval: Duration,
}

impl ReconnectPolicy {
    /// Delay before the attempt following `failures` consecutive failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            check_interval: Duration::from_secs(1),
        }
    }
}

/// Owns the current broker handle and re-establishes it on failure.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    topology: Vec<QueueSpec>,
    policy: ReconnectPolicy,
    handle: RwLock<Option<Arc<dyn Broker>>>,
    state: watch::Sender<ConnectionState>,
    connect_lock: Mutex<()>,
}

impl ConnectionManager {
    /// Creates a manager in the `Disconnected` state.
    ///
    /// `topology` is declared on every new connection before it is handed out.
    pub fn new(
        connector: impl Connector + 'static,
        topology: Vec<QueueSpec>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector: Arc::new(connector),
            topology,
            policy,
            handle: RwLock::new(None),
            state,
            connect_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watches state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn topology(&self) -> &[QueueSpec] {
        &self.topology
    }

    /// Opens a connection and declares the topology, unless a live one is
    /// already owned.
    #[tracing::instrument(skip(self))]
    pub async fn connect(&self) -> Result<Arc<dyn Broker>> {
        let _guard = self.connect_lock.lock().await;
        if let Some(handle) = self.live_handle().await {
            return Ok(handle);
        }

        self.state.send_replace(ConnectionState::Connecting);
        match self.open().await {
            Ok(handle) => {
                let mut owned = self.handle.write().await;
                let previous = owned.replace(handle.clone());
                self.state.send_replace(ConnectionState::Connected);
                drop(owned);
                if let Some(previous) = previous {
                    previous.close().await;
                }
                metrics::counter!("broker_connections_total").increment(1);
                tracing::info!(queues = self.topology.len(), "broker connected");
                Ok(handle)
            }
            Err(e) => {
                let mut owned = self.handle.write().await;
                let previous = owned.take();
                self.state.send_replace(ConnectionState::Disconnected);
                drop(owned);
                if let Some(previous) = previous {
                    previous.close().await;
                }
                metrics::counter!("broker_connection_failures_total").increment(1);
                tracing::warn!(error = %e, "broker connection failed");
                Err(e)
            }
        }
    }

    /// Returns the owned handle if it is still alive.
    ///
    /// Fails fast with `NotConnected` otherwise; it never waits for a
    /// reconnect.
    pub async fn current(&self) -> Result<Arc<dyn Broker>> {
        let owned = self.handle.read().await.clone();
        match owned {
            Some(handle) if handle.is_connected() => Ok(handle),
            Some(handle) => {
                self.mark_disconnected_if(&handle, "connection lost").await;
                Err(MessagingError::NotConnected)
            }
            None => Err(MessagingError::NotConnected),
        }
    }

    /// Drops and closes the owned handle, but only if it is still `handle`.
    ///
    /// A failure observed on an older handle leaves a newer connection alone.
    /// Returns true when the handle was dropped.
    pub async fn mark_disconnected_if(&self, handle: &Arc<dyn Broker>, reason: &str) -> bool {
        let mut owned = self.handle.write().await;
        let is_owned = owned
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, handle));
        if !is_owned {
            return false;
        }
        let dropped = owned.take();
        self.state.send_replace(ConnectionState::Disconnected);
        drop(owned);

        tracing::warn!(reason, "broker connection lost");
        if let Some(dropped) = dropped {
            dropped.close().await;
        }
        true
    }

    /// Waits until the state is `Connected`.
    pub async fn wait_until_connected(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|state| *state == ConnectionState::Connected).await;
    }

    /// Spawns the task that keeps the connection alive.
    ///
    /// The task checks the handle every `check_interval` and reconnects with
    /// exponential backoff when it is gone. Abort the returned handle to stop it.
    pub fn spawn_supervisor(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.supervise().await })
    }

    async fn supervise(&self) {
        let mut failures: u32 = 0;
        loop {
            let owned = self.handle.read().await.clone();
            match owned {
                Some(handle) if handle.is_connected() => {
                    failures = 0;
                    tokio::time::sleep(self.policy.check_interval).await;
                    continue;
                }
                Some(handle) => {
                    self.mark_disconnected_if(&handle, "connection lost").await;
                }
                None => {}
            }

            match self.connect().await {
                Ok(_) => failures = 0,
                Err(e) => {
                    let delay = self.policy.backoff(failures);
                    failures = failures.saturating_add(1);
                    tracing::debug!(error = %e, failures, retry_in_ms = delay.as_millis() as u64, "reconnect scheduled");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn open(&self) -> Result<Arc<dyn Broker>> {
        let handle = self.connector.connect().await?;
        for spec in &self.topology {
            if let Err(e) = handle.declare_queue(spec).await {
                handle.close().await;
                return Err(e);
            }
        }
        Ok(handle)
    }

    async fn live_handle(&self) -> Option<Arc<dyn Broker>> {
        self.handle
            .read()
            .await
            .as_ref()
            .filter(|handle| handle.is_connected())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryBroker, InMemoryConnector, topology};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            check_interval: Duration::from_millis(5),
        }
    }

    fn manager(broker: &InMemoryBroker) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            InMemoryConnector::new(broker.clone()),
            topology::inventory_service_topology(),
            fast_policy(),
        ))
    }

    async fn wait_for_live_handle(manager: &ConnectionManager) -> Arc<dyn Broker> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(handle) = manager.current().await {
                    return handle;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("supervisor did not reconnect")
    }

    /// Counts how often its handles are closed.
    struct CountingConnector {
        broker: InMemoryBroker,
        closed: Arc<AtomicUsize>,
    }

    struct CountingBroker {
        inner: Arc<dyn Broker>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self) -> Result<Arc<dyn Broker>> {
            Ok(Arc::new(CountingBroker {
                inner: InMemoryConnector::new(self.broker.clone()).connect().await?,
                closed: self.closed.clone(),
            }))
        }
    }

    #[async_trait]
    impl Broker for CountingBroker {
        async fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
            self.inner.declare_queue(spec).await
        }
        async fn publish(&self, queue: &str, message: crate::OutgoingMessage) -> Result<()> {
            self.inner.publish(queue, message).await
        }
        async fn consume(&self, queue: &str, tag: &str) -> Result<crate::DeliveryStream> {
            self.inner.consume(queue, tag).await
        }
        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }
        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let policy = ReconnectPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(700),
            check_interval: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(700));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_starts_disconnected() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(matches!(
            manager.current().await,
            Err(MessagingError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_declares_topology() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);

        manager.connect().await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Connected);
        for spec in topology::inventory_service_topology() {
            assert_eq!(broker.queue_spec(&spec.name).await, Some(spec));
        }
        assert!(manager.current().await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_connect_returns_to_disconnected() {
        let broker = InMemoryBroker::new();
        broker.disconnect().await;
        let manager = manager(&broker);

        let result = manager.connect().await;
        assert!(result.err().unwrap().is_transport());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_topology_conflict_fails_connect() {
        let broker = InMemoryBroker::new();
        broker
            .declare_queue(&QueueSpec::transient(topology::ORDER_CREATED))
            .await
            .unwrap();
        let manager = manager(&broker);

        let result = manager.connect().await;
        assert!(matches!(
            result,
            Err(MessagingError::TopologyConflict { .. })
        ));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_lost_connection_is_detected() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);
        manager.connect().await.unwrap();

        broker.disconnect().await;

        assert!(manager.current().await.err().unwrap().is_transport());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_supervisor_reconnects_with_new_handle() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);
        manager.connect().await.unwrap();
        let first = manager.current().await.unwrap();

        let supervisor = manager.spawn_supervisor();
        broker.disconnect().await;
        assert!(!first.is_connected());

        broker.restore();
        let second = wait_for_live_handle(&manager).await;
        assert!(second.is_connected());
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(!first.is_connected());

        supervisor.abort();
    }

    #[tokio::test]
    async fn test_stale_handle_does_not_drop_newer_connection() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);
        let stale = manager.connect().await.unwrap();

        broker.disconnect().await;
        broker.restore();
        let fresh = manager.connect().await.unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));

        assert!(!manager.mark_disconnected_if(&stale, "old handle failed").await);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(Arc::ptr_eq(&manager.current().await.unwrap(), &fresh));

        assert!(manager.mark_disconnected_if(&fresh, "lost").await);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.current().await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_handles_are_closed() {
        let broker = InMemoryBroker::new();
        let closed = Arc::new(AtomicUsize::new(0));
        let manager = ConnectionManager::new(
            CountingConnector {
                broker: broker.clone(),
                closed: closed.clone(),
            },
            topology::order_service_topology(),
            fast_policy(),
        );
        let first = manager.connect().await.unwrap();

        broker.disconnect().await;
        broker.restore();
        // Replacing a dead handle closes it.
        let second = manager.connect().await.unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        // A stale report closes nothing.
        manager.mark_disconnected_if(&first, "stale").await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        manager.mark_disconnected_if(&second, "lost").await;
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_supervisor_establishes_initial_connection() {
        let broker = InMemoryBroker::new();
        broker.disconnect().await;
        let manager = manager(&broker);
        let supervisor = manager.spawn_supervisor();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!manager.is_connected());

        broker.restore();
        tokio::time::timeout(Duration::from_secs(2), manager.wait_until_connected())
            .await
            .unwrap();
        assert!(manager.current().await.is_ok());

        supervisor.abort();
    }
}
