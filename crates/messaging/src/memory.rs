use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::{
    Acker, Broker, Connector, Delivery, DeliveryStream, MessageHeaders, MessagingError,
    OutgoingMessage, QueueSpec, Result,
};

/// A message sitting in an in-memory queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub payload: Vec<u8>,
    pub headers: MessageHeaders,
    pub persistent: bool,
    pub redelivered: bool,
}

impl QueuedMessage {
    /// Parses the payload as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug)]
struct Unacked {
    consumer_tag: String,
    message: QueuedMessage,
}

#[derive(Debug, Default)]
struct QueueState {
    durable: bool,
    ready: VecDeque<QueuedMessage>,
    unacked: BTreeMap<u64, Unacked>,
}

impl QueueState {
    fn requeue_unacked(&mut self) {
        let unacked = std::mem::take(&mut self.unacked);
        // Put them back in delivery order, ahead of anything never delivered.
        for (_, entry) in unacked.into_iter().rev() {
            let mut message = entry.message;
            message.redelivered = true;
            self.ready.push_front(message);
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    next_delivery_tag: u64,
    publish_delay: Option<Duration>,
}

struct Inner {
    state: Mutex<BrokerState>,
    reachable: AtomicBool,
    generation: AtomicU64,
    notify: Notify,
}

/// In-memory broker with the delivery semantics of a durable AMQP queue.
///
/// Cloning shares the same broker. Handles returned by [`InMemoryBroker::connect`]
/// belong to one connection and stop working once that connection is dropped
/// by [`InMemoryBroker::disconnect`] or [`InMemoryBroker::restart`]; unacked
/// deliveries then return to their queue flagged as redelivered.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
    connection: Option<u64>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Creates an empty, reachable broker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BrokerState::default()),
                reachable: AtomicBool::new(true),
                generation: AtomicU64::new(0),
                notify: Notify::new(),
            }),
            connection: None,
        }
    }

    /// Opens a connection handle.
    pub fn connect(&self) -> Result<InMemoryBroker> {
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(MessagingError::Transport("connection refused".to_string()));
        }
        Ok(Self {
            inner: self.inner.clone(),
            connection: Some(self.inner.generation.load(Ordering::SeqCst)),
        })
    }

    /// Drops every connection and refuses new ones until [`InMemoryBroker::restore`].
    pub async fn disconnect(&self) {
        self.inner.reachable.store(false, Ordering::SeqCst);
        self.drop_connections().await;
    }

    /// Accepts connections again.
    pub fn restore(&self) {
        self.inner.reachable.store(true, Ordering::SeqCst);
    }

    /// Simulates a broker restart: connections drop, transient queues and
    /// non-persistent messages are lost.
    pub async fn restart(&self) {
        self.drop_connections().await;
        let mut state = self.inner.state.lock().await;
        state.queues.retain(|_, q| q.durable);
        for queue in state.queues.values_mut() {
            queue.ready.retain(|m| m.persistent);
        }
    }

    /// Delays every publish, for exercising publish timeouts.
    pub async fn set_publish_delay(&self, delay: Option<Duration>) {
        self.inner.state.lock().await.publish_delay = delay;
    }

    /// Returns the declaration of a queue, if it exists.
    pub async fn queue_spec(&self, queue: &str) -> Option<QueueSpec> {
        let state = self.inner.state.lock().await;
        state.queues.get(queue).map(|q| QueueSpec {
            name: queue.to_string(),
            durable: q.durable,
        })
    }

    /// Returns the messages waiting for delivery, oldest first.
    pub async fn queued_messages(&self, queue: &str) -> Vec<QueuedMessage> {
        let state = self.inner.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|q| q.ready.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of messages waiting for delivery.
    pub async fn message_count(&self, queue: &str) -> usize {
        let state = self.inner.state.lock().await;
        state.queues.get(queue).map(|q| q.ready.len()).unwrap_or(0)
    }

    /// Returns the number of delivered but unsettled messages.
    pub async fn unacked_count(&self, queue: &str) -> usize {
        let state = self.inner.state.lock().await;
        state.queues.get(queue).map(|q| q.unacked.len()).unwrap_or(0)
    }

    async fn drop_connections(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.state.lock().await;
        for queue in state.queues.values_mut() {
            queue.requeue_unacked();
        }
        drop(state);
        self.inner.notify.notify_waiters();
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(MessagingError::Transport("connection closed".to_string()))
        }
    }

    async fn next_delivery(&self, queue: &str, consumer_tag: &str) -> Result<Option<Delivery>> {
        self.ensure_connected()?;
        let mut state = self.inner.state.lock().await;
        let delivery_tag = state.next_delivery_tag + 1;

        let Some(q) = state.queues.get_mut(queue) else {
            return Err(MessagingError::Transport(format!("queue '{queue}' no longer exists")));
        };
        if q.unacked.values().any(|u| u.consumer_tag == consumer_tag) {
            return Ok(None);
        }
        let Some(message) = q.ready.pop_front() else {
            return Ok(None);
        };

        q.unacked.insert(
            delivery_tag,
            Unacked {
                consumer_tag: consumer_tag.to_string(),
                message: message.clone(),
            },
        );
        state.next_delivery_tag = delivery_tag;

        let acker = Arc::new(InMemoryAcker {
            broker: self.clone(),
            queue: queue.to_string(),
        });
        Ok(Some(Delivery::new(
            delivery_tag,
            queue,
            message.payload,
            message.headers,
            message.redelivered,
            acker,
        )))
    }

    async fn settle(&self, queue: &str, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.ensure_connected()?;
        let mut state = self.inner.state.lock().await;
        let unknown_tag =
            || MessagingError::Transport(format!("unknown delivery tag {delivery_tag}"));

        let q = state.queues.get_mut(queue).ok_or_else(unknown_tag)?;
        let entry = q.unacked.remove(&delivery_tag).ok_or_else(unknown_tag)?;
        if requeue {
            let mut message = entry.message;
            message.redelivered = true;
            q.ready.push_front(message);
        }
        drop(state);
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
        self.ensure_connected()?;
        let mut state = self.inner.state.lock().await;
        match state.queues.get(&spec.name) {
            Some(existing) if existing.durable != spec.durable => {
                Err(MessagingError::TopologyConflict {
                    queue: spec.name.clone(),
                    reason: format!(
                        "inequivalent arg 'durable': received {}, current {}",
                        spec.durable, existing.durable
                    ),
                })
            }
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    spec.name.clone(),
                    QueueState {
                        durable: spec.durable,
                        ..QueueState::default()
                    },
                );
                Ok(())
            }
        }
    }

    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<()> {
        self.ensure_connected()?;
        let delay = self.inner.state.lock().await.publish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            // The connection may have dropped while the publish was in flight.
            self.ensure_connected()?;
        }

        let mut state = self.inner.state.lock().await;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| MessagingError::Transport(format!("no queue '{queue}'")))?;
        q.ready.push_back(QueuedMessage {
            payload: message.payload,
            headers: message.headers,
            persistent: message.persistent,
            redelivered: false,
        });
        drop(state);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        self.ensure_connected()?;
        if self.queue_spec(queue).await.is_none() {
            return Err(MessagingError::Transport(format!("no queue '{queue}'")));
        }

        let cursor = (self.clone(), queue.to_string(), consumer_tag.to_string());
        let stream = futures_util::stream::unfold(Some(cursor), |cursor| async move {
            let (broker, queue, tag) = cursor?;
            let inner = broker.inner.clone();
            loop {
                let notified = inner.notify.notified();
                match broker.next_delivery(&queue, &tag).await {
                    Ok(Some(delivery)) => return Some((Ok(delivery), Some((broker, queue, tag)))),
                    Ok(None) => notified.await,
                    Err(e) => return Some((Err(e), None)),
                }
            }
        });
        Ok(Box::pin(stream))
    }

    fn is_connected(&self) -> bool {
        let reachable = self.inner.reachable.load(Ordering::SeqCst);
        match self.connection {
            Some(generation) => reachable && generation == self.inner.generation.load(Ordering::SeqCst),
            None => reachable,
        }
    }
}

struct InMemoryAcker {
    broker: InMemoryBroker,
    queue: String,
}

#[async_trait]
impl Acker for InMemoryAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.broker.settle(&self.queue, delivery_tag, false).await
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.broker.settle(&self.queue, delivery_tag, requeue).await
    }
}

/// Opens connections to an [`InMemoryBroker`].
#[derive(Clone)]
pub struct InMemoryConnector {
    broker: InMemoryBroker,
}

impl InMemoryConnector {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn Broker>> {
        Ok(Arc::new(self.broker.connect()?))
    }
}
