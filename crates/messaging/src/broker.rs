use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{Delivery, OutgoingMessage, Result};

/// Declaration parameters for a queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueSpec {
    pub name: String,
    /// The queue itself survives a broker restart.
    pub durable: bool,
}

impl QueueSpec {
    /// A durable queue with the given name.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
        }
    }

    /// A queue that disappears when the broker restarts.
    pub fn transient(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
        }
    }
}

/// A stream of deliveries from one queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

/// One live connection to a message broker.
///
/// Delivery is at-least-once: anything delivered and not acked before the
/// connection drops is delivered again.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declares a queue.
    ///
    /// Idempotent for identical parameters; fails with `TopologyConflict`
    /// when the queue already exists with different parameters.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()>;

    /// Enqueues a message.
    ///
    /// Returns once the broker has accepted the message. Never waits for a
    /// consumer. Fails with a transport error when the connection is down.
    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<()>;

    /// Starts consuming a queue with manual acknowledgment.
    ///
    /// At most one unacknowledged delivery is outstanding per stream.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    /// Returns true while the underlying connection is usable.
    fn is_connected(&self) -> bool;

    /// Closes the connection. Errors are ignored; the handle is unusable
    /// afterwards either way.
    async fn close(&self) {}
}

/// Opens new broker connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Broker>>;
}
