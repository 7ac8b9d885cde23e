//! Messages as they travel through the broker.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Version of the JSON bodies published by this crate.
pub const SCHEMA_VERSION: u32 = 1;

/// Envelope metadata carried as broker message properties.
///
/// The JSON body stays exactly the event contract (`orderId`, ...), so
/// consumers that only read the body keep working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeaders {
    /// Unique identifier of this message; retries keep it.
    pub message_id: Uuid,

    /// The type of the event (e.g., "OrderCreated").
    pub event_type: String,

    /// Correlates all messages of one saga (the order id).
    pub correlation_id: Option<String>,

    /// Version of the body schema.
    pub schema_version: u32,

    /// 1-based processing attempt, incremented each time the message is retried.
    pub attempt: u32,
}

impl MessageHeaders {
    /// Creates headers for a first attempt with a fresh message id.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            event_type: event_type.into(),
            correlation_id: None,
            schema_version: SCHEMA_VERSION,
            attempt: 1,
        }
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the message id.
    pub fn with_message_id(mut self, message_id: Uuid) -> Self {
        self.message_id = message_id;
        self
    }

    /// Returns a copy for the next attempt of the same message.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self.clone()
        }
    }
}

/// A message ready to be handed to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub payload: Vec<u8>,
    pub headers: MessageHeaders,
    /// Ask the broker to write the message to disk.
    pub persistent: bool,
}

impl OutgoingMessage {
    /// Creates a persistent message.
    pub fn persistent(payload: Vec<u8>, headers: MessageHeaders) -> Self {
        Self {
            payload,
            headers,
            persistent: true,
        }
    }
}

/// Settles deliveries on the channel they arrived on.
#[async_trait]
pub trait Acker: Send + Sync {
    /// Acknowledges a delivery; the broker forgets the message.
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Rejects a delivery, optionally putting it back on its queue.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;
}

/// A message received from a queue that must be acked or nacked.
pub struct Delivery {
    pub delivery_tag: u64,
    pub queue: String,
    pub payload: Vec<u8>,
    pub headers: MessageHeaders,
    /// The broker delivered this message before without an ack.
    pub redelivered: bool,
    acker: Arc<dyn Acker>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        queue: impl Into<String>,
        payload: Vec<u8>,
        headers: MessageHeaders,
        redelivered: bool,
        acker: Arc<dyn Acker>,
    ) -> Self {
        Self {
            delivery_tag,
            queue: queue.into(),
            payload,
            headers,
            redelivered,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack(self.delivery_tag).await
    }

    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker.nack(self.delivery_tag, requeue).await
    }

    /// Builds a persistent copy of this message for another attempt.
    pub fn retry_message(&self) -> OutgoingMessage {
        OutgoingMessage::persistent(self.payload.clone(), self.headers.next_attempt())
    }

    /// Builds a persistent copy of this message with its headers unchanged.
    pub fn forward_message(&self) -> OutgoingMessage {
        OutgoingMessage::persistent(self.payload.clone(), self.headers.clone())
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("queue", &self.queue)
            .field("headers", &self.headers)
            .field("redelivered", &self.redelivered)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}
