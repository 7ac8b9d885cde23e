//! Transactional outbox.
//!
//! An outbox row is written in the same transaction as the order it
//! announces, so an order can never exist without its `order.created` event.
//! The payload is kept as the exact JSON text that goes on the wire.

use chrono::{DateTime, Utc};
use messaging::{BrokerEvent, MessageHeaders, OrderCreatedEvent, OutgoingMessage};
use uuid::Uuid;

use crate::{Order, Result};

/// An outbox row that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxMessage {
    pub message_id: Uuid,
    pub queue: String,
    pub event_type: String,
    pub correlation_id: Option<String>,
    pub payload: String,
}

impl NewOutboxMessage {
    /// Builds the outbox row for any broker event.
    pub fn for_event<E: BrokerEvent>(event: &E) -> Result<Self> {
        Ok(Self {
            message_id: Uuid::new_v4(),
            queue: E::QUEUE.to_string(),
            event_type: E::EVENT_TYPE.to_string(),
            correlation_id: Some(event.correlation_id()),
            payload: serde_json::to_string(event)?,
        })
    }

    /// Builds the `order.created` row announcing `order`.
    pub fn order_created(order: &Order) -> Result<Self> {
        Self::for_event(&OrderCreatedEvent {
            order_id: order.id,
            customer_id: order.customer_id.clone(),
            total_cents: order.total_cents,
        })
    }

    /// Completes the row with its store-assigned fields.
    pub fn stored(self, id: i64, created_at: DateTime<Utc>) -> OutboxMessage {
        OutboxMessage {
            id,
            message_id: self.message_id,
            queue: self.queue,
            event_type: self.event_type,
            correlation_id: self.correlation_id,
            payload: self.payload,
            created_at,
            published_at: None,
            attempts: 0,
            last_error: None,
        }
    }
}

/// A stored outbox row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    /// Relay order.
    pub id: i64,
    /// Becomes the broker message id, so consumers can spot duplicates.
    pub message_id: Uuid,
    pub queue: String,
    pub event_type: String,
    pub correlation_id: Option<String>,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    /// Set once the broker accepted the message.
    pub published_at: Option<DateTime<Utc>>,
    /// Failed publish attempts so far.
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl OutboxMessage {
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// The persistent broker message for this row.
    pub fn to_message(&self) -> OutgoingMessage {
        let mut headers =
            MessageHeaders::new(self.event_type.clone()).with_message_id(self.message_id);
        headers.correlation_id = self.correlation_id.clone();
        OutgoingMessage::persistent(self.payload.clone().into_bytes(), headers)
    }
}
