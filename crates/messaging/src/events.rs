//! Wire contracts between the participants.
//!
//! Field names are camelCase on the wire (`orderId`, `customerId`,
//! `totalCents`, `reserved`); existing consumers depend on them.

use common::{CustomerId, OrderId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::topology::{INVENTORY_RESERVED, ORDER_CREATED};
use crate::{MessageHeaders, OutgoingMessage, Result};

/// An event that is published to a fixed queue.
pub trait BrokerEvent: Serialize + DeserializeOwned + Send + Sync {
    /// Queue the event is published to.
    const QUEUE: &'static str;

    /// Event type recorded in the message headers.
    const EVENT_TYPE: &'static str;

    /// Correlates the event with its saga.
    fn correlation_id(&self) -> String;

    /// Serializes the event into a persistent first-attempt message.
    fn to_message(&self) -> Result<OutgoingMessage> {
        let payload = serde_json::to_vec(self)?;
        let headers = MessageHeaders::new(Self::EVENT_TYPE).with_correlation_id(self.correlation_id());
        Ok(OutgoingMessage::persistent(payload, headers))
    }

    /// Parses an event from a message body.
    fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Emitted by the order service once an order is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedEvent {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub total_cents: i64,
}

impl BrokerEvent for OrderCreatedEvent {
    const QUEUE: &'static str = ORDER_CREATED;
    const EVENT_TYPE: &'static str = "OrderCreated";

    fn correlation_id(&self) -> String {
        self.order_id.to_string()
    }
}

/// Emitted by the inventory service after handling an `OrderCreatedEvent`.
///
/// Nothing consumes this queue yet; a consumer must be idempotent on
/// `order_id` because redelivery of `order.created` repeats the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReservedEvent {
    pub order_id: OrderId,
    pub reserved: bool,
}

impl BrokerEvent for InventoryReservedEvent {
    const QUEUE: &'static str = INVENTORY_RESERVED;
    const EVENT_TYPE: &'static str = "InventoryReserved";

    fn correlation_id(&self) -> String {
        self.order_id.to_string()
    }
}
