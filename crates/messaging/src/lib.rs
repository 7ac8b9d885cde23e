//! Asynchronous messaging layer shared by the saga participants.
//!
//! This crate provides:
//! - The [`Broker`] trait with an in-memory and an AMQP (RabbitMQ) implementation
//! - The durable queue topology each participant declares
//! - The wire events exchanged between the services
//! - A [`Publisher`] that serializes events and publishes them persistently
//! - A [`ConnectionManager`] that owns the broker handle and reconnects it

pub mod amqp;
pub mod broker;
pub mod connection;
pub mod error;
pub mod events;
pub mod memory;
pub mod message;
pub mod publisher;
pub mod topology;

pub use amqp::{AmqpBroker, AmqpConnector};
pub use broker::{Broker, Connector, DeliveryStream, QueueSpec};
pub use connection::{ConnectionManager, ConnectionState, ReconnectPolicy};
pub use error::{MessagingError, Result};
pub use events::{BrokerEvent, InventoryReservedEvent, OrderCreatedEvent};
pub use memory::{InMemoryBroker, InMemoryConnector, QueuedMessage};
pub use message::{Acker, Delivery, MessageHeaders, OutgoingMessage, SCHEMA_VERSION};
pub use publisher::Publisher;
pub use topology::{
    INVENTORY_RESERVED, ORDER_CREATED, ORDER_CREATED_DEAD_LETTER, inventory_service_topology,
    order_service_topology,
};
