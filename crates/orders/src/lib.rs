//! Order originator of the order/inventory saga.
//!
//! This crate provides:
//! - The order model and the [`OrderStore`] trait with in-memory and PostgreSQL stores
//! - The transactional outbox holding `order.created` events
//! - [`OrderService`] for the create and list operations
//! - [`OutboxRelay`] which moves committed outbox rows onto the broker

pub mod error;
pub mod memory;
pub mod model;
pub mod outbox;
pub mod postgres;
pub mod relay;
pub mod service;
pub mod store;

pub use error::{OrderError, Result};
pub use memory::InMemoryOrderStore;
pub use model::{NewOrder, Order, OrderReceipt, OrderStatus, PendingOrder};
pub use outbox::{NewOutboxMessage, OutboxMessage};
pub use postgres::PostgresOrderStore;
pub use relay::{OutboxRelay, RelayReport};
pub use service::OrderService;
pub use store::OrderStore;
