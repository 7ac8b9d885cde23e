//! Inventory reserver of the order/inventory saga.
//!
//! This crate provides:
//! - The inventory model and the [`InventoryStore`] trait with in-memory and PostgreSQL stores
//! - The reservation ledger that makes redelivered orders idempotent
//! - The [`Reserver`] extension point and its default [`AlwaysReserve`]
//! - [`OrderCreatedConsumer`], which turns `order.created` into `inventory.reserved`

pub mod consumer;
pub mod error;
pub mod memory;
pub mod model;
pub mod policy;
pub mod postgres;
pub mod reserver;
pub mod service;
pub mod store;

pub use consumer::{DeliveryOutcome, OrderCreatedConsumer};
pub use error::{InventoryError, Result};
pub use memory::InMemoryInventoryStore;
pub use model::{InventoryRecord, ProductDemand, ReservationOutcome, ReservationRecord};
pub use policy::{FailureAction, FailurePolicy};
pub use postgres::PostgresInventoryStore;
pub use reserver::{AlwaysReserve, Reserver};
pub use service::InventoryService;
pub use store::InventoryStore;
