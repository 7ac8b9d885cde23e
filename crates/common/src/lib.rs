//! Shared types for the order and inventory services.
//!
//! Nothing in here touches storage or the broker; both participants depend on
//! these identifiers and on the saga stage machine to describe their progress.

pub mod saga;
pub mod types;

pub use saga::{SagaSignal, SagaStage};
pub use types::{ANONYMOUS_CUSTOMER, CustomerId, OrderId, ProductId};
