//! Stages of the order/inventory choreography.
//!
//! No participant stores this state; each one derives the stage from the
//! step it just completed and reports it in logs.

use serde::{Deserialize, Serialize};

/// Where an order is in the saga.
///
/// Stage transitions:
/// ```text
/// OrderPending ──► ReservationRequested ──┬──► InventoryReserved
///                                         ├──► ReservationRejected
///                                         └──► DeadLettered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStage {
    /// The order is recorded but `order.created` has not been published yet.
    #[default]
    OrderPending,

    /// `order.created` was accepted by the broker.
    ReservationRequested,

    /// Inventory announced a successful reservation (terminal state).
    InventoryReserved,

    /// Inventory announced it could not reserve (terminal state).
    ReservationRejected,

    /// The request could not be processed and was parked (terminal state).
    DeadLettered,
}

/// Something that happened to an order's saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaSignal {
    /// The order's `order.created` event was published.
    OrderCreatedPublished,
    /// The inventory service published `inventory.reserved`.
    InventoryReserved { reserved: bool },
    /// The `order.created` message went to the dead-letter queue.
    DeadLettered,
}

impl SagaStage {
    /// Returns the stage reached after `signal`, or `None` if the signal is
    /// not valid in this stage.
    pub fn advance(self, signal: SagaSignal) -> Option<SagaStage> {
        match (self, signal) {
            (SagaStage::OrderPending, SagaSignal::OrderCreatedPublished) => {
                Some(SagaStage::ReservationRequested)
            }
            (SagaStage::ReservationRequested, SagaSignal::InventoryReserved { reserved: true }) => {
                Some(SagaStage::InventoryReserved)
            }
            (SagaStage::ReservationRequested, SagaSignal::InventoryReserved { reserved: false }) => {
                Some(SagaStage::ReservationRejected)
            }
            (SagaStage::ReservationRequested, SagaSignal::DeadLettered) => {
                Some(SagaStage::DeadLettered)
            }
            _ => None,
        }
    }

    /// Returns true if no further signal can move the saga.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStage::InventoryReserved | SagaStage::ReservationRejected | SagaStage::DeadLettered
        )
    }

    /// Returns the stage name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStage::OrderPending => "OrderPending",
            SagaStage::ReservationRequested => "ReservationRequested",
            SagaStage::InventoryReserved => "InventoryReserved",
            SagaStage::ReservationRejected => "ReservationRejected",
            SagaStage::DeadLettered => "DeadLettered",
        }
    }
}

impl std::fmt::Display for SagaStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
