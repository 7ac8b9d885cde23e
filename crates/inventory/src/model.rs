use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, ProductId};
use messaging::OrderCreatedEvent;
use serde::{Deserialize, Serialize};

/// Stock of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub product_id: ProductId,
    /// Accumulates every stock write for the product.
    pub quantity: i64,
    /// Always 0: reservations do not hold stock yet.
    pub reserved: i64,
    pub updated_at: DateTime<Utc>,
}

/// What an order asks of the inventory.
///
/// Orders carry no line items, so the demand is the order as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductDemand {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub total_cents: i64,
}

impl From<&OrderCreatedEvent> for ProductDemand {
    fn from(event: &OrderCreatedEvent) -> Self {
        Self {
            order_id: event.order_id,
            customer_id: event.customer_id.clone(),
            total_cents: event.total_cents,
        }
    }
}

/// Result of a reservation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationOutcome {
    Reserved,
    InsufficientStock,
}

impl ReservationOutcome {
    pub fn is_reserved(&self) -> bool {
        matches!(self, ReservationOutcome::Reserved)
    }

    pub fn from_reserved(reserved: bool) -> Self {
        if reserved {
            ReservationOutcome::Reserved
        } else {
            ReservationOutcome::InsufficientStock
        }
    }
}

/// Ledger entry: the outcome recorded the first time an order was processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRecord {
    pub order_id: OrderId,
    pub outcome: ReservationOutcome,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_flag_round_trips() {
        assert!(ReservationOutcome::Reserved.is_reserved());
        assert!(!ReservationOutcome::InsufficientStock.is_reserved());
        assert_eq!(
            ReservationOutcome::from_reserved(false),
            ReservationOutcome::InsufficientStock
        );
    }

    #[test]
    fn test_demand_from_event() {
        let event = OrderCreatedEvent {
            order_id: OrderId::new(3),
            customer_id: CustomerId::new("cust-3"),
            total_cents: 900,
        };
        let demand = ProductDemand::from(&event);
        assert_eq!(demand.order_id, OrderId::new(3));
        assert_eq!(demand.total_cents, 900);
    }
}
