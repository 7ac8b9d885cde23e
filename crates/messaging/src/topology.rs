//! Queue names and the topology each participant declares.
//!
//! Both services declare `order.created` with identical parameters, so
//! whichever starts first creates it and the other's declaration is a no-op.

use crate::QueueSpec;

/// Orders announced by the order service.
pub const ORDER_CREATED: &str = "order.created";

/// Reservation outcomes announced by the inventory service.
pub const INVENTORY_RESERVED: &str = "inventory.reserved";

/// `order.created` messages that exhausted their processing attempts.
pub const ORDER_CREATED_DEAD_LETTER: &str = "order.created.dead-letter";

/// Queues the order service publishes to.
pub fn order_service_topology() -> Vec<QueueSpec> {
    vec![QueueSpec::durable(ORDER_CREATED)]
}

/// Queues the inventory service consumes from or publishes to.
pub fn inventory_service_topology() -> Vec<QueueSpec> {
    vec![
        QueueSpec::durable(ORDER_CREATED),
        QueueSpec::durable(INVENTORY_RESERVED),
        QueueSpec::durable(ORDER_CREATED_DEAD_LETTER),
    ]
}
