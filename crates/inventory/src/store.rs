use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, ProductId};

use crate::{InventoryRecord, ReservationOutcome, ReservationRecord, Result};

/// Persistence for stock levels and the reservation ledger.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Adds `quantity` to the product's stock, creating the product if needed.
    ///
    /// Returns the record after the write.
    async fn add_stock(&self, product_id: &ProductId, quantity: i64) -> Result<InventoryRecord>;

    /// All products, ordered by product id.
    async fn list(&self) -> Result<Vec<InventoryRecord>>;

    /// The ledger entry for an order, if it was processed before.
    async fn reservation(&self, order_id: OrderId) -> Result<Option<ReservationRecord>>;

    /// Records the outcome for an order unless one is already recorded.
    ///
    /// Returns the entry that is in the ledger afterwards, which is the
    /// earlier one when the order was already recorded.
    async fn record_reservation(
        &self,
        order_id: OrderId,
        outcome: ReservationOutcome,
    ) -> Result<ReservationRecord>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
impl<S: InventoryStore + ?Sized> InventoryStore for Arc<S> {
    async fn add_stock(&self, product_id: &ProductId, quantity: i64) -> Result<InventoryRecord> {
        (**self).add_stock(product_id, quantity).await
    }

    async fn list(&self) -> Result<Vec<InventoryRecord>> {
        (**self).list().await
    }

    async fn reservation(&self, order_id: OrderId) -> Result<Option<ReservationRecord>> {
        (**self).reservation(order_id).await
    }

    async fn record_reservation(
        &self,
        order_id: OrderId,
        outcome: ReservationOutcome,
    ) -> Result<ReservationRecord> {
        (**self).record_reservation(order_id, outcome).await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }
}
