use async_trait::async_trait;

use crate::{ProductDemand, ReservationOutcome, Result, store::InventoryStore};

/// Decides whether an order's demand can be reserved.
///
/// Called at most once per order: the consumer records the outcome and
/// reuses it when the same order is delivered again.
#[async_trait]
pub trait Reserver: Send + Sync {
    async fn reserve(&self, demand: &ProductDemand) -> Result<ReservationOutcome>;
}

/// Reserves every order as long as the datastore answers.
#[derive(Clone)]
pub struct AlwaysReserve<S> {
    store: S,
}

impl<S: InventoryStore> AlwaysReserve<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: InventoryStore> Reserver for AlwaysReserve<S> {
    async fn reserve(&self, demand: &ProductDemand) -> Result<ReservationOutcome> {
        self.store.ping().await?;
        tracing::debug!(order_id = %demand.order_id, "reservation granted");
        Ok(ReservationOutcome::Reserved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryInventoryStore;
    use common::{CustomerId, OrderId};

    fn demand() -> ProductDemand {
        ProductDemand {
            order_id: OrderId::new(1),
            customer_id: CustomerId::anonymous(),
            total_cents: 0,
        }
    }

    #[tokio::test]
    async fn test_reserves_when_store_is_up() {
        let reserver = AlwaysReserve::new(InMemoryInventoryStore::new());
        assert_eq!(
            reserver.reserve(&demand()).await.unwrap(),
            ReservationOutcome::Reserved
        );
    }

    #[tokio::test]
    async fn test_fails_when_store_is_down() {
        let store = InMemoryInventoryStore::new();
        store.set_available(false);
        let reserver = AlwaysReserve::new(store);
        assert!(reserver.reserve(&demand()).await.unwrap_err().is_storage());
    }
}
