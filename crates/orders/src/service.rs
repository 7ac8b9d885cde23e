use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::{NewOrder, Order, OrderError, OrderReceipt, Result, store::OrderStore};

const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Entry point for order operations.
///
/// Creating an order never touches the broker: the order and its event are
/// committed together and the relay is woken to publish the event.
#[derive(Clone)]
pub struct OrderService<S: OrderStore> {
    store: S,
    relay_signal: Arc<Notify>,
    storage_timeout: Duration,
}

impl<S: OrderStore> OrderService<S> {
    /// Creates a service with a 5 second storage timeout.
    pub fn new(store: S) -> Self {
        Self {
            store,
            relay_signal: Arc::new(Notify::new()),
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    /// Sets how long a single store call may take.
    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    /// Notified after every committed order; hand it to the [`OutboxRelay`](crate::OutboxRelay).
    pub fn relay_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.relay_signal)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records a pending order and its `order.created` event.
    #[tracing::instrument(skip(self), fields(order_id))]
    pub async fn create_order(&self, request: NewOrder) -> Result<OrderReceipt> {
        let pending = request.validate()?;
        let (order, _) = self.timed(self.store.insert_pending(&pending)).await?;

        tracing::Span::current().record("order_id", order.id.as_i64());
        tracing::info!(
            customer_id = %order.customer_id,
            total_cents = order.total_cents,
            "order accepted"
        );
        metrics::counter!("orders_created_total").increment(1);

        self.relay_signal.notify_one();
        Ok(order.receipt())
    }

    /// Up to `limit` orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Order>> {
        self.timed(self.store.list_recent(limit)).await
    }

    /// Checks that the store answers within the storage timeout.
    pub async fn ping(&self) -> Result<()> {
        self.timed(self.store.ping()).await
    }

    async fn timed<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.storage_timeout, operation)
            .await
            .map_err(|_| OrderError::StorageTimeout(self.storage_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryOrderStore, OrderStatus};
    use async_trait::async_trait;
    use common::OrderId;

    #[tokio::test]
    async fn test_create_order_records_order_and_outbox() {
        let store = InMemoryOrderStore::new();
        let service = OrderService::new(store.clone());

        let receipt = service
            .create_order(NewOrder::new("cust-1", 2500))
            .await
            .unwrap();

        assert_eq!(receipt.id, OrderId::new(1));
        assert_eq!(receipt.status, OrderStatus::Pending);

        let order = store.get(receipt.id).await.unwrap().unwrap();
        assert_eq!(order.customer_id.as_str(), "cust-1");
        assert_eq!(order.total_cents, 2500);
        assert_eq!(order.created_at, receipt.created_at);

        let outbox = store.outbox_messages().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(
            outbox[0].payload,
            r#"{"orderId":1,"customerId":"cust-1","totalCents":2500}"#
        );
    }

    #[tokio::test]
    async fn test_create_order_rejects_negative_total_without_writing() {
        let store = InMemoryOrderStore::new();
        let service = OrderService::new(store.clone());

        let result = service.create_order(NewOrder::new("cust-1", -10)).await;

        assert!(matches!(result, Err(OrderError::InvalidTotal(-10))));
        assert_eq!(store.order_count().await, 0);
        assert!(store.outbox_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_order_wakes_relay() {
        let service = OrderService::new(InMemoryOrderStore::new());
        let signal = service.relay_signal();

        service.create_order(NewOrder::default()).await.unwrap();

        tokio::time::timeout(Duration::from_millis(100), signal.notified())
            .await
            .expect("relay was not notified");
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let store = InMemoryOrderStore::new();
        store.set_available(false);
        let service = OrderService::new(store);

        let err = service.create_order(NewOrder::default()).await.unwrap_err();
        assert!(err.is_storage());
    }

    struct StalledStore;

    #[async_trait]
    impl OrderStore for StalledStore {
        async fn insert_pending(
            &self,
            _: &crate::PendingOrder,
        ) -> Result<(Order, crate::OutboxMessage)> {
            std::future::pending().await
        }
        async fn get(&self, _: OrderId) -> Result<Option<Order>> {
            std::future::pending().await
        }
        async fn list_recent(&self, _: usize) -> Result<Vec<Order>> {
            std::future::pending().await
        }
        async fn unpublished(&self, _: usize) -> Result<Vec<crate::OutboxMessage>> {
            std::future::pending().await
        }
        async fn mark_published(&self, _: i64) -> Result<()> {
            std::future::pending().await
        }
        async fn record_publish_failure(&self, _: i64, _: &str) -> Result<()> {
            std::future::pending().await
        }
        async fn ping(&self) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let service =
            OrderService::new(StalledStore).with_storage_timeout(Duration::from_millis(20));

        let err = service.create_order(NewOrder::default()).await.unwrap_err();
        assert!(matches!(err, OrderError::StorageTimeout(_)));
        assert!(matches!(
            service.list_recent(10).await,
            Err(OrderError::StorageTimeout(_))
        ));
        assert!(matches!(
            service.ping().await,
            Err(OrderError::StorageTimeout(_))
        ));
    }
}
