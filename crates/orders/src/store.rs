use async_trait::async_trait;
use common::OrderId;

use crate::{Order, OutboxMessage, PendingOrder, Result};

/// Persistence for orders and their outbox.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a `PENDING` order together with its `order.created` outbox row.
    ///
    /// Both rows are written atomically: either both exist afterwards or
    /// neither does.
    async fn insert_pending(&self, order: &PendingOrder) -> Result<(Order, OutboxMessage)>;

    /// Gets an order by id.
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Up to `limit` orders, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Order>>;

    /// Up to `limit` unpublished outbox rows, oldest first.
    async fn unpublished(&self, limit: usize) -> Result<Vec<OutboxMessage>>;

    /// Marks an outbox row as accepted by the broker.
    async fn mark_published(&self, outbox_id: i64) -> Result<()>;

    /// Records a failed publish attempt for an outbox row.
    async fn record_publish_failure(&self, outbox_id: i64, error: &str) -> Result<()>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
impl<S: OrderStore + ?Sized> OrderStore for std::sync::Arc<S> {
    async fn insert_pending(&self, order: &PendingOrder) -> Result<(Order, OutboxMessage)> {
        (**self).insert_pending(order).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        (**self).get(id).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Order>> {
        (**self).list_recent(limit).await
    }

    async fn unpublished(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        (**self).unpublished(limit).await
    }

    async fn mark_published(&self, outbox_id: i64) -> Result<()> {
        (**self).mark_published(outbox_id).await
    }

    async fn record_publish_failure(&self, outbox_id: i64, error: &str) -> Result<()> {
        (**self).record_publish_failure(outbox_id, error).await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }
}
