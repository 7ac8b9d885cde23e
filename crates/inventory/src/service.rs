use std::future::Future;
use std::time::Duration;

use common::ProductId;

use crate::{InventoryError, InventoryRecord, Result, store::InventoryStore};

const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Stock operations behind the inventory HTTP surface.
#[derive(Clone)]
pub struct InventoryService<S: InventoryStore> {
    store: S,
    storage_timeout: Duration,
}

impl<S: InventoryStore> InventoryService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    /// Sets how long a single store call may take.
    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Adds stock for a product; a missing quantity adds nothing.
    #[tracing::instrument(skip(self))]
    pub async fn add_stock(
        &self,
        product_id: Option<&str>,
        quantity: Option<i64>,
    ) -> Result<InventoryRecord> {
        let product_id = match product_id {
            Some(id) if !id.trim().is_empty() => ProductId::new(id),
            _ => return Err(InventoryError::InvalidProduct),
        };
        let quantity = quantity.unwrap_or(0);

        let record = self
            .timed(self.store.add_stock(&product_id, quantity))
            .await?;
        tracing::info!(
            product_id = %record.product_id,
            added = quantity,
            quantity = record.quantity,
            "stock updated"
        );
        Ok(record)
    }

    /// The full stock snapshot, ordered by product id.
    pub async fn list(&self) -> Result<Vec<InventoryRecord>> {
        self.timed(self.store.list()).await
    }

    /// Checks that the store answers within the storage timeout.
    pub async fn ping(&self) -> Result<()> {
        self.timed(self.store.ping()).await
    }

    async fn timed<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.storage_timeout, operation)
            .await
            .map_err(|_| InventoryError::StorageTimeout(self.storage_timeout))?
    }
}
