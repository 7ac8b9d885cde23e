use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, ProductId};
use tokio::sync::RwLock;

use crate::{
    InventoryError, InventoryRecord, ReservationOutcome, ReservationRecord, Result,
    store::InventoryStore,
};

/// In-memory inventory store for tests and single-process runs.
#[derive(Clone)]
pub struct InMemoryInventoryStore {
    products: Arc<RwLock<BTreeMap<ProductId, InventoryRecord>>>,
    reservations: Arc<RwLock<HashMap<OrderId, ReservationRecord>>>,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryInventoryStore {
    fn default() -> Self {
        Self {
            products: Arc::default(),
            reservations: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl InMemoryInventoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the datastore going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns the number of ledger entries.
    pub async fn reservation_count(&self) -> usize {
        self.reservations.read().await.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(InventoryError::Storage("datastore unavailable".to_string()))
        }
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn add_stock(&self, product_id: &ProductId, quantity: i64) -> Result<InventoryRecord> {
        self.check_available()?;
        let mut products = self.products.write().await;
        let now = Utc::now();

        let current = products.get(product_id).map_or(0, |r| r.quantity);
        let total = current.checked_add(quantity).ok_or_else(|| {
            InventoryError::Storage(format!("quantity of '{product_id}' out of range"))
        })?;

        let record = products
            .entry(product_id.clone())
            .or_insert_with(|| InventoryRecord {
                product_id: product_id.clone(),
                quantity: 0,
                reserved: 0,
                updated_at: now,
            });
        record.quantity = total;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn list(&self) -> Result<Vec<InventoryRecord>> {
        self.check_available()?;
        Ok(self.products.read().await.values().cloned().collect())
    }

    async fn reservation(&self, order_id: OrderId) -> Result<Option<ReservationRecord>> {
        self.check_available()?;
        Ok(self.reservations.read().await.get(&order_id).cloned())
    }

    async fn record_reservation(
        &self,
        order_id: OrderId,
        outcome: ReservationOutcome,
    ) -> Result<ReservationRecord> {
        self.check_available()?;
        let mut reservations = self.reservations.write().await;
        let record = reservations
            .entry(order_id)
            .or_insert_with(|| ReservationRecord {
                order_id,
                outcome,
                created_at: Utc::now(),
            });
        Ok(record.clone())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
