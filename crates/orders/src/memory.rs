use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use tokio::sync::RwLock;

use crate::{
    NewOutboxMessage, Order, OrderError, OrderStatus, OutboxMessage, PendingOrder, Result,
    store::OrderStore,
};

#[derive(Default)]
struct State {
    orders: Vec<Order>,
    outbox: Vec<OutboxMessage>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl State {
    /// Timestamps never go backwards, even if the wall clock does.
    fn now(&mut self) -> DateTime<Utc> {
        let now = match self.last_timestamp {
            Some(last) => Utc::now().max(last),
            None => Utc::now(),
        };
        self.last_timestamp = Some(now);
        now
    }
}

/// In-memory order store for tests and single-process runs.
///
/// Provides the same interface as the PostgreSQL implementation, including
/// the atomic order + outbox write.
#[derive(Clone)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl InMemoryOrderStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the datastore going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns the number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns every outbox row, published or not, in relay order.
    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state.read().await.outbox.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(OrderError::Storage("datastore unavailable".to_string()))
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_pending(&self, pending: &PendingOrder) -> Result<(Order, OutboxMessage)> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let created_at = state.now();
        let order = Order {
            id: OrderId::new(state.orders.len() as i64 + 1),
            customer_id: pending.customer_id.clone(),
            status: OrderStatus::Pending,
            total_cents: pending.total_cents,
            created_at,
        };
        // Built before anything is pushed so a failure leaves no partial write.
        let message = NewOutboxMessage::order_created(&order)?
            .stored(state.outbox.len() as i64 + 1, created_at);

        state.orders.push(order.clone());
        state.outbox.push(message.clone());
        Ok((order, message))
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Order>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut orders = state.orders.clone();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders.truncate(limit);
        Ok(orders)
    }

    async fn unpublished(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|m| !m.is_published())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, outbox_id: i64) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let now = state.now();
        let message = state
            .outbox
            .iter_mut()
            .find(|m| m.id == outbox_id)
            .ok_or_else(|| OrderError::Storage(format!("outbox row {outbox_id} not found")))?;
        if message.published_at.is_none() {
            message.published_at = Some(now);
        }
        Ok(())
    }

    async fn record_publish_failure(&self, outbox_id: i64, error: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let message = state
            .outbox
            .iter_mut()
            .find(|m| m.id == outbox_id)
            .ok_or_else(|| OrderError::Storage(format!("outbox row {outbox_id} not found")))?;
        message.attempts += 1;
        message.last_error = Some(error.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
