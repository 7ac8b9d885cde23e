use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{NewOutboxMessage, Order, OutboxMessage, PendingOrder, Result, store::OrderStore};

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the order service migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations/orders")
            .run(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        Ok(Order {
            id: OrderId::new(row.try_get("id")?),
            customer_id: CustomerId::new(row.try_get::<String, _>("customer_id")?),
            status: status.parse()?,
            total_cents: row.try_get("total_cents")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_outbox(row: PgRow) -> Result<OutboxMessage> {
        Ok(OutboxMessage {
            id: row.try_get("id")?,
            message_id: row.try_get("message_id")?,
            queue: row.try_get("queue")?,
            event_type: row.try_get("event_type")?,
            correlation_id: row.try_get("correlation_id")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert_pending(&self, pending: &PendingOrder) -> Result<(Order, OutboxMessage)> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO orders (customer_id, status, total_cents)
            VALUES ($1, $2, $3)
            RETURNING id, customer_id, status, total_cents, created_at
            "#,
        )
        .bind(pending.customer_id.as_str())
        .bind(crate::OrderStatus::Pending.as_str())
        .bind(pending.total_cents)
        .fetch_one(&mut *tx)
        .await?;
        let order = Self::row_to_order(row)?;

        let message = NewOutboxMessage::order_created(&order)?;
        let (outbox_id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO outbox (message_id, queue, event_type, correlation_id, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, created_at
            "#,
        )
        .bind(message.message_id)
        .bind(&message.queue)
        .bind(&message.event_type)
        .bind(&message.correlation_id)
        .bind(&message.payload)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((order, message.stored(outbox_id, created_at)))
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, customer_id, status, total_cents, created_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, customer_id, status, total_cents, created_at
            FROM orders
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn unpublished(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, message_id, queue, event_type, correlation_id, payload,
                   created_at, published_at, attempts, last_error
            FROM outbox
            WHERE published_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_published(&self, outbox_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE outbox SET published_at = NOW() WHERE id = $1 AND published_at IS NULL",
        )
        .bind(outbox_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_publish_failure(&self, outbox_id: i64, error: &str) -> Result<()> {
        sqlx::query("UPDATE outbox SET attempts = attempts + 1, last_error = $2 WHERE id = $1")
            .bind(outbox_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
