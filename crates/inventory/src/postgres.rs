use async_trait::async_trait;
use common::{OrderId, ProductId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    InventoryRecord, ReservationOutcome, ReservationRecord, Result, store::InventoryStore,
};

/// PostgreSQL-backed inventory store.
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Creates a new PostgreSQL inventory store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the inventory service migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations/inventory")
            .run(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<InventoryRecord> {
        Ok(InventoryRecord {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity: row.try_get("quantity")?,
            reserved: row.try_get("reserved")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<ReservationRecord> {
        Ok(ReservationRecord {
            order_id: OrderId::new(row.try_get("order_id")?),
            outcome: ReservationOutcome::from_reserved(row.try_get("reserved")?),
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn add_stock(&self, product_id: &ProductId, quantity: i64) -> Result<InventoryRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO inventory (product_id, quantity, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (product_id)
            DO UPDATE SET quantity = inventory.quantity + EXCLUDED.quantity, updated_at = NOW()
            RETURNING product_id, quantity, reserved, updated_at
            "#,
        )
        .bind(product_id.as_str())
        .bind(quantity)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_record(row)
    }

    async fn list(&self) -> Result<Vec<InventoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, quantity, reserved, updated_at
            FROM inventory
            ORDER BY product_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn reservation(&self, order_id: OrderId) -> Result<Option<ReservationRecord>> {
        let row = sqlx::query(
            "SELECT order_id, reserved, created_at FROM reservations WHERE order_id = $1",
        )
        .bind(order_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn record_reservation(
        &self,
        order_id: OrderId,
        outcome: ReservationOutcome,
    ) -> Result<ReservationRecord> {
        sqlx::query(
            r#"
            INSERT INTO reservations (order_id, reserved)
            VALUES ($1, $2)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order_id.as_i64())
        .bind(outcome.is_reserved())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT order_id, reserved, created_at FROM reservations WHERE order_id = $1",
        )
        .bind(order_id.as_i64())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_reservation(row)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
