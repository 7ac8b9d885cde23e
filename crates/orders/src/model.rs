use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId};
use serde::{Deserialize, Serialize};

use crate::{OrderError, Result};

/// Status of an order.
///
/// Orders are created `PENDING`; nothing moves them further yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
}

impl OrderStatus {
    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            other => Err(OrderError::Storage(format!("unknown order status '{other}'"))),
        }
    }
}

/// A recorded order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn receipt(&self) -> OrderReceipt {
        OrderReceipt {
            id: self.id,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// Request to create an order; absent fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: Option<String>,
    pub total_cents: Option<i64>,
}

impl NewOrder {
    pub fn new(customer_id: impl Into<String>, total_cents: i64) -> Self {
        Self {
            customer_id: Some(customer_id.into()),
            total_cents: Some(total_cents),
        }
    }

    /// Applies defaults and validates the total.
    pub fn validate(&self) -> Result<PendingOrder> {
        let total_cents = self.total_cents.unwrap_or(0);
        if total_cents < 0 {
            return Err(OrderError::InvalidTotal(total_cents));
        }
        Ok(PendingOrder {
            customer_id: CustomerId::or_anonymous(self.customer_id.as_deref()),
            total_cents,
        })
    }
}

/// A validated order, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOrder {
    pub customer_id: CustomerId,
    pub total_cents: i64,
}

/// What the caller learns after an order has been accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub id: OrderId,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}
