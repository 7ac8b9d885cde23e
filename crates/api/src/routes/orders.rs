//! Order endpoints of the order service.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use orders::{NewOrder, Order, OrderReceipt};
use serde::{Deserialize, Serialize};

use crate::OrderAppState;
use crate::error::ApiError;

/// Most orders returned by `GET /orders`.
pub const LIST_LIMIT: usize = 100;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: Option<String>,
    pub total_cents: Option<i64>,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderAcceptedResponse {
    pub id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<OrderReceipt> for OrderAcceptedResponse {
    fn from(receipt: OrderReceipt) -> Self {
        Self {
            id: receipt.id.as_i64(),
            status: receipt.status.to_string(),
            created_at: receipt.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: i64,
    pub customer_id: String,
    pub status: String,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.as_i64(),
            customer_id: order.customer_id.to_string(),
            status: order.status.to_string(),
            total_cents: order.total_cents,
            created_at: order.created_at,
        }
    }
}

// -- Handlers --

/// POST /orders: record a pending order; its event is relayed asynchronously.
#[tracing::instrument(skip(state, payload))]
pub async fn create(
    State(state): State<Arc<OrderAppState>>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderAcceptedResponse>), ApiError> {
    let Json(req) = payload?;
    let receipt = state
        .orders
        .create_order(NewOrder {
            customer_id: req.customer_id,
            total_cents: req.total_cents,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(receipt.into())))
}

/// GET /orders: the most recent orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<OrderAppState>>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.orders.list_recent(LIST_LIMIT).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}
