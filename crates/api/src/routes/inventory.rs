//! Stock endpoints of the inventory service.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use inventory::InventoryRecord;
use serde::{Deserialize, Serialize};

use crate::InventoryAppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct AddStockRequest {
    pub product_id: Option<String>,
    pub quantity: Option<i64>,
}

/// Echo of an accepted stock write: `quantity` is the increment, not the total.
#[derive(Debug, Serialize)]
pub struct StockAddedResponse {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
pub struct InventoryResponse {
    pub product_id: String,
    pub quantity: i64,
    pub reserved: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<InventoryRecord> for InventoryResponse {
    fn from(record: InventoryRecord) -> Self {
        Self {
            product_id: record.product_id.to_string(),
            quantity: record.quantity,
            reserved: record.reserved,
            updated_at: record.updated_at,
        }
    }
}

/// POST /inventory: add stock to a product.
#[tracing::instrument(skip(state, payload))]
pub async fn create(
    State(state): State<Arc<InventoryAppState>>,
    payload: Result<Json<AddStockRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StockAddedResponse>), ApiError> {
    let Json(req) = payload?;
    let record = state
        .inventory
        .add_stock(req.product_id.as_deref(), req.quantity)
        .await?;

    let response = StockAddedResponse {
        product_id: record.product_id.to_string(),
        quantity: req.quantity.unwrap_or(0),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /inventory: the full stock snapshot.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<InventoryAppState>>,
) -> Result<Json<Vec<InventoryResponse>>, ApiError> {
    let records = state.inventory.list().await?;
    Ok(Json(records.into_iter().map(InventoryResponse::from).collect()))
}
