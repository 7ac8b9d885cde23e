//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inventory::InventoryError;
use orders::OrderError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Order service error.
    Order(OrderError),
    /// Inventory service error.
    Inventory(InventoryError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Order(err) => order_error_to_response(err),
            ApiError::Inventory(err) => inventory_error_to_response(err),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn order_error_to_response(err: OrderError) -> (StatusCode, String) {
    match &err {
        OrderError::InvalidTotal(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        OrderError::StorageTimeout(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn inventory_error_to_response(err: InventoryError) -> (StatusCode, String) {
    match &err {
        InventoryError::InvalidProduct => (StatusCode::BAD_REQUEST, err.to_string()),
        InventoryError::StorageTimeout(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        ApiError::Inventory(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
