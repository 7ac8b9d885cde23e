//! Readiness endpoints.
//!
//! The order service is ready when it can durably record orders; broker
//! state is reported but does not gate it, since the outbox holds events
//! until the broker returns. The inventory service can do nothing without
//! the broker, so it needs both.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use messaging::ConnectionManager;
use serde::Serialize;

use crate::{InventoryAppState, OrderAppState};

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datastore: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saga: Option<&'static str>,
}

type Readiness = (StatusCode, Json<ReadyResponse>);

impl ReadyResponse {
    fn new(ready: bool) -> Self {
        Self {
            status: if ready { "ready" } else { "not_ready" },
            datastore: None,
            broker: None,
            saga: None,
        }
    }

    fn into_readiness(self) -> Readiness {
        let code = if self.status == "ready" {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (code, Json(self))
    }
}

fn datastore(up: bool) -> &'static str {
    if up { "up" } else { "down" }
}

fn connection(connections: &ConnectionManager) -> &'static str {
    if connections.is_connected() {
        "connected"
    } else {
        "disconnected"
    }
}

fn log_store_check<E: std::fmt::Display>(result: Result<(), E>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "readiness: datastore check failed");
            false
        }
    }
}

/// GET /ready: order service: datastore reachable.
pub async fn orders(State(state): State<Arc<OrderAppState>>) -> Readiness {
    let store_up = log_store_check(state.orders.ping().await);
    ReadyResponse {
        datastore: Some(datastore(store_up)),
        saga: Some(connection(&state.connections)),
        ..ReadyResponse::new(store_up)
    }
    .into_readiness()
}

/// GET /ready/saga: order service: broker connected.
pub async fn saga(State(state): State<Arc<OrderAppState>>) -> Readiness {
    ReadyResponse {
        saga: Some(connection(&state.connections)),
        ..ReadyResponse::new(state.connections.is_connected())
    }
    .into_readiness()
}

/// GET /ready: inventory service: datastore reachable and broker connected.
pub async fn inventory(State(state): State<Arc<InventoryAppState>>) -> Readiness {
    let store_up = log_store_check(state.inventory.ping().await);
    let broker_up = state.connections.is_connected();
    ReadyResponse {
        datastore: Some(datastore(store_up)),
        broker: Some(connection(&state.connections)),
        ..ReadyResponse::new(store_up && broker_up)
    }
    .into_readiness()
}
