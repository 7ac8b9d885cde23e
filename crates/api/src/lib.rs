//! HTTP surfaces of the order and inventory services.
//!
//! Each service is its own binary with its own router; they share the
//! configuration, error mapping, health and metrics plumbing in this crate.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::routing::get;
use inventory::{InventoryService, InventoryStore};
use messaging::ConnectionManager;
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{OrderService, OrderStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const ORDER_SERVICE: &str = "order-service";
pub const INVENTORY_SERVICE: &str = "inventory-service";

/// Order store chosen at startup (PostgreSQL or in-memory).
pub type SharedOrderStore = Arc<dyn OrderStore>;

/// Inventory store chosen at startup (PostgreSQL or in-memory).
pub type SharedInventoryStore = Arc<dyn InventoryStore>;

/// Shared state of the order service handlers.
pub struct OrderAppState {
    pub orders: OrderService<SharedOrderStore>,
    pub connections: Arc<ConnectionManager>,
}

/// Shared state of the inventory service handlers.
pub struct InventoryAppState {
    pub inventory: InventoryService<SharedInventoryStore>,
    pub connections: Arc<ConnectionManager>,
}

/// Creates the order service router.
pub fn create_order_app(state: Arc<OrderAppState>, metrics_handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/health", get(|| routes::health::check(ORDER_SERVICE)))
        .route("/ready", get(routes::ready::orders))
        .route("/ready/saga", get(routes::ready::saga))
        .route(
            "/orders",
            get(routes::orders::list).post(routes::orders::create),
        )
        .with_state(state)
        .merge(metrics_router(metrics_handle))
        .layer(middleware::from_fn(|request: Request, next: Next| {
            routes::metrics::track_requests(ORDER_SERVICE, request, next)
        }))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
}

/// Creates the inventory service router.
pub fn create_inventory_app(
    state: Arc<InventoryAppState>,
    metrics_handle: PrometheusHandle,
) -> Router {
    Router::new()
        .route("/health", get(|| routes::health::check(INVENTORY_SERVICE)))
        .route("/ready", get(routes::ready::inventory))
        .route(
            "/inventory",
            get(routes::inventory::list).post(routes::inventory::create),
        )
        .with_state(state)
        .merge(metrics_router(metrics_handle))
        .layer(middleware::from_fn(|request: Request, next: Next| {
            routes::metrics::track_requests(INVENTORY_SERVICE, request, next)
        }))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
}

fn metrics_router(metrics_handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle)
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
