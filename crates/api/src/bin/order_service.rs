//! Order service entry point.
//!
//! Accepts orders over HTTP and relays their `order.created` events through
//! the outbox. The broker may be down at startup or at any later point;
//! orders are still accepted and the events leave once it is back.

use std::sync::Arc;

use api::config::Config;
use api::{OrderAppState, SharedOrderStore, bootstrap};
use messaging::{AmqpConnector, ConnectionManager, Publisher, order_service_topology};
use orders::{InMemoryOrderStore, OrderService, OutboxRelay, PostgresOrderStore};

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing and metrics
    bootstrap::init_tracing(&config.log_level);
    let metrics_handle = bootstrap::install_metrics();

    // 2. Open the datastore
    let store: SharedOrderStore = match &config.database_url {
        Some(url) => {
            let pool = bootstrap::connect_database(&config, url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresOrderStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run order migrations");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, orders are kept in memory");
            Arc::new(InMemoryOrderStore::new())
        }
    };
    let orders = OrderService::new(store.clone()).with_storage_timeout(config.storage_timeout);

    // 3. Connect to the broker; a failure here is not fatal
    let connections = Arc::new(ConnectionManager::new(
        AmqpConnector::new(config.rabbitmq_url.clone()),
        order_service_topology(),
        config.reconnect_policy(),
    ));
    if let Err(e) = connections.connect().await {
        tracing::warn!(error = %e, "broker unavailable at startup, events stay in the outbox until it connects");
    }
    let supervisor = connections.spawn_supervisor();

    // 4. Start the outbox relay
    let publisher = Publisher::new(connections.clone(), config.publish_timeout);
    let relay = OutboxRelay::new(store, publisher, orders.relay_signal())
        .with_batch_size(config.outbox_batch_size)
        .with_poll_interval(config.outbox_poll_interval)
        .with_storage_timeout(config.storage_timeout)
        .spawn();

    // 5. Serve HTTP
    let state = Arc::new(OrderAppState {
        orders,
        connections,
    });
    let app = api::create_order_app(state, metrics_handle);
    bootstrap::serve(app, &config.addr(), api::ORDER_SERVICE).await;

    relay.abort();
    supervisor.abort();
}
