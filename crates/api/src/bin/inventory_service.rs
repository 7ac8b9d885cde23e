//! Inventory service entry point.
//!
//! Consumes `order.created`, answers on `inventory.reserved`, and serves the
//! stock endpoints. Without a broker at startup there is nothing to do, so
//! the process exits.

use std::sync::Arc;

use api::config::Config;
use api::{InventoryAppState, SharedInventoryStore, bootstrap};
use inventory::{
    AlwaysReserve, InMemoryInventoryStore, InventoryService, OrderCreatedConsumer,
    PostgresInventoryStore,
};
use messaging::{AmqpConnector, ConnectionManager, Publisher, inventory_service_topology};

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing and metrics
    bootstrap::init_tracing(&config.log_level);
    let metrics_handle = bootstrap::install_metrics();

    // 2. Open the datastore
    let store: SharedInventoryStore = match &config.database_url {
        Some(url) => {
            let pool = bootstrap::connect_database(&config, url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresInventoryStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run inventory migrations");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, inventory is kept in memory");
            Arc::new(InMemoryInventoryStore::new())
        }
    };

    // 3. Connect to the broker; a failure here is fatal
    let connections = Arc::new(ConnectionManager::new(
        AmqpConnector::new(config.rabbitmq_url.clone()),
        inventory_service_topology(),
        config.reconnect_policy(),
    ));
    if let Err(e) = connections.connect().await {
        tracing::error!(error = %e, "failed to connect to the broker");
        std::process::exit(1);
    }
    let supervisor = connections.spawn_supervisor();

    // 4. Start consuming order.created
    let publisher = Publisher::new(connections.clone(), config.publish_timeout);
    let consumer = Arc::new(
        OrderCreatedConsumer::new(store.clone(), AlwaysReserve::new(store.clone()), publisher)
            .with_policy(config.failure_policy())
            .with_storage_timeout(config.storage_timeout)
            .with_transient_retry_delay(config.transient_retry_delay),
    );
    let consumer_task = consumer.spawn();

    // 5. Serve HTTP
    let state = Arc::new(InventoryAppState {
        inventory: InventoryService::new(store).with_storage_timeout(config.storage_timeout),
        connections,
    });
    let app = api::create_inventory_app(state, metrics_handle);
    bootstrap::serve(app, &config.addr(), api::INVENTORY_SERVICE).await;

    consumer_task.abort();
    supervisor.abort();
}
