//! Consumption of `order.created`.
//!
//! Each delivery is handled to completion before the next one is taken:
//! parse, decide (or replay the recorded decision), publish
//! `inventory.reserved`, then ack. The ack never happens before the publish,
//! so a crash in between leads to a redelivery, never to a lost reply.
//!
//! Failures caused by an unavailable store or broker are requeued after a
//! pause and never count against the delivery's attempts. Only failures of
//! the message itself go through the [`FailurePolicy`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::{OrderId, SagaSignal, SagaStage};
use futures_util::StreamExt;
use messaging::{
    BrokerEvent, Delivery, InventoryReservedEvent, OrderCreatedEvent, Publisher, topology,
};
use tokio::task::JoinHandle;

use crate::{
    FailureAction, FailurePolicy, InventoryError, ProductDemand, ReservationOutcome, Result,
    reserver::Reserver, store::InventoryStore,
};

const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONSUMER_TAG: &str = "inventory-service";
const DEFAULT_TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(1);
const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(100);

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// `inventory.reserved` was published and the delivery acked.
    Processed {
        order_id: OrderId,
        outcome: ReservationOutcome,
        /// The outcome came from the ledger rather than a new decision.
        replayed: bool,
    },
    /// Processing failed; the message was republished for `next_attempt` and acked.
    Retried { next_attempt: u32 },
    /// Processing failed for the last allowed time; the message was moved
    /// to the dead-letter queue and acked.
    DeadLettered { attempts: u32 },
    /// The delivery was nacked back onto its queue, either because the
    /// failure was transient or because the policy requeues forever.
    Requeued,
}

/// Turns `order.created` deliveries into `inventory.reserved` events.
pub struct OrderCreatedConsumer<S, R> {
    store: S,
    reserver: R,
    publisher: Publisher,
    policy: FailurePolicy,
    storage_timeout: Duration,
    transient_retry_delay: Duration,
    consumer_tag: String,
}

impl<S: InventoryStore, R: Reserver> OrderCreatedConsumer<S, R> {
    /// Creates a consumer with the default failure policy.
    pub fn new(store: S, reserver: R, publisher: Publisher) -> Self {
        Self {
            store,
            reserver,
            publisher,
            policy: FailurePolicy::default(),
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
            transient_retry_delay: DEFAULT_TRANSIENT_RETRY_DELAY,
            consumer_tag: DEFAULT_CONSUMER_TAG.to_string(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    /// Pause before a transiently failed delivery is handed back to the broker.
    pub fn with_transient_retry_delay(mut self, delay: Duration) -> Self {
        self.transient_retry_delay = delay;
        self
    }

    pub fn with_consumer_tag(mut self, consumer_tag: impl Into<String>) -> Self {
        self.consumer_tag = consumer_tag.into();
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Processes and settles one delivery.
    ///
    /// Processing failures are settled (requeued, retried or dead-lettered)
    /// and are not returned as errors. An error means the delivery could not be
    /// settled at all (the broker connection is gone); the broker will
    /// redeliver it.
    #[tracing::instrument(
        skip(self, delivery),
        fields(
            delivery_tag = delivery.delivery_tag,
            attempt = delivery.headers.attempt,
            redelivered = delivery.redelivered,
            order_id
        )
    )]
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Result<DeliveryOutcome> {
        match self.process(delivery).await {
            Ok((order_id, outcome, replayed)) => {
                delivery.ack().await?;
                metrics::counter!("inventory_messages_processed_total").increment(1);

                let stage = SagaStage::ReservationRequested
                    .advance(SagaSignal::InventoryReserved {
                        reserved: outcome.is_reserved(),
                    })
                    .unwrap_or(SagaStage::ReservationRequested);
                tracing::info!(%order_id, replayed, stage = %stage, "order processed");

                Ok(DeliveryOutcome::Processed {
                    order_id,
                    outcome,
                    replayed,
                })
            }
            Err(e) if e.is_transient() => {
                metrics::counter!("inventory_messages_failed_total", "kind" => "transient")
                    .increment(1);
                tracing::warn!(
                    error = %e,
                    retry_in_ms = self.transient_retry_delay.as_millis() as u64,
                    "order processing failed, requeueing"
                );
                tokio::time::sleep(self.transient_retry_delay).await;
                delivery.nack(true).await?;
                Ok(DeliveryOutcome::Requeued)
            }
            Err(e) => {
                metrics::counter!("inventory_messages_failed_total", "kind" => "permanent")
                    .increment(1);
                tracing::warn!(error = %e, "order processing failed");
                self.settle_failure(delivery).await
            }
        }
    }

    async fn process(&self, delivery: &Delivery) -> Result<(OrderId, ReservationOutcome, bool)> {
        let event = OrderCreatedEvent::from_payload(&delivery.payload)
            .map_err(|e| InventoryError::MalformedMessage(e.to_string()))?;
        tracing::Span::current().record("order_id", event.order_id.as_i64());

        let (outcome, replayed) = match self.timed(self.store.reservation(event.order_id)).await? {
            Some(record) => (record.outcome, true),
            None => {
                let demand = ProductDemand::from(&event);
                let decided = self.timed(self.reserver.reserve(&demand)).await?;
                let record = self
                    .timed(self.store.record_reservation(event.order_id, decided))
                    .await?;
                (record.outcome, false)
            }
        };

        self.publisher
            .publish(&InventoryReservedEvent {
                order_id: event.order_id,
                reserved: outcome.is_reserved(),
            })
            .await?;

        Ok((event.order_id, outcome, replayed))
    }

    async fn settle_failure(&self, delivery: &Delivery) -> Result<DeliveryOutcome> {
        let attempt = delivery.headers.attempt;
        match self.policy.action_for(attempt) {
            FailureAction::Requeue => {
                delivery.nack(true).await?;
                Ok(DeliveryOutcome::Requeued)
            }
            FailureAction::Retry => {
                let retry = delivery.retry_message();
                if let Err(e) = self
                    .publisher
                    .publish_message(topology::ORDER_CREATED, retry)
                    .await
                {
                    tracing::warn!(error = %e, "retry publish failed, requeueing");
                    delivery.nack(true).await?;
                    return Ok(DeliveryOutcome::Requeued);
                }
                delivery.ack().await?;
                Ok(DeliveryOutcome::Retried {
                    next_attempt: attempt.saturating_add(1),
                })
            }
            FailureAction::DeadLetter => {
                let forward = delivery.forward_message();
                if let Err(e) = self
                    .publisher
                    .publish_message(topology::ORDER_CREATED_DEAD_LETTER, forward)
                    .await
                {
                    tracing::warn!(error = %e, "dead-letter publish failed, requeueing");
                    delivery.nack(true).await?;
                    return Ok(DeliveryOutcome::Requeued);
                }
                delivery.ack().await?;
                metrics::counter!("inventory_messages_dead_lettered_total").increment(1);

                let stage = SagaStage::ReservationRequested
                    .advance(SagaSignal::DeadLettered)
                    .unwrap_or(SagaStage::ReservationRequested);
                tracing::error!(
                    attempts = attempt,
                    queue = topology::ORDER_CREATED_DEAD_LETTER,
                    stage = %stage,
                    "message dead-lettered"
                );
                Ok(DeliveryOutcome::DeadLettered { attempts: attempt })
            }
        }
    }

    async fn timed<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.storage_timeout, operation)
            .await
            .map_err(|_| InventoryError::StorageTimeout(self.storage_timeout))?
    }

    /// Consumes `order.created` for as long as the task lives.
    ///
    /// Subscribes on the current connection and handles deliveries one at a
    /// time. When the subscription breaks it waits for the connection
    /// manager to reconnect and subscribes again.
    pub async fn run(&self) {
        let connections = Arc::clone(self.publisher.connections());
        loop {
            let broker = match connections.current().await {
                Ok(broker) => broker,
                Err(_) => {
                    connections.wait_until_connected().await;
                    continue;
                }
            };

            let mut deliveries = match broker
                .consume(topology::ORDER_CREATED, &self.consumer_tag)
                .await
            {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    tracing::warn!(error = %e, "subscribe failed");
                    if !broker.is_connected() {
                        connections.mark_disconnected_if(&broker, &e.to_string()).await;
                    }
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    continue;
                }
            };
            tracing::info!(
                queue = topology::ORDER_CREATED,
                consumer_tag = %self.consumer_tag,
                policy = ?self.policy,
                "consuming"
            );

            while let Some(item) = deliveries.next().await {
                let delivery = match item {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        tracing::warn!(error = %e, "delivery stream failed");
                        break;
                    }
                };
                if let Err(e) = self.handle_delivery(&delivery).await {
                    tracing::warn!(error = %e, "delivery could not be settled");
                    break;
                }
            }

            drop(deliveries);
            if !broker.is_connected() {
                connections
                    .mark_disconnected_if(&broker, "consumer stream closed")
                    .await;
            }
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    }
}

impl<S, R> OrderCreatedConsumer<S, R>
where
    S: InventoryStore + 'static,
    R: Reserver + 'static,
{
    /// Spawns [`run`](Self::run) on the runtime.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AlwaysReserve, InMemoryInventoryStore};
    use async_trait::async_trait;
    use common::CustomerId;
    use messaging::{
        Broker, ConnectionManager, DeliveryStream, InMemoryBroker, InMemoryConnector,
        ReconnectPolicy,
    };

    type TestConsumer<R> = OrderCreatedConsumer<InMemoryInventoryStore, R>;

    async fn connections(broker: &InMemoryBroker) -> Arc<ConnectionManager> {
        let manager = Arc::new(ConnectionManager::new(
            InMemoryConnector::new(broker.clone()),
            topology::inventory_service_topology(),
            ReconnectPolicy::default(),
        ));
        manager.connect().await.unwrap();
        manager
    }

    async fn consumer(
        broker: &InMemoryBroker,
        store: &InMemoryInventoryStore,
    ) -> TestConsumer<AlwaysReserve<InMemoryInventoryStore>> {
        let publisher = Publisher::new(connections(broker).await, Duration::from_secs(1));
        OrderCreatedConsumer::new(store.clone(), AlwaysReserve::new(store.clone()), publisher)
            .with_transient_retry_delay(Duration::from_millis(1))
    }

    async fn publish_order(broker: &InMemoryBroker, order_id: i64) {
        let event = OrderCreatedEvent {
            order_id: OrderId::new(order_id),
            customer_id: CustomerId::new("cust-1"),
            total_cents: 2500,
        };
        broker
            .publish(topology::ORDER_CREATED, event.to_message().unwrap())
            .await
            .unwrap();
    }

    async fn publish_raw(broker: &InMemoryBroker, body: &[u8]) {
        let message = messaging::OutgoingMessage::persistent(
            body.to_vec(),
            messaging::MessageHeaders::new("OrderCreated"),
        );
        broker
            .publish(topology::ORDER_CREATED, message)
            .await
            .unwrap();
    }

    async fn subscribe(broker: &InMemoryBroker) -> DeliveryStream {
        broker
            .consume(topology::ORDER_CREATED, "test")
            .await
            .unwrap()
    }

    async fn next(stream: &mut DeliveryStream) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("no delivery")
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_reserves_publishes_and_acks() {
        let broker = InMemoryBroker::new();
        let store = InMemoryInventoryStore::new();
        let consumer = consumer(&broker, &store).await;
        publish_order(&broker, 1).await;

        let mut stream = subscribe(&broker).await;
        let outcome = consumer.handle_delivery(&next(&mut stream).await).await.unwrap();

        assert_eq!(
            outcome,
            DeliveryOutcome::Processed {
                order_id: OrderId::new(1),
                outcome: ReservationOutcome::Reserved,
                replayed: false,
            }
        );
        let replies = broker.queued_messages(topology::INVENTORY_RESERVED).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(
            replies[0].json(),
            serde_json::json!({"orderId": 1, "reserved": true})
        );
        assert_eq!(replies[0].headers.correlation_id.as_deref(), Some("1"));
        assert!(replies[0].persistent);
        assert_eq!(broker.message_count(topology::ORDER_CREATED).await, 0);
        assert_eq!(broker.unacked_count(topology::ORDER_CREATED).await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_order_event_replays_recorded_outcome() {
        let broker = InMemoryBroker::new();
        let store = InMemoryInventoryStore::new();
        let consumer = consumer(&broker, &store).await;
        publish_order(&broker, 7).await;
        publish_order(&broker, 7).await;

        let mut stream = subscribe(&broker).await;
        let first = consumer.handle_delivery(&next(&mut stream).await).await.unwrap();
        let second = consumer.handle_delivery(&next(&mut stream).await).await.unwrap();

        assert!(matches!(first, DeliveryOutcome::Processed { replayed: false, .. }));
        assert!(matches!(second, DeliveryOutcome::Processed { replayed: true, .. }));
        assert_eq!(store.reservation_count().await, 1);
        // Each processing emits its own reply.
        assert_eq!(broker.message_count(topology::INVENTORY_RESERVED).await, 2);
    }

    #[tokio::test]
    async fn test_lost_ack_redelivery_replays_without_new_decision() {
        let broker = InMemoryBroker::new();
        let store = InMemoryInventoryStore::new();
        let consumer = consumer(&broker, &store).await;
        publish_order(&broker, 8).await;

        let connection = broker.connect().unwrap();
        let mut stream = connection
            .consume(topology::ORDER_CREATED, "test")
            .await
            .unwrap();
        let delivery = next(&mut stream).await;

        // The consuming connection dies; the publisher gets a fresh one.
        broker.disconnect().await;
        broker.restore();
        consumer.publisher.connections().connect().await.unwrap();

        // The reply goes out but the ack cannot reach the broker.
        assert!(consumer.handle_delivery(&delivery).await.is_err());
        assert_eq!(broker.message_count(topology::INVENTORY_RESERVED).await, 1);
        assert_eq!(store.reservation_count().await, 1);

        let mut stream = subscribe(&broker).await;
        let redelivered = next(&mut stream).await;
        assert!(redelivered.redelivered);
        assert_eq!(redelivered.headers, delivery.headers);

        let outcome = consumer.handle_delivery(&redelivered).await.unwrap();
        assert_eq!(
            outcome,
            DeliveryOutcome::Processed {
                order_id: OrderId::new(8),
                outcome: ReservationOutcome::Reserved,
                replayed: true,
            }
        );
        assert_eq!(store.reservation_count().await, 1);
        assert_eq!(broker.message_count(topology::INVENTORY_RESERVED).await, 2);
        assert_eq!(broker.message_count(topology::ORDER_CREATED).await, 0);
    }

    struct OutOfStock;

    #[async_trait]
    impl Reserver for OutOfStock {
        async fn reserve(&self, _: &ProductDemand) -> Result<ReservationOutcome> {
            Ok(ReservationOutcome::InsufficientStock)
        }
    }

    #[tokio::test]
    async fn test_insufficient_stock_replies_not_reserved() {
        let broker = InMemoryBroker::new();
        let store = InMemoryInventoryStore::new();
        let publisher = Publisher::new(connections(&broker).await, Duration::from_secs(1));
        let consumer = OrderCreatedConsumer::new(store.clone(), OutOfStock, publisher);
        publish_order(&broker, 2).await;

        let mut stream = subscribe(&broker).await;
        consumer.handle_delivery(&next(&mut stream).await).await.unwrap();

        let replies = broker.queued_messages(topology::INVENTORY_RESERVED).await;
        assert_eq!(
            replies[0].json(),
            serde_json::json!({"orderId": 2, "reserved": false})
        );
    }

    #[tokio::test]
    async fn test_malformed_message_is_retried_then_dead_lettered() {
        let broker = InMemoryBroker::new();
        let store = InMemoryInventoryStore::new();
        let consumer = consumer(&broker, &store)
            .await
            .with_policy(FailurePolicy::DeadLetterAfter { max_attempts: 3 });
        publish_raw(&broker, b"not json").await;

        let mut stream = subscribe(&broker).await;
        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(consumer.handle_delivery(&next(&mut stream).await).await.unwrap());
        }

        assert_eq!(
            outcomes,
            vec![
                DeliveryOutcome::Retried { next_attempt: 2 },
                DeliveryOutcome::Retried { next_attempt: 3 },
                DeliveryOutcome::DeadLettered { attempts: 3 },
            ]
        );
        assert_eq!(broker.message_count(topology::ORDER_CREATED).await, 0);
        let dead = broker
            .queued_messages(topology::ORDER_CREATED_DEAD_LETTER)
            .await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, b"not json");
        assert_eq!(dead[0].headers.attempt, 3);
        assert_eq!(broker.message_count(topology::INVENTORY_RESERVED).await, 0);
    }

    #[tokio::test]
    async fn test_requeue_forever_keeps_poison_message() {
        let broker = InMemoryBroker::new();
        let store = InMemoryInventoryStore::new();
        let consumer = consumer(&broker, &store)
            .await
            .with_policy(FailurePolicy::RequeueForever);
        publish_raw(&broker, b"{}").await;

        let mut stream = subscribe(&broker).await;
        for _ in 0..10 {
            let delivery = next(&mut stream).await;
            assert_eq!(
                consumer.handle_delivery(&delivery).await.unwrap(),
                DeliveryOutcome::Requeued
            );
        }

        let queued = broker.queued_messages(topology::ORDER_CREATED).await;
        assert_eq!(queued.len(), 1);
        assert!(queued[0].redelivered);
        assert_eq!(
            broker
                .message_count(topology::ORDER_CREATED_DEAD_LETTER)
                .await,
            0
        );
    }

    #[tokio::test]
    async fn test_store_outage_does_not_use_up_attempts() {
        let broker = InMemoryBroker::new();
        let store = InMemoryInventoryStore::new();
        let consumer = consumer(&broker, &store)
            .await
            .with_policy(FailurePolicy::DeadLetterAfter { max_attempts: 3 });
        publish_order(&broker, 4).await;
        store.set_available(false);

        let mut stream = subscribe(&broker).await;
        for _ in 0..6 {
            let delivery = next(&mut stream).await;
            assert_eq!(delivery.headers.attempt, 1);
            let outcome = consumer.handle_delivery(&delivery).await.unwrap();
            assert_eq!(outcome, DeliveryOutcome::Requeued);
        }
        assert_eq!(
            broker
                .message_count(topology::ORDER_CREATED_DEAD_LETTER)
                .await,
            0
        );
        assert_eq!(broker.message_count(topology::INVENTORY_RESERVED).await, 0);

        store.set_available(true);
        let delivery = next(&mut stream).await;
        assert!(delivery.redelivered);
        let outcome = consumer.handle_delivery(&delivery).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Processed { replayed: false, .. }));
        assert_eq!(broker.message_count(topology::INVENTORY_RESERVED).await, 1);
        assert_eq!(store.reservation_count().await, 1);
    }

    #[tokio::test]
    async fn test_short_store_outage_while_running_loses_nothing() {
        let broker = InMemoryBroker::new();
        let store = InMemoryInventoryStore::new();
        let consumer = Arc::new(
            consumer(&broker, &store)
                .await
                .with_transient_retry_delay(Duration::from_millis(5)),
        );
        store.set_available(false);
        let task = Arc::clone(&consumer).spawn();

        publish_order(&broker, 9).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.set_available(true);
        wait_for_replies(&broker, 1).await;

        assert_eq!(
            broker
                .message_count(topology::ORDER_CREATED_DEAD_LETTER)
                .await,
            0
        );
        assert_eq!(store.reservation_count().await, 1);
        let replies = broker.queued_messages(topology::INVENTORY_RESERVED).await;
        assert_eq!(
            replies[0].json(),
            serde_json::json!({"orderId": 9, "reserved": true})
        );

        task.abort();
    }

    #[tokio::test]
    async fn test_transient_failure_waits_before_requeue() {
        let broker = InMemoryBroker::new();
        let store = InMemoryInventoryStore::new();
        let consumer = consumer(&broker, &store)
            .await
            .with_transient_retry_delay(Duration::from_millis(50));
        publish_order(&broker, 3).await;
        store.set_available(false);

        let mut stream = subscribe(&broker).await;
        let delivery = next(&mut stream).await;
        let started = tokio::time::Instant::now();
        consumer.handle_delivery(&delivery).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(broker.message_count(topology::ORDER_CREATED).await, 1);
    }

    #[tokio::test]
    async fn test_no_ack_without_publish() {
        let broker = InMemoryBroker::new();
        let store = InMemoryInventoryStore::new();
        let consumer = consumer(&broker, &store).await;
        publish_order(&broker, 5).await;

        let mut stream = subscribe(&broker).await;
        let delivery = next(&mut stream).await;
        broker.disconnect().await;

        // Neither the reply nor the settlement can reach the broker.
        assert!(consumer.handle_delivery(&delivery).await.is_err());

        broker.restore();
        let queued = broker.queued_messages(topology::ORDER_CREATED).await;
        assert_eq!(queued.len(), 1);
        assert!(queued[0].redelivered);
        assert_eq!(broker.message_count(topology::INVENTORY_RESERVED).await, 0);
    }

    #[tokio::test]
    async fn test_run_resubscribes_after_reconnect() {
        let broker = InMemoryBroker::new();
        let store = InMemoryInventoryStore::new();
        let connections = Arc::new(ConnectionManager::new(
            InMemoryConnector::new(broker.clone()),
            topology::inventory_service_topology(),
            ReconnectPolicy {
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(20),
                check_interval: Duration::from_millis(5),
            },
        ));
        connections.connect().await.unwrap();
        let supervisor = connections.spawn_supervisor();
        let publisher = Publisher::new(connections, Duration::from_secs(1));
        let consumer = Arc::new(
            OrderCreatedConsumer::new(store.clone(), AlwaysReserve::new(store.clone()), publisher)
                .with_transient_retry_delay(Duration::from_millis(5)),
        );
        let task = Arc::clone(&consumer).spawn();

        publish_order(&broker, 1).await;
        wait_for_replies(&broker, 1).await;

        broker.disconnect().await;
        broker.restore();
        publish_order(&broker, 2).await;
        wait_for_replies(&broker, 2).await;

        task.abort();
        supervisor.abort();
    }

    async fn wait_for_replies(broker: &InMemoryBroker, count: usize) {
        tokio::time::timeout(Duration::from_secs(3), async {
            while broker.message_count(topology::INVENTORY_RESERVED).await < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("consumer did not reply");
    }
}
