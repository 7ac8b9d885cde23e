use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    BrokerEvent, ConnectionManager, MessageHeaders, MessagingError, OutgoingMessage, Result,
};

/// Publishes events through the participant's owned broker connection.
///
/// Publishing never waits for a consumer and never waits for a reconnect:
/// with no live connection it fails immediately with `NotConnected`.
#[derive(Clone)]
pub struct Publisher {
    connections: Arc<ConnectionManager>,
    timeout: Duration,
}

impl Publisher {
    /// Creates a publisher whose publishes give up after `timeout`.
    pub fn new(connections: Arc<ConnectionManager>, timeout: Duration) -> Self {
        Self {
            connections,
            timeout,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Serializes `event` and publishes it persistently to its queue.
    ///
    /// Returns the headers the message was published with.
    #[tracing::instrument(skip(self, event), fields(queue = E::QUEUE, event_type = E::EVENT_TYPE))]
    pub async fn publish<E: BrokerEvent>(&self, event: &E) -> Result<MessageHeaders> {
        let message = event.to_message()?;
        let headers = message.headers.clone();
        self.publish_message(E::QUEUE, message).await?;
        Ok(headers)
    }

    /// Publishes a prebuilt message to `queue`.
    pub async fn publish_message(&self, queue: &str, message: OutgoingMessage) -> Result<()> {
        let broker = self.connections.current().await?;
        let start = Instant::now();

        let result = match tokio::time::timeout(self.timeout, broker.publish(queue, message)).await
        {
            Ok(result) => result,
            Err(_) => Err(MessagingError::Timeout {
                operation: "publish",
                after: self.timeout,
            }),
        };

        match &result {
            Ok(()) => {
                metrics::counter!("messages_published_total", "queue" => queue.to_string())
                    .increment(1);
                metrics::histogram!("message_publish_duration_seconds")
                    .record(start.elapsed().as_secs_f64());
            }
            Err(e) => {
                metrics::counter!("message_publish_failures_total", "queue" => queue.to_string())
                    .increment(1);
                tracing::warn!(queue, error = %e, "publish failed");
                if !broker.is_connected() {
                    self.connections
                        .mark_disconnected_if(&broker, &e.to_string())
                        .await;
                }
            }
        }
        result
    }
}
