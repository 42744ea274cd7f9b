use futures_util::stream::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::model::FileEvent;

/// Persistent (survives broker restart) delivery mode, per AMQP 0-9-1.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Only one of {publisher, consumer} is active per client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Consumer,
}

/// Durable publish/consume over AMQP with auto-reconnect: one named durable
/// queue, a talking-or-listening role fixed at construction.
pub struct BrokerClient {
    uri: String,
    queue: String,
    role: Role,
    connection: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("queue", &self.queue)
            .field("role", &self.role)
            .finish()
    }
}

impl BrokerClient {
    pub fn new(uri: impl Into<String>, queue: impl Into<String>, role: Role) -> Self {
        Self {
            uri: uri.into(),
            queue: queue.into(),
            role,
            connection: Mutex::new(None),
        }
    }

    fn connection_properties() -> ConnectionProperties {
        ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio)
    }

    async fn connect(&self) -> Result<Connection> {
        let conn = Connection::connect(&self.uri, Self::connection_properties()).await?;
        Ok(conn)
    }

    async fn channel(&self) -> Result<Channel> {
        let mut guard = self.connection.lock().await;
        if guard.as_ref().map(|c| c.status().connected()) != Some(true) {
            *guard = Some(self.connect().await?);
        }
        let channel = guard.as_ref().expect("connection just set").create_channel().await?;
        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(channel)
    }

    /// Force the next `channel()` call to redial, used after a publish
    /// failure to distinguish "lost stream" from other errors.
    async fn drop_connection(&self) {
        *self.connection.lock().await = None;
    }

    /// Publish `body` durably. On a lost stream, reconnects and retries the
    /// same publish at least once more before reporting failure — at most
    /// two attempts total.
    pub async fn publish(&self, body: &[u8]) -> Result<()> {
        assert_eq!(self.role, Role::Publisher, "publish called on a consumer client");

        match self.try_publish_once(body).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "publish failed, reconnecting and retrying once");
                self.drop_connection().await;
                self.try_publish_once(body).await
            }
        }
    }

    async fn try_publish_once(&self, body: &[u8]) -> Result<()> {
        let channel = self.channel().await?;
        let properties = BasicProperties::default().with_delivery_mode(DELIVERY_MODE_PERSISTENT);
        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }

    /// Publish a `FileEvent` (its path, UTF-8 encoded).
    pub async fn publish_event(&self, event: &FileEvent) -> Result<()> {
        self.publish(&event.to_bytes()).await
    }

    /// Drive the consume loop until `should_stop` resolves. Prefetch is
    /// fixed at one unacknowledged message at a time so the callback sees
    /// strictly serial delivery. The callback is responsible for doing the
    /// work; its return value decides ack (`true`) vs. leaving the message
    /// unacked for redelivery (`false`, used only for transport-level
    /// failures the pipeline itself never produces, since pipeline stage
    /// failures are always converted to ack-and-log).
    pub async fn consume<F, Fut>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(FileEvent) -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        assert_eq!(self.role, Role::Consumer, "consume called on a publisher client");

        let channel = self.channel().await?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await?;

        let mut consumer = channel
            .basic_consume(
                &self.queue,
                "depot-orchestrator",
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(queue = %self.queue, "waiting for messages");

        while let Some(delivery) = consumer.next().await {
            let delivery = match delivery {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "consumer stream error");
                    continue;
                }
            };

            let Some(event) = FileEvent::from_bytes(&delivery.data) else {
                warn!("dropping message with non-utf8 body");
                let _ = delivery.ack(BasicAckOptions::default()).await;
                continue;
            };

            let should_ack = callback(event).await;
            if should_ack {
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    warn!(error = %e, "failed to ack delivery");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_is_fixed_at_construction() {
        let publisher = BrokerClient::new("amqp://localhost:5672", "ingest", Role::Publisher);
        assert_eq!(publisher.role, Role::Publisher);
        let consumer = BrokerClient::new("amqp://localhost:5672", "ingest", Role::Consumer);
        assert_eq!(consumer.role, Role::Consumer);
    }
}
