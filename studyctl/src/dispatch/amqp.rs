//! AMQP 0.9.1 broker access via `lapin`.

use super::{DispatchError, QueueMessage, QueueSession, TaskQueue};
use crate::config::DispatchConfig;
use async_trait::async_trait;
use lapin::{
    BasicProperties, Connection, ConnectionProperties,
    options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions},
    publisher_confirm::Confirmation,
    types::FieldTable,
};
use tracing::{debug, instrument, warn};

/// Persistent delivery, so jobs survive a broker restart along with the durable queue
const PERSISTENT: u8 = 2;

pub struct AmqpTaskQueue {
    uri: String,
    queue: String,
}

impl AmqpTaskQueue {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            uri: config.broker_uri(),
            queue: config.queue.clone(),
        }
    }
}

#[async_trait]
impl TaskQueue for AmqpTaskQueue {
    #[instrument(skip(self), fields(queue = %self.queue))]
    async fn connect(&self) -> Result<Box<dyn QueueSession>, DispatchError> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(DispatchError::Connect)?;
        Ok(Box::new(AmqpSession {
            connection,
            queue: self.queue.clone(),
        }))
    }
}

struct AmqpSession {
    connection: Connection,
    queue: String,
}

impl AmqpSession {
    async fn publish_confirmed(&self, payload: &[u8]) -> Result<(), DispatchError> {
        let channel = self.connection.create_channel().await.map_err(DispatchError::Channel)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(DispatchError::Channel)?;

        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| DispatchError::Declare {
                queue: self.queue.clone(),
                source,
            })?;

        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());

        let publish_error = |source: lapin::Error| DispatchError::Publish {
            queue: self.queue.clone(),
            source,
        };
        let confirmation = channel
            .basic_publish("", &self.queue, BasicPublishOptions::default(), payload, properties)
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;

        match confirmation {
            Confirmation::Nack(_) => Err(DispatchError::Rejected { queue: self.queue.clone() }),
            Confirmation::Ack(_) | Confirmation::NotRequested => {
                debug!(bytes = payload.len(), "Broker acknowledged job");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl QueueSession for AmqpSession {
    #[instrument(skip_all, fields(queue = %self.queue))]
    async fn publish(self: Box<Self>, message: QueueMessage) -> Result<(), DispatchError> {
        let payload = serde_json::to_vec(&message)?;
        let result = self.publish_confirmed(&payload).await;

        if let Err(e) = self.connection.close(200, "OK").await {
            warn!(error = %e, "Failed to close broker connection");
        }
        result
    }
}
