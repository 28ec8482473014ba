//! AMQP message handlers for dungeon finder requests
//!
//! Deliveries on the request queue are decoded into [`LfgRequest`]s and
//! handed to a [`MessageHandler`]. Malformed or rejected requests are
//! acknowledged anyway so one bad message cannot wedge the queue.

use crate::amqp::messages::{LfgRequest, MessageUtils};
use crate::error::{LfgError, Result};
use amqprs::{
    channel::{BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling AMQP messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Apply a decoded request
    async fn handle_request(&self, request: LfgRequest) -> Result<()>;

    /// Handle processing errors
    async fn handle_error(&self, error: LfgError, message_data: &[u8]);
}

/// Consumer for the dungeon finder request queue
pub struct LfgRequestConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl LfgRequestConsumer {
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("lfg-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(RequestConsumer::new(self.handler.clone()), args)
            .await
            .map_err(|e| LfgError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming messages from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel
            .basic_cancel(args)
            .await
            .map_err(|e| LfgError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            })?;

        info!("Stopped consuming messages");
        Ok(())
    }
}

/// Internal consumer implementation
struct RequestConsumer {
    handler: Arc<dyn MessageHandler>,
}

impl RequestConsumer {
    fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl AsyncConsumer for RequestConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();

        debug!(
            "AMQP message received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        let start_time = std::time::Instant::now();

        match process_message(self.handler.as_ref(), &content).await {
            Ok(kind) => {
                debug!(
                    "Request '{}' processed - delivery_tag: {}, processing_time: {:.2}ms",
                    kind,
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                error!(
                    "Message processing failed - delivery_tag: {}, processing_time: {:.2}ms, error: {}",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0,
                    e
                );
                let error = match e.downcast::<LfgError>() {
                    Ok(lfg_error) => lfg_error,
                    Err(other) => LfgError::InternalError {
                        message: other.to_string(),
                    },
                };
                self.handler.handle_error(error, &content).await;
            }
        }

        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            warn!("Failed to ack delivery {}: {}", delivery_tag, e);
        }
    }
}

/// Decode a delivery and hand it to the handler, returning the request kind
pub async fn process_message(handler: &dyn MessageHandler, content: &[u8]) -> Result<&'static str> {
    let request = MessageUtils::deserialize_request(content)?;
    let kind = request.kind();
    handler.handle_request(request).await?;
    Ok(kind)
}

/// Mock message handler for testing
pub struct MockMessageHandler {
    pub received_requests: Arc<tokio::sync::Mutex<Vec<LfgRequest>>>,
    pub errors: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl Default for MockMessageHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMessageHandler {
    pub fn new() -> Self {
        Self {
            received_requests: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            errors: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl MessageHandler for MockMessageHandler {
    async fn handle_request(&self, request: LfgRequest) -> Result<()> {
        let mut requests = self.received_requests.lock().await;
        requests.push(request);
        Ok(())
    }

    async fn handle_error(&self, error: LfgError, _message_data: &[u8]) {
        self.errors.lock().await.push(error.to_string());
    }
}
