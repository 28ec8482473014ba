//! AMQP event publisher for outbound dungeon finder notifications

use crate::amqp::messages::{MessageEnvelope, MessageUtils, LFG_EVENTS_EXCHANGE};
use crate::error::{LfgError, Result};
use crate::types::LfgEvent;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing engine notifications
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one notification under `lfg.event.<kind>`
    async fn publish_event(&self, event: LfgEvent) -> Result<()>;

    /// Publish a batch in order, stopping at the first failure
    async fn publish_events(&self, events: Vec<LfgEvent>) -> Result<usize> {
        let mut published = 0;
        for event in events {
            self.publish_event(event).await?;
            published += 1;
        }
        Ok(published)
    }
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange_name: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange_name: LFG_EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.setup_exchange().await?;
        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange_name, "topic");
        self.channel
            .exchange_declare(args)
            .await
            .map_err(|e| LfgError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare exchange {}: {}",
                    self.config.exchange_name, e
                ),
            })?;

        info!("Declared AMQP exchange {}", self.config.exchange_name);
        Ok(())
    }

    /// Publish with exponential backoff retry
    async fn publish_with_retry(&self, envelope: &MessageEnvelope<LfgEvent>) -> Result<()> {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(_) => {
                    debug!(
                        "Published message {} as {}",
                        envelope.correlation_id, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish(&self, envelope: &MessageEnvelope<LfgEvent>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange_name, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| LfgError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_event(&self, event: LfgEvent) -> Result<()> {
        let routing_key = MessageUtils::get_routing_key(&event);
        let envelope = MessageEnvelope::new(event, routing_key);
        self.publish_with_retry(&envelope).await
    }
}

/// Mock event publisher for testing and dry runs
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<(String, LfgEvent)>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routing keys of everything published so far
    pub fn get_published_events(&self) -> Vec<String> {
        self.published_events
            .lock()
            .map(|events| events.iter().map(|(key, _)| key.clone()).collect())
            .unwrap_or_default()
    }

    pub fn published(&self) -> Vec<LfgEvent> {
        self.published_events
            .lock()
            .map(|events| events.iter().map(|(_, event)| event.clone()).collect())
            .unwrap_or_default()
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_event(&self, event: LfgEvent) -> Result<()> {
        let routing_key = MessageUtils::get_routing_key(&event);
        let mut events = self
            .published_events
            .lock()
            .map_err(|_| LfgError::InternalError {
                message: "Failed to acquire published events lock".to_string(),
            })?;
        events.push((routing_key, event));
        Ok(())
    }
}
