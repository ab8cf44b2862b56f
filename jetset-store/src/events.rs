use async_trait::async_trait;
use jetset_core::events::EventPublisher;
use jetset_core::{CoreError, CoreResult};
use jetset_shared::models::events::QuoteTransitionedEvent;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, error};

/// Kafka sink for lifecycle transitions, keyed by quote id so a quote's
/// events stay ordered within a partition.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
    topic: String,
}

impl EventProducer {
    pub fn new(brokers: &str, topic: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }

    pub async fn publish(&self, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                debug!(
                    topic = %self.topic,
                    key,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Event delivered"
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", self.topic, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl EventPublisher for EventProducer {
    async fn publish_transition(&self, event: &QuoteTransitionedEvent) -> CoreResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| CoreError::InternalError(format!("event serialization failed: {}", e)))?;

        self.publish(&event.quote_id.to_string(), &payload)
            .await
            .map_err(|e| CoreError::ExternalServiceError(format!("kafka: {}", e)))
    }
}
