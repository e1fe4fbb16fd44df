use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};

use pasaje_core::events::EventPublisher;
use pasaje_shared::models::events::{SeatEvent, TicketEvent};

/// Ships ticket lifecycle events to the printing/fiscal bridge over Kafka.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
    ticket_topic: String,
}

impl EventProducer {
    pub fn new(brokers: &str, ticket_topic: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            ticket_topic: ticket_topic.to_string(),
        })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!("Sent message to {}/{}: partition {} offset {}", topic, key, delivery.partition, delivery.offset);
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl EventPublisher for EventProducer {
    // Seat churn stays on the in-process kiosk feed
    async fn publish_seat(&self, _event: &SeatEvent) {}

    async fn publish_ticket(&self, event: &TicketEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to serialize ticket event {}: {}", event.ticket_id(), e);
                return;
            }
        };

        // Keyed by ticket so a ticket's events stay ordered within a partition
        let key = event.ticket_id().to_string();
        let _ = self.publish(&self.ticket_topic, &key, &payload).await;
    }
}
