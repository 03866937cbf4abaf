use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio::time::Duration;
use tracing::{debug, info};

use gust_core::{Delivery, GustError, SendError, Sender};

/// Kafka producer tuned for durability: `acks=all` with 5 retries,
/// gzip compression and a 5ms linger.
pub struct KafkaSender {
    producer: FutureProducer,
    topic: String,
    delivery_timeout: Duration,
}

impl KafkaSender {
    pub fn new(bootstrap_servers: &str, topic: impl Into<String>) -> gust_core::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("acks", "all")
            .set("retries", "5")
            .set("compression.type", "gzip")
            .set("linger.ms", "5")
            .set("batch.num.messages", "32768")
            .create()
            .map_err(|e| SendError::Connection(format!("failed to create producer: {}", e)))?;

        let topic = topic.into();
        info!(brokers = bootstrap_servers, topic = %topic, "Kafka producer created");

        Ok(Self {
            producer,
            topic,
            delivery_timeout: Duration::from_secs(30),
        })
    }

    pub fn with_delivery_timeout(mut self, delivery_timeout: Duration) -> Self {
        self.delivery_timeout = delivery_timeout;
        self
    }
}

#[async_trait]
impl Sender for KafkaSender {
    async fn send(&self, payload: Bytes) -> Result<Delivery, SendError> {
        let record = FutureRecord::<(), [u8]>::to(&self.topic).payload(&payload[..]);

        match self.producer.send(record, self.delivery_timeout).await {
            Ok((partition, offset)) => {
                debug!(
                    "Message sent to partition {} at offset {}",
                    partition, offset
                );
                Ok(Delivery { partition, offset })
            }
            Err((err, _message)) => Err(SendError::Rejected(err.to_string())),
        }
    }

    fn name(&self) -> &str {
        "kafka"
    }

    async fn close(&self) -> gust_core::Result<()> {
        let producer = self.producer.clone();
        let timeout = self.delivery_timeout;
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| GustError::Protocol(format!("flush task failed: {}", e)))?
            .map_err(|e| SendError::Connection(format!("flush failed: {}", e)))?;
        Ok(())
    }
}
