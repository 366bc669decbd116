use crate::{
    BrokerClient, BrokerError, ClientSettings, ConsumedRecord, ConsumerSettings,
    DeliveryMetadata, ProducerRecord, RecordConsumer, RecordProducer,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::Message;
use std::sync::Arc;
use std::time::Duration;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Kafka backend built on librdkafka. Handles are created lazily; nothing
/// touches the network until `connect` is called.
pub struct KafkaBroker {
    settings: ClientSettings,
}

impl KafkaBroker {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }

    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.settings.brokers.joined())
            .set("client.id", &self.settings.client_id);
        config
    }

    fn producer_config(&self) -> ClientConfig {
        let mut config = self.base_config();
        config.set("message.timeout.ms", "5000");
        config
    }

    /// Offsets are stored only for acknowledged records, so auto-commit never
    /// moves the group past a record that was fetched but not handled.
    fn consumer_config(&self, settings: &ConsumerSettings) -> ClientConfig {
        let mut config = self.base_config();
        config
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", settings.auto_commit.to_string())
            .set(
                "auto.commit.interval.ms",
                settings.auto_commit_interval.as_millis().to_string(),
            )
            .set("enable.auto.offset.store", "false")
            .set(
                "auto.offset.reset",
                if settings.from_beginning {
                    "earliest"
                } else {
                    "latest"
                },
            );
        config
    }
}

impl BrokerClient for KafkaBroker {
    fn producer(&self) -> Result<Box<dyn RecordProducer>, BrokerError> {
        Ok(Box::new(KafkaProducer {
            config: self.producer_config(),
            producer: None,
        }))
    }

    fn consumer(&self, settings: &ConsumerSettings) -> Result<Box<dyn RecordConsumer>, BrokerError> {
        Ok(Box::new(KafkaConsumer {
            config: self.consumer_config(settings),
            consumer: None,
        }))
    }
}

pub struct KafkaProducer {
    config: ClientConfig,
    producer: Option<FutureProducer>,
}

#[async_trait]
impl RecordProducer for KafkaProducer {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        let producer: FutureProducer = self.config.create().map_err(unavailable)?;

        // Creating the handle does not contact the cluster; a metadata round
        // trip does.
        let probe = producer.clone();
        let probed = tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|_| ())
        });
        probed
            .await
            .map_err(|err| BrokerError::BrokerUnavailable(err.to_string()))?
            .map_err(unavailable)?;

        self.producer = Some(producer);
        Ok(())
    }

    async fn send(
        &mut self,
        topic: &str,
        record: &ProducerRecord,
    ) -> Result<DeliveryMetadata, BrokerError> {
        let producer = self
            .producer
            .as_ref()
            .ok_or_else(|| BrokerError::Delivery("producer is not connected".into()))?;

        let mut future_record = FutureRecord::<str, str>::to(topic).payload(record.value.as_str());
        if let Some(key) = record.key.as_deref() {
            future_record = future_record.key(key);
        }

        let (partition, offset) = producer
            .send(future_record, QUEUE_TIMEOUT)
            .await
            .map_err(|(err, _)| BrokerError::Delivery(err.to_string()))?;

        Ok(DeliveryMetadata {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        let Some(producer) = self.producer.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT))
            .await
            .map_err(|err| BrokerError::Disconnect(err.to_string()))?
            .map_err(|err| BrokerError::Disconnect(err.to_string()))
    }
}

pub struct KafkaConsumer {
    config: ClientConfig,
    consumer: Option<Arc<StreamConsumer>>,
}

impl KafkaConsumer {
    fn connected(&self) -> Result<&StreamConsumer, BrokerError> {
        self.consumer
            .as_deref()
            .ok_or_else(|| BrokerError::ConsumerRuntime("consumer is not connected".into()))
    }
}

#[async_trait]
impl RecordConsumer for KafkaConsumer {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        let consumer: Arc<StreamConsumer> = Arc::new(self.config.create().map_err(unavailable)?);

        let probe = Arc::clone(&consumer);
        let probed =
            tokio::task::spawn_blocking(move || probe.fetch_metadata(None, METADATA_TIMEOUT).map(|_| ()));
        probed
            .await
            .map_err(|err| BrokerError::BrokerUnavailable(err.to_string()))?
            .map_err(unavailable)?;

        self.consumer = Some(consumer);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        self.connected()?
            .subscribe(&[topic])
            .map_err(|err| BrokerError::ConsumerRuntime(err.to_string()))
    }

    async fn poll(&mut self) -> Result<ConsumedRecord, BrokerError> {
        let message = self
            .connected()?
            .recv()
            .await
            .map_err(|err| BrokerError::ConsumerRuntime(err.to_string()))?;

        Ok(ConsumedRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            value: message.payload().map(<[u8]>::to_vec),
            timestamp: message
                .timestamp()
                .to_millis()
                .and_then(DateTime::<Utc>::from_timestamp_millis),
        })
    }

    async fn ack(&mut self, record: &ConsumedRecord) -> Result<(), BrokerError> {
        self.connected()?
            .store_offset(&record.topic, record.partition, record.offset)
            .map_err(|err| BrokerError::ConsumerRuntime(err.to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            debug!("Kafka consumer unsubscribed; closing on drop");
        }
        Ok(())
    }
}

fn unavailable(err: KafkaError) -> BrokerError {
    BrokerError::BrokerUnavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BrokerAddressList;

    fn broker() -> KafkaBroker {
        let brokers = BrokerAddressList::parse("kafka-1:9092, kafka-2:9092").unwrap();
        KafkaBroker::new(ClientSettings::new(brokers, "roundtrip-test"))
    }

    #[test]
    fn producer_config_carries_client_settings() {
        let config = broker().producer_config();

        assert_eq!(config.get("bootstrap.servers"), Some("kafka-1:9092,kafka-2:9092"));
        assert_eq!(config.get("client.id"), Some("roundtrip-test"));
        assert_eq!(config.get("message.timeout.ms"), Some("5000"));
        assert_eq!(config.get("group.id"), None);
    }

    #[test]
    fn consumer_config_maps_group_and_commit_policy() {
        let settings = ConsumerSettings {
            auto_commit: true,
            auto_commit_interval: Duration::from_millis(5000),
            from_beginning: true,
            ..ConsumerSettings::new("my-test-group")
        };
        let config = broker().consumer_config(&settings);

        assert_eq!(config.get("bootstrap.servers"), Some("kafka-1:9092,kafka-2:9092"));
        assert_eq!(config.get("client.id"), Some("roundtrip-test"));
        assert_eq!(config.get("group.id"), Some("my-test-group"));
        assert_eq!(config.get("enable.auto.commit"), Some("true"));
        assert_eq!(config.get("auto.commit.interval.ms"), Some("5000"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
    }

    #[test]
    fn consumer_config_starts_at_latest_without_from_beginning() {
        let settings = ConsumerSettings {
            auto_commit: false,
            auto_commit_interval: Duration::from_millis(250),
            from_beginning: false,
            ..ConsumerSettings::new("g1")
        };
        let config = broker().consumer_config(&settings);

        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("auto.commit.interval.ms"), Some("250"));
        assert_eq!(config.get("auto.offset.reset"), Some("latest"));
    }
}
