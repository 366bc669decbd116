use std::{future::Future, process::ExitCode, sync::Arc};

use chrono::{SecondsFormat, Utc};
use log::{error, info, warn};
use roundtrip_broker::{
    BrokerAddressList, BrokerClient, BrokerError, ClientSettings, ConsumedRecord,
    ConsumerSettings, DeliveryMetadata, ProducerRecord, RecordConsumer, RecordProducer,
};
use tokio::sync::Notify;

use crate::{
    config::HarnessConfig,
    pump::{StopPolicy, pull_records},
};

/// Outcome of a successful round trip.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub sent: ProducerRecord,
    pub delivery: DeliveryMetadata,
    pub received: Vec<ConsumedRecord>,
}

pub struct Harness {
    config: HarnessConfig,
    cancel: Arc<Notify>,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(Notify::new()),
        }
    }

    /// Signal that stops the run when notified. Before the consumer loop the
    /// current step is abandoned with `Cancelled`; inside it the loop ends.
    pub fn cancellation(&self) -> Arc<Notify> {
        Arc::clone(&self.cancel)
    }

    /// Run the round trip and map the result to the process exit code.
    pub async fn run<F>(&self, build_client: F) -> ExitCode
    where
        F: FnOnce(&ClientSettings) -> Result<Arc<dyn BrokerClient>, BrokerError>,
    {
        let result = self.execute(build_client).await;
        match &result {
            Ok(report) => info!(
                "Round trip complete: {} record(s) received",
                report.received.len()
            ),
            Err(err) => error!("Round trip failed [{}]: {}", err.kind(), err),
        }
        ExitCode::from(exit_status(&result))
    }

    /// Produce one record, wait out the grace period, then consume until the
    /// stop condition holds. Handles still held when a step fails are
    /// disconnected before the error is returned.
    pub async fn execute<F>(&self, build_client: F) -> Result<RunReport, BrokerError>
    where
        F: FnOnce(&ClientSettings) -> Result<Arc<dyn BrokerClient>, BrokerError>,
    {
        let settings = self.client_settings()?;
        let consumer_settings = self.consumer_settings()?;

        info!("Attempting to connect to brokers at: {}", settings.brokers);
        let client = build_client(&settings)?;

        let mut producer = None;
        let mut consumer = None;
        let result = self
            .round_trip(client.as_ref(), &consumer_settings, &mut producer, &mut consumer)
            .await;

        if let Err(err) = &result {
            error!("An error occurred during broker operations: {}", err);
            release(producer, consumer).await;
        }
        result
    }

    fn client_settings(&self) -> Result<ClientSettings, BrokerError> {
        let brokers = BrokerAddressList::parse(&self.config.brokers)?;
        if self.config.topic.trim().is_empty() {
            return Err(BrokerError::ConnectionConfig("topic name is blank".into()));
        }
        Ok(ClientSettings::new(brokers, self.config.client_id.clone()))
    }

    fn consumer_settings(&self) -> Result<ConsumerSettings, BrokerError> {
        if self.config.group_id.trim().is_empty() {
            return Err(BrokerError::ConnectionConfig(
                "consumer group id is blank".into(),
            ));
        }
        Ok(ConsumerSettings {
            group_id: self.config.group_id.clone(),
            auto_commit: self.config.auto_commit,
            auto_commit_interval: self.config.auto_commit_interval,
            from_beginning: self.config.from_beginning,
        })
    }

    fn build_record(&self) -> ProducerRecord {
        let generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        ProducerRecord::new(format!("Hello Kafka from Rust at {generated_at}"))
            .with_key(self.config.message_key.clone())
    }

    /// Race `work` against the cancellation signal.
    async fn unless_cancelled<T>(
        &self,
        step: &'static str,
        work: impl Future<Output = Result<T, BrokerError>>,
    ) -> Result<T, BrokerError> {
        tokio::select! {
            biased;
            _ = self.cancel.notified() => {
                warn!("Shutdown signal received during {}", step);
                Err(BrokerError::Cancelled(step.into()))
            }
            result = work => result,
        }
    }

    async fn round_trip(
        &self,
        client: &dyn BrokerClient,
        consumer_settings: &ConsumerSettings,
        producer: &mut Option<Box<dyn RecordProducer>>,
        consumer: &mut Option<Box<dyn RecordConsumer>>,
    ) -> Result<RunReport, BrokerError> {
        let topic = self.config.topic.as_str();

        info!("--- Starting producer ---");
        let handle = producer.insert(client.producer()?);
        info!("Connecting producer");
        self.unless_cancelled("producer connect", handle.connect())
            .await?;
        info!("Producer connected");

        let record = self.build_record();
        let delivery = self
            .unless_cancelled("send", handle.send(topic, &record))
            .await?;
        info!("Message sent to topic '{}':", topic);
        info!("   Key: {}", record.key.as_deref().unwrap_or("null"));
        info!("   Value: {}", record.value);
        info!(
            "Delivery report: {}",
            serde_json::to_string(&delivery).unwrap_or_else(|_| format!("{delivery:?}"))
        );

        if let Some(mut handle) = producer.take() {
            info!("Disconnecting producer");
            handle.disconnect().await?;
            info!("Producer disconnected");
        }

        info!(
            "Waiting {} ms for the record to become visible",
            self.config.grace_period.as_millis()
        );
        self.unless_cancelled("grace period", async {
            tokio::time::sleep(self.config.grace_period).await;
            Ok(())
        })
        .await?;

        info!("--- Starting consumer ---");
        let handle = consumer.insert(client.consumer(consumer_settings)?);
        info!("Connecting consumer (group '{}')", consumer_settings.group_id);
        self.unless_cancelled("consumer connect", handle.connect())
            .await?;
        info!("Consumer connected");
        self.unless_cancelled("subscribe", async {
            handle.subscribe(topic).await.map_err(consumer_runtime)
        })
        .await?;
        info!("Consumer subscribed to topic '{}'", topic);

        let policy = StopPolicy::from_max(self.config.max_messages);
        info!("Consumer is now running and waiting for messages...");
        let outcome = pull_records(
            handle.as_mut(),
            policy,
            self.config.queue_capacity,
            &self.cancel,
            |received| log_received(received, &record),
        )
        .await
        .map_err(consumer_runtime)?;

        if outcome.cancelled {
            info!("Consumer loop cancelled");
        }
        if let StopPolicy::AfterRecords(limit) = policy {
            if outcome.records.len() < limit {
                return Err(BrokerError::ConsumerRuntime(format!(
                    "consumer stopped after {} of {} record(s)",
                    outcome.records.len(),
                    limit
                )));
            }
        }

        if let Some(mut handle) = consumer.take() {
            info!("Disconnecting consumer");
            handle.disconnect().await?;
            info!("Consumer disconnected");
        }

        Ok(RunReport {
            sent: record,
            delivery,
            received: outcome.records,
        })
    }
}

/// `0` for a completed round trip, `1` for any failure.
pub fn exit_status<T>(result: &Result<T, BrokerError>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(_) => 1,
    }
}

/// Best-effort disconnect of whatever handles the failed run still holds.
/// Each attempt is logged on its own and never replaces the original error.
async fn release(
    producer: Option<Box<dyn RecordProducer>>,
    consumer: Option<Box<dyn RecordConsumer>>,
) {
    if let Some(mut producer) = producer {
        match producer.disconnect().await {
            Ok(()) => info!("Producer disconnected due to error"),
            Err(err) => error!("Error disconnecting producer: {}", err),
        }
    }
    if let Some(mut consumer) = consumer {
        match consumer.disconnect().await {
            Ok(()) => info!("Consumer disconnected due to error"),
            Err(err) => error!("Error disconnecting consumer: {}", err),
        }
    }
}

fn consumer_runtime(err: BrokerError) -> BrokerError {
    match err {
        BrokerError::ConsumerRuntime(_) => err,
        other => BrokerError::ConsumerRuntime(other.to_string()),
    }
}

fn log_received(received: &ConsumedRecord, sent: &ProducerRecord) {
    info!("--- Received message ---");
    info!("   Topic: {}", received.topic);
    info!("   Partition: {}", received.partition);
    info!("   Offset: {}", received.offset);
    info!(
        "   Key: {}",
        received.key_str().as_deref().unwrap_or("null")
    );
    info!(
        "   Value: {}",
        received.value_str().as_deref().unwrap_or("null")
    );
    match received.timestamp {
        Some(timestamp) => info!(
            "   Timestamp: {}",
            timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
        ),
        None => info!("   Timestamp: null"),
    }

    if received.matches(sent) {
        info!("Received record matches the sent record");
    } else {
        warn!("Received record differs from the sent record (older record or reused group?)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtrip_broker::in_memory::InMemoryBroker;
    use std::time::Duration;

    fn config(brokers: &str) -> HarnessConfig {
        let mut config = HarnessConfig::new(brokers, "t1", "g1");
        config.grace_period = Duration::from_millis(10);
        config
    }

    fn in_memory(broker: &InMemoryBroker) -> Result<Arc<dyn BrokerClient>, BrokerError> {
        Ok(Arc::new(broker.clone()))
    }

    #[tokio::test]
    async fn round_trip_returns_sent_record() {
        let broker = InMemoryBroker::new();
        let harness = Harness::new(config("localhost:9092"));

        let report = harness.execute(|_| in_memory(&broker)).await.unwrap();

        assert_eq!(report.received.len(), 1);
        assert!(report.received[0].matches(&report.sent));
        assert_eq!(report.sent.key.as_deref(), Some("testKey"));
        assert!(report.sent.value.starts_with("Hello Kafka from Rust at "));
        assert_eq!(report.delivery.partition, 0);
        assert_eq!(report.delivery.offset, 0);
    }

    #[tokio::test]
    async fn blank_topic_and_group_are_config_errors() {
        let broker = InMemoryBroker::new();

        let mut blank_topic = config("localhost:9092");
        blank_topic.topic = "  ".into();
        let result = Harness::new(blank_topic).execute(|_| in_memory(&broker)).await;
        assert!(matches!(result, Err(BrokerError::ConnectionConfig(_))));

        let mut blank_group = config("localhost:9092");
        blank_group.group_id = String::new();
        let result = Harness::new(blank_group).execute(|_| in_memory(&broker)).await;
        assert!(matches!(result, Err(BrokerError::ConnectionConfig(_))));
        assert_eq!(broker.log_end("t1"), 0);
    }

    #[test]
    fn exit_status_is_zero_only_on_success() {
        assert_eq!(exit_status(&Ok::<(), BrokerError>(())), 0);
        assert_eq!(
            exit_status(&Err::<(), _>(BrokerError::Delivery("no leader".into()))),
            1
        );
    }

    #[test]
    fn non_consumer_errors_are_wrapped_as_consumer_runtime() {
        let wrapped = consumer_runtime(BrokerError::BrokerUnavailable("gone".into()));
        assert!(matches!(wrapped, BrokerError::ConsumerRuntime(ref msg) if msg.contains("gone")));
    }
}
