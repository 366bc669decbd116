use crate::{
    BrokerClient, BrokerError, ConsumedRecord, ConsumerSettings, DeliveryMetadata,
    ProducerRecord, RecordConsumer, RecordProducer,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

const PARTITION: i32 = 0;

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<ConsumedRecord>>,
    committed: HashMap<(String, String), i64>,
}

/// In-process broker keeping one partition per topic. Handles cloned from
/// the same broker share the log and the committed offsets.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended to `topic` so far.
    pub fn log_end(&self, topic: &str) -> i64 {
        let guard = self.state.lock();
        guard.topics.get(topic).map_or(0, |log| log.len() as i64)
    }

    /// Committed offset of `group` on `topic`, if any.
    pub fn committed(&self, group: &str, topic: &str) -> Option<i64> {
        let guard = self.state.lock();
        guard
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }

    fn append(&self, topic: &str, record: &ProducerRecord) -> DeliveryMetadata {
        let mut guard = self.state.lock();
        let log = guard.topics.entry(topic.to_string()).or_default();
        let offset = log.len() as i64;
        log.push(ConsumedRecord {
            topic: topic.to_string(),
            partition: PARTITION,
            offset,
            key: record.key.as_ref().map(|key| key.as_bytes().to_vec()),
            value: Some(record.value.as_bytes().to_vec()),
            timestamp: Some(Utc::now()),
        });
        drop(guard);
        self.notify.notify_waiters();

        DeliveryMetadata {
            topic: topic.to_string(),
            partition: PARTITION,
            offset,
        }
    }

    fn start_position(&self, settings: &ConsumerSettings, topic: &str) -> i64 {
        let guard = self.state.lock();
        let committed = guard
            .committed
            .get(&(settings.group_id.clone(), topic.to_string()))
            .copied();
        match committed {
            Some(offset) => offset,
            None if settings.from_beginning => 0,
            None => guard.topics.get(topic).map_or(0, |log| log.len() as i64),
        }
    }

    fn read_at(&self, topic: &str, offset: i64) -> Option<ConsumedRecord> {
        let guard = self.state.lock();
        guard
            .topics
            .get(topic)
            .and_then(|log| log.get(offset as usize))
            .cloned()
    }

    fn commit(&self, group: &str, topic: &str, offset: i64) {
        let mut guard = self.state.lock();
        let committed = guard
            .committed
            .entry((group.to_string(), topic.to_string()))
            .or_insert(offset);
        *committed = (*committed).max(offset);
    }
}

impl BrokerClient for InMemoryBroker {
    fn producer(&self) -> Result<Box<dyn RecordProducer>, BrokerError> {
        Ok(Box::new(InMemoryProducer {
            broker: self.clone(),
            connected: false,
        }))
    }

    fn consumer(&self, settings: &ConsumerSettings) -> Result<Box<dyn RecordConsumer>, BrokerError> {
        Ok(Box::new(InMemoryConsumer {
            broker: self.clone(),
            settings: settings.clone(),
            connected: false,
            subscription: None,
        }))
    }
}

pub struct InMemoryProducer {
    broker: InMemoryBroker,
    connected: bool,
}

#[async_trait]
impl RecordProducer for InMemoryProducer {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        self.connected = true;
        Ok(())
    }

    async fn send(
        &mut self,
        topic: &str,
        record: &ProducerRecord,
    ) -> Result<DeliveryMetadata, BrokerError> {
        if !self.connected {
            return Err(BrokerError::Delivery("producer is not connected".into()));
        }
        Ok(self.broker.append(topic, record))
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        self.connected = false;
        Ok(())
    }
}

struct Subscription {
    topic: String,
    position: i64,
}

pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    settings: ConsumerSettings,
    connected: bool,
    subscription: Option<Subscription>,
}

#[async_trait]
impl RecordConsumer for InMemoryConsumer {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        if !self.connected {
            return Err(BrokerError::ConsumerRuntime(
                "consumer is not connected".into(),
            ));
        }
        let position = self.broker.start_position(&self.settings, topic);
        self.subscription = Some(Subscription {
            topic: topic.to_string(),
            position,
        });
        Ok(())
    }

    async fn poll(&mut self) -> Result<ConsumedRecord, BrokerError> {
        if !self.connected {
            return Err(BrokerError::ConsumerRuntime(
                "consumer is not connected".into(),
            ));
        }
        let subscription = self
            .subscription
            .as_mut()
            .ok_or_else(|| BrokerError::ConsumerRuntime("consumer has no subscription".into()))?;

        loop {
            // Register before reading so an append between the read and the
            // await still wakes us.
            let notified = self.broker.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(record) = self.broker.read_at(&subscription.topic, subscription.position) {
                subscription.position += 1;
                return Ok(record);
            }

            notified.await;
        }
    }

    async fn ack(&mut self, record: &ConsumedRecord) -> Result<(), BrokerError> {
        if !self.connected {
            return Err(BrokerError::ConsumerRuntime(
                "consumer is not connected".into(),
            ));
        }
        if self.settings.auto_commit {
            self.broker
                .commit(&self.settings.group_id, &record.topic, record.offset + 1);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        self.subscription = None;
        self.connected = false;
        Ok(())
    }
}
