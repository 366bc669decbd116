pub mod adapters;
mod errors;
pub mod in_memory;
mod types;

pub use errors::BrokerError;
pub use types::{
    BrokerAddressList, ClientSettings, ConsumedRecord, ConsumerSettings, DeliveryMetadata,
    ProducerRecord,
};

use async_trait::async_trait;

/// Entry point to a broker backend. Hands out producer and consumer handles
/// bound to the client's settings.
pub trait BrokerClient: Send + Sync + 'static {
    fn producer(&self) -> Result<Box<dyn RecordProducer>, BrokerError>;

    fn consumer(&self, settings: &ConsumerSettings) -> Result<Box<dyn RecordConsumer>, BrokerError>;
}

#[async_trait]
pub trait RecordProducer: Send {
    /// Establish the connection, failing with `BrokerUnavailable` when the
    /// broker cannot be reached.
    async fn connect(&mut self) -> Result<(), BrokerError>;

    /// Send one record and wait for the broker's acknowledgment.
    async fn send(
        &mut self,
        topic: &str,
        record: &ProducerRecord,
    ) -> Result<DeliveryMetadata, BrokerError>;

    /// Release the connection. A no-op when never connected.
    async fn disconnect(&mut self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait RecordConsumer: Send {
    async fn connect(&mut self) -> Result<(), BrokerError>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError>;

    /// Wait for the next record on the subscribed topic. Polling alone does
    /// not move the group's committed position.
    async fn poll(&mut self) -> Result<ConsumedRecord, BrokerError>;

    /// Mark `record` as processed so the commit policy may advance past it.
    async fn ack(&mut self, record: &ConsumedRecord) -> Result<(), BrokerError>;

    /// Release the connection. A no-op when never connected.
    async fn disconnect(&mut self) -> Result<(), BrokerError>;
}
