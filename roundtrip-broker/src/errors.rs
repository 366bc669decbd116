use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid connection configuration: {0}")]
    ConnectionConfig(String),
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("consumer runtime error: {0}")]
    ConsumerRuntime(String),
    #[error("disconnect failed: {0}")]
    Disconnect(String),
    #[error("cancelled during {0}")]
    Cancelled(String),
}

impl BrokerError {
    /// Short lowercase name of the error kind, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::ConnectionConfig(_) => "connection_config",
            BrokerError::BrokerUnavailable(_) => "broker_unavailable",
            BrokerError::Delivery(_) => "delivery",
            BrokerError::ConsumerRuntime(_) => "consumer_runtime",
            BrokerError::Disconnect(_) => "disconnect",
            BrokerError::Cancelled(_) => "cancelled",
        }
    }
}
