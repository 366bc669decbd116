use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BrokerError;

/// Ordered, non-empty list of `host:port` bootstrap addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddressList(Vec<String>);

impl BrokerAddressList {
    pub fn new<I, S>(addresses: I) -> Result<Self, BrokerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addresses: Vec<String> = addresses
            .into_iter()
            .map(|address| address.as_ref().trim().to_string())
            .filter(|address| !address.is_empty())
            .collect();

        if addresses.is_empty() {
            return Err(BrokerError::ConnectionConfig(
                "broker address list is empty".into(),
            ));
        }
        Ok(Self(addresses))
    }

    /// Parse a comma-separated list such as `kafka-1:9092,kafka-2:9092`.
    pub fn parse(list: &str) -> Result<Self, BrokerError> {
        Self::new(list.split(','))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// The list joined back into the `bootstrap.servers` form.
    pub fn joined(&self) -> String {
        self.0.join(",")
    }
}

impl fmt::Display for BrokerAddressList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

/// Settings shared by every handle a client hands out.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub brokers: BrokerAddressList,
    pub client_id: String,
}

impl ClientSettings {
    pub fn new(brokers: BrokerAddressList, client_id: impl Into<String>) -> Self {
        Self {
            brokers,
            client_id: client_id.into(),
        }
    }
}

/// Per-consumer settings: group scope, commit policy and start position.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub group_id: String,
    pub auto_commit: bool,
    pub auto_commit_interval: Duration,
    pub from_beginning: bool,
}

impl ConsumerSettings {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            auto_commit: true,
            auto_commit_interval: Duration::from_millis(5000),
            from_beginning: true,
        }
    }
}

/// A record handed to a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerRecord {
    #[serde(default)]
    pub key: Option<String>,
    pub value: String,
}

impl ProducerRecord {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            key: None,
            value: value.into(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Partition and offset assigned by the broker to a sent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// A record read back from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConsumedRecord {
    pub fn key_str(&self) -> Option<Cow<'_, str>> {
        self.key.as_deref().map(String::from_utf8_lossy)
    }

    pub fn value_str(&self) -> Option<Cow<'_, str>> {
        self.value.as_deref().map(String::from_utf8_lossy)
    }

    /// True when key and value are byte-for-byte those of `record`.
    pub fn matches(&self, record: &ProducerRecord) -> bool {
        self.key.as_deref() == record.key.as_deref().map(str::as_bytes)
            && self.value.as_deref() == Some(record.value.as_bytes())
    }
}
