use crate::session::ConsumptionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Record headers, ordered by name so rendering is deterministic
pub type Headers = BTreeMap<String, Vec<u8>>;

/// Timestamp used when the broker does not provide one
pub const NO_TIMESTAMP: i64 = -1;

/// A record yielded by a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Milliseconds since the epoch, or [`NO_TIMESTAMP`]
    pub timestamp: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    /// `None` when the broker sent no headers at all
    pub headers: Option<Headers>,
}

/// A subscription request, handed to `subscribe` unchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSubscription {
    pub topic: String,
    #[serde(default)]
    pub from_beginning: bool,
}

impl TopicSubscription {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            from_beginning: false,
        }
    }

    pub fn from_beginning(mut self) -> Self {
        self.from_beginning = true;
        self
    }
}

/// A message to produce
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub partition: Option<i32>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl OutgoingMessage {
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Messages destined for one topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMessages {
    pub topic: String,
    pub messages: Vec<OutgoingMessage>,
}

/// Where a produced message landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub base_offset: i64,
}

/// Errors raised by broker clients
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),
    #[error("Subscription to '{topic}' failed: {reason}")]
    Subscription { topic: String, reason: String },
    #[error("Consumer '{0}' is not connected")]
    NotConnected(String),
    #[error(transparent)]
    Delivery(#[from] ConsumptionError),
    #[error("Produce failed: {0}")]
    Produce(String),
    #[error("Broker client error: {0}")]
    Client(String),
}
