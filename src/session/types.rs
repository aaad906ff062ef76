use crate::broker::{BrokerError, TopicSubscription};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Session identifier, also used as the consumer group name
pub type SessionId = String;

/// Consume budget as sent by callers: a decimal number of seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConsumeTimeout {
    Seconds(f64),
    Text(String),
}

impl ConsumeTimeout {
    /// Resolve to a duration. `Ok(None)` means "not given" (blank text).
    pub fn to_duration(&self) -> Result<Option<Duration>, SessionError> {
        let seconds = match self {
            ConsumeTimeout::Seconds(seconds) => *seconds,
            ConsumeTimeout::Text(text) if text.trim().is_empty() => return Ok(None),
            ConsumeTimeout::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| SessionError::InvalidTimeout(text.clone()))?,
        };

        if !seconds.is_finite() || seconds < 0.0 {
            return Err(SessionError::InvalidTimeout(seconds.to_string()));
        }
        Duration::try_from_secs_f64(seconds)
            .map(Some)
            .map_err(|_| SessionError::InvalidTimeout(seconds.to_string()))
    }
}

/// Request to start an ephemeral consumer session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub consume_timeout: Option<ConsumeTimeout>,
    pub topics: Vec<TopicSubscription>,
}

impl StartSessionRequest {
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            group_id: None,
            consume_timeout: None,
            topics: topics.into_iter().map(TopicSubscription::new).collect(),
        }
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.consume_timeout = Some(ConsumeTimeout::Text(timeout.into()));
        self
    }
}

/// Addressable reference to an artifact that may not exist yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactReference {
    pub topic: String,
    pub download_url: String,
}

/// Lifecycle of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SessionPhase {
    Created,
    Subscribing,
    Consuming,
    Expired,
    Failed { reason: String },
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Expired | SessionPhase::Failed { .. })
    }
}

/// Snapshot of the latest session started under an id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub id: SessionId,
    pub topics: Vec<String>,
    pub budget_secs: f64,
    pub started_at: DateTime<Utc>,
    pub phase: SessionPhase,
    pub timer_pending: bool,
}

/// Errors returned by `start_session`
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("At least one topic is required")]
    NoTopics,
    #[error("Invalid consume timeout '{0}': expected a non-negative number of seconds")]
    InvalidTimeout(String),
    #[error("Invalid {kind} '{name}': must be non-empty and free of path separators")]
    InvalidName { kind: &'static str, name: String },
    #[error("Failed to connect consumer for group '{group_id}': {source}")]
    Connection {
        group_id: SessionId,
        source: BrokerError,
    },
    #[error("Failed to subscribe to topic '{topic}': {source}")]
    Subscription { topic: String, source: BrokerError },
}

/// A persistence failure while handling a consumed record
#[derive(Debug, thiserror::Error)]
#[error("Error while consuming topic={topic} partition={partition}")]
pub struct ConsumptionError {
    pub topic: String,
    pub partition: i32,
    #[source]
    pub source: SinkError,
}

/// Errors raised by the record sink
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to append to artifact '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
