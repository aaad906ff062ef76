use crate::broker::{BrokerClient, ConsumerHandle, Record, record_handler};
use crate::env;
use crate::session::naming::{ArtifactLocator, SessionIdGenerator, validate_name};
use crate::session::registry::SessionRegistry;
use crate::session::sink::RecordSink;
use crate::session::types::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Configuration for the consumer session manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManagerConfig {
    /// Base of the download URLs returned to callers
    pub download_url_base: String,
    /// Budget applied when a request carries no timeout
    pub default_consume_timeout_secs: f64,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            download_url_base: env::defaults::DOWNLOAD_URL_BASE.to_string(),
            default_consume_timeout_secs: env::defaults::CONSUME_TIMEOUT_SECS,
        }
    }
}

/// Bookkeeping for the latest session started under an id
struct SessionEntry {
    topics: Vec<String>,
    budget: Duration,
    started_at: DateTime<Utc>,
    phase: Arc<RwLock<SessionPhase>>,
}

/// Creates ephemeral consumer sessions and drains them into artifacts
pub struct ConsumerSessionManager {
    broker: Arc<dyn BrokerClient>,
    registry: Arc<SessionRegistry>,
    sink: Arc<RecordSink>,
    locator: ArtifactLocator,
    ids: SessionIdGenerator,
    default_budget: Duration,
    sessions: DashMap<SessionId, SessionEntry>,
}

impl ConsumerSessionManager {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        registry: Arc<SessionRegistry>,
        sink: Arc<RecordSink>,
        config: SessionManagerConfig,
    ) -> Self {
        let default_budget = Duration::try_from_secs_f64(config.default_consume_timeout_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(env::defaults::CONSUME_TIMEOUT_SECS));

        Self {
            broker,
            registry,
            sink,
            locator: ArtifactLocator::new(config.download_url_base),
            ids: SessionIdGenerator::new(),
            default_budget,
            sessions: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn sink(&self) -> &Arc<RecordSink> {
        &self.sink
    }

    pub fn default_budget(&self) -> Duration {
        self.default_budget
    }

    /// Start a session and return one artifact reference per requested topic.
    ///
    /// Returns once every subscription is issued. Consumption continues in the
    /// background until the budget elapses, so a returned reference may point
    /// at a file that does not exist yet.
    pub async fn start_session(
        &self,
        request: StartSessionRequest,
    ) -> Result<Vec<ArtifactReference>, SessionError> {
        if request.topics.is_empty() {
            return Err(SessionError::NoTopics);
        }
        for subscription in &request.topics {
            validate_name("topic", &subscription.topic)?;
        }

        let budget = match &request.consume_timeout {
            Some(timeout) => timeout.to_duration()?.unwrap_or(self.default_budget),
            None => self.default_budget,
        };

        let session_id = match request.group_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => {
                validate_name("group id", &id)?;
                id
            }
            None => self.ids.next_id(),
        };

        info!(
            session_id = %session_id,
            topics = request.topics.len(),
            budget_secs = budget.as_secs_f64(),
            "Starting consumer session"
        );
        let phase = Arc::new(RwLock::new(SessionPhase::Created));

        let consumer = self
            .broker
            .connect_consumer(session_id.clone())
            .await
            .map_err(|source| SessionError::Connection {
                group_id: session_id.clone(),
                source,
            })?;

        *phase.write().await = SessionPhase::Subscribing;
        let mut references = Vec::with_capacity(request.topics.len());
        for subscription in &request.topics {
            if let Err(source) = consumer.subscribe(subscription.clone()).await {
                warn!(
                    session_id = %session_id,
                    topic = %subscription.topic,
                    error = %source,
                    "Subscription failed, releasing consumer"
                );
                if let Err(e) = consumer.disconnect().await {
                    warn!(session_id = %session_id, error = %e, "Failed to release consumer");
                }
                return Err(SessionError::Subscription {
                    topic: subscription.topic.clone(),
                    source,
                });
            }
            references.push(self.locator.reference(&session_id, &subscription.topic));
        }

        self.warn_if_superseding(&session_id).await;

        // Must precede arming: a zero budget can expire before this task resumes.
        *phase.write().await = SessionPhase::Consuming;
        self.arm_expiry(&session_id, budget, Arc::clone(&consumer), Arc::clone(&phase));
        self.sessions.insert(
            session_id.clone(),
            SessionEntry {
                topics: request.topics.iter().map(|s| s.topic.clone()).collect(),
                budget,
                started_at: Utc::now(),
                phase: Arc::clone(&phase),
            },
        );
        self.spawn_delivery(session_id, consumer, phase);

        Ok(references)
    }

    async fn warn_if_superseding(&self, session_id: &str) {
        let previous = self
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(&entry.phase));
        if let Some(previous) = previous
            && !previous.read().await.is_terminal()
        {
            // The earlier consumer keeps running; only its timer is replaced.
            warn!(
                session_id = %session_id,
                "Session id reused while its previous consumer is still active"
            );
        }
    }

    fn arm_expiry(
        &self,
        session_id: &str,
        budget: Duration,
        consumer: Arc<dyn ConsumerHandle>,
        phase: Arc<RwLock<SessionPhase>>,
    ) {
        let expiring_id = session_id.to_string();
        self.registry.arm(
            session_id,
            budget,
            Box::pin(async move {
                consumer.disconnect().await?;

                let mut phase = phase.write().await;
                if !phase.is_terminal() {
                    *phase = SessionPhase::Expired;
                }
                info!(session_id = %expiring_id, "Consumer session expired");
                Ok(())
            }),
        );
    }

    fn spawn_delivery(
        &self,
        session_id: SessionId,
        consumer: Arc<dyn ConsumerHandle>,
        phase: Arc<RwLock<SessionPhase>>,
    ) {
        let sink = Arc::clone(&self.sink);
        let handler_id = session_id.clone();
        let handler = record_handler(move |record: Record| {
            let sink = Arc::clone(&sink);
            let session_id = handler_id.clone();
            async move {
                sink.append(&session_id, &record.topic, &record)
                    .await
                    .map(|_| ())
                    .map_err(|source| {
                        error!(
                            session_id = %session_id,
                            topic = %record.topic,
                            partition = record.partition,
                            error = %source,
                            "Error while consuming"
                        );
                        ConsumptionError {
                            topic: record.topic.clone(),
                            partition: record.partition,
                            source,
                        }
                    })
            }
        });

        tokio::spawn(async move {
            match consumer.run(handler).await {
                Ok(()) => debug!(session_id = %session_id, "Delivery loop finished"),
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Delivery loop aborted");
                    let mut phase = phase.write().await;
                    if !phase.is_terminal() {
                        *phase = SessionPhase::Failed {
                            reason: e.to_string(),
                        };
                    }
                }
            }
        });
    }

    /// Status of the latest session started under `session_id`
    pub async fn session_status(&self, session_id: &str) -> Option<SessionStatus> {
        let (topics, budget, started_at, phase) = {
            let entry = self.sessions.get(session_id)?;
            (
                entry.topics.clone(),
                entry.budget,
                entry.started_at,
                Arc::clone(&entry.phase),
            )
        };
        let phase = phase.read().await.clone();
        let timer_pending = self
            .registry
            .lookup(session_id)
            .is_some_and(|timer| timer.pending);

        Some(SessionStatus {
            id: session_id.to_string(),
            topics,
            budget_secs: budget.as_secs_f64(),
            started_at,
            phase,
            timer_pending,
        })
    }

    /// Ids of every session started since the process began
    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
