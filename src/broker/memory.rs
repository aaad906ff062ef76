//! In-process broker.
//!
//! Keeps partitioned topic logs and committed group offsets in memory. Used by the
//! `memory` backend and as the broker collaborator in tests, where its fault
//! injection hooks stand in for an unreachable or misbehaving cluster.

use crate::broker::client::{BrokerClient, ConsumerHandle, ProducerHandle, RecordHandler};
use crate::broker::types::{
    BrokerError, Headers, OutgoingMessage, Record, RecordMetadata, TopicMessages,
    TopicSubscription,
};
use chrono::Utc;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info};

type PartitionLog = Vec<Record>;

/// (group, topic, partition) -> next offset to consume
type CommittedOffsets = HashMap<(String, String, i32), i64>;

#[derive(Debug, Default)]
struct Faults {
    connect: Option<String>,
    rejected_topics: HashSet<String>,
    disconnect: Option<String>,
}

struct BrokerState {
    topics: RwLock<HashMap<String, Vec<PartitionLog>>>,
    committed: RwLock<CommittedOffsets>,
    members: RwLock<HashMap<String, usize>>,
    faults: Mutex<Faults>,
    /// Bumped on every publish so idle consumers wake up
    appended: watch::Sender<u64>,
    disconnects: AtomicUsize,
}

/// Broker that lives entirely inside the process
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            state: Arc::new(BrokerState {
                topics: RwLock::new(HashMap::new()),
                committed: RwLock::new(HashMap::new()),
                members: RwLock::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                appended,
                disconnects: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a topic. Existing topics are left untouched.
    pub async fn create_topic(&self, name: &str, partitions: usize) {
        let mut topics = self.state.topics.write().await;
        topics
            .entry(name.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions.max(1)]);
    }

    /// Append a message, creating a single-partition topic on first use
    pub async fn publish(
        &self,
        topic: &str,
        message: OutgoingMessage,
    ) -> Result<RecordMetadata, BrokerError> {
        let mut topics = self.state.topics.write().await;
        let partitions = topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new()]);

        let partition = match (message.partition, &message.key) {
            (Some(partition), _) => {
                if partition < 0 || partition as usize >= partitions.len() {
                    return Err(BrokerError::Produce(format!(
                        "partition {} out of range for topic '{}'",
                        partition, topic
                    )));
                }
                partition
            }
            (None, Some(key)) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % partitions.len() as u64) as i32
            }
            (None, None) => 0,
        };

        let headers: Option<Headers> = if message.headers.is_empty() {
            None
        } else {
            Some(
                message
                    .headers
                    .into_iter()
                    .map(|(name, value)| (name, value.into_bytes()))
                    .collect(),
            )
        };

        let log = &mut partitions[partition as usize];
        let offset = log.len() as i64;
        log.push(Record {
            topic: topic.to_string(),
            partition,
            offset,
            timestamp: Utc::now().timestamp_millis(),
            key: message.key.map(String::into_bytes),
            value: message.value.map(String::into_bytes),
            headers,
        });
        drop(topics);

        self.state.appended.send_modify(|version| *version += 1);

        Ok(RecordMetadata {
            topic: topic.to_string(),
            partition,
            base_offset: offset,
        })
    }

    /// All records of a topic, partition by partition
    pub async fn records(&self, topic: &str) -> Vec<Record> {
        let topics = self.state.topics.read().await;
        topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Make the next `connect_consumer` call fail
    pub async fn fail_next_connect(&self, reason: impl Into<String>) {
        self.state.faults.lock().await.connect = Some(reason.into());
    }

    /// Make every subscription to `topic` fail
    pub async fn reject_subscriptions(&self, topic: impl Into<String>) {
        self.state
            .faults
            .lock()
            .await
            .rejected_topics
            .insert(topic.into());
    }

    /// Make `disconnect` fail (`Some`) or succeed again (`None`)
    pub async fn fail_disconnects(&self, reason: Option<String>) {
        self.state.faults.lock().await.disconnect = reason;
    }

    /// Number of connected consumers in a group
    pub async fn connected_consumers(&self, group_id: &str) -> usize {
        self.state
            .members
            .read()
            .await
            .get(group_id)
            .copied()
            .unwrap_or(0)
    }

    /// Total number of consumers that left their group
    pub fn disconnect_count(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Next offset the group will read from a partition
    pub async fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .committed
            .read()
            .await
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .copied()
    }
}

impl BrokerClient for MemoryBroker {
    fn connect_consumer(
        &self,
        group_id: String,
    ) -> BoxFuture<'_, Result<Arc<dyn ConsumerHandle>, BrokerError>> {
        Box::pin(async move {
            if let Some(reason) = self.state.faults.lock().await.connect.take() {
                return Err(BrokerError::Connection(reason));
            }

            *self
                .state
                .members
                .write()
                .await
                .entry(group_id.clone())
                .or_default() += 1;

            let (connected, _) = watch::channel(true);
            debug!(group_id = %group_id, "Memory consumer connected");

            let consumer: Arc<dyn ConsumerHandle> = Arc::new(MemoryConsumer {
                group_id,
                state: Arc::clone(&self.state),
                positions: Mutex::new(Vec::new()),
                connected,
            });
            Ok(consumer)
        })
    }

    fn connect_producer(&self) -> BoxFuture<'_, Result<Arc<dyn ProducerHandle>, BrokerError>> {
        Box::pin(async move {
            let producer: Arc<dyn ProducerHandle> = Arc::new(MemoryProducer {
                broker: self.clone(),
            });
            Ok(producer)
        })
    }

    fn broker_name(&self) -> &'static str {
        "memory"
    }
}

/// Read position of one subscribed partition
#[derive(Debug, Clone)]
struct Position {
    topic: String,
    partition: i32,
    next_offset: i64,
}

struct MemoryConsumer {
    group_id: String,
    state: Arc<BrokerState>,
    /// Fixed at subscribe time, in subscription order
    positions: Mutex<Vec<Position>>,
    connected: watch::Sender<bool>,
}

impl MemoryConsumer {
    async fn fetch_pending(&self) -> Vec<Record> {
        let topics = self.state.topics.read().await;
        let positions = self.positions.lock().await;

        let mut pending = Vec::new();
        for position in positions.iter() {
            if let Some(log) = topics
                .get(&position.topic)
                .and_then(|partitions| partitions.get(position.partition as usize))
            {
                pending.extend(log.iter().skip(position.next_offset as usize).cloned());
            }
        }
        pending
    }

    async fn commit(&self, topic: &str, partition: i32, next_offset: i64) {
        {
            let mut positions = self.positions.lock().await;
            if let Some(position) = positions
                .iter_mut()
                .find(|p| p.topic == topic && p.partition == partition)
            {
                position.next_offset = next_offset;
            }
        }

        self.state.committed.write().await.insert(
            (self.group_id.clone(), topic.to_string(), partition),
            next_offset,
        );
    }
}

impl ConsumerHandle for MemoryConsumer {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    fn subscribe(&self, subscription: TopicSubscription) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            if !*self.connected.borrow() {
                return Err(BrokerError::NotConnected(self.group_id.clone()));
            }

            if self
                .state
                .faults
                .lock()
                .await
                .rejected_topics
                .contains(&subscription.topic)
            {
                return Err(BrokerError::Subscription {
                    topic: subscription.topic,
                    reason: "rejected by broker".to_string(),
                });
            }

            let topics = self.state.topics.read().await;
            let Some(partitions) = topics.get(&subscription.topic) else {
                return Err(BrokerError::UnknownTopic(subscription.topic));
            };

            let committed = self.state.committed.read().await;
            let mut positions = self.positions.lock().await;

            for (index, log) in partitions.iter().enumerate() {
                let partition = index as i32;
                if positions
                    .iter()
                    .any(|p| p.topic == subscription.topic && p.partition == partition)
                {
                    continue;
                }

                let key = (self.group_id.clone(), subscription.topic.clone(), partition);
                let next_offset = match committed.get(&key) {
                    Some(offset) => *offset,
                    None if subscription.from_beginning => 0,
                    None => log.len() as i64,
                };

                positions.push(Position {
                    topic: subscription.topic.clone(),
                    partition,
                    next_offset,
                });
            }

            debug!(
                group_id = %self.group_id,
                topic = %subscription.topic,
                from_beginning = subscription.from_beginning,
                "Memory consumer subscribed"
            );
            Ok(())
        })
    }

    fn run(&self, handler: RecordHandler) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let mut shutdown = self.connected.subscribe();
            let mut appended = self.state.appended.subscribe();

            loop {
                if !*shutdown.borrow_and_update() {
                    return Ok(());
                }
                appended.borrow_and_update();

                for record in self.fetch_pending().await {
                    if !*self.connected.borrow() {
                        return Ok(());
                    }

                    let topic = record.topic.clone();
                    let partition = record.partition;
                    let offset = record.offset;

                    handler(record).await?;
                    self.commit(&topic, partition, offset + 1).await;
                }

                tokio::select! {
                    _ = appended.changed() => {}
                    _ = shutdown.changed() => {}
                }
            }
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            if let Some(reason) = self.state.faults.lock().await.disconnect.clone() {
                return Err(BrokerError::Client(reason));
            }

            if self.connected.send_replace(false) {
                if let Some(members) = self.state.members.write().await.get_mut(&self.group_id) {
                    *members = members.saturating_sub(1);
                }
                self.state.disconnects.fetch_add(1, Ordering::SeqCst);
                info!(group_id = %self.group_id, "Memory consumer disconnected");
            }
            Ok(())
        })
    }
}

struct MemoryProducer {
    broker: MemoryBroker,
}

impl ProducerHandle for MemoryProducer {
    fn send_batch(
        &self,
        batch: Vec<TopicMessages>,
    ) -> BoxFuture<'_, Result<Vec<RecordMetadata>, BrokerError>> {
        Box::pin(async move {
            let mut metadata = Vec::new();
            for topic_messages in batch {
                for message in topic_messages.messages {
                    metadata.push(self.broker.publish(&topic_messages.topic, message).await?);
                }
            }
            Ok(metadata)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::client::record_handler;
    use crate::session::{ConsumptionError, SinkError};
    use std::time::Duration;

    fn collecting_handler() -> (RecordHandler, Arc<Mutex<Vec<Record>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = record_handler(move |record: Record| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(record);
                Ok(())
            }
        });
        (handler, seen)
    }

    async fn wait_for_len(seen: &Arc<Mutex<Vec<Record>>>, expected: usize) {
        for _ in 0..200 {
            if seen.lock().await.len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {} records", expected);
    }

    #[tokio::test]
    async fn test_publish_assigns_offsets_and_partitions() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 3).await;

        let first = broker
            .publish("orders", OutgoingMessage::value("a").with_key("k1"))
            .await
            .unwrap();
        let second = broker
            .publish("orders", OutgoingMessage::value("b").with_key("k1"))
            .await
            .unwrap();

        // Same key, same partition, consecutive offsets
        assert_eq!(first.partition, second.partition);
        assert_eq!(second.base_offset, first.base_offset + 1);

        let explicit = OutgoingMessage {
            partition: Some(2),
            ..OutgoingMessage::value("c")
        };
        assert_eq!(broker.publish("orders", explicit).await.unwrap().partition, 2);

        let out_of_range = OutgoingMessage {
            partition: Some(7),
            ..OutgoingMessage::value("d")
        };
        assert!(matches!(
            broker.publish("orders", out_of_range).await,
            Err(BrokerError::Produce(_))
        ));

        // Publishing creates missing topics
        broker.publish("audit", OutgoingMessage::value("x")).await.unwrap();
        assert_eq!(broker.records("audit").await.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_topic() {
        let broker = MemoryBroker::new();
        let consumer = broker.connect_consumer("g1".to_string()).await.unwrap();

        let result = consumer.subscribe(TopicSubscription::new("missing")).await;
        assert!(matches!(result, Err(BrokerError::UnknownTopic(topic)) if topic == "missing"));
    }

    #[tokio::test]
    async fn test_consumer_starts_at_end_unless_from_beginning() {
        let broker = MemoryBroker::new();
        broker.publish("orders", OutgoingMessage::value("old")).await.unwrap();

        let latest = broker.connect_consumer("latest".to_string()).await.unwrap();
        latest.subscribe(TopicSubscription::new("orders")).await.unwrap();

        let earliest = broker.connect_consumer("earliest".to_string()).await.unwrap();
        earliest
            .subscribe(TopicSubscription::new("orders").from_beginning())
            .await
            .unwrap();

        // Published before run() but after subscribe(): must not be missed
        broker.publish("orders", OutgoingMessage::value("new")).await.unwrap();

        let (latest_handler, latest_seen) = collecting_handler();
        let (earliest_handler, earliest_seen) = collecting_handler();

        let latest_run = {
            let consumer = Arc::clone(&latest);
            tokio::spawn(async move { consumer.run(latest_handler).await })
        };
        let earliest_run = {
            let consumer = Arc::clone(&earliest);
            tokio::spawn(async move { consumer.run(earliest_handler).await })
        };

        wait_for_len(&latest_seen, 1).await;
        wait_for_len(&earliest_seen, 2).await;

        let latest_values: Vec<_> = latest_seen
            .lock()
            .await
            .iter()
            .map(|r| r.value.clone().unwrap())
            .collect();
        assert_eq!(latest_values, vec![b"new".to_vec()]);

        let earliest_values: Vec<_> = earliest_seen
            .lock()
            .await
            .iter()
            .map(|r| r.value.clone().unwrap())
            .collect();
        assert_eq!(earliest_values, vec![b"old".to_vec(), b"new".to_vec()]);

        latest.disconnect().await.unwrap();
        earliest.disconnect().await.unwrap();
        assert!(latest_run.await.unwrap().is_ok());
        assert!(earliest_run.await.unwrap().is_ok());
        assert_eq!(broker.committed_offset("earliest", "orders", 0).await, Some(2));
    }

    #[tokio::test]
    async fn test_group_resumes_from_committed_offset() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1).await;

        let first = broker.connect_consumer("g1".to_string()).await.unwrap();
        first.subscribe(TopicSubscription::new("orders")).await.unwrap();
        broker.publish("orders", OutgoingMessage::value("1")).await.unwrap();

        let (handler, seen) = collecting_handler();
        let run = {
            let consumer = Arc::clone(&first);
            tokio::spawn(async move { consumer.run(handler).await })
        };
        wait_for_len(&seen, 1).await;
        first.disconnect().await.unwrap();
        run.await.unwrap().unwrap();

        broker.publish("orders", OutgoingMessage::value("2")).await.unwrap();

        let second = broker.connect_consumer("g1".to_string()).await.unwrap();
        second
            .subscribe(TopicSubscription::new("orders").from_beginning())
            .await
            .unwrap();
        let (handler, seen) = collecting_handler();
        let run = {
            let consumer = Arc::clone(&second);
            tokio::spawn(async move { consumer.run(handler).await })
        };
        wait_for_len(&seen, 1).await;
        second.disconnect().await.unwrap();
        run.await.unwrap().unwrap();

        // Committed offset wins over from_beginning
        let values: Vec<_> = seen.lock().await.iter().map(|r| r.offset).collect();
        assert_eq!(values, vec![1]);
    }

    #[tokio::test]
    async fn test_handler_failure_stops_run_without_commit() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1).await;

        let consumer = broker.connect_consumer("g1".to_string()).await.unwrap();
        consumer.subscribe(TopicSubscription::new("orders")).await.unwrap();
        broker.publish("orders", OutgoingMessage::value("boom")).await.unwrap();

        let handler = record_handler(|record: Record| async move {
            Err(ConsumptionError {
                topic: record.topic,
                partition: record.partition,
                source: SinkError::Io {
                    path: "/nowhere".into(),
                    source: std::io::Error::other("disk full"),
                },
            })
        });

        let result = consumer.run(handler).await;
        match result {
            Err(BrokerError::Delivery(error)) => {
                assert_eq!(error.topic, "orders");
                assert_eq!(error.partition, 0);
            }
            other => panic!("expected delivery error, got {:?}", other),
        }
        assert_eq!(broker.committed_offset("g1", "orders", 0).await, None);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let broker = MemoryBroker::new();
        let consumer = broker.connect_consumer("g1".to_string()).await.unwrap();
        assert_eq!(broker.connected_consumers("g1").await, 1);

        consumer.disconnect().await.unwrap();
        consumer.disconnect().await.unwrap();

        assert_eq!(broker.connected_consumers("g1").await, 0);
        assert_eq!(broker.disconnect_count(), 1);
        assert!(matches!(
            consumer.subscribe(TopicSubscription::new("orders")).await,
            Err(BrokerError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1).await;

        broker.fail_next_connect("broker down").await;
        assert!(matches!(
            broker.connect_consumer("g1".to_string()).await,
            Err(BrokerError::Connection(_))
        ));
        // Only the next connect fails
        let consumer = broker.connect_consumer("g1".to_string()).await.unwrap();

        broker.reject_subscriptions("orders").await;
        assert!(matches!(
            consumer.subscribe(TopicSubscription::new("orders")).await,
            Err(BrokerError::Subscription { .. })
        ));

        broker.fail_disconnects(Some("stuck".to_string())).await;
        assert!(consumer.disconnect().await.is_err());
        broker.fail_disconnects(None).await;
        assert!(consumer.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_producer_send_batch() {
        let broker = MemoryBroker::new();
        let producer = broker.connect_producer().await.unwrap();

        let metadata = producer
            .send_batch(vec![TopicMessages {
                topic: "orders".to_string(),
                messages: vec![
                    OutgoingMessage::value("1").with_header("source", "test"),
                    OutgoingMessage::value("2"),
                ],
            }])
            .await
            .unwrap();

        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata[1].base_offset, 1);

        let records = broker.records("orders").await;
        let headers = records[0].headers.as_ref().unwrap();
        assert_eq!(headers.get("source").unwrap(), b"test");
        assert!(records[1].headers.is_none());
    }
}
