//! rdkafka-backed broker client.
//!
//! Compiled with the `kafka` feature. Connecting a consumer only proves that the
//! cluster is reachable and that subscribed topics exist; the group-joining
//! `StreamConsumer` is built when `run` starts, once every subscription is known.

use crate::broker::client::{BrokerClient, ConsumerHandle, ProducerHandle, RecordHandler};
use crate::broker::types::{
    BrokerError, Headers, NO_TIMESTAMP, Record, RecordMetadata, TopicMessages, TopicSubscription,
};
use futures::future::BoxFuture;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers as _, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

/// Connection settings for a Kafka cluster
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    pub client_id: String,
    pub connection_timeout: Duration,
    pub request_timeout: Duration,
}

impl KafkaSettings {
    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.brokers.join(","))
            .set("client.id", &self.client_id)
            .set(
                "socket.connection.setup.timeout.ms",
                self.connection_timeout.as_millis().to_string(),
            );
        config
    }
}

/// Broker client talking to a real cluster through librdkafka
pub struct KafkaBroker {
    settings: KafkaSettings,
}

impl KafkaBroker {
    pub fn new(settings: KafkaSettings) -> Self {
        Self { settings }
    }
}

impl BrokerClient for KafkaBroker {
    fn connect_consumer(
        &self,
        group_id: String,
    ) -> BoxFuture<'_, Result<Arc<dyn ConsumerHandle>, BrokerError>> {
        Box::pin(async move {
            let probe: BaseConsumer = self
                .settings
                .base_config()
                .set("group.id", &group_id)
                .create()
                .map_err(|e| BrokerError::Connection(e.to_string()))?;
            let probe = Arc::new(probe);

            let known_topics = fetch_topic_names(
                Arc::clone(&probe),
                self.settings.connection_timeout + self.settings.request_timeout,
            )
            .await
            .map_err(BrokerError::Connection)?;

            debug!(
                group_id = %group_id,
                topics = known_topics.len(),
                "Kafka consumer connected"
            );

            let (connected, _) = watch::channel(true);
            let consumer: Arc<dyn ConsumerHandle> = Arc::new(KafkaConsumer {
                group_id,
                settings: self.settings.clone(),
                probe,
                subscriptions: Mutex::new(Vec::new()),
                connected,
            });
            Ok(consumer)
        })
    }

    fn connect_producer(&self) -> BoxFuture<'_, Result<Arc<dyn ProducerHandle>, BrokerError>> {
        Box::pin(async move {
            let producer: FutureProducer = self
                .settings
                .base_config()
                .set(
                    "message.timeout.ms",
                    self.settings.request_timeout.as_millis().to_string(),
                )
                .create()
                .map_err(|e| BrokerError::Connection(e.to_string()))?;

            let producer: Arc<dyn ProducerHandle> = Arc::new(KafkaProducer {
                producer,
                timeout: self.settings.request_timeout,
            });
            Ok(producer)
        })
    }

    fn broker_name(&self) -> &'static str {
        "kafka"
    }
}

async fn fetch_topic_names(
    probe: Arc<BaseConsumer>,
    timeout: Duration,
) -> Result<Vec<String>, String> {
    tokio::task::spawn_blocking(move || {
        probe
            .fetch_metadata(None, timeout)
            .map(|metadata| {
                metadata
                    .topics()
                    .iter()
                    .map(|topic| topic.name().to_string())
                    .collect()
            })
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| e.to_string())?
}

struct KafkaConsumer {
    group_id: String,
    settings: KafkaSettings,
    probe: Arc<BaseConsumer>,
    subscriptions: Mutex<Vec<TopicSubscription>>,
    connected: watch::Sender<bool>,
}

impl KafkaConsumer {
    fn stream_consumer(&self, from_beginning: bool) -> Result<StreamConsumer, BrokerError> {
        self.settings
            .base_config()
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set(
                "auto.offset.reset",
                if from_beginning { "earliest" } else { "latest" },
            )
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }
}

fn to_record(message: &impl Message) -> Record {
    let headers = message.headers().map(|headers| {
        headers
            .iter()
            .map(|header| {
                (
                    header.key.to_string(),
                    header.value.map(<[u8]>::to_vec).unwrap_or_default(),
                )
            })
            .collect::<Headers>()
    });

    Record {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp: message.timestamp().to_millis().unwrap_or(NO_TIMESTAMP),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec),
        headers,
    }
}

impl ConsumerHandle for KafkaConsumer {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    fn subscribe(&self, subscription: TopicSubscription) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            if !*self.connected.borrow() {
                return Err(BrokerError::NotConnected(self.group_id.clone()));
            }

            let known_topics =
                fetch_topic_names(Arc::clone(&self.probe), self.settings.request_timeout)
                    .await
                    .map_err(|reason| BrokerError::Subscription {
                        topic: subscription.topic.clone(),
                        reason,
                    })?;
            if !known_topics.contains(&subscription.topic) {
                return Err(BrokerError::UnknownTopic(subscription.topic));
            }

            self.subscriptions.lock().await.push(subscription);
            Ok(())
        })
    }

    fn run(&self, handler: RecordHandler) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let subscriptions = self.subscriptions.lock().await.clone();
            let from_beginning = subscriptions.iter().any(|s| s.from_beginning);
            let topics: Vec<&str> = subscriptions.iter().map(|s| s.topic.as_str()).collect();

            let consumer = self.stream_consumer(from_beginning)?;
            consumer
                .subscribe(&topics)
                .map_err(|e| BrokerError::Subscription {
                    topic: topics.join(","),
                    reason: e.to_string(),
                })?;
            info!(group_id = %self.group_id, topics = ?topics, "Kafka consumer running");

            let mut shutdown = self.connected.subscribe();
            loop {
                if !*shutdown.borrow_and_update() {
                    return Ok(());
                }

                let received = tokio::select! {
                    received = consumer.recv() => received.map(|message| to_record(&message)),
                    _ = shutdown.changed() => continue,
                };

                match received {
                    Ok(record) => {
                        let topic = record.topic.clone();
                        let partition = record.partition;
                        let offset = record.offset;

                        if let Err(e) = handler(record).await {
                            tokio::spawn(hold_membership(
                                consumer,
                                shutdown,
                                self.group_id.clone(),
                            ));
                            return Err(e.into());
                        }

                        if let Err(e) = consumer.store_offset(&topic, partition, offset + 1) {
                            warn!(
                                group_id = %self.group_id,
                                topic = %topic,
                                partition,
                                error = %e,
                                "Failed to store consumed offset"
                            );
                        }
                    }
                    Err(e) => {
                        warn!(group_id = %self.group_id, error = %e, "Kafka receive error");
                    }
                }
            }
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            if self.connected.send_replace(false) {
                info!(group_id = %self.group_id, "Kafka consumer disconnected");
            }
            Ok(())
        })
    }
}

/// Keep a consumer in its group, paused, until it is disconnected.
async fn hold_membership(
    consumer: StreamConsumer,
    mut shutdown: watch::Receiver<bool>,
    group_id: String,
) {
    debug!(group_id = %group_id, "Delivery stopped, pausing consumer until disconnect");
    loop {
        // Partitions assigned by a rebalance are not paused yet
        match consumer.assignment() {
            Ok(assignment) => {
                if let Err(e) = consumer.pause(&assignment) {
                    warn!(group_id = %group_id, error = %e, "Failed to pause consumer");
                }
            }
            Err(e) => warn!(group_id = %group_id, error = %e, "Failed to read assignment"),
        }

        if !*shutdown.borrow_and_update() {
            break;
        }
        tokio::select! {
            // Polling keeps the member alive; anything delivered is left uncommitted
            _ = consumer.recv() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!(group_id = %group_id, "Paused consumer released");
}

struct KafkaProducer {
    producer: FutureProducer,
    timeout: Duration,
}

impl ProducerHandle for KafkaProducer {
    fn send_batch(
        &self,
        batch: Vec<TopicMessages>,
    ) -> BoxFuture<'_, Result<Vec<RecordMetadata>, BrokerError>> {
        Box::pin(async move {
            let mut metadata = Vec::new();

            for topic_messages in &batch {
                for message in &topic_messages.messages {
                    let mut record: FutureRecord<'_, str, str> =
                        FutureRecord::to(&topic_messages.topic);
                    if let Some(key) = &message.key {
                        record = record.key(key.as_str());
                    }
                    if let Some(value) = &message.value {
                        record = record.payload(value.as_str());
                    }
                    if let Some(partition) = message.partition {
                        record = record.partition(partition);
                    }
                    if !message.headers.is_empty() {
                        let headers = message.headers.iter().fold(
                            OwnedHeaders::new(),
                            |headers, (name, value)| {
                                headers.insert(Header {
                                    key: name.as_str(),
                                    value: Some(value.as_str()),
                                })
                            },
                        );
                        record = record.headers(headers);
                    }

                    let (partition, offset) = self
                        .producer
                        .send(record, self.timeout)
                        .await
                        .map_err(|(e, _)| BrokerError::Produce(e.to_string()))?;

                    metadata.push(RecordMetadata {
                        topic: topic_messages.topic.clone(),
                        partition,
                        base_offset: offset,
                    });
                }
            }

            Ok(metadata)
        })
    }
}
