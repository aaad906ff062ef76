use crate::broker::types::{BrokerError, Record, RecordMetadata, TopicMessages, TopicSubscription};
use crate::session::ConsumptionError;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Callback invoked once per delivered record.
///
/// An `Err` stops the consumer's run loop; the failing record is not committed.
pub type RecordHandler =
    Arc<dyn Fn(Record) -> BoxFuture<'static, Result<(), ConsumptionError>> + Send + Sync>;

/// Wrap an async closure into a [`RecordHandler`]
pub fn record_handler<F, Fut>(handler: F) -> RecordHandler
where
    F: Fn(Record) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ConsumptionError>> + Send + 'static,
{
    Arc::new(move |record| handler(record).boxed())
}

/// Connectivity layer to a Kafka cluster.
pub trait BrokerClient: Send + Sync {
    /// Connect a consumer that joins `group_id`
    fn connect_consumer(
        &self,
        group_id: String,
    ) -> BoxFuture<'_, Result<Arc<dyn ConsumerHandle>, BrokerError>>;

    /// Connect a producer
    fn connect_producer(&self) -> BoxFuture<'_, Result<Arc<dyn ProducerHandle>, BrokerError>>;

    /// Get broker backend name
    fn broker_name(&self) -> &'static str;
}

/// A connected group member.
pub trait ConsumerHandle: Send + Sync {
    /// Consumer group this handle belongs to
    fn group_id(&self) -> &str;

    /// Add a topic to the subscription. May be called several times before [`run`].
    ///
    /// [`run`]: ConsumerHandle::run
    fn subscribe(&self, subscription: TopicSubscription) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Deliver records to `handler` until disconnected.
    ///
    /// Resolves to `Ok(())` once [`disconnect`] is called, or to
    /// [`BrokerError::Delivery`] as soon as the handler fails.
    ///
    /// [`disconnect`]: ConsumerHandle::disconnect
    fn run(&self, handler: RecordHandler) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Leave the group. Safe to call on an already disconnected handle.
    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>>;
}

/// A connected producer.
pub trait ProducerHandle: Send + Sync {
    fn send_batch(
        &self,
        batch: Vec<TopicMessages>,
    ) -> BoxFuture<'_, Result<Vec<RecordMetadata>, BrokerError>>;

    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async { Ok(()) })
    }
}
