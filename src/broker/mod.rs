pub mod client;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod types;

pub use client::{BrokerClient, ConsumerHandle, ProducerHandle, RecordHandler, record_handler};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaBroker, KafkaSettings};
pub use memory::MemoryBroker;
pub use types::*;
