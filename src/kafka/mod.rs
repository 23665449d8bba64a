//! # Kafka Integration Module
//!
//! Client construction and the thin wrappers the mirror engine drives:
//! a configured consumer for the source cluster, a producer for the target
//! cluster, and an admin handle for topic discovery and creation. The
//! wrappers sit behind async traits so the engine and manager test without
//! brokers.

pub mod admin;
pub mod consumer;
pub mod factory;
pub mod producer;

pub use admin::{ClusterAdmin, KafkaClusterAdmin};
pub use consumer::{Assignment, FetchedRecord, KafkaSourceConsumer, SourceConsumer};
pub use factory::{admin_config, consumer_config, producer_config, ProducerTuning};
pub use producer::{KafkaTargetProducer, OutboundRecord, TargetProducer};
