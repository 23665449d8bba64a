//! # Mirror Service
//!
//! A Kafka replication service: named, persistent replication jobs consume
//! records from a set of source topics and produce them onto corresponding
//! target topics, surviving restarts, tracking per-partition progress, and
//! exposing live metrics and incident signals to operators.
//!
//! - Job definitions, cluster descriptors, metrics, and progress live in a
//!   SQLite store (`store`)
//! - The job manager (`manager`) supervises one mirror engine per active
//!   job (`mirror`)
//! - The engine fans fetched batches across a bounded producer worker pool
//!   and folds counters into delta-encoded metric rows each tick
//! - The event hub (`hub`) streams typed messages to any number of
//!   subscribers without ever blocking replication

pub mod config;
pub mod error;
pub mod hub;
pub mod kafka;
pub mod manager;
pub mod mirror;
pub mod service;
pub mod sinks;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{MirrorError, Result};
pub use hub::{EventHub, HubMessage, HubMessageKind, HubSubscription};
pub use manager::{EngineFactory, JobManager};
pub use mirror::{
    EngineDeps, EngineSettings, MirrorEngine, ReplicationEngine, RuntimeConfig,
};
pub use service::{MirrorService, NewCluster, NewJob, NewMapping};
pub use store::Store;
pub use types::{JobStatus, ReplicationMetric};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SERVICE_NAME: &str = "mirror-service";

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_service_assembly() {
        let store = Store::open_in_memory().await.unwrap();
        let service = MirrorService::with_store(Config::default(), store).unwrap();
        let health = service.health().await;
        assert_eq!(health["running_jobs"], 0);
    }
}
