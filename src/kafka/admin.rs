//! Admin access to a cluster: topic discovery, topic creation, and
//! watermark queries. Used by the mirror engine during startup only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::RDKafkaErrorCode;
use tracing::debug;

use super::factory;
use crate::error::{MirrorError, Result};
use crate::store::models::KafkaCluster;

/// The engine's view of a cluster's admin surface
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// Topic names mapped to their partition counts.
    async fn topic_partitions(&self, timeout: Duration) -> Result<HashMap<String, i32>>;

    /// Create a topic. Succeeds if the topic already exists.
    async fn create_topic(
        &self,
        topic: &str,
        partitions: i32,
        replication: i32,
        timeout: Duration,
    ) -> Result<()>;

    /// Low and high watermarks for one partition.
    async fn fetch_watermarks(
        &self,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> Result<(i64, i64)>;
}

/// rdkafka-backed admin handle
pub struct KafkaClusterAdmin {
    admin: AdminClient<DefaultClientContext>,
    /// Metadata and watermark probe; admin clients cannot query offsets.
    probe: Arc<BaseConsumer>,
}

impl KafkaClusterAdmin {
    pub fn connect(cluster: &KafkaCluster, client_id: &str) -> Result<Self> {
        let config = factory::admin_config(cluster, client_id)?;
        let admin: AdminClient<DefaultClientContext> = config.create()?;
        let probe: BaseConsumer = factory::admin_config(cluster, client_id)?.create()?;
        Ok(Self {
            admin,
            probe: Arc::new(probe),
        })
    }
}

#[async_trait]
impl ClusterAdmin for KafkaClusterAdmin {
    async fn topic_partitions(&self, timeout: Duration) -> Result<HashMap<String, i32>> {
        let probe = Arc::clone(&self.probe);
        let metadata = tokio::task::spawn_blocking(move || {
            probe.fetch_metadata(None, timeout)
        })
        .await
        .map_err(|e| MirrorError::internal(format!("metadata task failed: {e}")))??;

        let topics = metadata
            .topics()
            .iter()
            .map(|t| (t.name().to_string(), t.partitions().len() as i32))
            .collect();
        Ok(topics)
    }

    async fn create_topic(
        &self,
        topic: &str,
        partitions: i32,
        replication: i32,
        timeout: Duration,
    ) -> Result<()> {
        let new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(replication));
        let options = AdminOptions::new().operation_timeout(Some(timeout));

        let results = self.admin.create_topics(&[new_topic], &options).await?;
        for result in results {
            match result {
                Ok(name) => debug!(topic = %name, partitions, "target topic created"),
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((name, code)) => {
                    return Err(MirrorError::startup(format!(
                        "failed to create topic {name}: {code}"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn fetch_watermarks(
        &self,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> Result<(i64, i64)> {
        let probe = Arc::clone(&self.probe);
        let topic = topic.to_string();
        let watermarks = tokio::task::spawn_blocking(move || {
            probe.fetch_watermarks(&topic, partition, timeout)
        })
        .await
        .map_err(|e| MirrorError::internal(format!("watermark task failed: {e}")))??;
        Ok(watermarks)
    }
}
