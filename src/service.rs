//! # Service Facade
//!
//! `MirrorService` wires the store, event hub, job manager, telemetry sink,
//! and maintenance task together and exposes the operations the API layer
//! consumes: job CRUD and lifecycle, cluster CRUD, metric queries, and
//! event subscription. Mutating operations append audit rows.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{MirrorError, Result};
use crate::hub::{EventHub, HubMessage, HubMessageKind, HubSubscription};
use crate::manager::JobManager;
use crate::mirror::EngineSettings;
use crate::sinks::TelemetrySink;
use crate::store::metrics::Granularity;
use crate::store::models::{
    AggregatedMetric, KafkaCluster, MetricBucket, OperationalEvent, ReplicationJob, TopicMapping,
};
use crate::store::Store;
use crate::types::{ClusterProvider, CompressionType, JobStatus, ReplicationMetric, SecurityConfig};

const MAINTENANCE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// Parameters for creating a replication job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub source_cluster_name: String,
    pub target_cluster_name: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_parallelism")]
    pub parallelism: i64,
    #[serde(default)]
    pub compression: Option<String>,
    #[serde(default)]
    pub preserve_partitions: bool,
    #[serde(default)]
    pub mappings: Vec<NewMapping>,
}

fn default_batch_size() -> i64 {
    1000
}

fn default_parallelism() -> i64 {
    1
}

/// One topic mapping in a job create/update request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMapping {
    pub source_topic_pattern: String,
    pub target_topic_pattern: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Parameters for registering a cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCluster {
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub cluster_id: String,
    pub brokers: String,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub connection_string: Option<String>,
}

/// The replication service: everything the API layer talks to
pub struct MirrorService {
    config: Config,
    store: Store,
    hub: EventHub,
    manager: Arc<JobManager>,
    maintenance: parking_lot::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl MirrorService {
    /// Connect the store and assemble the service. Does not start jobs.
    pub async fn new(config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| MirrorError::configuration(e.to_string()))?;

        let store = Store::connect(&config.database.url, config.database.max_connections).await?;
        Self::with_store(config, store)
    }

    /// Assemble the service over an existing store handle.
    pub fn with_store(config: Config, store: Store) -> Result<Self> {
        let hub = EventHub::default();
        let sink = TelemetrySink::from_config(&config.monitoring)?.map(Arc::new);
        let manager = JobManager::new(
            store.clone(),
            hub.clone(),
            sink,
            EngineSettings::from_config(&config.replication),
            config.monitoring.clone(),
        );

        Ok(Self {
            config,
            store,
            hub,
            manager,
            maintenance: parking_lot::Mutex::new(None),
        })
    }

    /// Start the service: resume active jobs and begin the maintenance
    /// cycle.
    pub async fn start(&self) -> Result<()> {
        info!("starting replication service");
        self.store.save_config(&self.config).await?;
        self.manager.restart_all_jobs().await?;

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let store = self.store.clone();
        let retention = self.config.retention.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = store.prune_old_data(&retention).await {
                            warn!("retention pruning failed: {e}");
                        }
                        if let Err(e) = store
                            .archive_inactive_clusters(retention.archive_inactive_after_days)
                            .await
                        {
                            warn!("cluster archiving failed: {e}");
                        }
                    }
                }
            }
        });
        *self.maintenance.lock() = Some((cancel, handle));

        info!(running = self.manager.running_count(), "replication service started");
        Ok(())
    }

    /// Stop the service: halt maintenance and close every running job.
    pub async fn stop(&self) -> Result<()> {
        info!("stopping replication service");
        if let Some((cancel, handle)) = self.maintenance.lock().take() {
            cancel.cancel();
            handle.abort();
        }
        self.manager.close().await;
        info!("replication service stopped");
        Ok(())
    }

    /// Service health summary.
    pub async fn health(&self) -> serde_json::Value {
        json!({
            "status": "healthy",
            "running_jobs": self.manager.running_count(),
            "event_subscribers": self.hub.subscriber_count(),
            "dropped_events": self.hub.dropped_messages(),
        })
    }

    pub fn manager(&self) -> &Arc<JobManager> {
        &self.manager
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // --- Jobs ---

    pub async fn list_jobs(&self) -> Result<Vec<ReplicationJob>> {
        self.store.list_jobs().await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<ReplicationJob>> {
        self.store.get_job(job_id).await
    }

    /// Validate and persist a new job (created paused) with its mappings.
    pub async fn create_job(&self, new: NewJob, initiator: &str) -> Result<ReplicationJob> {
        if new.batch_size < 1 {
            return Err(MirrorError::configuration("batch_size must be at least 1"));
        }
        if new.parallelism < 1 {
            return Err(MirrorError::configuration("parallelism must be at least 1"));
        }
        let compression = match &new.compression {
            Some(value) => CompressionType::from_str(value)?,
            None => CompressionType::None,
        };
        if new.source_cluster_name == new.target_cluster_name
            && !self.config.replication.allow_same_cluster
        {
            return Err(MirrorError::configuration(
                "source and target cluster must differ",
            ));
        }
        for cluster in [&new.source_cluster_name, &new.target_cluster_name] {
            if self.store.get_cluster(cluster).await?.is_none() {
                return Err(MirrorError::configuration(format!(
                    "cluster not found: {cluster}"
                )));
            }
        }

        let job = ReplicationJob {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            source_cluster_name: new.source_cluster_name,
            target_cluster_name: new.target_cluster_name,
            status: JobStatus::Paused.as_str().to_string(),
            failed_reason: None,
            batch_size: new.batch_size,
            parallelism: new.parallelism,
            compression: compression.as_str().to_string(),
            preserve_partitions: new.preserve_partitions,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.create_job(&job).await?;

        let mappings: Vec<TopicMapping> = new
            .mappings
            .into_iter()
            .map(|m| TopicMapping {
                id: 0,
                job_id: job.id.clone(),
                source_topic_pattern: m.source_topic_pattern,
                target_topic_pattern: m.target_topic_pattern,
                enabled: m.enabled,
            })
            .collect();
        if !mappings.is_empty() {
            self.store.update_mappings_for_job(&job.id, &mappings).await?;
        }

        self.audit("job_created", initiator, &format!("job {} created", job.name))
            .await;
        Ok(job)
    }

    pub async fn update_job(&self, job: &ReplicationJob, initiator: &str) -> Result<()> {
        self.store.update_job(job).await?;
        self.audit("job_updated", initiator, &format!("job {} updated", job.name))
            .await;
        Ok(())
    }

    /// Replace a job's mapping set.
    pub async fn update_mappings(
        &self,
        job_id: &str,
        mappings: Vec<NewMapping>,
        initiator: &str,
    ) -> Result<()> {
        let rows: Vec<TopicMapping> = mappings
            .into_iter()
            .map(|m| TopicMapping {
                id: 0,
                job_id: job_id.to_string(),
                source_topic_pattern: m.source_topic_pattern,
                target_topic_pattern: m.target_topic_pattern,
                enabled: m.enabled,
            })
            .collect();
        self.store.update_mappings_for_job(job_id, &rows).await?;
        self.audit(
            "mappings_updated",
            initiator,
            &format!("mappings replaced for job {job_id}"),
        )
        .await;
        Ok(())
    }

    pub async fn get_mappings(&self, job_id: &str) -> Result<Vec<TopicMapping>> {
        self.store.get_mappings_for_job(job_id).await
    }

    /// Stop (if running) and delete a job.
    pub async fn delete_job(&self, job_id: &str, initiator: &str) -> Result<()> {
        self.manager.stop_job(job_id).await?;
        self.store.delete_job(job_id).await?;
        self.store.update_mappings_for_job(job_id, &[]).await?;
        self.audit("job_deleted", initiator, &format!("job {job_id} deleted"))
            .await;
        Ok(())
    }

    pub async fn start_job(&self, job_id: &str, initiator: &str) -> Result<()> {
        self.manager.start_job(job_id).await?;
        self.audit("job_started", initiator, &format!("job {job_id} started"))
            .await;
        Ok(())
    }

    pub async fn stop_job(&self, job_id: &str, initiator: &str) -> Result<()> {
        self.manager.stop_job(job_id).await?;
        self.audit("job_stopped", initiator, &format!("job {job_id} stopped"))
            .await;
        Ok(())
    }

    pub async fn pause_job(&self, job_id: &str, initiator: &str) -> Result<()> {
        self.manager.pause_job(job_id).await?;
        self.audit("job_paused", initiator, &format!("job {job_id} paused"))
            .await;
        Ok(())
    }

    pub async fn restart_job(&self, job_id: &str, initiator: &str) -> Result<()> {
        self.manager.restart_job(job_id).await?;
        self.audit("job_restarted", initiator, &format!("job {job_id} restarted"))
            .await;
        Ok(())
    }

    // --- Clusters ---

    pub async fn list_clusters(&self) -> Result<Vec<KafkaCluster>> {
        self.store.list_clusters().await
    }

    pub async fn get_cluster(&self, name: &str) -> Result<Option<KafkaCluster>> {
        self.store.get_cluster(name).await
    }

    pub async fn create_cluster(&self, new: NewCluster, initiator: &str) -> Result<KafkaCluster> {
        // Reject unknown providers before anything persists.
        ClusterProvider::from_str(&new.provider)?;

        let cluster = KafkaCluster {
            name: new.name,
            provider: new.provider,
            cluster_id: new.cluster_id,
            brokers: new.brokers,
            security_config: serde_json::to_string(&new.security)?,
            api_key: new.api_key,
            api_secret: new.api_secret,
            connection_string: new.connection_string,
            status: "active".to_string(),
            updated_at: Utc::now(),
        };
        self.store.create_cluster(&cluster).await?;
        self.audit(
            "cluster_created",
            initiator,
            &format!("cluster {} registered", cluster.name),
        )
        .await;
        Ok(cluster)
    }

    pub async fn update_cluster(&self, cluster: &KafkaCluster, initiator: &str) -> Result<()> {
        ClusterProvider::from_str(&cluster.provider)?;
        self.store.update_cluster(cluster).await?;
        self.audit(
            "cluster_updated",
            initiator,
            &format!("cluster {} updated", cluster.name),
        )
        .await;
        Ok(())
    }

    pub async fn delete_cluster(&self, name: &str, initiator: &str) -> Result<()> {
        self.store.delete_cluster(name).await?;
        self.audit("cluster_deleted", initiator, &format!("cluster {name} deleted"))
            .await;
        Ok(())
    }

    pub async fn set_cluster_status(
        &self,
        name: &str,
        status: &str,
        initiator: &str,
    ) -> Result<()> {
        self.store.set_cluster_status(name, status).await?;
        self.audit(
            "cluster_status_changed",
            initiator,
            &format!("cluster {name} status set to {status}"),
        )
        .await;
        Ok(())
    }

    pub async fn purge_archived_clusters(&self, initiator: &str) -> Result<u64> {
        let purged = self.store.purge_archived_clusters().await?;
        if purged > 0 {
            self.audit(
                "clusters_purged",
                initiator,
                &format!("{purged} archived clusters purged"),
            )
            .await;
        }
        Ok(purged)
    }

    // --- Metrics ---

    pub async fn latest_metrics(&self, job_id: &str) -> Result<ReplicationMetric> {
        self.store.get_latest_metrics(job_id).await
    }

    pub async fn historical_metrics(
        &self,
        job_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AggregatedMetric>> {
        self.store.get_historical_metrics(job_id, from, to).await
    }

    pub async fn aggregated_historical_metrics(
        &self,
        job_id: &str,
        period_days: i64,
        granularity: &str,
    ) -> Result<Vec<MetricBucket>> {
        let granularity = Granularity::from_str(granularity)?;
        self.store
            .get_aggregated_historical_metrics(job_id, period_days, granularity)
            .await
    }

    // --- Events ---

    /// Register a hub subscriber for the streaming endpoint.
    pub fn subscribe(&self) -> HubSubscription {
        self.hub.subscribe()
    }

    pub async fn recent_operational_events(&self, limit: i64) -> Result<Vec<OperationalEvent>> {
        self.store.list_operational_events(limit).await
    }

    /// Append an audit row and mirror it onto the hub. Audit failures are
    /// logged, never surfaced to the caller.
    async fn audit(&self, event_type: &str, initiator: &str, details: &str) {
        if let Err(e) = self
            .store
            .record_operational_event(event_type, initiator, details)
            .await
        {
            warn!(event_type, "audit write failed: {e}");
        }
        self.hub.publish(HubMessage::new(
            HubMessageKind::Audit,
            None,
            json!({ "event_type": event_type, "initiator": initiator, "details": details }),
        ));
    }
}
