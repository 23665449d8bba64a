//! Row types for the persistent store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::SecurityConfig;

/// A Kafka cluster's connection details
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct KafkaCluster {
    pub name: String,
    pub provider: String,
    pub cluster_id: String,
    pub brokers: String,
    /// Security profile persisted as JSON
    pub security_config: String,
    pub api_key: String,
    pub api_secret: String,
    pub connection_string: Option<String>,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl KafkaCluster {
    /// Parse the persisted security profile. An empty column means no
    /// security configuration.
    pub fn security(&self) -> Result<SecurityConfig, serde_json::Error> {
        if self.security_config.trim().is_empty() || self.security_config == "{}" {
            return Ok(SecurityConfig::default());
        }
        serde_json::from_str(&self.security_config)
    }
}

/// A single replication job
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ReplicationJob {
    pub id: String,
    pub name: String,
    pub source_cluster_name: String,
    pub target_cluster_name: String,
    pub status: String,
    pub failed_reason: Option<String>,
    pub batch_size: i64,
    pub parallelism: i64,
    pub compression: String,
    pub preserve_partitions: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A topic mapping rule within a job
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct TopicMapping {
    #[serde(default)]
    pub id: i64,
    pub job_id: String,
    pub source_topic_pattern: String,
    pub target_topic_pattern: String,
    pub enabled: bool,
}

/// One delta-encoded metrics row
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AggregatedMetric {
    pub id: i64,
    pub job_id: String,
    pub messages_replicated_delta: i64,
    pub bytes_transferred_delta: i64,
    pub messages_consumed_delta: i64,
    pub bytes_consumed_delta: i64,
    pub avg_lag: f64,
    pub error_count_delta: i64,
    pub timestamp: DateTime<Utc>,
}

/// A bucketed summary row returned by the aggregated-history query
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MetricBucket {
    pub period: String,
    pub messages_replicated: i64,
    pub bytes_transferred: i64,
    pub avg_lag: f64,
    pub total_errors: i64,
}

/// An audit log entry
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct OperationalEvent {
    pub id: i64,
    pub event_type: String,
    pub initiator: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// Replication progress per job and topic partition
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MirrorProgress {
    pub id: i64,
    pub job_id: String,
    pub source_topic: String,
    pub target_topic: String,
    pub partition_id: i64,
    pub source_offset: i64,
    pub target_offset: i64,
    pub source_high_water_mark: i64,
    pub target_high_water_mark: i64,
    pub last_replicated_offset: i64,
    pub replication_lag: i64,
    pub last_updated: DateTime<Utc>,
    pub status: String,
}

/// A safe resume point derived from mirror progress
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ResumePoint {
    pub id: i64,
    pub job_id: String,
    pub source_topic: String,
    pub target_topic: String,
    pub partition_id: i64,
    pub safe_resume_offset: i64,
    pub calculated_at: DateTime<Utc>,
    pub validation_status: String,
    pub migration_checkpoint_id: Option<i64>,
    pub gap_detected: bool,
    pub gap_start_offset: Option<i64>,
    pub gap_end_offset: Option<i64>,
}

/// A detected replication gap
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MirrorGap {
    pub id: i64,
    pub job_id: String,
    pub source_topic: String,
    pub target_topic: String,
    pub partition_id: i64,
    pub gap_start_offset: i64,
    pub gap_end_offset: i64,
    pub gap_size: i64,
    pub detected_at: DateTime<Utc>,
    pub gap_type: String,
    pub resolution_status: String,
    pub resolution_method: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A cross-cluster state analysis entry
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MirrorStateAnalysis {
    pub id: i64,
    pub job_id: String,
    pub analysis_type: String,
    pub source_cluster_state: String,
    pub target_cluster_state: String,
    pub analysis_results: String,
    pub recommendations: String,
    pub critical_issues_count: i64,
    pub warning_issues_count: i64,
    pub analyzed_at: DateTime<Utc>,
    pub analyzer_version: String,
}

/// A snapshot taken before a server migration
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MigrationCheckpoint {
    pub id: i64,
    pub job_id: String,
    pub checkpoint_type: String,
    /// JSON map of `topic:partition` to committed source offset
    pub source_consumer_group_offsets: String,
    /// JSON map of `topic:partition` to target high water mark
    pub target_high_water_marks: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub migration_reason: Option<String>,
    pub validation_results: Option<String>,
}
