//! # Persistent Store
//!
//! SQLite-backed persistence for cluster descriptors, job definitions,
//! topic mappings, delta-encoded metrics, mirror progress, and audit
//! events. All queries are runtime-bound sqlx statements; the schema is
//! created on connect.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::Result;

pub mod clusters;
pub mod events;
pub mod jobs;
pub mod mappings;
pub mod metrics;
pub mod models;
pub mod progress;
pub mod pruning;

pub use models::*;
pub use progress::ProgressTracker;

/// Handle to the persistent store. Cheap to clone; all clones share one
/// connection pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (and migrate) the store at the given SQLite URL.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!("store ready at {}", url);
        Ok(store)
    }

    /// Open an in-memory store. A single connection keeps every query on
    /// the same database instance.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS kafka_clusters (
        name TEXT PRIMARY KEY,
        provider TEXT NOT NULL DEFAULT '',
        cluster_id TEXT NOT NULL DEFAULT '',
        brokers TEXT NOT NULL,
        security_config TEXT NOT NULL DEFAULT '{}',
        api_key TEXT NOT NULL DEFAULT '',
        api_secret TEXT NOT NULL DEFAULT '',
        connection_string TEXT,
        status TEXT NOT NULL DEFAULT 'active',
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS replication_jobs (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        source_cluster_name TEXT NOT NULL,
        target_cluster_name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'paused',
        failed_reason TEXT,
        batch_size INTEGER NOT NULL DEFAULT 1000,
        parallelism INTEGER NOT NULL DEFAULT 1,
        compression TEXT NOT NULL DEFAULT 'none',
        preserve_partitions INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS topic_mappings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        source_topic_pattern TEXT NOT NULL,
        target_topic_pattern TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS aggregated_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        messages_replicated_delta INTEGER NOT NULL DEFAULT 0,
        bytes_transferred_delta INTEGER NOT NULL DEFAULT 0,
        messages_consumed_delta INTEGER NOT NULL DEFAULT 0,
        bytes_consumed_delta INTEGER NOT NULL DEFAULT 0,
        avg_lag REAL NOT NULL DEFAULT 0,
        error_count_delta INTEGER NOT NULL DEFAULT 0,
        timestamp TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_aggregated_metrics_job_time ON aggregated_metrics (job_id, timestamp)",
    r#"
    CREATE TABLE IF NOT EXISTS operational_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type TEXT NOT NULL,
        initiator TEXT NOT NULL,
        details TEXT NOT NULL,
        timestamp TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mirror_progress (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        source_topic TEXT NOT NULL,
        target_topic TEXT NOT NULL,
        partition_id INTEGER NOT NULL,
        source_offset INTEGER NOT NULL DEFAULT 0,
        target_offset INTEGER NOT NULL DEFAULT 0,
        source_high_water_mark INTEGER NOT NULL DEFAULT 0,
        target_high_water_mark INTEGER NOT NULL DEFAULT 0,
        last_replicated_offset INTEGER NOT NULL DEFAULT 0,
        replication_lag INTEGER NOT NULL DEFAULT 0,
        last_updated TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        UNIQUE (job_id, source_topic, partition_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS resume_points (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        source_topic TEXT NOT NULL,
        target_topic TEXT NOT NULL,
        partition_id INTEGER NOT NULL,
        safe_resume_offset INTEGER NOT NULL,
        calculated_at TEXT NOT NULL,
        validation_status TEXT NOT NULL DEFAULT 'unvalidated',
        migration_checkpoint_id INTEGER,
        gap_detected INTEGER NOT NULL DEFAULT 0,
        gap_start_offset INTEGER,
        gap_end_offset INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mirror_gaps (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        source_topic TEXT NOT NULL,
        target_topic TEXT NOT NULL,
        partition_id INTEGER NOT NULL,
        gap_start_offset INTEGER NOT NULL,
        gap_end_offset INTEGER NOT NULL,
        gap_size INTEGER NOT NULL,
        detected_at TEXT NOT NULL,
        gap_type TEXT NOT NULL,
        resolution_status TEXT NOT NULL DEFAULT 'open',
        resolution_method TEXT,
        resolved_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mirror_state_analysis (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        analysis_type TEXT NOT NULL,
        source_cluster_state TEXT NOT NULL DEFAULT '',
        target_cluster_state TEXT NOT NULL DEFAULT '',
        analysis_results TEXT NOT NULL DEFAULT '',
        recommendations TEXT NOT NULL DEFAULT '',
        critical_issues_count INTEGER NOT NULL DEFAULT 0,
        warning_issues_count INTEGER NOT NULL DEFAULT 0,
        analyzed_at TEXT NOT NULL,
        analyzer_version TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS migration_checkpoints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        checkpoint_type TEXT NOT NULL,
        source_consumer_group_offsets TEXT NOT NULL DEFAULT '{}',
        target_high_water_marks TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        created_by TEXT NOT NULL DEFAULT '',
        migration_reason TEXT,
        validation_results TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS configuration (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
];

impl Store {
    /// Persist the whole service configuration as a JSON snapshot.
    pub async fn save_config(&self, config: &crate::config::Config) -> Result<()> {
        let json = serde_json::to_string(config)?;
        sqlx::query(
            "INSERT OR REPLACE INTO configuration (key, value, updated_at) VALUES (?, ?, ?)",
        )
        .bind("full_config")
        .bind(json)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load the persisted configuration snapshot, if any.
    pub async fn load_config(&self) -> Result<Option<crate::config::Config>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM configuration WHERE key = 'full_config'")
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
