//! Cluster descriptor persistence: CRUD with provider-aware uniqueness,
//! archiving of stale descriptors, and purge of archived ones.

use chrono::{Duration, Utc};

use super::{models::KafkaCluster, Store};
use crate::error::{MirrorError, Result};

impl Store {
    /// All cluster descriptors ordered by name.
    pub async fn list_clusters(&self) -> Result<Vec<KafkaCluster>> {
        let clusters = sqlx::query_as::<_, KafkaCluster>(
            "SELECT * FROM kafka_clusters ORDER BY name",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(clusters)
    }

    /// A single cluster by name.
    pub async fn get_cluster(&self, name: &str) -> Result<Option<KafkaCluster>> {
        let cluster = sqlx::query_as::<_, KafkaCluster>(
            "SELECT * FROM kafka_clusters WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?;
        Ok(cluster)
    }

    /// Insert a new cluster. Names are unique; `confluent` clusters with a
    /// non-empty `cluster_id` are also unique on that id.
    pub async fn create_cluster(&self, cluster: &KafkaCluster) -> Result<()> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM kafka_clusters WHERE name = ?")
                .bind(&cluster.name)
                .fetch_one(self.pool())
                .await?;
        if count.0 > 0 {
            return Err(MirrorError::configuration(
                "a cluster with this name already exists",
            ));
        }

        if cluster.provider == "confluent" && !cluster.cluster_id.is_empty() {
            let count: (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM kafka_clusters WHERE cluster_id = ?")
                    .bind(&cluster.cluster_id)
                    .fetch_one(self.pool())
                    .await?;
            if count.0 > 0 {
                return Err(MirrorError::configuration(
                    "a confluent cluster with this cluster_id already exists",
                ));
            }
        }

        sqlx::query(
            r#"INSERT INTO kafka_clusters
               (name, provider, cluster_id, brokers, security_config, api_key, api_secret, connection_string, status, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&cluster.name)
        .bind(&cluster.provider)
        .bind(&cluster.cluster_id)
        .bind(&cluster.brokers)
        .bind(&cluster.security_config)
        .bind(&cluster.api_key)
        .bind(&cluster.api_secret)
        .bind(&cluster.connection_string)
        .bind(&cluster.status)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Update an existing cluster in place (keyed by name).
    pub async fn update_cluster(&self, cluster: &KafkaCluster) -> Result<()> {
        if cluster.provider == "confluent" && !cluster.cluster_id.is_empty() {
            let count: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM kafka_clusters WHERE cluster_id = ? AND name != ?",
            )
            .bind(&cluster.cluster_id)
            .bind(&cluster.name)
            .fetch_one(self.pool())
            .await?;
            if count.0 > 0 {
                return Err(MirrorError::configuration(
                    "a confluent cluster with this cluster_id already exists",
                ));
            }
        }

        sqlx::query(
            r#"UPDATE kafka_clusters
               SET provider = ?, cluster_id = ?, brokers = ?, security_config = ?,
                   api_key = ?, api_secret = ?, connection_string = ?, updated_at = ?
               WHERE name = ?"#,
        )
        .bind(&cluster.provider)
        .bind(&cluster.cluster_id)
        .bind(&cluster.brokers)
        .bind(&cluster.security_config)
        .bind(&cluster.api_key)
        .bind(&cluster.api_secret)
        .bind(&cluster.connection_string)
        .bind(Utc::now())
        .bind(&cluster.name)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_cluster(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM kafka_clusters WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_cluster_status(&self, name: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE kafka_clusters SET status = ?, updated_at = ? WHERE name = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(name)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Permanently delete all archived clusters.
    pub async fn purge_archived_clusters(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kafka_clusters WHERE status = 'archived'")
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Move clusters from inactive to archived once they have been
    /// untouched for the given number of days.
    pub async fn archive_inactive_clusters(&self, after_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(after_days);
        let result = sqlx::query(
            "UPDATE kafka_clusters SET status = 'archived' WHERE status = 'inactive' AND updated_at < ?",
        )
        .bind(cutoff)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }
}
