//! Replication job persistence: CRUD with name uniqueness and status
//! transitions.

use chrono::Utc;

use super::{models::ReplicationJob, Store};
use crate::error::{MirrorError, Result};
use crate::types::JobStatus;

impl Store {
    /// All jobs, newest first.
    pub async fn list_jobs(&self) -> Result<Vec<ReplicationJob>> {
        let jobs = sqlx::query_as::<_, ReplicationJob>(
            "SELECT * FROM replication_jobs ORDER BY created_at DESC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(jobs)
    }

    /// A single job by id.
    pub async fn get_job(&self, id: &str) -> Result<Option<ReplicationJob>> {
        let job = sqlx::query_as::<_, ReplicationJob>(
            "SELECT * FROM replication_jobs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(job)
    }

    /// Insert a new job. Names are unique.
    pub async fn create_job(&self, job: &ReplicationJob) -> Result<()> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM replication_jobs WHERE name = ?")
                .bind(&job.name)
                .fetch_one(self.pool())
                .await?;
        if count.0 > 0 {
            return Err(MirrorError::configuration(
                "a job with this name already exists",
            ));
        }

        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO replication_jobs
               (id, name, source_cluster_name, target_cluster_name, status, failed_reason,
                batch_size, parallelism, compression, preserve_partitions, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.source_cluster_name)
        .bind(&job.target_cluster_name)
        .bind(&job.status)
        .bind(&job.failed_reason)
        .bind(job.batch_size)
        .bind(job.parallelism)
        .bind(&job.compression)
        .bind(job.preserve_partitions)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Update an existing job.
    pub async fn update_job(&self, job: &ReplicationJob) -> Result<()> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM replication_jobs WHERE name = ? AND id != ?",
        )
        .bind(&job.name)
        .bind(&job.id)
        .fetch_one(self.pool())
        .await?;
        if count.0 > 0 {
            return Err(MirrorError::configuration(
                "a job with this name already exists",
            ));
        }

        sqlx::query(
            r#"UPDATE replication_jobs
               SET name = ?, source_cluster_name = ?, target_cluster_name = ?, status = ?,
                   failed_reason = ?, batch_size = ?, parallelism = ?, compression = ?,
                   preserve_partitions = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&job.name)
        .bind(&job.source_cluster_name)
        .bind(&job.target_cluster_name)
        .bind(&job.status)
        .bind(&job.failed_reason)
        .bind(job.batch_size)
        .bind(job.parallelism)
        .bind(&job.compression)
        .bind(job.preserve_partitions)
        .bind(Utc::now())
        .bind(&job.id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_job(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM replication_jobs WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Transition a job's status, clearing any failure reason.
    pub async fn set_job_status(&self, id: &str, status: JobStatus) -> Result<()> {
        sqlx::query(
            "UPDATE replication_jobs SET status = ?, failed_reason = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Mark a job failed with the reason that killed it.
    pub async fn mark_job_failed(&self, id: &str, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE replication_jobs SET status = 'failed', failed_reason = ?, updated_at = ? WHERE id = ?",
        )
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, name: &str) -> ReplicationJob {
        ReplicationJob {
            id: id.to_string(),
            name: name.to_string(),
            source_cluster_name: "src".to_string(),
            target_cluster_name: "tgt".to_string(),
            status: "paused".to_string(),
            failed_reason: None,
            batch_size: 1000,
            parallelism: 4,
            compression: "gzip".to_string(),
            preserve_partitions: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_job_crud() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_job(&job("j1", "first")).await.unwrap();

        let got = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(got.name, "first");
        assert_eq!(got.parallelism, 4);
        assert_eq!(got.compression, "gzip");

        let mut updated = got.clone();
        updated.batch_size = 500;
        store.update_job(&updated).await.unwrap();
        assert_eq!(store.get_job("j1").await.unwrap().unwrap().batch_size, 500);

        store.delete_job("j1").await.unwrap();
        assert!(store.get_job("j1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_job_name_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_job(&job("j1", "same")).await.unwrap();
        assert!(store.create_job(&job("j2", "same")).await.is_err());
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_job(&job("j1", "first")).await.unwrap();

        store.set_job_status("j1", JobStatus::Active).await.unwrap();
        assert_eq!(store.get_job("j1").await.unwrap().unwrap().status, "active");

        store.mark_job_failed("j1", "kafka is down").await.unwrap();
        let failed = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(failed.status, "failed");
        assert_eq!(failed.failed_reason.as_deref(), Some("kafka is down"));

        // Returning to paused clears the reason.
        store.set_job_status("j1", JobStatus::Paused).await.unwrap();
        let paused = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(paused.status, "paused");
        assert!(paused.failed_reason.is_none());
    }
}
