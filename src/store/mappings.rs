//! Topic mapping persistence. Mappings for a job are always replaced as a
//! set inside one transaction.

use super::{models::TopicMapping, Store};
use crate::error::Result;

impl Store {
    /// All mappings for a job.
    pub async fn get_mappings_for_job(&self, job_id: &str) -> Result<Vec<TopicMapping>> {
        let mappings = sqlx::query_as::<_, TopicMapping>(
            "SELECT * FROM topic_mappings WHERE job_id = ? ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(self.pool())
        .await?;
        Ok(mappings)
    }

    /// Replace all mappings for a job.
    pub async fn update_mappings_for_job(
        &self,
        job_id: &str,
        mappings: &[TopicMapping],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM topic_mappings WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        for mapping in mappings {
            sqlx::query(
                r#"INSERT INTO topic_mappings
                   (job_id, source_topic_pattern, target_topic_pattern, enabled)
                   VALUES (?, ?, ?, ?)"#,
            )
            .bind(job_id)
            .bind(&mapping.source_topic_pattern)
            .bind(&mapping.target_topic_pattern)
            .bind(mapping.enabled)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(source: &str, target: &str) -> TopicMapping {
        TopicMapping {
            id: 0,
            job_id: "j1".to_string(),
            source_topic_pattern: source.to_string(),
            target_topic_pattern: target.to_string(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_mappings_replaced_as_a_set() {
        let store = Store::open_in_memory().await.unwrap();

        store
            .update_mappings_for_job("j1", &[mapping("topic-a", "topic-a-replica")])
            .await
            .unwrap();
        let first = store.get_mappings_for_job("j1").await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].source_topic_pattern, "topic-a");

        store
            .update_mappings_for_job(
                "j1",
                &[mapping("orders-*", "mirror-*"), mapping("audit", "audit-copy")],
            )
            .await
            .unwrap();
        let second = store.get_mappings_for_job("j1").await.unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].source_topic_pattern, "orders-*");
        assert_eq!(second[1].target_topic_pattern, "audit-copy");
    }

    #[tokio::test]
    async fn test_mappings_scoped_per_job() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .update_mappings_for_job("j1", &[mapping("a", "b")])
            .await
            .unwrap();

        assert!(store.get_mappings_for_job("other").await.unwrap().is_empty());
    }
}
