//! Retention enforcement. Windows come from configuration rather than a
//! hard-coded constant; the defaults match the historical 30/7 day split.

use chrono::{Duration, Utc};
use tracing::info;

use super::Store;
use crate::config::RetentionConfig;
use crate::error::Result;

impl Store {
    /// Delete rows older than the configured retention windows.
    pub async fn prune_old_data(&self, retention: &RetentionConfig) -> Result<u64> {
        let metrics_cutoff = Utc::now() - Duration::days(retention.metrics_days);
        let state_cutoff = Utc::now() - Duration::days(retention.mirror_state_days);
        let mut pruned = 0_u64;

        for (table, column, cutoff) in [
            ("aggregated_metrics", "timestamp", metrics_cutoff),
            ("operational_events", "timestamp", metrics_cutoff),
            ("mirror_progress", "last_updated", state_cutoff),
            ("resume_points", "calculated_at", state_cutoff),
            ("mirror_gaps", "detected_at", state_cutoff),
            ("mirror_state_analysis", "analyzed_at", state_cutoff),
        ] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE {column} < ?"))
                .bind(cutoff)
                .execute(self.pool())
                .await?;
            pruned += result.rows_affected();
        }

        if pruned > 0 {
            info!(
                rows = pruned,
                metrics_days = retention.metrics_days,
                mirror_state_days = retention.mirror_state_days,
                "pruned expired rows"
            );
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReplicationMetric;

    #[tokio::test]
    async fn test_prune_respects_configured_windows() {
        let store = Store::open_in_memory().await.unwrap();

        store
            .insert_metrics(&ReplicationMetric::zero("j1"))
            .await
            .unwrap();
        store
            .record_operational_event("job_started", "operator", "test")
            .await
            .unwrap();

        // Fresh rows survive the default windows.
        let pruned = store
            .prune_old_data(&RetentionConfig::default())
            .await
            .unwrap();
        assert_eq!(pruned, 0);

        // Backdate the metric row past a 1-day window.
        sqlx::query("UPDATE aggregated_metrics SET timestamp = ?")
            .bind(Utc::now() - Duration::days(3))
            .execute(store.pool())
            .await
            .unwrap();

        let retention = RetentionConfig {
            metrics_days: 1,
            mirror_state_days: 1,
            archive_inactive_after_days: 90,
        };
        let pruned = store.prune_old_data(&retention).await.unwrap();
        assert_eq!(pruned, 1);

        // The fresh operational event is still there.
        assert_eq!(store.list_operational_events(10).await.unwrap().len(), 1);
    }
}
