//! Metrics aggregation: cumulative engine snapshots become delta-encoded
//! rows, queries fold the deltas back into totals, and incident flags are
//! derived over a sliding window of recent rows.

use chrono::{DateTime, Utc};

use super::{
    models::{AggregatedMetric, MetricBucket},
    Store,
};
use crate::config::MonitoringConfig;
use crate::error::Result;
use crate::types::{IncidentFlags, ReplicationMetric};

/// Granularity for bucketed historical queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hourly,
    Daily,
}

impl Granularity {
    fn truncation(&self) -> &'static str {
        match self {
            Granularity::Hourly => "strftime('%Y-%m-%d %H:00:00', timestamp)",
            Granularity::Daily => "strftime('%Y-%m-%d', timestamp)",
        }
    }
}

impl std::str::FromStr for Granularity {
    type Err = crate::error::MirrorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Granularity::Hourly),
            "daily" => Ok(Granularity::Daily),
            other => Err(crate::error::MirrorError::configuration(format!(
                "unknown granularity: {other}"
            ))),
        }
    }
}

impl Store {
    /// Store one cumulative snapshot as a delta row.
    ///
    /// A negative delta means the engine's counters reset (process restart);
    /// the current value is taken as the delta so totals never go backwards.
    pub async fn insert_metrics(&self, metric: &ReplicationMetric) -> Result<()> {
        let prev = self.get_latest_metrics(&metric.job_id).await?;

        let clamp = |cur: i64, prev: i64| {
            let delta = cur - prev;
            if delta < 0 {
                cur
            } else {
                delta
            }
        };

        let messages_delta = clamp(metric.messages_replicated, prev.messages_replicated);
        let bytes_delta = clamp(metric.bytes_transferred, prev.bytes_transferred);
        let consumed_delta = clamp(metric.messages_consumed, prev.messages_consumed);
        let consumed_bytes_delta = clamp(metric.bytes_consumed, prev.bytes_consumed);
        let errors_delta = clamp(metric.error_count, prev.error_count);

        sqlx::query(
            r#"INSERT INTO aggregated_metrics
               (job_id, messages_replicated_delta, bytes_transferred_delta,
                messages_consumed_delta, bytes_consumed_delta, avg_lag,
                error_count_delta, timestamp)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&metric.job_id)
        .bind(messages_delta)
        .bind(bytes_delta)
        .bind(consumed_delta)
        .bind(consumed_bytes_delta)
        .bind(metric.current_lag as f64)
        .bind(errors_delta)
        .bind(metric.timestamp)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Cumulative totals for a job: the sum of all stored deltas, plus the
    /// lag and timestamp of the most recent row.
    pub async fn get_latest_metrics(&self, job_id: &str) -> Result<ReplicationMetric> {
        let totals: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"SELECT
                   COALESCE(SUM(messages_replicated_delta), 0),
                   COALESCE(SUM(bytes_transferred_delta), 0),
                   COALESCE(SUM(messages_consumed_delta), 0),
                   COALESCE(SUM(bytes_consumed_delta), 0),
                   COALESCE(SUM(error_count_delta), 0)
               FROM aggregated_metrics WHERE job_id = ?"#,
        )
        .bind(job_id)
        .fetch_one(self.pool())
        .await?;

        let last: Option<(f64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT avg_lag, timestamp FROM aggregated_metrics WHERE job_id = ? ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(self.pool())
        .await?;

        let (current_lag, timestamp) = match last {
            Some((lag, ts)) => (lag as i64, ts),
            None => (0, Utc::now()),
        };

        Ok(ReplicationMetric {
            job_id: job_id.to_string(),
            messages_replicated: totals.0,
            bytes_transferred: totals.1,
            messages_consumed: totals.2,
            bytes_consumed: totals.3,
            error_count: totals.4,
            current_lag,
            timestamp,
        })
    }

    /// Raw delta rows within a time range.
    pub async fn get_historical_metrics(
        &self,
        job_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AggregatedMetric>> {
        let rows = sqlx::query_as::<_, AggregatedMetric>(
            "SELECT * FROM aggregated_metrics WHERE job_id = ? AND timestamp BETWEEN ? AND ? ORDER BY timestamp",
        )
        .bind(job_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Delta rows summed into hourly or daily buckets over the last
    /// `period_days` days.
    pub async fn get_aggregated_historical_metrics(
        &self,
        job_id: &str,
        period_days: i64,
        granularity: Granularity,
    ) -> Result<Vec<MetricBucket>> {
        let query = format!(
            r#"SELECT
                   {period} AS period,
                   SUM(messages_replicated_delta) AS messages_replicated,
                   SUM(bytes_transferred_delta) AS bytes_transferred,
                   AVG(avg_lag) AS avg_lag,
                   SUM(error_count_delta) AS total_errors
               FROM aggregated_metrics
               WHERE job_id = ? AND julianday(timestamp) >= julianday('now', '-' || ? || ' days')
               GROUP BY period
               ORDER BY period ASC"#,
            period = granularity.truncation()
        );

        let rows = sqlx::query_as::<_, MetricBucket>(&query)
            .bind(job_id)
            .bind(period_days)
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    /// The most recent delta rows for a job, newest first.
    pub async fn get_recent_metrics(
        &self,
        job_id: &str,
        limit: i64,
    ) -> Result<Vec<AggregatedMetric>> {
        let rows = sqlx::query_as::<_, AggregatedMetric>(
            "SELECT * FROM aggregated_metrics WHERE job_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Incident flags for a job, derived from its recent delta rows.
    pub async fn incident_flags(
        &self,
        job_id: &str,
        monitoring: &MonitoringConfig,
    ) -> Result<IncidentFlags> {
        let needed = (monitoring.incident_window * 2 + 1) as i64;
        let rows = self.get_recent_metrics(job_id, needed).await?;
        Ok(derive_incident_flags(&rows, monitoring))
    }
}

/// Compute incident flags from delta rows ordered newest first.
pub fn derive_incident_flags(
    rows_newest_first: &[AggregatedMetric],
    monitoring: &MonitoringConfig,
) -> IncidentFlags {
    let window = monitoring.incident_window;
    let mut flags = IncidentFlags::default();

    if rows_newest_first.len() < window || window == 0 {
        return flags;
    }

    let current = &rows_newest_first[..window];

    let consumed_total: i64 = current.iter().map(|r| r.messages_consumed_delta).sum();
    let all_consumed_zero = current.iter().all(|r| r.messages_consumed_delta == 0);
    let all_replicated_zero = current.iter().all(|r| r.messages_replicated_delta == 0);

    // Lag growing across the window means the source high water mark kept
    // advancing while nothing was consumed.
    let lag_grew = current[0].avg_lag > current[window - 1].avg_lag;
    flags.source_stalled = all_consumed_zero && lag_grew;

    flags.target_stalled = all_replicated_zero && consumed_total > 0;

    flags.critical_lag = current
        .iter()
        .all(|r| r.avg_lag > monitoring.critical_lag_threshold as f64);

    flags.high_error_rate = current.iter().all(|r| {
        let consumed = r.messages_consumed_delta.max(1) as f64;
        r.error_count_delta as f64 / consumed > monitoring.error_rate_threshold
    });

    if rows_newest_first.len() > window {
        let prior = &rows_newest_first[1..(window + 1).min(rows_newest_first.len())];
        let prior_avg = prior.iter().map(|r| r.error_count_delta as f64).sum::<f64>()
            / prior.len() as f64;
        let latest = rows_newest_first[0].error_count_delta;
        flags.error_spike =
            latest > 0 && latest as f64 >= monitoring.error_spike_multiplier * prior_avg.max(1.0);
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(job_id: &str, replicated: i64, bytes: i64, errors: i64, lag: i64) -> ReplicationMetric {
        ReplicationMetric {
            job_id: job_id.to_string(),
            messages_replicated: replicated,
            bytes_transferred: bytes,
            messages_consumed: replicated,
            bytes_consumed: bytes,
            current_lag: lag,
            error_count: errors,
            timestamp: Utc::now(),
        }
    }

    fn row(replicated: i64, consumed: i64, errors: i64, lag: f64) -> AggregatedMetric {
        AggregatedMetric {
            id: 0,
            job_id: "j1".to_string(),
            messages_replicated_delta: replicated,
            bytes_transferred_delta: 0,
            messages_consumed_delta: consumed,
            bytes_consumed_delta: 0,
            avg_lag: lag,
            error_count_delta: errors,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_delta_accounting() {
        let store = Store::open_in_memory().await.unwrap();

        store.insert_metrics(&snapshot("j1", 100, 1000, 0, 5)).await.unwrap();
        store.insert_metrics(&snapshot("j1", 123, 4560, 1, 3)).await.unwrap();

        let rows = store
            .get_historical_metrics("j1", Utc::now() - chrono::Duration::hours(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].messages_replicated_delta, 100);
        assert_eq!(rows[0].bytes_transferred_delta, 1000);
        assert_eq!(rows[0].error_count_delta, 0);
        assert_eq!(rows[1].messages_replicated_delta, 23);
        assert_eq!(rows[1].bytes_transferred_delta, 3560);
        assert_eq!(rows[1].error_count_delta, 1);

        let latest = store.get_latest_metrics("j1").await.unwrap();
        assert_eq!(latest.messages_replicated, 123);
        assert_eq!(latest.bytes_transferred, 4560);
        assert_eq!(latest.error_count, 1);
        assert_eq!(latest.current_lag, 3);
    }

    #[tokio::test]
    async fn test_counter_reset_clamps_to_current_value() {
        let store = Store::open_in_memory().await.unwrap();

        store.insert_metrics(&snapshot("j1", 123, 4560, 1, 0)).await.unwrap();
        // Process restart: counters start over below the stored totals.
        store.insert_metrics(&snapshot("j1", 50, 200, 0, 0)).await.unwrap();

        let rows = store.get_recent_metrics("j1", 1).await.unwrap();
        assert_eq!(rows[0].messages_replicated_delta, 50);
        assert_eq!(rows[0].bytes_transferred_delta, 200);
        assert_eq!(rows[0].error_count_delta, 0);

        // Every stored delta is non-negative.
        let all = store
            .get_historical_metrics("j1", Utc::now() - chrono::Duration::hours(1), Utc::now())
            .await
            .unwrap();
        for row in &all {
            assert!(row.messages_replicated_delta >= 0);
            assert!(row.bytes_transferred_delta >= 0);
            assert!(row.error_count_delta >= 0);
        }
    }

    #[tokio::test]
    async fn test_aggregated_daily_bucket() {
        let store = Store::open_in_memory().await.unwrap();
        store.insert_metrics(&snapshot("j1", 100, 1000, 0, 5)).await.unwrap();
        store.insert_metrics(&snapshot("j1", 123, 4560, 1, 3)).await.unwrap();

        let buckets = store
            .get_aggregated_historical_metrics("j1", 1, Granularity::Daily)
            .await
            .unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].messages_replicated, 123);
        assert_eq!(buckets[0].total_errors, 1);
    }

    #[test]
    fn test_granularity_parsing() {
        assert_eq!("hourly".parse::<Granularity>().unwrap(), Granularity::Hourly);
        assert_eq!("daily".parse::<Granularity>().unwrap(), Granularity::Daily);
        assert!("weekly".parse::<Granularity>().is_err());
    }

    #[test]
    fn test_source_stalled_flag() {
        let monitoring = MonitoringConfig::default();
        // Newest first: no consumption for three ticks while lag grew.
        let rows = vec![row(0, 0, 0, 30.0), row(0, 0, 0, 20.0), row(0, 0, 0, 10.0)];
        let flags = derive_incident_flags(&rows, &monitoring);
        assert!(flags.source_stalled);
        assert!(!flags.target_stalled);
    }

    #[test]
    fn test_target_stalled_flag() {
        let monitoring = MonitoringConfig::default();
        let rows = vec![row(0, 50, 0, 5.0), row(0, 40, 0, 5.0), row(0, 60, 0, 5.0)];
        let flags = derive_incident_flags(&rows, &monitoring);
        assert!(flags.target_stalled);
        assert!(!flags.source_stalled);
    }

    #[test]
    fn test_critical_lag_flag() {
        let monitoring = MonitoringConfig::default();
        let rows = vec![
            row(10, 10, 0, 20_000.0),
            row(10, 10, 0, 15_000.0),
            row(10, 10, 0, 11_000.0),
        ];
        assert!(derive_incident_flags(&rows, &monitoring).critical_lag);

        let rows = vec![
            row(10, 10, 0, 20_000.0),
            row(10, 10, 0, 500.0),
            row(10, 10, 0, 11_000.0),
        ];
        assert!(!derive_incident_flags(&rows, &monitoring).critical_lag);
    }

    #[test]
    fn test_error_spike_flag() {
        let monitoring = MonitoringConfig::default();
        // Latest row has 30 errors against a calm prior window.
        let rows = vec![
            row(10, 10, 30, 5.0),
            row(10, 10, 1, 5.0),
            row(10, 10, 0, 5.0),
            row(10, 10, 1, 5.0),
        ];
        assert!(derive_incident_flags(&rows, &monitoring).error_spike);

        let rows = vec![
            row(10, 10, 1, 5.0),
            row(10, 10, 1, 5.0),
            row(10, 10, 1, 5.0),
            row(10, 10, 1, 5.0),
        ];
        assert!(!derive_incident_flags(&rows, &monitoring).error_spike);
    }

    #[test]
    fn test_flags_need_full_window() {
        let monitoring = MonitoringConfig::default();
        let rows = vec![row(0, 0, 0, 30.0)];
        assert!(!derive_incident_flags(&rows, &monitoring).any());
    }
}
