//! Progress tracking: durable per-partition offsets and watermarks, gap
//! detection on offset jumps, lag-stall analysis, and safe resume points.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, warn};

use super::{
    models::{MigrationCheckpoint, MirrorGap, MirrorProgress, MirrorStateAnalysis, ResumePoint},
    Store,
};
use crate::error::{MirrorError, Result};

/// One progress observation for a (job, topic, partition) tuple
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub job_id: String,
    pub source_topic: String,
    pub target_topic: String,
    pub partition_id: i32,
    pub source_offset: i64,
    pub target_offset: i64,
    pub source_high_water_mark: i64,
    pub target_high_water_mark: i64,
    pub last_replicated_offset: i64,
    pub status: String,
}

/// Tuning for stall analysis
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Lag above which a stall episode may open
    pub critical_lag_threshold: i64,
    /// How long a lag breach must persist before an analysis row is written
    pub stall_timeout: chrono::Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            critical_lag_threshold: 10_000,
            stall_timeout: chrono::Duration::seconds(300),
        }
    }
}

/// Owns the durable per-partition offset and watermark state for running
/// jobs. The engine ticker is the single writer per job.
pub struct ProgressTracker {
    store: Store,
    settings: TrackerSettings,
    /// When each partition's lag first breached the threshold
    breaches: Mutex<HashMap<(String, String, i64), DateTime<Utc>>>,
}

impl ProgressTracker {
    pub fn new(store: Store, settings: TrackerSettings) -> Self {
        Self {
            store,
            settings,
            breaches: Mutex::new(HashMap::new()),
        }
    }

    /// Persist one progress observation.
    ///
    /// Rejects negative offsets, keeps `last_replicated_offset` monotonic,
    /// and opens a lag-stall analysis when a breach outlives the timeout.
    /// Offset-jump gaps are reported by the fetch path via [`record_gap`]
    /// as they are observed, record by record.
    ///
    /// [`record_gap`]: ProgressTracker::record_gap
    pub async fn upsert(&self, update: &ProgressUpdate) -> Result<()> {
        if update.source_offset < 0
            || update.target_offset < 0
            || update.last_replicated_offset < 0
        {
            return Err(MirrorError::invariant(format!(
                "negative offset for {}/{}[{}]",
                update.job_id, update.source_topic, update.partition_id
            )));
        }
        if update.last_replicated_offset > update.source_offset
            || update.source_offset > update.source_high_water_mark
        {
            return Err(MirrorError::invariant(format!(
                "offset ordering violated for {}/{}[{}]: replicated={} read={} hwm={}",
                update.job_id,
                update.source_topic,
                update.partition_id,
                update.last_replicated_offset,
                update.source_offset,
                update.source_high_water_mark
            )));
        }

        let prev = self
            .store
            .get_progress(&update.job_id, &update.source_topic, update.partition_id)
            .await?;

        let mut last_replicated = update.last_replicated_offset;
        if let Some(prev) = &prev {
            if last_replicated < prev.last_replicated_offset {
                debug!(
                    job_id = %update.job_id,
                    topic = %update.source_topic,
                    partition = update.partition_id,
                    "ignoring regressed replicated offset {} < {}",
                    last_replicated,
                    prev.last_replicated_offset
                );
                last_replicated = prev.last_replicated_offset;
            }
        }

        // A clamped replicated offset drags the read position and high
        // water mark with it so the stored row keeps its ordering.
        let source_offset = update.source_offset.max(last_replicated);
        let source_hwm = update.source_high_water_mark.max(source_offset);
        let lag = (source_hwm - last_replicated).max(0);
        let now = Utc::now();

        sqlx::query(
            r#"INSERT INTO mirror_progress
               (job_id, source_topic, target_topic, partition_id, source_offset, target_offset,
                source_high_water_mark, target_high_water_mark, last_replicated_offset,
                replication_lag, last_updated, status)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (job_id, source_topic, partition_id) DO UPDATE SET
                   target_topic = excluded.target_topic,
                   source_offset = excluded.source_offset,
                   target_offset = excluded.target_offset,
                   source_high_water_mark = excluded.source_high_water_mark,
                   target_high_water_mark = excluded.target_high_water_mark,
                   last_replicated_offset = excluded.last_replicated_offset,
                   replication_lag = excluded.replication_lag,
                   last_updated = excluded.last_updated,
                   status = excluded.status"#,
        )
        .bind(&update.job_id)
        .bind(&update.source_topic)
        .bind(&update.target_topic)
        .bind(update.partition_id as i64)
        .bind(source_offset)
        .bind(update.target_offset)
        .bind(source_hwm)
        .bind(update.target_high_water_mark)
        .bind(last_replicated)
        .bind(lag)
        .bind(now)
        .bind(&update.status)
        .execute(self.store.pool())
        .await?;

        self.track_stall(update, lag, now).await?;
        Ok(())
    }

    /// Record a replication gap observed by the fetch path: the source
    /// served an offset beyond the next expected one, so the range in
    /// between can never be replicated.
    pub async fn record_gap(
        &self,
        job_id: &str,
        source_topic: &str,
        target_topic: &str,
        partition_id: i32,
        start: i64,
        end: i64,
    ) -> Result<()> {
        if end < start {
            return Err(MirrorError::invariant(format!(
                "gap range inverted for {job_id}/{source_topic}[{partition_id}]: {start}..={end}"
            )));
        }
        warn!(
            job_id,
            topic = source_topic,
            partition = partition_id,
            "offset jump detected: missing range {}..={}",
            start,
            end
        );
        sqlx::query(
            r#"INSERT INTO mirror_gaps
               (job_id, source_topic, target_topic, partition_id, gap_start_offset,
                gap_end_offset, gap_size, detected_at, gap_type, resolution_status)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'offset_jump', 'open')"#,
        )
        .bind(job_id)
        .bind(source_topic)
        .bind(target_topic)
        .bind(partition_id as i64)
        .bind(start)
        .bind(end)
        .bind(end - start + 1)
        .bind(Utc::now())
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    async fn track_stall(
        &self,
        update: &ProgressUpdate,
        lag: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let key = (
            update.job_id.clone(),
            update.source_topic.clone(),
            update.partition_id as i64,
        );

        let breach_start = {
            let mut breaches = self.breaches.lock();
            if lag > self.settings.critical_lag_threshold {
                Some(*breaches.entry(key).or_insert(now))
            } else {
                breaches.remove(&key);
                None
            }
        };

        let Some(start) = breach_start else {
            return Ok(());
        };
        if now - start < self.settings.stall_timeout {
            return Ok(());
        }

        // One analysis row per stall episode.
        let existing: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM mirror_state_analysis WHERE job_id = ? AND analysis_type = 'lag_stall' AND analyzed_at >= ?",
        )
        .bind(&update.job_id)
        .bind(start)
        .fetch_one(self.store.pool())
        .await?;
        if existing.0 > 0 {
            return Ok(());
        }

        let results = json!({
            "source_topic": update.source_topic,
            "partition": update.partition_id,
            "replication_lag": lag,
            "breach_started_at": start.to_rfc3339(),
        });
        sqlx::query(
            r#"INSERT INTO mirror_state_analysis
               (job_id, analysis_type, analysis_results, recommendations,
                critical_issues_count, analyzed_at, analyzer_version)
               VALUES (?, 'lag_stall', ?, ?, 1, ?, ?)"#,
        )
        .bind(&update.job_id)
        .bind(results.to_string())
        .bind("replication is not keeping up with the source; check consumer throughput and broker health")
        .bind(now)
        .bind(env!("CARGO_PKG_VERSION"))
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Derive and persist safe resume points for every tracked partition of
    /// a job, replacing any previously computed set.
    pub async fn compute_resume_points(&self, job_id: &str) -> Result<Vec<ResumePoint>> {
        let progress = self.store.get_progress_for_job(job_id).await?;
        let checkpoint = self.store.get_latest_checkpoint(job_id).await?;

        let checkpoint_hwms: HashMap<String, i64> = match &checkpoint {
            Some(cp) => serde_json::from_str(&cp.target_high_water_marks).unwrap_or_default(),
            None => HashMap::new(),
        };

        // Gather open gaps before the transaction; it holds the pool's
        // connection.
        let mut open_gaps = HashMap::new();
        for row in &progress {
            if let Some(gap) = self
                .store
                .earliest_open_gap(job_id, &row.source_topic, row.partition_id)
                .await?
            {
                open_gaps.insert((row.source_topic.clone(), row.partition_id), gap);
            }
        }

        let mut tx = self.store.pool().begin().await?;
        sqlx::query("DELETE FROM resume_points WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        let now = Utc::now();
        let mut points = Vec::with_capacity(progress.len());
        for row in &progress {
            let key = format!("{}:{}", row.source_topic, row.partition_id);
            let (mut safe, validation, checkpoint_id) = match checkpoint_hwms.get(&key) {
                Some(hwm) => (
                    row.last_replicated_offset.min(*hwm),
                    "validated",
                    checkpoint.as_ref().map(|c| c.id),
                ),
                None => (row.last_replicated_offset, "unvalidated", None),
            };

            // An open gap below the resume offset must replay; pull the
            // resume point back to the gap start.
            let gap = open_gaps.get(&(row.source_topic.clone(), row.partition_id));
            let (gap_detected, gap_start, gap_end) = match &gap {
                Some(g) if g.gap_start_offset <= safe => {
                    safe = safe.min(g.gap_start_offset);
                    (true, Some(g.gap_start_offset), Some(g.gap_end_offset))
                }
                _ => (false, None, None),
            };

            sqlx::query(
                r#"INSERT INTO resume_points
                   (job_id, source_topic, target_topic, partition_id, safe_resume_offset,
                    calculated_at, validation_status, migration_checkpoint_id,
                    gap_detected, gap_start_offset, gap_end_offset)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(job_id)
            .bind(&row.source_topic)
            .bind(&row.target_topic)
            .bind(row.partition_id)
            .bind(safe)
            .bind(now)
            .bind(validation)
            .bind(checkpoint_id)
            .bind(gap_detected)
            .bind(gap_start)
            .bind(gap_end)
            .execute(&mut *tx)
            .await?;

            points.push(ResumePoint {
                id: 0,
                job_id: job_id.to_string(),
                source_topic: row.source_topic.clone(),
                target_topic: row.target_topic.clone(),
                partition_id: row.partition_id,
                safe_resume_offset: safe,
                calculated_at: now,
                validation_status: validation.to_string(),
                migration_checkpoint_id: checkpoint_id,
                gap_detected,
                gap_start_offset: gap_start,
                gap_end_offset: gap_end,
            });
        }

        tx.commit().await?;
        Ok(points)
    }
}

impl Store {
    /// Progress for one partition.
    pub async fn get_progress(
        &self,
        job_id: &str,
        source_topic: &str,
        partition_id: i32,
    ) -> Result<Option<MirrorProgress>> {
        let row = sqlx::query_as::<_, MirrorProgress>(
            "SELECT * FROM mirror_progress WHERE job_id = ? AND source_topic = ? AND partition_id = ?",
        )
        .bind(job_id)
        .bind(source_topic)
        .bind(partition_id as i64)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// All progress rows for a job.
    pub async fn get_progress_for_job(&self, job_id: &str) -> Result<Vec<MirrorProgress>> {
        let rows = sqlx::query_as::<_, MirrorProgress>(
            "SELECT * FROM mirror_progress WHERE job_id = ? ORDER BY source_topic, partition_id",
        )
        .bind(job_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// All gap rows for a job, newest first.
    pub async fn list_gaps(&self, job_id: &str) -> Result<Vec<MirrorGap>> {
        let rows = sqlx::query_as::<_, MirrorGap>(
            "SELECT * FROM mirror_gaps WHERE job_id = ? ORDER BY detected_at DESC, id DESC",
        )
        .bind(job_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// The lowest-offset open gap for a partition, if any.
    pub async fn earliest_open_gap(
        &self,
        job_id: &str,
        source_topic: &str,
        partition_id: i64,
    ) -> Result<Option<MirrorGap>> {
        let row = sqlx::query_as::<_, MirrorGap>(
            r#"SELECT * FROM mirror_gaps
               WHERE job_id = ? AND source_topic = ? AND partition_id = ? AND resolution_status = 'open'
               ORDER BY gap_start_offset ASC LIMIT 1"#,
        )
        .bind(job_id)
        .bind(source_topic)
        .bind(partition_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// State analysis entries for a job, newest first.
    pub async fn list_state_analyses(&self, job_id: &str) -> Result<Vec<MirrorStateAnalysis>> {
        let rows = sqlx::query_as::<_, MirrorStateAnalysis>(
            "SELECT * FROM mirror_state_analysis WHERE job_id = ? ORDER BY analyzed_at DESC, id DESC",
        )
        .bind(job_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Record a migration checkpoint snapshot.
    pub async fn create_migration_checkpoint(
        &self,
        job_id: &str,
        checkpoint_type: &str,
        source_offsets: &HashMap<String, i64>,
        target_hwms: &HashMap<String, i64>,
        created_by: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO migration_checkpoints
               (job_id, checkpoint_type, source_consumer_group_offsets,
                target_high_water_marks, created_at, created_by, migration_reason)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(job_id)
        .bind(checkpoint_type)
        .bind(serde_json::to_string(source_offsets)?)
        .bind(serde_json::to_string(target_hwms)?)
        .bind(Utc::now())
        .bind(created_by)
        .bind(reason)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// The most recent checkpoint for a job.
    pub async fn get_latest_checkpoint(
        &self,
        job_id: &str,
    ) -> Result<Option<MigrationCheckpoint>> {
        let row = sqlx::query_as::<_, MigrationCheckpoint>(
            "SELECT * FROM migration_checkpoints WHERE job_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Saved resume points for a job.
    pub async fn list_resume_points(&self, job_id: &str) -> Result<Vec<ResumePoint>> {
        let rows = sqlx::query_as::<_, ResumePoint>(
            "SELECT * FROM resume_points WHERE job_id = ? ORDER BY source_topic, partition_id",
        )
        .bind(job_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(partition: i32, replicated: i64, read: i64, hwm: i64) -> ProgressUpdate {
        ProgressUpdate {
            job_id: "j1".to_string(),
            source_topic: "topic-a".to_string(),
            target_topic: "topic-a-replica".to_string(),
            partition_id: partition,
            source_offset: read,
            target_offset: replicated,
            source_high_water_mark: hwm,
            target_high_water_mark: replicated + 1,
            last_replicated_offset: replicated,
            status: "active".to_string(),
        }
    }

    fn tracker(store: &Store) -> ProgressTracker {
        ProgressTracker::new(store.clone(), TrackerSettings::default())
    }

    #[tokio::test]
    async fn test_upsert_computes_lag() {
        let store = Store::open_in_memory().await.unwrap();
        let tracker = tracker(&store);

        tracker.upsert(&update(0, 100, 100, 150)).await.unwrap();
        let row = store.get_progress("j1", "topic-a", 0).await.unwrap().unwrap();
        assert_eq!(row.last_replicated_offset, 100);
        assert_eq!(row.replication_lag, 50);

        // Upsert replaces the same logical row.
        tracker.upsert(&update(0, 120, 120, 150)).await.unwrap();
        let rows = store.get_progress_for_job("j1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].last_replicated_offset, 120);
        assert_eq!(rows[0].replication_lag, 30);
    }

    #[tokio::test]
    async fn test_negative_offset_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        let tracker = tracker(&store);

        let mut bad = update(0, 10, 10, 20);
        bad.last_replicated_offset = -1;
        bad.target_offset = 0;
        let err = tracker.upsert(&bad).await.unwrap_err();
        assert!(matches!(err, MirrorError::InvariantViolation { .. }));
    }

    #[tokio::test]
    async fn test_offset_ordering_enforced() {
        let store = Store::open_in_memory().await.unwrap();
        let tracker = tracker(&store);

        // replicated beyond read position
        let mut bad = update(0, 30, 20, 40);
        bad.last_replicated_offset = 30;
        bad.source_offset = 20;
        assert!(tracker.upsert(&bad).await.is_err());

        // read beyond the high water mark
        let bad = update(0, 10, 50, 40);
        assert!(tracker.upsert(&bad).await.is_err());
    }

    #[tokio::test]
    async fn test_replicated_offset_monotonic() {
        let store = Store::open_in_memory().await.unwrap();
        let tracker = tracker(&store);

        tracker.upsert(&update(0, 100, 100, 200)).await.unwrap();
        // A stale observation must not move the offset backwards.
        tracker.upsert(&update(0, 90, 100, 200)).await.unwrap();

        let row = store.get_progress("j1", "topic-a", 0).await.unwrap().unwrap();
        assert_eq!(row.last_replicated_offset, 100);
    }

    #[tokio::test]
    async fn test_record_gap() {
        let store = Store::open_in_memory().await.unwrap();
        let tracker = tracker(&store);

        tracker
            .record_gap("j1", "topic-a", "topic-a-replica", 0, 101, 199)
            .await
            .unwrap();

        let gaps = store.list_gaps("j1").await.unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].gap_start_offset, 101);
        assert_eq!(gaps[0].gap_end_offset, 199);
        assert_eq!(gaps[0].gap_size, 99);
        assert_eq!(gaps[0].gap_type, "offset_jump");
        assert_eq!(gaps[0].resolution_status, "open");

        let err = tracker
            .record_gap("j1", "topic-a", "topic-a-replica", 0, 50, 40)
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::InvariantViolation { .. }));
    }

    #[tokio::test]
    async fn test_upserts_never_record_gaps() {
        let store = Store::open_in_memory().await.unwrap();
        let tracker = tracker(&store);

        // Busy intervals legitimately advance the read position far past
        // the previous tick's replicated offset.
        tracker.upsert(&update(0, 100, 100, 500)).await.unwrap();
        tracker.upsert(&update(0, 400, 400, 500)).await.unwrap();

        assert!(store.list_gaps("j1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lag_stall_opens_analysis() {
        let store = Store::open_in_memory().await.unwrap();
        let tracker = ProgressTracker::new(
            store.clone(),
            TrackerSettings {
                critical_lag_threshold: 100,
                stall_timeout: chrono::Duration::zero(),
            },
        );

        // Lag of 900 breaches immediately with a zero stall timeout.
        tracker.upsert(&update(0, 100, 100, 1000)).await.unwrap();

        let analyses = store.list_state_analyses("j1").await.unwrap();
        assert_eq!(analyses.len(), 1);
        assert_eq!(analyses[0].analysis_type, "lag_stall");

        // The same episode does not open a second entry.
        tracker.upsert(&update(0, 101, 101, 1000)).await.unwrap();
        assert_eq!(store.list_state_analyses("j1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resume_points_without_checkpoint() {
        let store = Store::open_in_memory().await.unwrap();
        let tracker = tracker(&store);

        tracker.upsert(&update(0, 100, 100, 200)).await.unwrap();
        tracker.upsert(&update(1, 250, 250, 300)).await.unwrap();

        let points = tracker.compute_resume_points("j1").await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].safe_resume_offset, 100);
        assert_eq!(points[0].validation_status, "unvalidated");
        assert!(!points[0].gap_detected);
    }

    #[tokio::test]
    async fn test_resume_points_clamped_by_checkpoint() {
        let store = Store::open_in_memory().await.unwrap();
        let tracker = tracker(&store);

        tracker.upsert(&update(0, 100, 100, 200)).await.unwrap();

        let mut hwms = HashMap::new();
        hwms.insert("topic-a:0".to_string(), 80_i64);
        store
            .create_migration_checkpoint("j1", "pre_migration", &HashMap::new(), &hwms, "operator", None)
            .await
            .unwrap();

        let points = tracker.compute_resume_points("j1").await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].safe_resume_offset, 80);
        assert_eq!(points[0].validation_status, "validated");
        assert!(points[0].migration_checkpoint_id.is_some());
    }

    #[tokio::test]
    async fn test_resume_points_pull_back_to_open_gap() {
        let store = Store::open_in_memory().await.unwrap();
        let tracker = tracker(&store);

        tracker.upsert(&update(0, 200, 200, 500)).await.unwrap();
        tracker
            .record_gap("j1", "topic-a", "topic-a-replica", 0, 101, 199)
            .await
            .unwrap();

        let points = tracker.compute_resume_points("j1").await.unwrap();
        assert_eq!(points.len(), 1);
        assert!(points[0].gap_detected);
        assert_eq!(points[0].safe_resume_offset, 101);
        assert_eq!(points[0].gap_start_offset, Some(101));
        assert_eq!(points[0].gap_end_offset, Some(199));

        // The computed set is persisted.
        let stored = store.list_resume_points("j1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].safe_resume_offset, 101);
    }
}
