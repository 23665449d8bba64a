//! Progress tracker invariants over the durable store: offset ordering,
//! monotonic replicated offsets, gap detection, resume points, and
//! retention.

use std::collections::HashMap;

use chrono::Utc;
use pretty_assertions::assert_eq;

use mirror_service::config::RetentionConfig;
use mirror_service::store::progress::{ProgressTracker, ProgressUpdate, TrackerSettings};
use mirror_service::store::Store;

fn update(job: &str, partition: i32, replicated: i64, hwm: i64) -> ProgressUpdate {
    ProgressUpdate {
        job_id: job.to_string(),
        source_topic: "topic-a".to_string(),
        target_topic: "topic-a-replica".to_string(),
        partition_id: partition,
        source_offset: replicated,
        target_offset: replicated,
        source_high_water_mark: hwm,
        target_high_water_mark: replicated + 1,
        last_replicated_offset: replicated,
        status: "active".to_string(),
    }
}

#[tokio::test]
async fn test_offset_invariant_holds_across_updates() {
    let store = Store::open_in_memory().await.unwrap();
    let tracker = ProgressTracker::new(store.clone(), TrackerSettings::default());

    for offset in [0_i64, 5, 17, 42, 99] {
        tracker.upsert(&update("j1", 0, offset, 120)).await.unwrap();
        let row = store.get_progress("j1", "topic-a", 0).await.unwrap().unwrap();
        assert!(0 <= row.last_replicated_offset);
        assert!(row.last_replicated_offset <= row.source_offset);
        assert!(row.source_offset <= row.source_high_water_mark);
    }
}

#[tokio::test]
async fn test_replicated_offsets_monotonic_across_ticks() {
    let store = Store::open_in_memory().await.unwrap();
    let tracker = ProgressTracker::new(store.clone(), TrackerSettings::default());

    let observations = [10_i64, 25, 25, 24, 40];
    let mut previous = 0;
    for offset in observations {
        tracker.upsert(&update("j1", 0, offset, 100)).await.unwrap();
        let row = store.get_progress("j1", "topic-a", 0).await.unwrap().unwrap();
        assert!(row.last_replicated_offset >= previous);
        previous = row.last_replicated_offset;
    }
    assert_eq!(previous, 40);
}

#[tokio::test]
async fn test_contiguous_replication_has_zero_gaps() {
    let store = Store::open_in_memory().await.unwrap();
    let tracker = ProgressTracker::new(store.clone(), TrackerSettings::default());

    for partition in 0..4 {
        for offset in 0..25 {
            tracker
                .upsert(&update("j1", partition, offset, 25))
                .await
                .unwrap();
        }
    }

    assert_eq!(store.get_progress_for_job("j1").await.unwrap().len(), 4);
    assert!(store.list_gaps("j1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recorded_gap_survives_progress_updates() {
    let store = Store::open_in_memory().await.unwrap();
    let tracker = ProgressTracker::new(store.clone(), TrackerSettings::default());

    tracker.upsert(&update("j1", 0, 10, 1000)).await.unwrap();
    tracker
        .record_gap("j1", "topic-a", "topic-a-replica", 0, 11, 499)
        .await
        .unwrap();
    tracker.upsert(&update("j1", 0, 501, 1000)).await.unwrap();

    let gaps = store.list_gaps("j1").await.unwrap();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].gap_start_offset, 11);
    assert_eq!(gaps[0].gap_end_offset, 499);
    assert_eq!(gaps[0].gap_size, 489);
    assert_eq!(gaps[0].resolution_status, "open");
}

#[tokio::test]
async fn test_resume_points_follow_checkpoint_and_gaps() {
    let store = Store::open_in_memory().await.unwrap();
    let tracker = ProgressTracker::new(store.clone(), TrackerSettings::default());

    tracker.upsert(&update("j1", 0, 300, 400)).await.unwrap();
    tracker.upsert(&update("j1", 1, 150, 400)).await.unwrap();

    // Checkpoint knows partition 0's target only reached 250.
    let mut hwms = HashMap::new();
    hwms.insert("topic-a:0".to_string(), 250_i64);
    store
        .create_migration_checkpoint(
            "j1",
            "pre_migration",
            &HashMap::new(),
            &hwms,
            "operator",
            Some("server move"),
        )
        .await
        .unwrap();

    let points = tracker.compute_resume_points("j1").await.unwrap();
    assert_eq!(points.len(), 2);

    let p0 = points.iter().find(|p| p.partition_id == 0).unwrap();
    assert_eq!(p0.safe_resume_offset, 250);
    assert_eq!(p0.validation_status, "validated");

    let p1 = points.iter().find(|p| p.partition_id == 1).unwrap();
    assert_eq!(p1.safe_resume_offset, 150);
    assert_eq!(p1.validation_status, "unvalidated");

    // Recomputation replaces the stored set rather than appending.
    tracker.compute_resume_points("j1").await.unwrap();
    assert_eq!(store.list_resume_points("j1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_mirror_state_pruned_on_shorter_window_than_metrics() {
    let store = Store::open_in_memory().await.unwrap();
    let tracker = ProgressTracker::new(store.clone(), TrackerSettings::default());

    tracker.upsert(&update("j1", 0, 10, 20)).await.unwrap();
    tracker.compute_resume_points("j1").await.unwrap();

    // Backdate mirror state past the 7-day window but inside 30 days.
    let stale = Utc::now() - chrono::Duration::days(10);
    sqlx::query("UPDATE mirror_progress SET last_updated = ?")
        .bind(stale)
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query("UPDATE resume_points SET calculated_at = ?")
        .bind(stale)
        .execute(store.pool())
        .await
        .unwrap();

    store
        .prune_old_data(&RetentionConfig::default())
        .await
        .unwrap();

    assert!(store.get_progress_for_job("j1").await.unwrap().is_empty());
    assert!(store.list_resume_points("j1").await.unwrap().is_empty());
}
