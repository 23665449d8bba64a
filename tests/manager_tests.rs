//! Job manager lifecycle tests against an in-memory store, with the
//! engine factory injected the same way the API layer's tests do it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use mirror_service::config::MonitoringConfig;
use mirror_service::error::{MirrorError, Result};
use mirror_service::hub::EventHub;
use mirror_service::manager::{EngineFactory, JobManager};
use mirror_service::mirror::{EngineSettings, ReplicationEngine, RuntimeConfig};
use mirror_service::store::models::{KafkaCluster, ReplicationJob, TopicMapping};
use mirror_service::store::Store;
use mirror_service::types::{SecurityConfig, SecurityProtocol};

struct MockEngine {
    job_id: String,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl ReplicationEngine for MockEngine {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct TestHarness {
    store: Store,
    manager: Arc<JobManager>,
    captured: Arc<Mutex<Vec<RuntimeConfig>>>,
    stops: Arc<AtomicUsize>,
}

impl TestHarness {
    async fn new() -> Self {
        let store = Store::open_in_memory().await.unwrap();
        let manager = JobManager::new(
            store.clone(),
            EventHub::default(),
            None,
            EngineSettings::default(),
            MonitoringConfig::default(),
        );

        let captured: Arc<Mutex<Vec<RuntimeConfig>>> = Arc::new(Mutex::new(Vec::new()));
        let stops = Arc::new(AtomicUsize::new(0));

        let factory_captured = Arc::clone(&captured);
        let factory_stops = Arc::clone(&stops);
        let factory: EngineFactory = Arc::new(move |config: RuntimeConfig| {
            let captured = Arc::clone(&factory_captured);
            let stops = Arc::clone(&factory_stops);
            async move {
                let job_id = config.job.id.clone();
                captured.lock().push(config);
                Ok(Arc::new(MockEngine { job_id, stops }) as Arc<dyn ReplicationEngine>)
            }
            .boxed()
        });
        manager.set_engine_factory(factory);

        Self {
            store,
            manager,
            captured,
            stops,
        }
    }

    async fn seed_clusters(&self) {
        for (name, brokers) in [("source-cluster", "localhost:9092"), ("target-cluster", "localhost:9093")] {
            self.store
                .create_cluster(&cluster(name, brokers))
                .await
                .unwrap();
        }
    }

    async fn seed_job(&self, id: &str, name: &str, status: &str) {
        self.store
            .create_job(&job(id, name, status))
            .await
            .unwrap();
        self.store
            .update_mappings_for_job(
                id,
                &[TopicMapping {
                    id: 0,
                    job_id: id.to_string(),
                    source_topic_pattern: "topic-a".to_string(),
                    target_topic_pattern: "topic-a-replica".to_string(),
                    enabled: true,
                }],
            )
            .await
            .unwrap();
    }
}

fn cluster(name: &str, brokers: &str) -> KafkaCluster {
    KafkaCluster {
        name: name.to_string(),
        provider: "plain".to_string(),
        cluster_id: String::new(),
        brokers: brokers.to_string(),
        security_config: "{}".to_string(),
        api_key: String::new(),
        api_secret: String::new(),
        connection_string: None,
        status: "active".to_string(),
        updated_at: Utc::now(),
    }
}

fn job(id: &str, name: &str, status: &str) -> ReplicationJob {
    ReplicationJob {
        id: id.to_string(),
        name: name.to_string(),
        source_cluster_name: "source-cluster".to_string(),
        target_cluster_name: "target-cluster".to_string(),
        status: status.to_string(),
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
async fn test_full_lifecycle() {
    let harness = TestHarness::new().await;
    harness.seed_clusters().await;
    harness.seed_job("job-1", "manager-test-full", "paused").await;

    harness.manager.start_job("job-1").await.unwrap();

    // Status advanced to active.
    let updated = harness.store.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(updated.status, "active");

    // The factory saw the materialised runtime config.
    let captured = harness.captured.lock();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].source.brokers, "localhost:9092");
    assert_eq!(captured[0].target.brokers, "localhost:9093");
    assert_eq!(captured[0].mappings.len(), 1);
    assert_eq!(captured[0].mappings[0].source_topic_pattern, "topic-a");
    drop(captured);

    harness.manager.stop_job("job-1").await.unwrap();
    assert_eq!(harness.stops.load(Ordering::SeqCst), 1);

    let updated = harness.store.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(updated.status, "paused");
}

#[tokio::test]
async fn test_start_job_is_idempotent() {
    let harness = TestHarness::new().await;
    harness.seed_clusters().await;
    harness.seed_job("job-1", "idempotent", "paused").await;

    harness.manager.start_job("job-1").await.unwrap();
    harness.manager.start_job("job-1").await.unwrap();
    harness.manager.start_job("job-1").await.unwrap();

    // Exactly one engine was ever constructed.
    assert_eq!(harness.captured.lock().len(), 1);
    assert_eq!(harness.manager.running_count(), 1);
}

#[tokio::test]
async fn test_factory_error_fails_the_job() {
    let harness = TestHarness::new().await;
    harness.seed_clusters().await;
    harness.seed_job("job-1", "error-job", "paused").await;

    harness.manager.set_engine_factory(Arc::new(|_config| {
        async { Err(MirrorError::kafka("kafka is down")) }.boxed()
    }));

    let err = harness.manager.start_job("job-1").await.unwrap_err();
    assert!(err.to_string().contains("kafka is down"));

    // The job did not advance to active.
    let updated = harness.store.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(updated.status, "failed");
    assert!(updated
        .failed_reason
        .as_deref()
        .unwrap()
        .contains("kafka is down"));
    assert!(!harness.manager.is_running("job-1"));
}

#[tokio::test]
async fn test_invalid_sasl_mechanism_fails_at_start() {
    // The real engine factory rejects the configuration before any
    // connection is attempted.
    let store = Store::open_in_memory().await.unwrap();
    let manager = JobManager::new(
        store.clone(),
        EventHub::default(),
        None,
        EngineSettings::default(),
        MonitoringConfig::default(),
    );

    let security = SecurityConfig {
        enabled: true,
        protocol: SecurityProtocol::SaslPlaintext,
        sasl_mechanism: Some("INVALID_MECHANISM".to_string()),
        username: Some("u".to_string()),
        password: Some("p".to_string()),
        ..Default::default()
    };
    let mut source = cluster("source-cluster", "localhost:9092");
    source.security_config = serde_json::to_string(&security).unwrap();
    store.create_cluster(&source).await.unwrap();
    store
        .create_cluster(&cluster("target-cluster", "localhost:9093"))
        .await
        .unwrap();
    store.create_job(&job("job-1", "misconfigured", "paused")).await.unwrap();

    let err = manager.start_job("job-1").await.unwrap_err();
    assert!(err.to_string().contains("unsupported SASL mechanism"));

    let failed = store.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(failed.status, "failed");
    assert!(failed
        .failed_reason
        .as_deref()
        .unwrap()
        .contains("unsupported SASL mechanism"));
}

#[tokio::test]
async fn test_restart_all_starts_only_active_jobs() {
    let harness = TestHarness::new().await;
    harness.seed_clusters().await;
    harness.seed_job("job-1", "first", "active").await;
    harness.seed_job("job-2", "second", "paused").await;
    harness.seed_job("job-3", "third", "active").await;

    harness.manager.restart_all_jobs().await.unwrap();

    assert_eq!(harness.manager.running_count(), 2);
    assert!(harness.manager.is_running("job-1"));
    assert!(!harness.manager.is_running("job-2"));
    assert!(harness.manager.is_running("job-3"));
}

#[tokio::test]
async fn test_restart_job_reconstructs_engine() {
    let harness = TestHarness::new().await;
    harness.seed_clusters().await;
    harness.seed_job("job-1", "restartable", "paused").await;

    harness.manager.start_job("job-1").await.unwrap();
    harness.manager.restart_job("job-1").await.unwrap();

    assert_eq!(harness.captured.lock().len(), 2);
    assert_eq!(harness.stops.load(Ordering::SeqCst), 1);
    assert!(harness.manager.is_running("job-1"));
}

#[tokio::test]
async fn test_close_stops_everything_and_is_idempotent() {
    let harness = TestHarness::new().await;
    harness.seed_clusters().await;
    harness.seed_job("job-1", "first", "paused").await;
    harness.seed_job("job-2", "second", "paused").await;

    harness.manager.start_job("job-1").await.unwrap();
    harness.manager.start_job("job-2").await.unwrap();
    assert_eq!(harness.manager.running_count(), 2);

    harness.manager.close().await;
    assert_eq!(harness.manager.running_count(), 0);
    assert_eq!(harness.stops.load(Ordering::SeqCst), 2);

    harness.manager.close().await;
    assert_eq!(harness.stops.load(Ordering::SeqCst), 2);

    for id in ["job-1", "job-2"] {
        let job = harness.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, "paused");
    }
}

#[tokio::test]
async fn test_pause_persists_across_restart_sweep() {
    let harness = TestHarness::new().await;
    harness.seed_clusters().await;
    harness.seed_job("job-1", "pausable", "paused").await;

    harness.manager.start_job("job-1").await.unwrap();
    harness.manager.pause_job("job-1").await.unwrap();
    assert_eq!(
        harness.store.get_job("job-1").await.unwrap().unwrap().status,
        "paused"
    );

    // A start-up sweep leaves paused jobs alone.
    harness.manager.restart_all_jobs().await.unwrap();
    assert!(!harness.manager.is_running("job-1"));
}
