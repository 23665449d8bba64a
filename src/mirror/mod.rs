//! # Mirror Engine
//!
//! One engine runs per active job. It owns a source consumer, fans fetched
//! records to a bounded pool of producer workers, keeps per-partition
//! offsets in memory, and every tick folds its counters into the metrics
//! aggregator and the durable progress table. Shutdown drains in-flight
//! records under a deadline and writes a final progress row.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{MonitoringConfig, ReplicationConfig};
use crate::error::{MirrorError, Result};
use crate::hub::{EventHub, HubMessage, HubMessageKind};
use crate::kafka::{
    Assignment, ClusterAdmin, KafkaClusterAdmin, KafkaSourceConsumer, KafkaTargetProducer,
    OutboundRecord, SourceConsumer, TargetProducer,
};
use crate::sinks::TelemetrySink;
use crate::store::models::{KafkaCluster, ReplicationJob, TopicMapping};
use crate::store::progress::{ProgressTracker, ProgressUpdate, TrackerSettings};
use crate::store::Store;
use crate::types::{CompressionType, IncidentFlags, ReplicationMetric};

pub mod mapping;

pub use mapping::{resolve_mappings, verify_partition_counts, ResolvedMapping};

use crate::kafka::ProducerTuning;

const POLL_TIMEOUT: Duration = Duration::from_millis(500);
const WATERMARK_TIMEOUT: Duration = Duration::from_secs(2);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine tuning shared by every job
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub metrics_interval: Duration,
    pub drain_timeout: Duration,
    pub startup_timeout: Duration,
    pub ensure_target_topics: bool,
    pub target_replication_factor: i32,
    pub gap_tolerance: i64,
}

impl EngineSettings {
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self {
            metrics_interval: config.metrics_interval(),
            drain_timeout: config.drain_timeout(),
            startup_timeout: config.startup_timeout(),
            ensure_target_topics: config.ensure_target_topics,
            target_replication_factor: config.target_replication_factor,
            gap_tolerance: config.gap_tolerance,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&ReplicationConfig::default())
    }
}

/// Everything the manager materialises to run one job
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub job: ReplicationJob,
    pub source: KafkaCluster,
    pub target: KafkaCluster,
    pub mappings: Vec<TopicMapping>,
}

/// Invoked when an engine task dies with an unrecovered fault
pub type PanicHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// The manager's view of a running engine
#[async_trait]
pub trait ReplicationEngine: Send + Sync {
    fn job_id(&self) -> &str;

    /// Stop the engine. Idempotent; drains in-flight records up to the
    /// configured deadline.
    async fn stop(&self) -> Result<()>;
}

/// Shared collaborators handed to every engine
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Store,
    pub hub: EventHub,
    pub sink: Option<Arc<TelemetrySink>>,
    pub settings: EngineSettings,
    pub monitoring: MonitoringConfig,
    pub on_panic: PanicHook,
}

/// A partition the engine replicates, with its seed state
#[derive(Debug, Clone)]
pub struct PartitionSeed {
    pub source_topic: String,
    pub target_topic: String,
    pub partition: i32,
    /// Highest source offset already replicated, or -1 for none
    pub last_replicated_offset: i64,
    pub source_high_water_mark: i64,
    /// A persisted progress row existed for this partition. Offset values
    /// alone cannot carry this: a partition that replicated exactly
    /// offset 0 before a restart is indistinguishable from a fresh one.
    pub resumed: bool,
}

#[derive(Default)]
struct Counters {
    messages_consumed: AtomicI64,
    bytes_consumed: AtomicI64,
    messages_replicated: AtomicI64,
    bytes_transferred: AtomicI64,
    error_count: AtomicI64,
    in_flight: AtomicI64,
    sink_errors: AtomicI64,
}

#[derive(Debug, Clone)]
struct PartitionState {
    target_topic: String,
    source_offset: i64,
    last_replicated_offset: i64,
    target_offset: i64,
    source_high_water_mark: i64,
    /// Whether this session has fetched at least one record
    fetched_any: bool,
    /// Whether this partition resumed from a persisted progress row
    resumed: bool,
}

struct WorkItem {
    record: OutboundRecord,
    source_topic: String,
    source_partition: i32,
    source_offset: i64,
    bytes: i64,
}

/// A running replication pipeline for one job
pub struct MirrorEngine {
    job_id: String,
    preserve_partitions: bool,
    batch_size: usize,
    cancel: CancellationToken,
    settings: EngineSettings,
    monitoring: MonitoringConfig,
    counters: Arc<Counters>,
    partitions: Arc<DashMap<(String, i32), PartitionState>>,
    consumer: Arc<dyn SourceConsumer>,
    producer: Arc<dyn TargetProducer>,
    tracker: Arc<ProgressTracker>,
    store: Store,
    hub: EventHub,
    sink: Option<Arc<TelemetrySink>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
    failure: Arc<parking_lot::Mutex<Option<String>>>,
    last_flags: parking_lot::Mutex<IncidentFlags>,
}

impl MirrorEngine {
    /// Build and start the full pipeline for a job: resolve mappings,
    /// reconcile target topics, construct clients, seed progress rows, and
    /// spawn the fetch/worker/ticker tasks.
    pub async fn start(config: RuntimeConfig, deps: EngineDeps) -> Result<Arc<Self>> {
        let job = &config.job;
        let compression: CompressionType = job.compression.parse()?;
        let tuning = ProducerTuning {
            batch_size: job.batch_size.max(1),
            compression,
        };

        let startup = Self::discover(&config, &deps.settings);
        let (resolved, watermarks) = tokio::time::timeout(deps.settings.startup_timeout, startup)
            .await
            .map_err(|_| {
                MirrorError::startup(format!(
                    "topic discovery timed out after {}s",
                    deps.settings.startup_timeout.as_secs()
                ))
            })??;

        // Resume each partition from its persisted position.
        let stored = deps.store.get_progress_for_job(&job.id).await?;
        let mut stored_offsets: HashMap<(String, i32), i64> = HashMap::new();
        for row in stored {
            stored_offsets.insert(
                (row.source_topic.clone(), row.partition_id as i32),
                row.last_replicated_offset,
            );
        }

        let mut seeds = Vec::new();
        let mut assignments = Vec::new();
        for mapping in &resolved {
            for partition in 0..mapping.source_partitions {
                let key = (mapping.source_topic.clone(), partition);
                let stored_offset = stored_offsets.get(&key).copied();
                let last_replicated = stored_offset.unwrap_or(-1);
                let hwm = watermarks.get(&key).copied().unwrap_or(0);
                assignments.push(Assignment {
                    topic: mapping.source_topic.clone(),
                    partition,
                    start_offset: if last_replicated > 0 {
                        last_replicated + 1
                    } else {
                        -1
                    },
                });
                seeds.push(PartitionSeed {
                    source_topic: mapping.source_topic.clone(),
                    target_topic: mapping.target_topic.clone(),
                    partition,
                    last_replicated_offset: last_replicated,
                    source_high_water_mark: hwm,
                    resumed: stored_offset.is_some(),
                });
            }
        }

        let group_id = format!("kaf-mirror-{}", job.id);
        let consumer = KafkaSourceConsumer::connect(&config.source, &group_id, &assignments)?;
        let producer = KafkaTargetProducer::connect(
            &config.target,
            &tuning,
            &format!("kaf-mirror-{}-producer", job.id),
        )?;

        let engine = Self::launch(
            job.clone(),
            seeds,
            Arc::new(consumer),
            Arc::new(producer),
            deps,
        );
        engine.persist_progress("active").await?;
        Ok(engine)
    }

    /// Topic discovery and reconciliation against both clusters.
    async fn discover(
        config: &RuntimeConfig,
        settings: &EngineSettings,
    ) -> Result<(Vec<ResolvedMapping>, HashMap<(String, i32), i64>)> {
        let job = &config.job;
        let source_admin =
            KafkaClusterAdmin::connect(&config.source, &format!("kaf-mirror-{}-src", job.id))?;
        let target_admin =
            KafkaClusterAdmin::connect(&config.target, &format!("kaf-mirror-{}-tgt", job.id))?;

        let source_topics = source_admin.topic_partitions(settings.startup_timeout).await?;
        let resolved = resolve_mappings(&config.mappings, &source_topics)?;
        if resolved.is_empty() {
            return Err(MirrorError::startup(
                "no source topics matched the job's mappings",
            ));
        }

        if settings.ensure_target_topics {
            for mapping in &resolved {
                target_admin
                    .create_topic(
                        &mapping.target_topic,
                        mapping.source_partitions,
                        settings.target_replication_factor,
                        settings.startup_timeout,
                    )
                    .await?;
            }
        }

        if job.preserve_partitions {
            let target_topics = target_admin.topic_partitions(settings.startup_timeout).await?;
            verify_partition_counts(&resolved, &target_topics)?;
        }

        let mut watermarks = HashMap::new();
        for mapping in &resolved {
            for partition in 0..mapping.source_partitions {
                let (_, high) = source_admin
                    .fetch_watermarks(&mapping.source_topic, partition, WATERMARK_TIMEOUT)
                    .await?;
                watermarks.insert((mapping.source_topic.clone(), partition), high);
            }
        }

        Ok((resolved, watermarks))
    }

    /// Spawn the pipeline over already-constructed clients. Public so the
    /// engine can run against fakes in tests.
    pub fn launch(
        job: ReplicationJob,
        seeds: Vec<PartitionSeed>,
        consumer: Arc<dyn SourceConsumer>,
        producer: Arc<dyn TargetProducer>,
        deps: EngineDeps,
    ) -> Arc<Self> {
        let parallelism = job.parallelism.max(1) as usize;
        let batch_size = job.batch_size.max(1) as usize;

        let partitions = Arc::new(DashMap::new());
        let mut mapping_table = HashMap::new();
        for seed in &seeds {
            mapping_table.insert(seed.source_topic.clone(), seed.target_topic.clone());
            partitions.insert(
                (seed.source_topic.clone(), seed.partition),
                PartitionState {
                    target_topic: seed.target_topic.clone(),
                    source_offset: seed.last_replicated_offset.max(0),
                    last_replicated_offset: seed.last_replicated_offset.max(0),
                    target_offset: 0,
                    source_high_water_mark: seed
                        .source_high_water_mark
                        .max(seed.last_replicated_offset.max(0)),
                    fetched_any: false,
                    resumed: seed.resumed,
                },
            );
        }

        let tracker = Arc::new(ProgressTracker::new(
            deps.store.clone(),
            TrackerSettings {
                critical_lag_threshold: deps.monitoring.critical_lag_threshold,
                stall_timeout: chrono::Duration::seconds(
                    deps.monitoring.stall_timeout_seconds as i64,
                ),
            },
        ));

        let engine = Arc::new(Self {
            job_id: job.id.clone(),
            preserve_partitions: job.preserve_partitions,
            batch_size,
            cancel: CancellationToken::new(),
            settings: deps.settings.clone(),
            monitoring: deps.monitoring.clone(),
            counters: Arc::new(Counters::default()),
            partitions,
            consumer,
            producer,
            tracker,
            store: deps.store.clone(),
            hub: deps.hub.clone(),
            sink: deps.sink.clone(),
            tasks: tokio::sync::Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            failure: Arc::new(parking_lot::Mutex::new(None)),
            last_flags: parking_lot::Mutex::new(IncidentFlags::default()),
        });

        let mut worker_txs = Vec::with_capacity(parallelism);
        let mut handles = Vec::new();
        for worker in 0..parallelism {
            // Depth 1 per worker keeps total in-flight bounded by the
            // job's parallelism while preserving partition affinity.
            let (tx, rx) = mpsc::channel::<WorkItem>(1);
            worker_txs.push(tx);
            let e = Arc::clone(&engine);
            handles.push(supervise(
                engine.job_id.clone(),
                "producer-worker",
                Arc::clone(&engine.failure),
                deps.on_panic.clone(),
                async move { e.run_worker(worker, rx).await },
            ));
        }

        {
            let e = Arc::clone(&engine);
            handles.push(supervise(
                engine.job_id.clone(),
                "fetch",
                Arc::clone(&engine.failure),
                deps.on_panic.clone(),
                async move { e.run_fetch(worker_txs).await },
            ));
        }
        {
            let e = Arc::clone(&engine);
            handles.push(supervise(
                engine.job_id.clone(),
                "ticker",
                Arc::clone(&engine.failure),
                deps.on_panic.clone(),
                async move { e.run_ticker().await },
            ));
        }

        *engine.tasks.try_lock().expect("no contention at launch") = handles;
        info!(job_id = %engine.job_id, parallelism, batch_size, "mirror engine started");
        engine
    }

    /// The fetch loop: poll batches and hand records to workers with
    /// per-partition affinity.
    async fn run_fetch(&self, workers: Vec<mpsc::Sender<WorkItem>>) -> Result<()> {
        loop {
            let batch = tokio::select! {
                _ = self.cancel.cancelled() => break,
                batch = self.consumer.poll_batch(self.batch_size, POLL_TIMEOUT) => batch,
            };

            let records = match batch {
                Ok(records) => records,
                Err(e) => {
                    // Transient broker trouble; the client retries internally.
                    warn!(job_id = %self.job_id, "fetch error: {e}");
                    tokio::time::sleep(POLL_TIMEOUT).await;
                    continue;
                }
            };

            for record in records {
                let Some(target_topic) = self
                    .partitions
                    .get(&(record.topic.clone(), record.partition))
                    .map(|s| s.target_topic.clone())
                else {
                    // A record for a partition this job never resolved.
                    let poison = MirrorError::ConsumePoison {
                        message: "record from an unmapped topic dropped".to_string(),
                        topic: record.topic.clone(),
                        partition: record.partition,
                        offset: record.offset,
                    };
                    warn!(job_id = %self.job_id, "{poison}");
                    self.counters.error_count.fetch_add(1, Ordering::Relaxed);
                    self.hub.publish(HubMessage::new(
                        HubMessageKind::Incident,
                        Some(self.job_id.clone()),
                        json!({
                            "reason": poison.category(),
                            "topic": record.topic,
                            "partition": record.partition,
                            "offset": record.offset,
                        }),
                    ));
                    continue;
                };

                // A discontinuity in fetched offsets means the range in
                // between is gone from the source (compaction, retention,
                // or a forced seek) and can never replicate.
                let mut gap = None;
                if let Some(mut state) = self
                    .partitions
                    .get_mut(&(record.topic.clone(), record.partition))
                {
                    let expected = state.source_offset + 1 + self.settings.gap_tolerance;
                    if (state.fetched_any || state.resumed) && record.offset > expected {
                        gap = Some((
                            state.target_topic.clone(),
                            state.source_offset + 1,
                            record.offset - 1,
                        ));
                    }
                    state.fetched_any = true;
                    state.source_offset = record.offset;
                    if record.offset >= state.source_high_water_mark {
                        state.source_high_water_mark = record.offset + 1;
                    }
                }
                if let Some((target_topic, start, end)) = gap {
                    if let Err(e) = self
                        .tracker
                        .record_gap(
                            &self.job_id,
                            &record.topic,
                            &target_topic,
                            record.partition,
                            start,
                            end,
                        )
                        .await
                    {
                        warn!(job_id = %self.job_id, "could not record gap: {e}");
                    }
                    self.hub.publish(HubMessage::new(
                        HubMessageKind::Incident,
                        Some(self.job_id.clone()),
                        json!({
                            "reason": "offset_jump",
                            "topic": record.topic,
                            "partition": record.partition,
                            "gap_start_offset": start,
                            "gap_end_offset": end,
                        }),
                    ));
                }

                let outbound = OutboundRecord {
                    topic: target_topic,
                    partition: self.preserve_partitions.then_some(record.partition),
                    key: record.key,
                    payload: record.payload,
                    headers: record.headers,
                };
                let bytes = outbound.byte_size();
                self.counters.messages_consumed.fetch_add(1, Ordering::Relaxed);
                self.counters.bytes_consumed.fetch_add(bytes, Ordering::Relaxed);

                let item = WorkItem {
                    record: outbound,
                    source_topic: record.topic,
                    source_partition: record.partition,
                    source_offset: record.offset,
                    bytes,
                };

                let worker = (item.source_partition as usize) % workers.len();
                self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
                if workers[worker].send(item).await.is_err() {
                    self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// One producer worker: submit records and record completions.
    async fn run_worker(&self, index: usize, mut rx: mpsc::Receiver<WorkItem>) -> Result<()> {
        debug!(job_id = %self.job_id, worker = index, "producer worker up");
        while let Some(item) = rx.recv().await {
            match self.producer.send(item.record).await {
                Ok((_, target_offset)) => {
                    self.counters
                        .messages_replicated
                        .fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .bytes_transferred
                        .fetch_add(item.bytes, Ordering::Relaxed);
                    if let Some(mut state) = self
                        .partitions
                        .get_mut(&(item.source_topic.clone(), item.source_partition))
                    {
                        if item.source_offset > state.last_replicated_offset {
                            state.last_replicated_offset = item.source_offset;
                        }
                        state.target_offset = target_offset;
                    }
                }
                Err(e) => {
                    self.counters.error_count.fetch_add(1, Ordering::Relaxed);
                    warn!(job_id = %self.job_id, worker = index, "produce failed: {e}");
                }
            }
            self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// The periodic tick: refresh watermarks, persist progress and a
    /// metrics snapshot, and raise incident signals.
    async fn run_ticker(&self) -> Result<()> {
        let mut interval = tokio::time::interval(self.settings.metrics_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The zero-delay first tick is consumed; startup already seeded
        // progress rows.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }
        Ok(())
    }

    async fn tick(&self) {
        self.refresh_watermarks().await;

        if let Err(e) = self.persist_progress("active").await {
            // Retried on the next tick.
            warn!(job_id = %self.job_id, "progress write failed: {e}");
        }

        let metric = self.snapshot();
        if let Err(e) = self.store.insert_metrics(&metric).await {
            warn!(job_id = %self.job_id, "metrics tick lost: {e}");
        }

        self.hub.publish(HubMessage::new(
            HubMessageKind::Metrics,
            Some(self.job_id.clone()),
            serde_json::to_value(&metric).unwrap_or_default(),
        ));

        self.raise_incidents().await;

        if let Some(sink) = &self.sink {
            let sink = Arc::clone(sink);
            let counters = Arc::clone(&self.counters);
            let job_id = self.job_id.clone();
            // Fire and forget; a failing sink never blocks the engine.
            tokio::spawn(async move {
                if let Err(e) = sink.send(&metric).await {
                    counters.sink_errors.fetch_add(1, Ordering::Relaxed);
                    debug!(job_id, "telemetry sink send failed: {e}");
                }
            });
        }
    }

    async fn refresh_watermarks(&self) {
        let keys: Vec<(String, i32)> = self
            .partitions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for (topic, partition) in keys {
            match self
                .consumer
                .fetch_watermarks(&topic, partition, WATERMARK_TIMEOUT)
                .await
            {
                Ok((_, high)) => {
                    if let Some(mut state) = self.partitions.get_mut(&(topic, partition)) {
                        if high > state.source_high_water_mark {
                            state.source_high_water_mark = high;
                        }
                    }
                }
                Err(e) => {
                    debug!(job_id = %self.job_id, topic, partition, "watermark refresh failed: {e}");
                }
            }
        }
    }

    /// Current cumulative counters as a metric snapshot.
    fn snapshot(&self) -> ReplicationMetric {
        let mut lag_total = 0_i64;
        let mut lag_count = 0_i64;
        for entry in self.partitions.iter() {
            lag_total += (entry.source_high_water_mark - entry.last_replicated_offset).max(0);
            lag_count += 1;
        }
        let current_lag = if lag_count > 0 { lag_total / lag_count } else { 0 };

        ReplicationMetric {
            job_id: self.job_id.clone(),
            messages_replicated: self.counters.messages_replicated.load(Ordering::Relaxed),
            bytes_transferred: self.counters.bytes_transferred.load(Ordering::Relaxed),
            messages_consumed: self.counters.messages_consumed.load(Ordering::Relaxed),
            bytes_consumed: self.counters.bytes_consumed.load(Ordering::Relaxed),
            current_lag,
            error_count: self.counters.error_count.load(Ordering::Relaxed),
            timestamp: Utc::now(),
        }
    }

    /// Write one progress row per partition. The ticker task is the single
    /// writer for a job, so no locking is needed around the store.
    async fn persist_progress(&self, status: &str) -> Result<()> {
        let states: Vec<((String, i32), PartitionState)> = self
            .partitions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for ((topic, partition), state) in states {
            let last_replicated = state.last_replicated_offset.max(0);
            let update = ProgressUpdate {
                job_id: self.job_id.clone(),
                source_topic: topic,
                target_topic: state.target_topic.clone(),
                partition_id: partition,
                source_offset: state.source_offset.max(last_replicated),
                target_offset: state.target_offset.max(0),
                source_high_water_mark: state
                    .source_high_water_mark
                    .max(state.source_offset.max(last_replicated)),
                target_high_water_mark: state.target_offset.max(0) + 1,
                last_replicated_offset: last_replicated,
                status: status.to_string(),
            };
            self.tracker.upsert(&update).await?;
        }
        Ok(())
    }

    async fn raise_incidents(&self) {
        let flags = match self.store.incident_flags(&self.job_id, &self.monitoring).await {
            Ok(flags) => flags,
            Err(e) => {
                debug!(job_id = %self.job_id, "incident derivation failed: {e}");
                return;
            }
        };

        let changed = {
            let mut last = self.last_flags.lock();
            let changed = *last != flags;
            *last = flags;
            changed
        };

        if flags.any() && changed {
            self.hub.publish(HubMessage::new(
                HubMessageKind::Incident,
                Some(self.job_id.clone()),
                json!({ "flags": flags.raised() }),
            ));
        }
    }

    /// Telemetry sink failures observed so far.
    pub fn sink_errors(&self) -> i64 {
        self.counters.sink_errors.load(Ordering::Relaxed)
    }

    /// Cumulative counters, exposed for observation.
    pub fn metrics(&self) -> ReplicationMetric {
        self.snapshot()
    }
}

#[async_trait]
impl ReplicationEngine for MirrorEngine {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(job_id = %self.job_id, "stopping mirror engine");
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        if tokio::time::timeout(self.settings.drain_timeout, join_all(handles))
            .await
            .is_err()
        {
            for abort in aborts {
                abort.abort();
            }
            let abandoned = self.counters.in_flight.load(Ordering::SeqCst).max(0);
            if abandoned > 0 {
                self.counters
                    .error_count
                    .fetch_add(abandoned, Ordering::Relaxed);
                let timeout = MirrorError::DrainTimeout {
                    in_flight: abandoned as u64,
                    deadline_secs: self.settings.drain_timeout.as_secs(),
                };
                warn!(job_id = %self.job_id, "{timeout}");
            }
        }

        if let Err(e) = self.producer.flush(FLUSH_TIMEOUT).await {
            warn!(job_id = %self.job_id, "producer flush failed: {e}");
        }

        let failed_reason = self.failure.lock().clone();
        let status = if failed_reason.is_some() {
            "failed"
        } else {
            "paused"
        };
        if let Err(e) = self.persist_progress(status).await {
            warn!(job_id = %self.job_id, "final progress write failed: {e}");
        }

        self.hub.publish(HubMessage::new(
            HubMessageKind::JobState,
            Some(self.job_id.clone()),
            json!({ "status": status, "failed_reason": failed_reason }),
        ));
        info!(job_id = %self.job_id, status, "mirror engine stopped");
        Ok(())
    }
}

/// Run a task under supervision: a returned error or a panic records the
/// failure and invokes the manager's hook.
fn supervise(
    job_id: String,
    name: &'static str,
    failure: Arc<parking_lot::Mutex<Option<String>>>,
    on_panic: PanicHook,
    task: impl std::future::Future<Output = Result<()>> + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match AssertUnwindSafe(task).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(job_id, task = name, "engine task failed: {e}");
                let reason = e.to_string();
                *failure.lock() = Some(reason.clone());
                on_panic(&job_id, &reason);
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| format!("{name} task panicked"));
                error!(job_id, task = name, "engine task panicked: {reason}");
                *failure.lock() = Some(reason.clone());
                on_panic(&job_id, &reason);
            }
        }
    })
}
