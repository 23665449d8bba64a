//! # Job Manager
//!
//! Owns the set of running mirror engines. Starting a job materialises its
//! persisted definition into a runtime config and hands it to the engine
//! factory; the factory is injectable so tests can supply a fake engine.
//! A fault surfacing from any engine task transitions the job to `failed`
//! without touching the rest of the fleet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::MonitoringConfig;
use crate::error::{MirrorError, Result};
use crate::hub::{EventHub, HubMessage, HubMessageKind};
use crate::mirror::{EngineDeps, EngineSettings, MirrorEngine, PanicHook, ReplicationEngine, RuntimeConfig};
use crate::sinks::TelemetrySink;
use crate::store::Store;
use crate::types::JobStatus;

/// Builds (and starts) an engine from a runtime config
pub type EngineFactory = Arc<
    dyn Fn(RuntimeConfig) -> BoxFuture<'static, Result<Arc<dyn ReplicationEngine>>> + Send + Sync,
>;

/// Supervisor for all running replication jobs
pub struct JobManager {
    store: Store,
    hub: EventHub,
    settings: EngineSettings,
    jobs: Mutex<HashMap<String, Arc<dyn ReplicationEngine>>>,
    factory: RwLock<EngineFactory>,
}

impl JobManager {
    /// Create a manager wired to the real mirror engine.
    pub fn new(
        store: Store,
        hub: EventHub,
        sink: Option<Arc<TelemetrySink>>,
        settings: EngineSettings,
        monitoring: MonitoringConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &std::sync::Weak<JobManager>| {
            let factory_store = store.clone();
            let factory_hub = hub.clone();
            let factory_settings = settings.clone();
            let weak = weak.clone();

            let factory: EngineFactory = Arc::new(move |config: RuntimeConfig| {
                let weak = weak.clone();
                let deps = EngineDeps {
                    store: factory_store.clone(),
                    hub: factory_hub.clone(),
                    sink: sink.clone(),
                    settings: factory_settings.clone(),
                    monitoring: monitoring.clone(),
                    on_panic: fault_hook(weak),
                };
                async move {
                    let engine = MirrorEngine::start(config, deps).await?;
                    Ok(engine as Arc<dyn ReplicationEngine>)
                }
                .boxed()
            });

            Self {
                store,
                hub,
                settings,
                jobs: Mutex::new(HashMap::new()),
                factory: RwLock::new(factory),
            }
        })
    }

    /// Replace the engine factory. Tests inject a factory that records the
    /// generated config and returns a mock engine.
    pub fn set_engine_factory(&self, factory: EngineFactory) {
        *self.factory.write() = factory;
    }

    /// Whether an engine is currently registered for the job.
    pub fn is_running(&self, job_id: &str) -> bool {
        self.jobs.lock().contains_key(job_id)
    }

    /// Number of running jobs.
    pub fn running_count(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Start a job. Calling this on an already-running job is a no-op.
    pub async fn start_job(&self, job_id: &str) -> Result<()> {
        if self.is_running(job_id) {
            return Ok(());
        }

        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| MirrorError::configuration(format!("job not found: {job_id}")))?;
        let source = self
            .store
            .get_cluster(&job.source_cluster_name)
            .await?
            .ok_or_else(|| {
                MirrorError::configuration(format!(
                    "source cluster not found: {}",
                    job.source_cluster_name
                ))
            })?;
        let target = self
            .store
            .get_cluster(&job.target_cluster_name)
            .await?
            .ok_or_else(|| {
                MirrorError::configuration(format!(
                    "target cluster not found: {}",
                    job.target_cluster_name
                ))
            })?;
        let mappings = self.store.get_mappings_for_job(job_id).await?;

        let config = RuntimeConfig {
            job,
            source,
            target,
            mappings,
        };

        let factory = self.factory.read().clone();
        match factory(config).await {
            Ok(engine) => {
                self.jobs.lock().insert(job_id.to_string(), engine);
                self.store.set_job_status(job_id, JobStatus::Active).await?;
                self.hub.publish(HubMessage::new(
                    HubMessageKind::JobState,
                    Some(job_id.to_string()),
                    json!({ "status": "active" }),
                ));
                info!(job_id, "job started");
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                error!(job_id, "failed to start job: {reason}");
                if let Err(store_err) = self.store.mark_job_failed(job_id, &reason).await {
                    warn!(job_id, "could not persist failure reason: {store_err}");
                }
                self.hub.publish(HubMessage::new(
                    HubMessageKind::Incident,
                    Some(job_id.to_string()),
                    json!({ "reason": reason }),
                ));
                Err(e)
            }
        }
    }

    /// Stop a job. Calling this on a job that is not running is a no-op.
    pub async fn stop_job(&self, job_id: &str) -> Result<()> {
        let engine = self.jobs.lock().remove(job_id);
        let Some(engine) = engine else {
            return Ok(());
        };

        // The engine enforces the drain deadline itself; the outer timeout
        // guards against a wedged shutdown path.
        let deadline = self.settings.drain_timeout + Duration::from_secs(5);
        if tokio::time::timeout(deadline, engine.stop()).await.is_err() {
            warn!(job_id, "engine stop exceeded its deadline; forcing close");
        }

        self.store.set_job_status(job_id, JobStatus::Paused).await?;
        info!(job_id, "job stopped");
        Ok(())
    }

    /// Pause a job. Semantically a stop; the paused status persists across
    /// restarts.
    pub async fn pause_job(&self, job_id: &str) -> Result<()> {
        self.stop_job(job_id).await
    }

    /// Stop then start a job, preserving its mappings.
    pub async fn restart_job(&self, job_id: &str) -> Result<()> {
        self.stop_job(job_id).await?;
        self.start_job(job_id).await
    }

    /// Start every job persisted as `active`. Called on process start-up;
    /// per-job failures are recorded and never abort the sweep.
    pub async fn restart_all_jobs(&self) -> Result<()> {
        let jobs = self.store.list_jobs().await?;
        for job in jobs {
            if job.status != JobStatus::Active.as_str() {
                continue;
            }
            if let Err(e) = self.start_job(&job.id).await {
                error!(job_id = %job.id, "could not restart job: {e}");
            }
        }
        Ok(())
    }

    /// Stop every running job in parallel under a global deadline.
    /// Idempotent.
    pub async fn close(&self) {
        let engines: Vec<(String, Arc<dyn ReplicationEngine>)> =
            self.jobs.lock().drain().collect();
        if engines.is_empty() {
            return;
        }
        info!(count = engines.len(), "closing all running jobs");

        let deadline = self.settings.drain_timeout + Duration::from_secs(5);
        let stops = engines.iter().map(|(job_id, engine)| {
            let job_id = job_id.clone();
            let engine = Arc::clone(engine);
            async move {
                if tokio::time::timeout(deadline, engine.stop()).await.is_err() {
                    warn!(job_id, "engine stop exceeded the close deadline");
                }
            }
        });
        join_all(stops).await;

        for (job_id, _) in &engines {
            if let Err(e) = self.store.set_job_status(job_id, JobStatus::Paused).await {
                warn!(job_id, "could not persist paused status on close: {e}");
            }
        }
    }

    /// Engine fault path: persist the failure, drop the handle, and let
    /// the engine wind itself down.
    async fn handle_engine_fault(&self, job_id: &str, reason: &str) {
        error!(job_id, "engine fault: {reason}");
        let engine = self.jobs.lock().remove(job_id);

        if let Err(e) = self.store.mark_job_failed(job_id, reason).await {
            warn!(job_id, "could not persist failure reason: {e}");
        }
        self.hub.publish(HubMessage::new(
            HubMessageKind::Incident,
            Some(job_id.to_string()),
            json!({ "reason": reason }),
        ));

        if let Some(engine) = engine {
            let job_id = job_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = engine.stop().await {
                    warn!(job_id, "fault cleanup stop failed: {e}");
                }
            });
        }
    }
}

/// A panic hook that routes engine faults back to the manager.
fn fault_hook(weak: std::sync::Weak<JobManager>) -> PanicHook {
    Arc::new(move |job_id: &str, reason: &str| {
        let Some(manager) = weak.upgrade() else {
            return;
        };
        let job_id = job_id.to_string();
        let reason = reason.to_string();
        tokio::spawn(async move {
            manager.handle_engine_fault(&job_id, &reason).await;
        });
    })
}
