//! # Telemetry Sinks
//!
//! Optional forwarding of metric snapshots to one external platform:
//! a Prometheus Pushgateway, Loki, or a Splunk HTTP Event Collector.
//! Every send is fire-and-forget per tick; failures are counted by the
//! engine and never block replication.

use std::time::Duration;

use prometheus::{Encoder, Gauge, Registry, TextEncoder};
use serde_json::json;

use crate::config::{LokiConfig, MonitoringConfig, PrometheusConfig, SplunkConfig};
use crate::error::{MirrorError, Result};
use crate::types::ReplicationMetric;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// One configured telemetry sink
pub enum TelemetrySink {
    Prometheus(PrometheusSink),
    Loki(LokiSink),
    Splunk(SplunkSink),
}

impl TelemetrySink {
    /// Build the sink selected by configuration, if any.
    pub fn from_config(monitoring: &MonitoringConfig) -> Result<Option<Self>> {
        if !monitoring.enabled {
            return Ok(None);
        }
        match monitoring.platform.as_deref() {
            Some("prometheus") => Ok(Some(TelemetrySink::Prometheus(PrometheusSink::new(
                &monitoring.prometheus,
            )?))),
            Some("loki") => Ok(Some(TelemetrySink::Loki(LokiSink::new(&monitoring.loki)))),
            Some("splunk") => Ok(Some(TelemetrySink::Splunk(SplunkSink::new(
                &monitoring.splunk,
            )))),
            _ => Ok(None),
        }
    }

    /// Forward one metric snapshot.
    pub async fn send(&self, metric: &ReplicationMetric) -> Result<()> {
        match self {
            TelemetrySink::Prometheus(sink) => sink.send(metric).await,
            TelemetrySink::Loki(sink) => sink.send(metric).await,
            TelemetrySink::Splunk(sink) => sink.send(metric).await,
        }
    }

    pub fn platform(&self) -> &'static str {
        match self {
            TelemetrySink::Prometheus(_) => "prometheus",
            TelemetrySink::Loki(_) => "loki",
            TelemetrySink::Splunk(_) => "splunk",
        }
    }
}

/// Pushes gauges to a Prometheus Pushgateway
pub struct PrometheusSink {
    push_gateway: String,
    client: reqwest::Client,
    registry: Registry,
    messages_replicated: Gauge,
    bytes_transferred: Gauge,
    messages_consumed: Gauge,
    current_lag: Gauge,
    error_count: Gauge,
}

impl PrometheusSink {
    pub fn new(config: &PrometheusConfig) -> Result<Self> {
        let registry = Registry::new();
        let gauge = |name: &str, help: &str| -> Result<Gauge> {
            let gauge = Gauge::new(name, help)
                .map_err(|e| MirrorError::Telemetry {
                    message: format!("failed to create gauge {name}: {e}"),
                })?;
            registry.register(Box::new(gauge.clone())).map_err(|e| {
                MirrorError::Telemetry {
                    message: format!("failed to register gauge {name}: {e}"),
                }
            })?;
            Ok(gauge)
        };

        Ok(Self {
            push_gateway: config.push_gateway.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            messages_replicated: gauge(
                "mirror_messages_replicated",
                "Number of messages replicated.",
            )?,
            bytes_transferred: gauge("mirror_bytes_transferred", "Number of bytes transferred.")?,
            messages_consumed: gauge("mirror_messages_consumed", "Number of messages consumed.")?,
            current_lag: gauge("mirror_current_lag", "Current replication lag.")?,
            error_count: gauge("mirror_error_count", "Number of errors.")?,
            registry,
        })
    }

    pub async fn send(&self, metric: &ReplicationMetric) -> Result<()> {
        self.messages_replicated
            .set(metric.messages_replicated as f64);
        self.bytes_transferred.set(metric.bytes_transferred as f64);
        self.messages_consumed.set(metric.messages_consumed as f64);
        self.current_lag.set(metric.current_lag as f64);
        self.error_count.set(metric.error_count as f64);

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MirrorError::Telemetry {
                message: format!("failed to encode metrics: {e}"),
            })?;

        let url = format!(
            "{}/metrics/job/mirror-service/job_id/{}",
            self.push_gateway, metric.job_id
        );
        let response = self
            .client
            .put(&url)
            .timeout(SEND_TIMEOUT)
            .body(buffer)
            .send()
            .await
            .map_err(|e| MirrorError::Telemetry {
                message: format!("pushgateway unreachable: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(MirrorError::Telemetry {
                message: format!("pushgateway returned {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Pushes one log line per tick to Loki
pub struct LokiSink {
    url: String,
    client: reqwest::Client,
}

impl LokiSink {
    pub fn new(config: &LokiConfig) -> Self {
        Self {
            url: format!(
                "{}/loki/api/v1/push",
                config.url.trim_end_matches('/')
            ),
            client: reqwest::Client::new(),
        }
    }

    pub async fn send(&self, metric: &ReplicationMetric) -> Result<()> {
        let timestamp_ns = metric
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| metric.timestamp.timestamp_millis() * 1_000_000);
        let line = serde_json::to_string(metric)?;

        let payload = json!({
            "streams": [{
                "stream": {
                    "app": "mirror-service",
                    "job_id": metric.job_id,
                },
                "values": [[timestamp_ns.to_string(), line]],
            }]
        });

        let response = self
            .client
            .post(&self.url)
            .timeout(SEND_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MirrorError::Telemetry {
                message: format!("loki unreachable: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(MirrorError::Telemetry {
                message: format!("loki returned {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Posts one event per tick to a Splunk HTTP Event Collector
pub struct SplunkSink {
    url: String,
    token: String,
    index: Option<String>,
    client: reqwest::Client,
}

impl SplunkSink {
    pub fn new(config: &SplunkConfig) -> Self {
        Self {
            url: format!(
                "{}/services/collector/event",
                config.url.trim_end_matches('/')
            ),
            token: config.token.clone(),
            index: config.index.clone(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn send(&self, metric: &ReplicationMetric) -> Result<()> {
        let mut payload = json!({
            "event": metric,
            "sourcetype": "mirror:metrics",
            "time": metric.timestamp.timestamp(),
        });
        if let Some(index) = &self.index {
            payload["index"] = json!(index);
        }

        let response = self
            .client
            .post(&self.url)
            .timeout(SEND_TIMEOUT)
            .header("Authorization", format!("Splunk {}", self.token))
            .json(&payload)
            .send()
            .await
            .map_err(|e| MirrorError::Telemetry {
                message: format!("splunk unreachable: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(MirrorError::Telemetry {
                message: format!("splunk returned {}", response.status()),
            });
        }
        Ok(())
    }
}
