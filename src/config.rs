//! # Configuration Module
//!
//! Layered service configuration: defaults, then `config/mirror-service`
//! files, then `MIRROR_SERVICE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for the replication service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persistent store settings
    pub database: DatabaseConfig,

    /// Replication engine tuning
    pub replication: ReplicationConfig,

    /// Incident thresholds and optional telemetry sink
    pub monitoring: MonitoringConfig,

    /// Retention windows applied by the pruning task
    pub retention: RetentionConfig,

    /// Environment-specific settings
    pub environment: EnvironmentConfig,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/mirror-service").required(false))
            .add_source(config::File::with_name("config/mirror-service.local").required(false))
            .add_source(
                config::Environment::with_prefix("MIRROR_SERVICE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention.metrics_days < 1 {
            return Err(ConfigError::Invalid(
                "retention.metrics_days must be at least 1".to_string(),
            ));
        }
        if self.retention.mirror_state_days < 1 {
            return Err(ConfigError::Invalid(
                "retention.mirror_state_days must be at least 1".to_string(),
            ));
        }
        if self.replication.metrics_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "replication.metrics_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.monitoring.incident_window == 0 {
            return Err(ConfigError::Invalid(
                "monitoring.incident_window must be at least 1".to_string(),
            ));
        }
        if let Some(platform) = &self.monitoring.platform {
            if !matches!(platform.as_str(), "prometheus" | "loki" | "splunk") {
                return Err(ConfigError::Invalid(format!(
                    "unknown monitoring platform: {platform}"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Persistent store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    pub url: String,

    /// Connection pool size
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://mirror-service.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

/// Replication engine tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Seconds between metric/progress ticks
    pub metrics_interval_seconds: u64,

    /// Seconds allowed for in-flight records to complete on shutdown
    pub drain_timeout_seconds: u64,

    /// Seconds allowed for topic discovery and client construction
    pub startup_timeout_seconds: u64,

    /// Create missing target topics at job start
    pub ensure_target_topics: bool,

    /// Replication factor applied when creating target topics
    pub target_replication_factor: i32,

    /// Offset-jump slack before a gap row is recorded
    pub gap_tolerance: i64,

    /// Permit jobs whose source and target name the same cluster
    pub allow_same_cluster: bool,
}

impl ReplicationConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_seconds)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            metrics_interval_seconds: 5,
            drain_timeout_seconds: 10,
            startup_timeout_seconds: 15,
            ensure_target_topics: false,
            target_replication_factor: 1,
            gap_tolerance: 0,
            allow_same_cluster: false,
        }
    }
}

/// Incident thresholds and telemetry sink selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Forward metric snapshots to an external sink
    pub enabled: bool,

    /// One of `prometheus`, `loki`, `splunk`
    pub platform: Option<String>,

    pub prometheus: PrometheusConfig,
    pub loki: LokiConfig,
    pub splunk: SplunkConfig,

    /// Consecutive ticks a condition must hold before a flag raises
    pub incident_window: usize,

    /// Average lag above which `critical_lag` raises
    pub critical_lag_threshold: i64,

    /// Errors-per-consumed ratio above which `high_error_rate` raises
    pub error_rate_threshold: f64,

    /// Latest error delta vs prior moving average for `error_spike`
    pub error_spike_multiplier: f64,

    /// Seconds a lag breach must persist before a stall analysis opens
    pub stall_timeout_seconds: u64,
}

impl MonitoringConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_seconds)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            platform: None,
            prometheus: PrometheusConfig::default(),
            loki: LokiConfig::default(),
            splunk: SplunkConfig::default(),
            incident_window: 3,
            critical_lag_threshold: 10_000,
            error_rate_threshold: 0.05,
            error_spike_multiplier: 3.0,
            stall_timeout_seconds: 300,
        }
    }
}

/// Prometheus Pushgateway settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub push_gateway: String,
}

/// Loki push API settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LokiConfig {
    pub url: String,
}

/// Splunk HTTP Event Collector settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplunkConfig {
    pub url: String,
    pub token: String,
    pub index: Option<String>,
}

/// Retention windows applied by the daily pruning task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Days to keep aggregated metrics and operational events
    pub metrics_days: i64,

    /// Days to keep progress, resume points, gaps, and state analyses
    pub mirror_state_days: i64,

    /// Days of inactivity before a cluster auto-archives
    pub archive_inactive_after_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            metrics_days: 30,
            mirror_state_days: 7,
            archive_inactive_after_days: 90,
        }
    }
}

/// Environment-specific settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub name: String,
    pub debug: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            name: "development".to_string(),
            debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retention.metrics_days, 30);
        assert_eq!(config.retention.mirror_state_days, 7);
        assert_eq!(config.replication.metrics_interval_seconds, 5);
        assert_eq!(config.replication.drain_timeout_seconds, 10);
    }

    #[test]
    fn test_retention_windows_are_configuration() {
        let mut config = Config::default();
        config.retention.metrics_days = 90;
        config.retention.mirror_state_days = 14;
        assert!(config.validate().is_ok());

        config.retention.metrics_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_platform_rejected() {
        let mut config = Config::default();
        config.monitoring.platform = Some("statsd".to_string());
        assert!(config.validate().is_err());

        config.monitoring.platform = Some("loki".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_helpers() {
        let config = ReplicationConfig::default();
        assert_eq!(config.metrics_interval(), Duration::from_secs(5));
        assert_eq!(config.drain_timeout(), Duration::from_secs(10));
        assert_eq!(config.startup_timeout(), Duration::from_secs(15));
    }
}
