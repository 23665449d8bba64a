//! # Domain Types
//!
//! Enums and wire structs shared across the service: job and cluster status
//! machines, cluster providers, security profiles, compression codecs, and
//! the cumulative metric snapshot the engine hands to the aggregator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;

/// Lifecycle status of a replication job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Paused,
    Active,
    Failed,
    Archived,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Paused => "paused",
            JobStatus::Active => "active",
            JobStatus::Failed => "failed",
            JobStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paused" => Ok(JobStatus::Paused),
            "active" => Ok(JobStatus::Active),
            "failed" => Ok(JobStatus::Failed),
            "archived" => Ok(JobStatus::Archived),
            other => Err(MirrorError::invariant(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// Lifecycle status of a cluster descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Active,
    Inactive,
    Archived,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Active => "active",
            ClusterStatus::Inactive => "inactive",
            ClusterStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognised cluster providers. Each dictates the authentication option
/// set applied by the client factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterProvider {
    Plain,
    Confluent,
    Azure,
    Aws,
    Gcp,
}

impl ClusterProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterProvider::Plain => "plain",
            ClusterProvider::Confluent => "confluent",
            ClusterProvider::Azure => "azure",
            ClusterProvider::Aws => "aws",
            ClusterProvider::Gcp => "gcp",
        }
    }
}

impl FromStr for ClusterProvider {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "plain" => Ok(ClusterProvider::Plain),
            "confluent" => Ok(ClusterProvider::Confluent),
            "azure" => Ok(ClusterProvider::Azure),
            "aws" => Ok(ClusterProvider::Aws),
            "gcp" => Ok(ClusterProvider::Gcp),
            other => Err(MirrorError::configuration(format!(
                "unknown cluster provider: {other}"
            ))),
        }
    }
}

/// Compression codec applied by the target producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl CompressionType {
    /// The librdkafka `compression.codec` value
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Gzip => "gzip",
            CompressionType::Snappy => "snappy",
            CompressionType::Lz4 => "lz4",
            CompressionType::Zstd => "zstd",
        }
    }
}

impl FromStr for CompressionType {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(CompressionType::None),
            "gzip" => Ok(CompressionType::Gzip),
            "snappy" => Ok(CompressionType::Snappy),
            "lz4" => Ok(CompressionType::Lz4),
            "zstd" => Ok(CompressionType::Zstd),
            other => Err(MirrorError::configuration(format!(
                "unknown compression type: {other}"
            ))),
        }
    }
}

/// Transport security protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityProtocol {
    #[serde(rename = "PLAINTEXT")]
    Plaintext,
    #[serde(rename = "SSL")]
    Ssl,
    #[serde(rename = "SASL_PLAINTEXT")]
    SaslPlaintext,
    #[serde(rename = "SASL_SSL")]
    SaslSsl,
}

impl SecurityProtocol {
    /// The librdkafka `security.protocol` value
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "PLAINTEXT",
            SecurityProtocol::Ssl => "SSL",
            SecurityProtocol::SaslPlaintext => "SASL_PLAINTEXT",
            SecurityProtocol::SaslSsl => "SASL_SSL",
        }
    }
}

impl Default for SecurityProtocol {
    fn default() -> Self {
        SecurityProtocol::Plaintext
    }
}

/// TLS settings for a cluster connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslConfig {
    pub ca_cert_path: Option<String>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub key_password: Option<String>,
    #[serde(default)]
    pub verify_certificates: bool,
}

/// Security profile for a cluster, persisted as JSON on the descriptor row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub protocol: SecurityProtocol,
    pub sasl_mechanism: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Kerberos service name, required for GSSAPI
    pub service_name: Option<String>,
    /// Event Hubs style connection string (azure provider)
    pub connection_string: Option<String>,
    pub ssl: Option<SslConfig>,
}

/// Role a client plays, dictating which tuning options apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Consumer,
    Producer,
    Admin,
}

/// A cumulative metrics snapshot for one job, taken by the engine ticker.
///
/// Counters are monotonic for the lifetime of the engine process; the
/// aggregator converts successive snapshots into deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationMetric {
    pub job_id: String,
    pub messages_replicated: i64,
    pub bytes_transferred: i64,
    pub messages_consumed: i64,
    pub bytes_consumed: i64,
    pub current_lag: i64,
    pub error_count: i64,
    pub timestamp: DateTime<Utc>,
}

impl ReplicationMetric {
    pub fn zero(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            messages_replicated: 0,
            bytes_transferred: 0,
            messages_consumed: 0,
            bytes_consumed: 0,
            current_lag: 0,
            error_count: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Boolean incident signals derived over a sliding window of metric rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentFlags {
    pub source_stalled: bool,
    pub target_stalled: bool,
    pub critical_lag: bool,
    pub high_error_rate: bool,
    pub error_spike: bool,
}

impl IncidentFlags {
    pub fn any(&self) -> bool {
        self.source_stalled
            || self.target_stalled
            || self.critical_lag
            || self.high_error_rate
            || self.error_spike
    }

    /// Names of the flags currently raised
    pub fn raised(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.source_stalled {
            out.push("source_stalled");
        }
        if self.target_stalled {
            out.push("target_stalled");
        }
        if self.critical_lag {
            out.push("critical_lag");
        }
        if self.high_error_rate {
            out.push("high_error_rate");
        }
        if self.error_spike {
            out.push("error_spike");
        }
        out
    }
}
