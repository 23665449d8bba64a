//! # Error Handling Module
//!
//! Structured error types for the replication service. Every failure mode a
//! running job can hit maps onto one variant here, together with its
//! severity, retryability, and a stable category name for logging.

use std::fmt;
use thiserror::Error;

/// Main error type for the replication service
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Invalid or incomplete configuration (credentials, mechanisms, providers)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Cluster topology incompatible with the requested replication mode
    #[error("Topology error: {message}")]
    Topology {
        message: String,
        topic: Option<String>,
    },

    /// Start-up failure (topic discovery, client construction, deadline)
    #[error("Startup error: {message}")]
    Startup { message: String },

    /// Transient broker-side error, retried by the client
    #[error("Kafka error: {message}")]
    Kafka {
        message: String,
        topic: Option<String>,
        partition: Option<i32>,
    },

    /// A record the target broker rejected
    #[error("Produce error: {message}")]
    Produce {
        message: String,
        topic: String,
        partition: i32,
    },

    /// A fetched record that cannot be replicated
    #[error("Poison record: {message}")]
    ConsumePoison {
        message: String,
        topic: String,
        partition: i32,
        offset: i64,
    },

    /// Persistence failure
    #[error("Store error: {message}")]
    Store {
        message: String,
        operation: Option<String>,
    },

    /// A durable-state invariant was violated
    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },

    /// Shutdown drain deadline exceeded with records still in flight
    #[error("Drain timeout: {in_flight} records still in flight after {deadline_secs}s")]
    DrainTimeout { in_flight: u64, deadline_secs: u64 },

    /// A bounded operation ran out of time
    #[error("Timeout: {operation} exceeded {timeout_secs}s")]
    Timeout {
        operation: String,
        timeout_secs: u64,
    },

    /// Telemetry sink delivery failure; counted, never surfaced to jobs
    #[error("Telemetry error: {message}")]
    Telemetry { message: String },

    /// Anything that should never happen
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Error severity levels for categorization and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "low"),
            ErrorSeverity::Medium => write!(f, "medium"),
            ErrorSeverity::High => write!(f, "high"),
            ErrorSeverity::Critical => write!(f, "critical"),
        }
    }
}

impl MirrorError {
    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MirrorError::Configuration { .. } => ErrorSeverity::High,
            MirrorError::Topology { .. } => ErrorSeverity::High,
            MirrorError::Startup { .. } => ErrorSeverity::High,
            MirrorError::Kafka { .. } => ErrorSeverity::Medium,
            MirrorError::Produce { .. } => ErrorSeverity::Low,
            MirrorError::ConsumePoison { .. } => ErrorSeverity::Low,
            MirrorError::Store { .. } => ErrorSeverity::Medium,
            MirrorError::InvariantViolation { .. } => ErrorSeverity::High,
            MirrorError::DrainTimeout { .. } => ErrorSeverity::Medium,
            MirrorError::Timeout { .. } => ErrorSeverity::Medium,
            MirrorError::Telemetry { .. } => ErrorSeverity::Low,
            MirrorError::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    /// Whether the operation that produced this error is worth retrying.
    ///
    /// Per-record and store errors recover on the next batch or tick;
    /// configuration and invariant errors fail the job.
    pub fn is_retryable(&self) -> bool {
        match self {
            MirrorError::Configuration { .. } => false,
            MirrorError::Topology { .. } => false,
            MirrorError::Startup { .. } => false,
            MirrorError::Kafka { .. } => true,
            MirrorError::Produce { .. } => true,
            MirrorError::ConsumePoison { .. } => false,
            MirrorError::Store { .. } => true,
            MirrorError::InvariantViolation { .. } => false,
            MirrorError::DrainTimeout { .. } => false,
            MirrorError::Timeout { .. } => true,
            MirrorError::Telemetry { .. } => true,
            MirrorError::Internal { .. } => false,
        }
    }

    /// Whether this error must transition the owning job to `failed`
    pub fn is_fatal_for_job(&self) -> bool {
        matches!(
            self,
            MirrorError::Configuration { .. }
                | MirrorError::Topology { .. }
                | MirrorError::Startup { .. }
                | MirrorError::InvariantViolation { .. }
        )
    }

    /// Stable category name for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            MirrorError::Configuration { .. } => "configuration",
            MirrorError::Topology { .. } => "topology",
            MirrorError::Startup { .. } => "startup",
            MirrorError::Kafka { .. } => "kafka",
            MirrorError::Produce { .. } => "produce",
            MirrorError::ConsumePoison { .. } => "consume_poison",
            MirrorError::Store { .. } => "store",
            MirrorError::InvariantViolation { .. } => "invariant_violation",
            MirrorError::DrainTimeout { .. } => "drain_timeout",
            MirrorError::Timeout { .. } => "timeout",
            MirrorError::Telemetry { .. } => "telemetry",
            MirrorError::Internal { .. } => "internal",
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a topology error
    pub fn topology<S: Into<String>>(message: S) -> Self {
        Self::Topology {
            message: message.into(),
            topic: None,
        }
    }

    /// Create a start-up error
    pub fn startup<S: Into<String>>(message: S) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }

    /// Create a transient Kafka error
    pub fn kafka<S: Into<String>>(message: S) -> Self {
        Self::Kafka {
            message: message.into(),
            topic: None,
            partition: None,
        }
    }

    /// Create a store error
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a store error with the failing operation attached
    pub fn store_op<S: Into<String>>(message: S, operation: S) -> Self {
        Self::Store {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    /// Create an invariant violation
    pub fn invariant<S: Into<String>>(message: S) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for replication service operations
pub type Result<T> = std::result::Result<T, MirrorError>;

impl From<sqlx::Error> for MirrorError {
    fn from(err: sqlx::Error) -> Self {
        MirrorError::Store {
            message: err.to_string(),
            operation: None,
        }
    }
}

impl From<rdkafka::error::KafkaError> for MirrorError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        MirrorError::Kafka {
            message: err.to_string(),
            topic: None,
            partition: None,
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::Store {
            message: err.to_string(),
            operation: Some("serialize".to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for MirrorError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        MirrorError::Timeout {
            operation: err.to_string(),
            timeout_secs: 0,
        }
    }
}
