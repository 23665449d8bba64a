//! Cluster client factory: turns a persisted cluster descriptor into a
//! configured `rdkafka::ClientConfig` for a consumer, producer, or admin
//! role. Pure configuration; the returned client connects lazily on first
//! use.

use std::str::FromStr;

use rdkafka::config::ClientConfig;

use crate::error::{MirrorError, Result};
use crate::store::models::KafkaCluster;
use crate::types::{ClusterProvider, CompressionType, SecurityConfig, SecurityProtocol, SslConfig};

/// Producer options taken from a job's tuning
#[derive(Debug, Clone)]
pub struct ProducerTuning {
    pub batch_size: i64,
    pub compression: CompressionType,
}

/// Base configuration shared by every role.
fn base_config(cluster: &KafkaCluster) -> Result<ClientConfig> {
    let provider = ClusterProvider::from_str(&cluster.provider)?;

    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", &cluster.brokers);

    let security = cluster
        .security()
        .map_err(|e| MirrorError::configuration(format!("invalid security profile: {e}")))?;

    match provider {
        ClusterProvider::Azure if connection_string(cluster, &security).is_some() => {
            let conn = connection_string(cluster, &security).unwrap();
            parse_event_hubs_connection_string(&conn)?;
            config.set("security.protocol", "SASL_SSL");
            config.set("sasl.mechanism", "PLAIN");
            config.set("sasl.username", "$ConnectionString");
            config.set("sasl.password", conn);
        }
        ClusterProvider::Confluent if !cluster.api_key.is_empty() => {
            config.set("security.protocol", "SASL_SSL");
            config.set("sasl.mechanism", "PLAIN");
            config.set("sasl.username", &cluster.api_key);
            config.set("sasl.password", &cluster.api_secret);
        }
        _ => apply_security(&mut config, &security)?,
    }

    Ok(config)
}

fn connection_string(cluster: &KafkaCluster, security: &SecurityConfig) -> Option<String> {
    cluster
        .connection_string
        .clone()
        .or_else(|| security.connection_string.clone())
        .filter(|s| !s.is_empty())
}

/// Apply an explicit security profile to a client configuration.
fn apply_security(config: &mut ClientConfig, security: &SecurityConfig) -> Result<()> {
    if !security.enabled {
        return Ok(());
    }

    config.set("security.protocol", security.protocol.as_str());

    if matches!(
        security.protocol,
        SecurityProtocol::Ssl | SecurityProtocol::SaslSsl
    ) {
        if let Some(ssl) = &security.ssl {
            apply_ssl(config, ssl);
        }
    }

    let Some(mechanism) = security.sasl_mechanism.as_deref() else {
        return Ok(());
    };

    match mechanism {
        "PLAIN" | "SCRAM-SHA-256" | "SCRAM-SHA-512" => {
            let (Some(username), Some(password)) =
                (security.username.as_deref(), security.password.as_deref())
            else {
                return Err(MirrorError::configuration(
                    "username and password are required",
                ));
            };
            config.set("sasl.mechanism", mechanism);
            config.set("sasl.username", username);
            config.set("sasl.password", password);
        }
        "GSSAPI" => {
            let Some(service_name) = security.service_name.as_deref() else {
                return Err(MirrorError::configuration(
                    "Kerberos service name is required",
                ));
            };
            config.set("sasl.mechanism", "GSSAPI");
            config.set("sasl.kerberos.service.name", service_name);
        }
        "OAUTHBEARER" => {
            config.set("sasl.mechanism", "OAUTHBEARER");
        }
        other => {
            return Err(MirrorError::configuration(format!(
                "unsupported SASL mechanism: {other}"
            )));
        }
    }

    Ok(())
}

fn apply_ssl(config: &mut ClientConfig, ssl: &SslConfig) {
    if let Some(ca) = &ssl.ca_cert_path {
        config.set("ssl.ca.location", ca);
    }
    if let Some(cert) = &ssl.cert_path {
        config.set("ssl.certificate.location", cert);
    }
    if let Some(key) = &ssl.key_path {
        config.set("ssl.key.location", key);
    }
    if let Some(password) = &ssl.key_password {
        config.set("ssl.key.password", password);
    }
    if !ssl.verify_certificates {
        config.set("ssl.endpoint.identification.algorithm", "none");
    }
}

/// Parsed Event Hubs connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHubsEndpoint {
    pub endpoint: String,
    pub key_name: String,
    pub key: String,
}

/// Parse an Azure Event Hubs connection string of the form
/// `Endpoint=sb://…;SharedAccessKeyName=…;SharedAccessKey=…`.
pub fn parse_event_hubs_connection_string(conn: &str) -> Result<EventHubsEndpoint> {
    let mut endpoint = None;
    let mut key_name = None;
    let mut key = None;

    for part in conn.split(';') {
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        match name {
            "Endpoint" => endpoint = Some(value.trim_end_matches('/').to_string()),
            "SharedAccessKeyName" => key_name = Some(value.to_string()),
            // The key itself may contain '='; split_once keeps the rest.
            "SharedAccessKey" => key = Some(part["SharedAccessKey=".len()..].to_string()),
            _ => {}
        }
    }

    match (endpoint, key_name, key) {
        (Some(endpoint), Some(key_name), Some(key)) => Ok(EventHubsEndpoint {
            endpoint,
            key_name,
            key,
        }),
        _ => Err(MirrorError::configuration(
            "invalid Event Hubs connection string",
        )),
    }
}

/// Configuration for a source-cluster consumer joined to `group_id`.
///
/// Auto-commit stays off; the engine owns offsets in the persistent store.
pub fn consumer_config(cluster: &KafkaCluster, group_id: &str) -> Result<ClientConfig> {
    let mut config = base_config(cluster)?;
    config.set("group.id", group_id);
    config.set("client.id", format!("{group_id}-consumer"));
    config.set("enable.auto.commit", "false");
    config.set("auto.offset.reset", "earliest");
    config.set("session.timeout.ms", "30000");
    config.set("enable.partition.eof", "false");
    Ok(config)
}

/// Configuration for a target-cluster producer with the job's tuning.
pub fn producer_config(
    cluster: &KafkaCluster,
    tuning: &ProducerTuning,
    client_id: &str,
) -> Result<ClientConfig> {
    let mut config = base_config(cluster)?;
    config.set("client.id", client_id);
    config.set("compression.codec", tuning.compression.as_str());
    config.set("batch.num.messages", tuning.batch_size.max(1).to_string());
    config.set("enable.idempotence", "true");
    config.set("message.timeout.ms", "30000");
    Ok(config)
}

/// Configuration for an admin/metadata client.
pub fn admin_config(cluster: &KafkaCluster, client_id: &str) -> Result<ClientConfig> {
    let mut config = base_config(cluster)?;
    config.set("client.id", client_id);
    Ok(config)
}
