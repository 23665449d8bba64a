//! Target-cluster producer wrapper. Compression and batch size come from
//! the job's tuning; partition preservation is expressed by setting an
//! explicit partition on the outbound record.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};

use super::factory::{self, ProducerTuning};
use crate::error::{MirrorError, Result};
use crate::store::models::KafkaCluster;

/// One record headed for the target cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    /// Set when the job preserves source partitions
    pub partition: Option<i32>,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl OutboundRecord {
    /// Payload plus key bytes, for byte accounting.
    pub fn byte_size(&self) -> i64 {
        let key = self.key.as_ref().map(|k| k.len()).unwrap_or(0);
        let payload = self.payload.as_ref().map(|p| p.len()).unwrap_or(0);
        (key + payload) as i64
    }
}

/// The engine's view of a target producer
#[async_trait]
pub trait TargetProducer: Send + Sync {
    /// Produce one record, resolving to `(partition, offset)` on the
    /// target once the broker acknowledges it.
    async fn send(&self, record: OutboundRecord) -> Result<(i32, i64)>;

    /// Flush buffered records within the deadline.
    async fn flush(&self, timeout: Duration) -> Result<()>;
}

/// rdkafka-backed target producer
pub struct KafkaTargetProducer {
    inner: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaTargetProducer {
    /// Build a producer for the cluster with the job's tuning. Connection
    /// is lazy; this performs no I/O.
    pub fn connect(cluster: &KafkaCluster, tuning: &ProducerTuning, client_id: &str) -> Result<Self> {
        let producer: FutureProducer =
            factory::producer_config(cluster, tuning, client_id)?.create()?;
        Ok(Self {
            inner: producer,
            delivery_timeout: Duration::from_secs(30),
        })
    }
}

#[async_trait]
impl TargetProducer for KafkaTargetProducer {
    async fn send(&self, record: OutboundRecord) -> Result<(i32, i64)> {
        let mut headers = OwnedHeaders::new_with_capacity(record.headers.len());
        for (key, value) in &record.headers {
            headers = headers.insert(Header {
                key,
                value: Some(value),
            });
        }

        let mut outbound: FutureRecord<'_, Vec<u8>, Vec<u8>> =
            FutureRecord::to(&record.topic).headers(headers);
        if let Some(partition) = record.partition {
            outbound = outbound.partition(partition);
        }
        if let Some(key) = &record.key {
            outbound = outbound.key(key);
        }
        if let Some(payload) = &record.payload {
            outbound = outbound.payload(payload);
        }

        match self.inner.send(outbound, self.delivery_timeout).await {
            Ok((partition, offset)) => Ok((partition, offset)),
            Err((error, message)) => Err(MirrorError::Produce {
                message: error.to_string(),
                topic: record.topic,
                partition: rdkafka::message::Message::partition(&message),
            }),
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let producer = self.inner.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| MirrorError::internal(format!("flush task failed: {e}")))??;
        Ok(())
    }
}
