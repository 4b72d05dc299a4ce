use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::ClientConfig;
use tracing::{debug, error, info};

use crate::error::{CloseError, ConstructionError, ProbeError};
use crate::resources::{Close, Dependency, Probe};

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka producer exposed to the core as a probe/close capability.
#[derive(Clone)]
pub struct KafkaResource {
    producer: FutureProducer,
}

impl KafkaResource {
    pub async fn connect(hosts: &str) -> Result<Self, ConstructionError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", hosts)
            .set("linger.ms", "20")
            .set("message.timeout.ms", "20000");
        debug!("rdkafka configuration: {:?}", client_config);

        let producer: FutureProducer =
            client_config
                .create()
                .map_err(|e: KafkaError| ConstructionError::Connect {
                    dependency: Dependency::Broker,
                    reason: e.to_string(),
                })?;

        let resource = Self { producer };
        // "Ping" the brokers by requesting metadata
        resource.fetch_metadata().await.map_err(|e| {
            error!("failed to fetch metadata from kafka brokers: {}", e);
            ConstructionError::Connect {
                dependency: Dependency::Broker,
                reason: e.to_string(),
            }
        })?;
        info!("connected to message broker");

        Ok(resource)
    }

    pub fn producer(&self) -> &FutureProducer {
        &self.producer
    }

    async fn fetch_metadata(&self) -> Result<usize, ProbeError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| ProbeError::Unreachable(e.to_string()))?
        .map_err(|e| ProbeError::Unreachable(e.to_string()))
    }
}

#[async_trait]
impl Probe for KafkaResource {
    async fn probe(&self) -> Result<(), ProbeError> {
        match self.fetch_metadata().await? {
            0 => Err(ProbeError::Unreachable("no brokers available".to_owned())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Close for KafkaResource {
    /// Flushes pending messages; the producer itself is released on drop.
    async fn close(&self) -> Result<(), CloseError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT))
            .await
            .map_err(|e| CloseError::Failed(e.to_string()))?
            .map_err(|e| match e {
                KafkaError::Flush(_) => CloseError::Timeout(FLUSH_TIMEOUT),
                other => CloseError::Failed(other.to_string()),
            })
    }
}
