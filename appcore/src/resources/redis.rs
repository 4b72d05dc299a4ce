use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::info;

use crate::error::{CloseError, ConstructionError, ProbeError};
use crate::resources::{Close, Dependency, Probe};

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis cache exposed to the core as a probe/close capability.
///
/// The multiplexed connection is cheap to clone; closing drops our copy, which
/// tears the connection down once in-flight clones are gone.
pub struct RedisResource {
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl RedisResource {
    /// `url` carries credentials when needed, e.g. `redis://:password@host:6379/0`.
    pub async fn connect(url: &str) -> Result<Self, ConstructionError> {
        let connect_error = |e: redis::RedisError| ConstructionError::Connect {
            dependency: Dependency::Cache,
            reason: e.to_string(),
        };

        let client = redis::Client::open(url).map_err(connect_error)?;
        let mut connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connect_error)?;

        redis::cmd("PING")
            .query_async::<String>(&mut connection)
            .await
            .map_err(connect_error)?;
        info!("connected to cache");

        Ok(Self {
            connection: RwLock::new(Some(connection)),
        })
    }

    /// A handle for issuing commands, or `None` once the resource is closed.
    pub fn connection(&self) -> Option<MultiplexedConnection> {
        self.connection
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Probe for RedisResource {
    async fn probe(&self) -> Result<(), ProbeError> {
        let mut connection = self.connection().ok_or(ProbeError::Closed)?;

        let cmd = redis::cmd("PING");
        let ping = cmd.query_async::<String>(&mut connection);
        match tokio::time::timeout(PING_TIMEOUT, ping).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ProbeError::Unreachable(e.to_string())),
            Err(_) => Err(ProbeError::Timeout(PING_TIMEOUT)),
        }
    }
}

#[async_trait]
impl Close for RedisResource {
    async fn close(&self) -> Result<(), CloseError> {
        let previous = self
            .connection
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match previous {
            Some(connection) => {
                drop(connection);
                Ok(())
            }
            None => Err(CloseError::Failed("cache connection already closed".to_owned())),
        }
    }
}
