use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::error::{CloseError, ConstructionError, ProbeError};
use crate::resources::{Close, Dependency, Probe};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_LIFETIME: Duration = Duration::from_secs(3600);

/// Postgres connection pool exposed to the core as a probe/close capability.
#[derive(Clone, Debug)]
pub struct PostgresResource {
    pool: PgPool,
}

impl PostgresResource {
    /// Opens the pool and checks that one connection can be established.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, ConstructionError> {
        info!("connecting to database");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .max_lifetime(MAX_LIFETIME)
            .connect(url)
            .await
            .map_err(|e| ConstructionError::Connect {
                dependency: Dependency::Database,
                reason: e.to_string(),
            })?;
        info!("connected to database");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Probe for PostgresResource {
    async fn probe(&self) -> Result<(), ProbeError> {
        if self.pool.is_closed() {
            return Err(ProbeError::Closed);
        }
        // Bounded by the pool's acquire timeout.
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                sqlx::Error::PoolTimedOut => ProbeError::Timeout(ACQUIRE_TIMEOUT),
                sqlx::Error::PoolClosed => ProbeError::Closed,
                other => ProbeError::Unreachable(other.to_string()),
            })
    }
}

#[async_trait]
impl Close for PostgresResource {
    async fn close(&self) -> Result<(), CloseError> {
        self.pool.close().await;
        Ok(())
    }
}
