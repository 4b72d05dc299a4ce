use std::sync::Arc;

use anyhow::Result;
use appcore::circuit_breaker::CircuitBreakerRegistry;
use appcore::config::Config;
use appcore::module::ModuleCapability;
use appcore::observability::{init_tracing, shutdown_tracing};
use appcore::resources::postgres::PostgresResource;
use appcore::resources::redis::RedisResource;
use appcore::{Service, ServiceInfo};
use envconfig::Envconfig;
use tokio::signal;
use tonic::service::Routes;
use tracing::{info, warn};

use crate::module::HelloModule;

mod module;

const SERVICE_NAME: &str = "hello-service";

async fn shutdown() -> std::io::Result<()> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully...");
    Ok(())
}

#[cfg(feature = "kafka")]
async fn with_broker(service: Service, config: &Config) -> Result<Service> {
    use appcore::resources::kafka::KafkaResource;

    Ok(match &config.kafka_hosts {
        Some(hosts) => service.broker(Arc::new(KafkaResource::connect(hosts).await?)),
        None => service,
    })
}

#[cfg(not(feature = "kafka"))]
async fn with_broker(service: Service, config: &Config) -> Result<Service> {
    if config.kafka_hosts.is_some() {
        warn!("KAFKA_HOSTS is set but this build has no kafka support, ignoring");
    }
    Ok(service)
}

#[cfg(feature = "s3")]
fn with_storage(service: Service, config: &Config) -> Result<Service> {
    use appcore::resources::s3::S3Resource;

    Ok(match &config.storage.endpoint {
        Some(endpoint) => service.storage(Arc::new(S3Resource::connect(endpoint, &config.storage)?)),
        None => service,
    })
}

#[cfg(not(feature = "s3"))]
fn with_storage(service: Service, config: &Config) -> Result<Service> {
    if config.storage.endpoint.is_some() {
        warn!("STORAGE_ENDPOINT is set but this build has no s3 support, ignoring");
    }
    Ok(service)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env()?;
    init_tracing(&config, SERVICE_NAME)?;

    let info = ServiceInfo::new(SERVICE_NAME, env!("CARGO_PKG_VERSION"));
    let breakers = Arc::new(CircuitBreakerRegistry::new());

    let cache = match &config.redis_url {
        Some(url) => Some(Arc::new(RedisResource::connect(url).await?)),
        None => None,
    };

    let module = HelloModule::new(breakers, cache.clone());
    let mut service = Service::new(
        &config,
        info,
        ModuleCapability::DualListener {
            module: Arc::new(module),
            rpc: Routes::default(),
        },
    );

    if let Some(url) = &config.database_url {
        let database = PostgresResource::connect(url, config.max_pg_connections).await?;
        service = service.database(Arc::new(database));
    }
    if let Some(cache) = cache {
        service = service.cache(cache);
    }
    let service = with_broker(service, &config).await?;
    let service = with_storage(service, &config)?;

    let mut orchestrator = service.build().await?;
    orchestrator.run().await?;

    shutdown().await?;

    let report = orchestrator.stop().await;
    if !report.is_clean() {
        warn!(errors = report.errors.len(), "some resources did not shut down cleanly");
    }
    shutdown_tracing();

    Ok(())
}
