use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use crate::config::Config;
use crate::error::ConstructionError;
use crate::health::HealthAggregator;
use crate::lifecycle::{LifecycleOrchestrator, Listeners};
use crate::listener::{ApiListener, Listener, RpcListener};
use crate::metrics::setup_metrics_recorder;
use crate::module::ModuleCapability;
use crate::resources::grpc::GrpcHealthProbe;
use crate::resources::{Close, Probe, ResourceSet, ResourceSetBuilder};
use crate::router::router;

/// Identity reported by the health endpoint and attached to log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Assembles a service from its configuration, module and already-connected
/// dependencies. Nothing is served until the orchestrator returned by
/// [`Service::build`] is run.
pub struct Service {
    config: Config,
    info: ServiceInfo,
    capability: ModuleCapability,
    resources: ResourceSetBuilder,
    metrics: Option<PrometheusHandle>,
}

impl Service {
    pub fn new(config: &Config, info: ServiceInfo, capability: ModuleCapability) -> Self {
        Self {
            config: config.clone(),
            resources: ResourceSet::builder(info.clone()),
            info,
            capability,
            metrics: None,
        }
    }

    pub fn database<R: Probe + Close + 'static>(mut self, resource: Arc<R>) -> Self {
        self.resources = self.resources.database(resource);
        self
    }

    pub fn cache<R: Probe + Close + 'static>(mut self, resource: Arc<R>) -> Self {
        self.resources = self.resources.cache(resource);
        self
    }

    pub fn broker<R: Probe + Close + 'static>(mut self, resource: Arc<R>) -> Self {
        self.resources = self.resources.broker(resource);
        self
    }

    pub fn storage<R: Probe + Close + 'static>(mut self, resource: Arc<R>) -> Self {
        self.resources = self.resources.storage(resource);
        self
    }

    /// Serves `/metrics` from an already installed recorder. Without this,
    /// `EXPORT_PROMETHEUS=true` installs one during [`Service::build`].
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Binds the listeners and wires the health route. Bind failures and an
    /// unusable RPC port are returned as construction errors.
    pub async fn build(self) -> Result<LifecycleOrchestrator, ConstructionError> {
        let Service {
            config,
            info,
            capability,
            mut resources,
            metrics,
        } = self;

        let (module, rpc_routes) = match capability {
            ModuleCapability::SingleListener(module) => (module, None),
            ModuleCapability::DualListener { module, rpc } => (module, Some(rpc)),
        };

        let rpc = match rpc_routes {
            Some(routes) => Some(RpcListener::bind(config.rpc_address()?, routes).await?),
            None => None,
        };
        if let Some(rpc) = &rpc {
            resources = resources.grpc(Arc::new(GrpcHealthProbe::new(rpc.local_addr())));
        }
        let resources = Arc::new(resources.build());
        info!(resources = ?resources, "resources ready");

        let metrics = match (metrics, config.export_prometheus) {
            (Some(handle), _) => Some(handle),
            (None, true) => Some(
                setup_metrics_recorder().map_err(|e| ConstructionError::Metrics(e.to_string()))?,
            ),
            (None, false) => None,
        };

        let health = HealthAggregator::new(resources.clone());
        let app = router(&info, health, module.as_ref(), metrics);
        let api = ApiListener::bind(config.api_address(), app).await?;

        let listeners = match rpc {
            Some(rpc) => Listeners::DualListener {
                api: Box::new(api),
                rpc: Box::new(rpc),
            },
            None => Listeners::SingleListener { api: Box::new(api) },
        };

        Ok(LifecycleOrchestrator::new(
            resources,
            listeners,
            config.shutdown_timeout(),
        ))
    }
}
