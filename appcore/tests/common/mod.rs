#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use appcore::config::Config;
use appcore::lifecycle::{LifecycleOrchestrator, ShutdownReport};
use appcore::module::{EmptyModule, ModuleCapability};
use appcore::resources::mock::MockResource;
use appcore::{Service, ServiceInfo};
use tonic::service::Routes;

pub fn test_config() -> Config {
    Config {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        grpc_port: Some(0),
        ..Config::default()
    }
}

pub fn test_info() -> ServiceInfo {
    ServiceInfo::new("orders", "1.2.0")
}

/// Mock dependencies to wire into a test server. `None` leaves it absent.
#[derive(Default)]
pub struct TestResources {
    pub database: Option<MockResource>,
    pub cache: Option<MockResource>,
    pub broker: Option<MockResource>,
}

pub struct ServerHandle {
    pub addr: SocketAddr,
    pub rpc_addr: Option<SocketAddr>,
    orchestrator: LifecycleOrchestrator,
}

impl ServerHandle {
    pub async fn start(resources: TestResources, capability: ModuleCapability) -> ServerHandle {
        let mut service = Service::new(&test_config(), test_info(), capability);
        if let Some(database) = resources.database {
            service = service.database(Arc::new(database));
        }
        if let Some(cache) = resources.cache {
            service = service.cache(Arc::new(cache));
        }
        if let Some(broker) = resources.broker {
            service = service.broker(Arc::new(broker));
        }

        let mut orchestrator = service.build().await.expect("failed to build service");
        orchestrator.run().await.expect("failed to start listeners");

        ServerHandle {
            addr: orchestrator.api_address(),
            rpc_addr: orchestrator.rpc_address(),
            orchestrator,
        }
    }

    pub async fn single(resources: TestResources) -> ServerHandle {
        Self::start(
            resources,
            ModuleCapability::SingleListener(Arc::new(EmptyModule)),
        )
        .await
    }

    pub async fn dual(resources: TestResources) -> ServerHandle {
        Self::start(
            resources,
            ModuleCapability::DualListener {
                module: Arc::new(EmptyModule),
                rpc: Routes::default(),
            },
        )
        .await
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("http://{}{}", self.addr, path))
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn stop(self) -> ShutdownReport {
        self.orchestrator.stop().await
    }
}
