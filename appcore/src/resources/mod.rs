//! Capability contract between the core and the downstream clients.
//!
//! The core never sees a database pool or a redis connection, only something
//! that can be probed and something that can be closed. Presence is decided
//! once, when the [`ResourceSet`] is built: absent dependencies simply have no
//! entry in the probe and close lists, so consumers never re-check for them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, Serializer};

use crate::error::{CloseError, ProbeError};
use crate::service::ServiceInfo;

pub mod grpc;
pub mod mock;
#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;
#[cfg(feature = "s3")]
pub mod s3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dependency {
    Database,
    Cache,
    Broker,
    Storage,
    Grpc,
}

impl Dependency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dependency::Database => "database",
            Dependency::Cache => "cache",
            Dependency::Broker => "broker",
            Dependency::Storage => "storage",
            Dependency::Grpc => "grpc",
        }
    }

    /// Message returned to health-check callers when this dependency fails.
    pub fn failure_message(&self) -> &'static str {
        match self {
            Dependency::Database => "cannot ping to database service",
            Dependency::Cache => "cannot ping to cache service",
            Dependency::Broker => "cannot ping to Message Broker service",
            Dependency::Storage => "cannot ping to storage service",
            Dependency::Grpc => "cannot ping to GRPC service",
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Dependency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    /// Bounded connectivity check. Implementations choose their own bound.
    async fn probe(&self) -> Result<(), ProbeError>;
}

#[async_trait]
pub trait Close: Send + Sync {
    async fn close(&self) -> Result<(), CloseError>;
}

/// Immutable view of what this service instance is wired to.
pub struct ResourceSet {
    info: ServiceInfo,
    present: Vec<Dependency>,
    probes: Vec<(Dependency, Arc<dyn Probe>)>,
    closers: Vec<(Dependency, Arc<dyn Close>)>,
}

impl ResourceSet {
    pub fn builder(info: ServiceInfo) -> ResourceSetBuilder {
        ResourceSetBuilder {
            info,
            database: None,
            cache: None,
            broker: None,
            storage: false,
            grpc: None,
        }
    }

    pub fn info(&self) -> &ServiceInfo {
        &self.info
    }

    /// Probes of present dependencies, in health-check order:
    /// database, cache, broker, then the RPC listener.
    pub fn probes(&self) -> &[(Dependency, Arc<dyn Probe>)] {
        &self.probes
    }

    /// Closers of present dependencies, in shutdown order: database, broker, cache.
    pub fn closers(&self) -> &[(Dependency, Arc<dyn Close>)] {
        &self.closers
    }

    pub fn is_present(&self, dependency: Dependency) -> bool {
        self.present.contains(&dependency)
    }

    pub fn has_rpc_listener(&self) -> bool {
        self.is_present(Dependency::Grpc)
    }
}

impl fmt::Debug for ResourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSet")
            .field("info", &self.info)
            .field("present", &self.present)
            .finish()
    }
}

type Handle = (Arc<dyn Probe>, Arc<dyn Close>);

pub struct ResourceSetBuilder {
    info: ServiceInfo,
    database: Option<Handle>,
    cache: Option<Handle>,
    broker: Option<Handle>,
    storage: bool,
    grpc: Option<Arc<dyn Probe>>,
}

fn handle<R: Probe + Close + 'static>(resource: Arc<R>) -> Handle {
    let probe: Arc<dyn Probe> = resource.clone();
    let close: Arc<dyn Close> = resource;
    (probe, close)
}

impl ResourceSetBuilder {
    pub fn database<R: Probe + Close + 'static>(mut self, resource: Arc<R>) -> Self {
        self.database = Some(handle(resource));
        self
    }

    pub fn cache<R: Probe + Close + 'static>(mut self, resource: Arc<R>) -> Self {
        self.cache = Some(handle(resource));
        self
    }

    pub fn broker<R: Probe + Close + 'static>(mut self, resource: Arc<R>) -> Self {
        self.broker = Some(handle(resource));
        self
    }

    /// The object store is tracked for presence only: it takes part in neither
    /// health probing nor shutdown.
    pub fn storage<R: Probe + Close + 'static>(mut self, _resource: Arc<R>) -> Self {
        self.storage = true;
        self
    }

    /// Declares the secondary RPC listener, checked through `probe`.
    pub fn grpc(mut self, probe: Arc<dyn Probe>) -> Self {
        self.grpc = Some(probe);
        self
    }

    pub fn build(self) -> ResourceSet {
        let mut present = Vec::new();
        let mut probes = Vec::new();
        let mut closers = Vec::new();

        if let Some((probe, _)) = &self.database {
            present.push(Dependency::Database);
            probes.push((Dependency::Database, probe.clone()));
        }
        if let Some((probe, _)) = &self.cache {
            present.push(Dependency::Cache);
            probes.push((Dependency::Cache, probe.clone()));
        }
        if let Some((probe, _)) = &self.broker {
            present.push(Dependency::Broker);
            probes.push((Dependency::Broker, probe.clone()));
        }
        if self.storage {
            present.push(Dependency::Storage);
        }
        if let Some(probe) = self.grpc {
            present.push(Dependency::Grpc);
            probes.push((Dependency::Grpc, probe));
        }

        for (dependency, resource) in [
            (Dependency::Database, self.database),
            (Dependency::Broker, self.broker),
            (Dependency::Cache, self.cache),
        ] {
            if let Some((_, close)) = resource {
                closers.push((dependency, close));
            }
        }

        ResourceSet {
            info: self.info,
            present,
            probes,
            closers,
        }
    }
}
