use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info};

use crate::error::{ListenerError, ShutdownError};
use crate::listener::Listener;
use crate::resources::ResourceSet;

/// The listeners a service runs, decided when the service is built.
pub enum Listeners {
    SingleListener {
        api: Box<dyn Listener>,
    },
    DualListener {
        api: Box<dyn Listener>,
        rpc: Box<dyn Listener>,
    },
}

impl Listeners {
    fn api(&self) -> &dyn Listener {
        match self {
            Listeners::SingleListener { api } | Listeners::DualListener { api, .. } => api.as_ref(),
        }
    }

    fn rpc(&self) -> Option<&dyn Listener> {
        match self {
            Listeners::SingleListener { .. } => None,
            Listeners::DualListener { rpc, .. } => Some(rpc.as_ref()),
        }
    }
}

/// Errors recorded while stopping. Empty when every step succeeded.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub errors: Vec<ShutdownError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Starts the listeners of a service and tears the service down again.
pub struct LifecycleOrchestrator {
    resources: Arc<ResourceSet>,
    listeners: Listeners,
    shutdown_timeout: Duration,
}

impl LifecycleOrchestrator {
    pub fn new(
        resources: Arc<ResourceSet>,
        listeners: Listeners,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            resources,
            listeners,
            shutdown_timeout,
        }
    }

    pub fn resources(&self) -> &Arc<ResourceSet> {
        &self.resources
    }

    /// Address the primary API listener is bound to.
    pub fn api_address(&self) -> std::net::SocketAddr {
        self.listeners.api().local_addr()
    }

    pub fn rpc_address(&self) -> Option<std::net::SocketAddr> {
        self.listeners.rpc().map(|rpc| rpc.local_addr())
    }

    /// Launches the API listener and, when declared, the RPC listener. Returns
    /// as soon as both serve loops are running.
    pub async fn run(&mut self) -> Result<(), ListenerError> {
        let info = self.resources.info();
        info!(service = %info.name, version = %info.version, "starting service");

        match &mut self.listeners {
            Listeners::SingleListener { api } => api.start().await,
            Listeners::DualListener { api, rpc } => {
                api.start().await?;
                rpc.start().await
            }
        }
    }

    /// Stops the listeners against one shared deadline, then closes the
    /// database, broker and cache, in that order. Every step runs even when an
    /// earlier one failed; failures are logged and collected in the report.
    pub async fn stop(self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let deadline = Instant::now() + self.shutdown_timeout;
        info!(timeout = ?self.shutdown_timeout, "shutting down");

        let mut listeners: Vec<Box<dyn Listener>> = match self.listeners {
            Listeners::SingleListener { api } => vec![api],
            Listeners::DualListener { api, rpc } => vec![api, rpc],
        };
        for listener in listeners.iter_mut() {
            let kind = listener.kind();
            match listener.shutdown(deadline).await {
                Ok(()) => info!(listener = %kind, "listener stopped"),
                Err(e) => {
                    error!(listener = %kind, "{}", e);
                    report.errors.push(e);
                }
            }
        }

        for (dependency, resource) in self.resources.closers() {
            match resource.close().await {
                Ok(()) => info!(%dependency, "closed"),
                Err(source) => {
                    let e = ShutdownError::Close {
                        dependency: *dependency,
                        source,
                    };
                    error!(%dependency, "{}", e);
                    report.errors.push(e);
                }
            }
        }

        match report.is_clean() {
            true => info!("shutdown complete"),
            false => error!(errors = report.errors.len(), "shutdown finished with errors"),
        }
        report
    }
}

impl fmt::Debug for LifecycleOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleOrchestrator")
            .field("resources", &self.resources)
            .field("api_address", &self.api_address())
            .field("rpc_address", &self.rpc_address())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::always;
    use mockall::Sequence;

    use crate::error::CloseError;
    use crate::listener::{ListenerKind, MockListener};
    use crate::resources::mock::MockResource;
    use crate::resources::Dependency;
    use crate::ServiceInfo;

    use super::*;

    fn listener(kind: ListenerKind) -> MockListener {
        let mut listener = MockListener::new();
        listener.expect_kind().return_const(kind);
        listener
    }

    fn resources(database: &MockResource, cache: &MockResource, broker: &MockResource) -> Arc<ResourceSet> {
        Arc::new(
            ResourceSet::builder(ServiceInfo::new("orders", "1.2.0"))
                .database(Arc::new(database.clone()))
                .cache(Arc::new(cache.clone()))
                .broker(Arc::new(broker.clone()))
                .build(),
        )
    }

    #[tokio::test]
    async fn run_starts_both_listeners() {
        let mut seq = Sequence::new();
        let mut api = listener(ListenerKind::Api);
        api.expect_start()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        let mut rpc = listener(ListenerKind::Rpc);
        rpc.expect_start()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let set = Arc::new(ResourceSet::builder(ServiceInfo::new("orders", "1.2.0")).build());
        let mut orchestrator = LifecycleOrchestrator::new(
            set,
            Listeners::DualListener {
                api: Box::new(api),
                rpc: Box::new(rpc),
            },
            Duration::from_secs(5),
        );

        assert_eq!(orchestrator.run().await, Ok(()));
    }

    #[tokio::test]
    async fn rpc_is_not_started_when_api_fails() {
        let mut api = listener(ListenerKind::Api);
        api.expect_start()
            .returning(|| Err(ListenerError::AlreadyStarted(ListenerKind::Api)));
        let mut rpc = listener(ListenerKind::Rpc);
        rpc.expect_start().never();

        let set = Arc::new(ResourceSet::builder(ServiceInfo::new("orders", "1.2.0")).build());
        let mut orchestrator = LifecycleOrchestrator::new(
            set,
            Listeners::DualListener {
                api: Box::new(api),
                rpc: Box::new(rpc),
            },
            Duration::from_secs(5),
        );

        assert!(orchestrator.run().await.is_err());
    }

    #[tokio::test]
    async fn stop_runs_every_step_despite_failures() {
        let mut api = listener(ListenerKind::Api);
        api.expect_shutdown()
            .with(always())
            .times(1)
            .returning(|_| {
                Err(ShutdownError::Deadline {
                    listener: ListenerKind::Api,
                })
            });
        let mut rpc = listener(ListenerKind::Rpc);
        rpc.expect_shutdown().times(1).returning(|_| Ok(()));

        let database = MockResource::healthy().close_ret(Err(CloseError::Failed("boom".to_owned())));
        let cache = MockResource::healthy();
        let broker = MockResource::healthy();

        let orchestrator = LifecycleOrchestrator::new(
            resources(&database, &cache, &broker),
            Listeners::DualListener {
                api: Box::new(api),
                rpc: Box::new(rpc),
            },
            Duration::from_secs(5),
        );
        let report = orchestrator.stop().await;

        assert_eq!(database.close_calls(), 1);
        assert_eq!(broker.close_calls(), 1);
        assert_eq!(cache.close_calls(), 1);
        assert_eq!(
            report.errors,
            vec![
                ShutdownError::Deadline {
                    listener: ListenerKind::Api
                },
                ShutdownError::Close {
                    dependency: Dependency::Database,
                    source: CloseError::Failed("boom".to_owned()),
                },
            ]
        );
    }

    #[tokio::test]
    async fn listeners_share_one_deadline() {
        let mut api = listener(ListenerKind::Api);
        let mut rpc = listener(ListenerKind::Rpc);
        let (tx, rx) = std::sync::mpsc::channel();
        let tx_rpc = tx.clone();
        api.expect_shutdown().returning(move |deadline| {
            tx.send(deadline).unwrap();
            Ok(())
        });
        rpc.expect_shutdown().returning(move |deadline| {
            tx_rpc.send(deadline).unwrap();
            Ok(())
        });

        let set = Arc::new(ResourceSet::builder(ServiceInfo::new("orders", "1.2.0")).build());
        let report = LifecycleOrchestrator::new(
            set,
            Listeners::DualListener {
                api: Box::new(api),
                rpc: Box::new(rpc),
            },
            Duration::from_secs(5),
        )
        .stop()
        .await;

        assert!(report.is_clean());
        let first = rx.recv().unwrap();
        let second = rx.recv().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn absent_resources_are_skipped() {
        let mut api = listener(ListenerKind::Api);
        api.expect_shutdown().times(1).returning(|_| Ok(()));

        let set = Arc::new(ResourceSet::builder(ServiceInfo::new("orders", "1.2.0")).build());
        let report = LifecycleOrchestrator::new(
            set,
            Listeners::SingleListener { api: Box::new(api) },
            Duration::from_secs(5),
        )
        .stop()
        .await;

        assert_eq!(report, ShutdownReport::default());
    }
}
